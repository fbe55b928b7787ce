//! Named connection profiles and JSON persistence.

use std::path::{Path, PathBuf};
use std::{fs, io};

use anyhow::{Context, Result};
use nmx::{DEFAULT_MTU, Endpoint, ProtocolVariant, SessionConfig};
use serde::{Deserialize, Serialize};

/// A saved device connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Unique profile name.
    pub name: String,
    /// Where the device bridge listens.
    pub endpoint: Endpoint,
    /// Outbound MTU in bytes.
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    /// Wire encoding.
    #[serde(default)]
    pub proto: ProtocolVariant,
}

const fn default_mtu() -> usize {
    DEFAULT_MTU
}

impl Profile {
    /// Session settings described by this profile.
    pub fn session_config(&self) -> SessionConfig {
        let mut cfg = SessionConfig::new(self.endpoint.clone());
        cfg.mtu = self.mtu;
        cfg.proto = self.proto;
        cfg
    }
}

/// The profile file, loaded in memory.
#[derive(Debug)]
pub struct Profiles {
    path: PathBuf,
    list: Vec<Profile>,
}

impl Profiles {
    /// `<config_dir>/nmx/profiles.json`.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("no platform config directory")?;
        Ok(dir.join("nmx").join("profiles.json"))
    }

    /// Loads profiles from `path`. A missing file holds no profiles.
    pub fn load(path: &Path) -> Result<Self> {
        let list = match fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data)
                .with_context(|| format!("parse {}", path.display()))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        Ok(Self {
            path: path.to_owned(),
            list,
        })
    }

    /// Writes all profiles back, creating the parent directory if needed.
    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let file = fs::File::create(&self.path)
            .with_context(|| format!("write {}", self.path.display()))?;
        serde_json::to_writer_pretty(file, &self.list)?;
        Ok(())
    }

    /// Looks up a profile by name.
    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.list.iter().find(|p| p.name == name)
    }

    /// Adds `profile`, replacing any profile of the same name.
    ///
    /// Returns `true` if an existing profile was replaced.
    pub fn upsert(&mut self, profile: Profile) -> bool {
        if let Some(slot) = self.list.iter_mut().find(|p| p.name == profile.name) {
            *slot = profile;
            true
        } else {
            self.list.push(profile);
            false
        }
    }

    /// Removes the profile named `name`, returning `true` if it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.list.len();
        self.list.retain(|p| p.name != name);
        self.list.len() != before
    }

    /// All profiles in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Profile> {
        self.list.iter()
    }
}
