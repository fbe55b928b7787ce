//! Image and core dump commands.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use nmx::{
    CoreErase, CoreList, CoreLoad, ImageErase, ImageStateRead, ImageStateRsp, ImageStateWrite,
    ImageUpgrade, Responses, StreamSession, TxOptions, Xact,
};
use sha2::{Digest, Sha256};

use crate::fs::save_chunks;
use crate::report;

/// Subcommands for `nmx image`.
#[derive(clap::Subcommand)]
pub enum ImageCmd {
    /// Erase the secondary slot and upload a new image.
    Upload {
        /// Image file.
        file: PathBuf,
        /// Skip erasing the secondary slot first.
        #[arg(long)]
        no_erase: bool,
    },
    /// Erase the secondary slot.
    Erase,
    /// Show the state of every slot.
    #[command(visible_alias = "ls")]
    List,
    /// Boot the image with this hash once on next reset.
    Test {
        /// Image hash, hex encoded.
        hash: String,
    },
    /// Make an image permanent (the running image when no hash is given).
    Confirm {
        /// Image hash, hex encoded.
        hash: Option<String>,
    },
    /// Check whether the device holds a core dump.
    Corelist,
    /// Download the core dump.
    Coredownload {
        /// Local file to write.
        file: PathBuf,
    },
    /// Erase the core dump.
    Coreerase,
}

pub fn run(cmd: ImageCmd, s: &mut StreamSession, opts: TxOptions) -> Result<()> {
    match cmd {
        ImageCmd::Upload { file, no_erase } => {
            let data = std::fs::read(&file).with_context(|| format!("read {}", file.display()))?;
            println!("sha256: {}", hex(&Sha256::digest(&data)));
            let res = ImageUpgrade::new(&data)
                .no_erase(no_erase)
                .tx_options(opts)
                .on_progress(|r| println!("{}", r.off))
                .run(s)?;
            if let Some(erase) = &res.erase
                && erase.is_empty()
            {
                println!("Erase result unknown (link dropped)");
            }
            report(res.status());
        }
        ImageCmd::Erase => report(ImageErase::new().tx_options(opts).run(s)?.status()),
        ImageCmd::List => show_state(&ImageStateRead::new().tx_options(opts).run(s)?),
        ImageCmd::Test { hash } => {
            let res = ImageStateWrite::new()
                .hash(parse_hex(&hash)?)
                .tx_options(opts)
                .run(s)?;
            show_state(&res);
        }
        ImageCmd::Confirm { hash } => {
            let mut xact = ImageStateWrite::new().confirm(true).tx_options(opts);
            if let Some(h) = hash {
                xact = xact.hash(parse_hex(&h)?);
            }
            show_state(&xact.run(s)?);
        }
        ImageCmd::Corelist => {
            let res = CoreList::new().tx_options(opts).run(s)?;
            if res.status() == 0 {
                println!("Corefile present");
            } else {
                println!("No corefiles");
            }
        }
        ImageCmd::Coredownload { file } => {
            let res = save_chunks(&file, |sink| {
                CoreLoad::new().tx_options(opts).on_progress(sink).run(s)
            })?;
            report(res.status());
        }
        ImageCmd::Coreerase => report(CoreErase::new().tx_options(opts).run(s)?.status()),
    }
    Ok(())
}

fn show_state(res: &Responses<ImageStateRsp>) {
    let Some(rsp) = res.last().filter(|r| r.rc == 0) else {
        report(res.status());
        return;
    };
    println!("Images:");
    for img in &rsp.images {
        let flags: Vec<&str> = [
            (img.active, "active"),
            (img.confirmed, "confirmed"),
            (img.pending, "pending"),
            (img.permanent, "permanent"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect();

        println!(" slot={}", img.slot);
        println!("    version: {}", img.version);
        println!("    bootable: {}", img.bootable);
        println!("    flags: {}", flags.join(" "));
        println!("    hash: {}", hex(&img.hash));
    }
    println!("Split status: {}", rsp.split_status);
}

/// Lowercase hex encoding.
fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decodes a hex string, ignoring case.
fn parse_hex(s: &str) -> Result<Vec<u8>> {
    if s.is_empty() || s.len() % 2 != 0 {
        bail!("invalid hash {s:?}: expected an even number of hex digits");
    }
    s.as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|p| u8::from_str_radix(p, 16).ok())
                .with_context(|| format!("invalid hash {s:?}: not hex"))
        })
        .collect()
}
