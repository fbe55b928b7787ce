//! CLI for managing embedded devices over NMP/OMP.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod fs;
mod image;
mod profile;

use std::io;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use nmx::{
    DEFAULT_MTU, Endpoint, ProtocolVariant, SessionConfig, StreamSession, TaskStat, TxOptions,
    Xact,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::profile::{Profile, Profiles};

#[derive(Parser)]
#[command(name = "nmx", version, about = "Manage embedded devices over NMP/OMP")]
struct Cli {
    #[command(flatten)]
    conn: ConnOpts,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

/// How to reach the device.
#[derive(clap::Args)]
struct ConnOpts {
    /// Connection profile to use.
    #[arg(short = 'c', long = "conn", global = true)]
    profile: Option<String>,

    /// Device endpoint (`tcp:host:port` or `unix:/path`); overrides the profile.
    #[arg(long, global = true)]
    endpoint: Option<Endpoint>,

    /// Outbound MTU in bytes; overrides the profile.
    #[arg(long, global = true)]
    mtu: Option<usize>,

    /// Wire encoding (nmp or omp); overrides the profile.
    #[arg(long, global = true)]
    proto: Option<ProtocolVariant>,

    /// Seconds to wait for each response.
    #[arg(short = 't', long, global = true, default_value_t = 10.0)]
    timeout: f64,

    /// Transmissions of each request before giving up.
    #[arg(short = 'r', long, global = true, default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..))]
    tries: u32,
}

#[derive(Subcommand)]
enum Command {
    /// Transfer files to and from the device file system.
    Fs {
        #[command(subcommand)]
        action: fs::FsCmd,
    },

    /// Manage firmware images and core dumps.
    Image {
        #[command(subcommand)]
        action: image::ImageCmd,
    },

    /// Show per-task statistics.
    Taskstat,

    /// Manage connection profiles.
    Conn {
        #[command(subcommand)]
        action: ConnCmd,
    },

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

/// Subcommands for `nmx conn`.
#[derive(Subcommand)]
enum ConnCmd {
    /// Add or replace a profile. Takes `--mtu` and `--proto`.
    Add {
        /// Profile name.
        name: String,
        /// Device endpoint (`tcp:host:port` or `unix:/path`).
        endpoint: Endpoint,
    },
    /// List profiles.
    #[command(visible_alias = "ls")]
    Show,
    /// Delete a profile.
    #[command(visible_alias = "rm")]
    Delete {
        /// Profile name.
        name: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(e) = cli.dispatch() {
        eprintln!("nmx: {e:#}");
        std::process::exit(1);
    }
}

/// Logs to stderr at a level picked by `-v`, unless `RUST_LOG` is set.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
}

impl Cli {
    fn dispatch(self) -> Result<()> {
        match self.command {
            Command::Fs { action } => {
                let opts = self.conn.tx_options()?;
                fs::run(action, &mut self.conn.open()?, opts)
            }
            Command::Image { action } => {
                let opts = self.conn.tx_options()?;
                image::run(action, &mut self.conn.open()?, opts)
            }
            Command::Taskstat => taskstat(&mut self.conn.open()?, self.conn.tx_options()?),
            Command::Conn { action } => conn(action, &self.conn),
            Command::Completion { shell } => {
                clap_complete::generate(shell, &mut Self::command(), "nmx", &mut io::stdout());
                Ok(())
            }
        }
    }
}

impl ConnOpts {
    fn tx_options(&self) -> Result<TxOptions> {
        let timeout = Duration::try_from_secs_f64(self.timeout)
            .with_context(|| format!("invalid timeout {}", self.timeout))?;
        Ok(TxOptions {
            timeout,
            tries: self.tries,
        })
    }

    /// Resolves the session settings from the profile and overrides.
    fn session_config(&self) -> Result<SessionConfig> {
        let profile = match &self.profile {
            Some(name) => {
                let profiles = Profiles::load(&Profiles::default_path()?)?;
                let p = profiles
                    .get(name)
                    .with_context(|| format!("no connection profile named {name:?}"))?;
                Some(p.clone())
            }
            None => None,
        };
        self.apply(profile.as_ref())
    }

    fn apply(&self, profile: Option<&Profile>) -> Result<SessionConfig> {
        let mut cfg = match (profile, &self.endpoint) {
            (Some(p), _) => p.session_config(),
            (None, Some(ep)) => SessionConfig::new(ep.clone()),
            (None, None) => bail!("no endpoint: pass --endpoint or --conn <profile>"),
        };
        if let Some(ep) = &self.endpoint {
            cfg.endpoint = ep.clone();
        }
        if let Some(mtu) = self.mtu {
            cfg.mtu = mtu;
        }
        if let Some(proto) = self.proto {
            cfg.proto = proto;
        }
        Ok(cfg)
    }

    fn open(&self) -> Result<StreamSession> {
        let cfg = self.session_config()?;
        debug!(endpoint = %cfg.endpoint, mtu = cfg.mtu, proto = %cfg.proto, "connecting");
        let endpoint = cfg.endpoint.clone();
        StreamSession::connect(cfg).with_context(|| format!("connect to {endpoint}"))
    }
}

/// Prints the terminal status line of a transfer.
pub(crate) fn report(rc: i32) {
    if rc == 0 {
        println!("Done");
    } else {
        println!("Error: {rc}");
    }
}

fn taskstat(s: &mut StreamSession, opts: TxOptions) -> Result<()> {
    let res = TaskStat::new().tx_options(opts).run(s)?;
    let Some(rsp) = res.last().filter(|r| r.rc == 0) else {
        report(res.status());
        return Ok(());
    };

    let mut columns: Vec<&str> = rsp
        .tasks
        .values()
        .flat_map(|stats| stats.keys().map(String::as_str))
        .collect();
    columns.sort_unstable();
    columns.dedup();

    print!("{:<16}", "task");
    for c in &columns {
        print!(" {c:>12}");
    }
    println!();
    for (name, stats) in &rsp.tasks {
        print!("{name:<16}");
        for c in &columns {
            match stats.get(*c) {
                Some(v) => print!(" {v:>12}"),
                None => print!(" {:>12}", "-"),
            }
        }
        println!();
    }
    Ok(())
}

fn conn(action: ConnCmd, opts: &ConnOpts) -> Result<()> {
    let path = Profiles::default_path()?;
    let mut profiles = Profiles::load(&path)?;

    match action {
        ConnCmd::Add { name, endpoint } => {
            let profile = Profile {
                name: name.clone(),
                endpoint,
                mtu: opts.mtu.unwrap_or(DEFAULT_MTU),
                proto: opts.proto.unwrap_or_default(),
            };
            let replaced = profiles.upsert(profile);
            profiles.save()?;
            let verb = if replaced { "Updated" } else { "Added" };
            println!("{verb} profile {name}");
        }
        ConnCmd::Show => {
            if profiles.iter().next().is_none() {
                println!("No connection profiles.");
                return Ok(());
            }
            println!("{:<16} {:<40} {:>6} {:<5}", "NAME", "ENDPOINT", "MTU", "PROTO");
            for p in profiles.iter() {
                println!(
                    "{:<16} {:<40} {:>6} {:<5}",
                    p.name,
                    p.endpoint.to_string(),
                    p.mtu,
                    p.proto.to_string()
                );
            }
        }
        ConnCmd::Delete { name } => {
            if !profiles.remove(&name) {
                bail!("no connection profile named {name:?}");
            }
            profiles.save()?;
            println!("Deleted profile {name}");
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("nmx").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_options_after_subcommand() {
        let cli = parse(&["image", "list", "--endpoint", "10.0.0.2:1337", "-t", "2.5", "-r", "3"]);
        let opts = cli.conn.tx_options().unwrap();
        assert_eq!(opts.timeout, Duration::from_millis(2500));
        assert_eq!(opts.tries, 3);
        assert!(matches!(cli.command, Command::Image { .. }));
    }

    #[test]
    fn defaults() {
        let cli = parse(&["taskstat"]);
        assert_eq!(cli.conn.tx_options().unwrap(), TxOptions::default());
        assert_eq!(cli.verbose, 0);
        assert!(cli.conn.apply(None).is_err());
    }

    #[test]
    fn zero_tries_rejected() {
        assert!(Cli::try_parse_from(["nmx", "taskstat", "-r", "0"]).is_err());
    }

    #[test]
    fn overrides_win_over_profile() {
        let profile = Profile {
            name: "board".into(),
            endpoint: "tcp:10.0.0.2:1337".parse().unwrap(),
            mtu: 256,
            proto: ProtocolVariant::Omp,
        };

        let cli = parse(&["taskstat"]);
        assert_eq!(cli.conn.apply(Some(&profile)).unwrap(), profile.session_config());

        let cli = parse(&["taskstat", "--mtu", "1024", "--endpoint", "127.0.0.1:9"]);
        let cfg = cli.conn.apply(Some(&profile)).unwrap();
        assert_eq!(cfg.mtu, 1024);
        assert_eq!(cfg.proto, ProtocolVariant::Omp);
        assert_eq!(cfg.endpoint.to_string(), "tcp:127.0.0.1:9");
    }

    #[test]
    fn endpoint_without_profile_uses_defaults() {
        let cli = parse(&["fs", "download", "/log", "out.bin", "--endpoint", "h:1", "--proto", "omp"]);
        let cfg = cli.conn.apply(None).unwrap();
        assert_eq!(cfg.mtu, DEFAULT_MTU);
        assert_eq!(cfg.proto, ProtocolVariant::Omp);
    }

    #[test]
    fn bad_endpoint_is_a_parse_error() {
        assert!(Cli::try_parse_from(["nmx", "taskstat", "--endpoint", "nope"]).is_err());
    }

    #[test]
    fn open_failure_names_the_endpoint() {
        let cli = parse(&["taskstat", "--endpoint", "127.0.0.1:1"]);
        let err = cli.conn.open().unwrap_err();
        assert!(format!("{err:#}").starts_with("connect to tcp:127.0.0.1:1"));
    }

    #[test]
    fn verbosity_counts() {
        assert_eq!(parse(&["-vv", "taskstat"]).verbose, 2);
    }
}
