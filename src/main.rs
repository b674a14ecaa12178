//! Command-line front end for `rcollect`.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use rcollect::classify::hints_json_schema;
use rcollect::config::{CollectConfig, CollectPaths, Timeouts};
use rcollect::coordinator::ProgressEvent;
use rcollect::probe::TcpProbe;
use rcollect::profile::override_json_schema;
use rcollect::report::Summary;
use rcollect::runner::run;
use rcollect::session::{Credentials, NetworkConnector, SecurityLevel};

/// Collect CLI output from network devices over SSH/Telnet
#[derive(Parser, Debug)]
#[command(name = "rcollect")]
#[command(author, version, about)]
struct Cli {
    /// Explicit IP/host targets
    #[arg(long, num_args = 0.., value_delimiter = ',', env = "TARGETS")]
    targets: Vec<String>,

    /// Subnets to scan, e.g. 10.0.0.0/24
    #[arg(long, num_args = 0.., value_delimiter = ',', env = "CIDR")]
    cidr: Vec<String>,

    /// Addresses or ranges to skip; x.y.z.0 and x.y.0.0 widen to /24 and /16
    #[arg(long, value_delimiter = ',', env = "EXCLUDE_IPS")]
    exclude: Vec<String>,

    /// Parallel SSH/Telnet sessions
    #[arg(long, env = "MAX_WORKERS", default_value_t = 20)]
    max_workers: usize,

    /// Parallel workers for the 22/23 probe (clamped to 4..=256)
    #[arg(long, env = "TCP_WORKERS", default_value_t = 64)]
    tcp_workers: usize,

    /// TCP probe timeout, seconds
    #[arg(long, env = "TCP_TIMEOUT", default_value = "1", value_parser = parse_secs)]
    tcp_timeout: Duration,

    /// Session TCP connect timeout, seconds
    #[arg(long, env = "CONNECT_TIMEOUT", default_value = "3", value_parser = parse_secs)]
    conn_timeout: Duration,

    /// Handshake and login timeout, seconds
    #[arg(long, env = "AUTH_TIMEOUT", default_value = "5", value_parser = parse_secs)]
    auth_timeout: Duration,

    /// Per-command response wait, seconds
    #[arg(long, env = "SENDCMD_TIMEOUT", default_value = "45", value_parser = parse_secs)]
    command_timeout: Duration,

    /// Wall-clock budget per host across all attempts, seconds (min 10)
    #[arg(long, env = "HOST_DEADLINE", default_value = "90", value_parser = parse_secs)]
    host_deadline: Duration,

    /// Seconds without a completion before a heartbeat line
    #[arg(long, env = "HEARTBEAT_INTERVAL", default_value = "30", value_parser = parse_secs)]
    heartbeat_interval: Duration,

    /// Heartbeat lines on/off (0 disables)
    #[arg(long, env = "HEARTBEAT", default_value = "1", value_parser = parse_flag, action = ArgAction::Set)]
    heartbeat: bool,

    /// Active SSH fingerprinting on/off (0 disables)
    #[arg(long, env = "DETECT", default_value = "1", value_parser = parse_flag, action = ArgAction::Set)]
    detect: bool,

    /// Profile applied to every host, skipping classification
    #[arg(long, env = "PREFER_VENDOR")]
    prefer_vendor: Option<String>,

    /// SSH algorithm policy: secure, balanced or legacy
    #[arg(long, env = "SSH_SECURITY", default_value = "legacy")]
    ssh_security: SecurityLevel,

    /// Root of the raw output tree
    #[arg(long, default_value = "data/raw")]
    raw_dir: PathBuf,

    /// Directory with vendor_hints.json and profile overrides
    #[arg(long, default_value = "config/collect")]
    config_dir: PathBuf,

    /// Parser template tree with <vendor>/example.txt command lists
    #[arg(long, default_value = "templates/textfsm")]
    templates_dir: PathBuf,

    /// Print the JSON Schemas of the hints and override files and exit
    #[arg(long)]
    dump_schemas: bool,

    /// Verbosity level
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_secs(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("'{value}' is not a number of seconds: {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("'{value}': {e}"))
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "0" | "false" | "no" | "off" => Ok(false),
        "1" | "true" | "yes" | "on" => Ok(true),
        other => Err(format!("expected 0 or 1, got '{other}'")),
    }
}

impl Cli {
    fn config(&self) -> CollectConfig {
        CollectConfig {
            targets: self.targets.clone(),
            ranges: self.cidr.clone(),
            exclusions: self.exclude.clone(),
            probe_workers: self.tcp_workers,
            session_workers: self.max_workers,
            timeouts: Timeouts {
                probe: self.tcp_timeout,
                connect: self.conn_timeout,
                auth: self.auth_timeout,
                command: self.command_timeout,
                host_deadline: self.host_deadline,
            },
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_enabled: self.heartbeat,
            prefer_vendor: self.prefer_vendor.clone(),
            detect: self.detect,
            security: self.ssh_security,
            paths: CollectPaths {
                raw_dir: self.raw_dir.clone(),
                config_dir: self.config_dir.clone(),
                templates_dir: self.templates_dir.clone(),
            },
            ..Default::default()
        }
        .normalized()
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn prompt_line(label: &str) -> Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{label}: ")?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .with_context(|| format!("reading {label}"))?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// `NET_USER` / `NET_PASS` / `NET_ENABLE`, prompting for what is missing.
fn read_credentials() -> Result<Credentials> {
    let username = match env_value("NET_USER") {
        Some(user) => user,
        None => prompt_line("Username")?,
    };
    let password = match env_value("NET_PASS") {
        Some(pass) => pass,
        None => prompt_line("Password")?,
    };
    if username.is_empty() {
        bail!("username is required");
    }
    Ok(Credentials::new(username, password, env_value("NET_ENABLE")))
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} hosts")?
            .progress_chars("#>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(200));
    Ok(pb)
}

/// Advances the bar and prints the event line above it.
fn show_progress(pb: &ProgressBar, event: ProgressEvent<'_>) {
    match event {
        ProgressEvent::HostDone {
            done,
            total,
            outcome,
        } => {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
            pb.println(Summary::progress_line(done, total, outcome));
        }
        ProgressEvent::Heartbeat { done, total } => {
            pb.set_length(total as u64);
            pb.println(format!("heartbeat done {done}/{total}"));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_secs()
        .init();

    if cli.dump_schemas {
        println!("{}", hints_json_schema()?);
        println!("{}", override_json_schema()?);
        return Ok(());
    }

    let config = cli.config();
    if config.targets.is_empty() && config.ranges.is_empty() {
        bail!("no targets given (--targets / --cidr)");
    }

    let credentials = Arc::new(read_credentials()?);
    let connector = NetworkConnector::new(config.security);
    info!(
        "ssh security {}, detect {}, deadline {:?}",
        config.security, config.detect, config.timeouts.host_deadline
    );

    let pb = progress_bar()?;
    let report = run(config, credentials, connector, Arc::new(TcpProbe), |event| {
        show_progress(&pb, event)
    })
    .await;
    pb.finish_and_clear();
    let report = report.context("collection run aborted")?;

    println!("targets: {}, live: {}", report.candidates, report.live.len());
    println!("{}", report.summary);
    Ok(())
}
