//! Run configuration for a collection pass.
//!
//! All knobs live in [`CollectConfig`]. The binary fills it from command-line
//! flags and environment variables; library callers and tests build it
//! directly and call [`CollectConfig::normalized`] when they want the same
//! clamping the binary applies.

use std::path::PathBuf;
use std::time::Duration;

use log::warn;

use crate::error::ConfigError;
use crate::session::SecurityLevel;

/// Lower bound for the probe worker pool.
pub const MIN_PROBE_WORKERS: usize = 4;
/// Upper bound for the probe worker pool.
pub const MAX_PROBE_WORKERS: usize = 256;
/// Per-host deadlines below this are raised to it.
pub const MIN_HOST_DEADLINE: Duration = Duration::from_secs(10);

/// Timeouts applied to one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Bare TCP reachability check.
    pub probe: Duration,
    /// TCP connect of a session attempt.
    pub connect: Duration,
    /// Handshake, login and first prompt.
    pub auth: Duration,
    /// Wait for the prompt after each command.
    pub command: Duration,
    /// Wall-clock budget across all attempts for one address.
    pub host_deadline: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(1),
            connect: Duration::from_secs(3),
            auth: Duration::from_secs(5),
            command: Duration::from_secs(45),
            host_deadline: Duration::from_secs(90),
        }
    }
}

/// On-disk locations read and written by the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectPaths {
    /// Root of the per-address output artifacts.
    pub raw_dir: PathBuf,
    /// Directory holding `vendor_hints.json` and per-profile overrides.
    pub config_dir: PathBuf,
    /// Parser template tree; `<vendor>/example.txt` may carry command lists.
    pub templates_dir: PathBuf,
}

impl Default for CollectPaths {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            config_dir: PathBuf::from("config/collect"),
            templates_dir: PathBuf::from("templates/textfsm"),
        }
    }
}

impl CollectPaths {
    /// All paths rooted under `base`.
    pub fn under(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            raw_dir: base.join("data/raw"),
            config_dir: base.join("config/collect"),
            templates_dir: base.join("templates/textfsm"),
        }
    }

    pub fn vendor_hints_file(&self) -> PathBuf {
        self.config_dir.join("vendor_hints.json")
    }
}

/// Everything a collection run needs apart from credentials.
#[derive(Debug, Clone)]
pub struct CollectConfig {
    /// Literal addresses or hostnames.
    pub targets: Vec<String>,
    /// Prefix notations such as `10.0.0.0/24`.
    pub ranges: Vec<String>,
    /// Exclusion entries, see [`crate::targets::ExclusionSet::parse`].
    pub exclusions: Vec<String>,
    pub probe_workers: usize,
    pub session_workers: usize,
    /// Ports checked by the reachability prober.
    pub probe_ports: Vec<u16>,
    pub timeouts: Timeouts,
    pub heartbeat_interval: Duration,
    pub heartbeat_enabled: bool,
    /// Profile applied to every address, bypassing classification.
    pub prefer_vendor: Option<String>,
    /// Active SSH fingerprinting when nothing else classified the host.
    pub detect: bool,
    /// Profiles still tried over telnet when port 23 did not answer.
    pub telnet_probe_exempt: Vec<String>,
    pub security: SecurityLevel,
    pub paths: CollectPaths,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            ranges: Vec::new(),
            exclusions: Vec::new(),
            probe_workers: 64,
            session_workers: 20,
            probe_ports: vec![22, 23],
            timeouts: Timeouts::default(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_enabled: true,
            prefer_vendor: None,
            detect: true,
            telnet_probe_exempt: vec!["nis".to_string()],
            security: SecurityLevel::LegacyCompatible,
            paths: CollectPaths::default(),
        }
    }
}

impl CollectConfig {
    /// Applies the clamps used by the command-line front end.
    pub fn normalized(mut self) -> Self {
        let clamped = self
            .probe_workers
            .clamp(MIN_PROBE_WORKERS, MAX_PROBE_WORKERS);
        if clamped != self.probe_workers {
            warn!(
                "probe workers {} out of range, using {}",
                self.probe_workers, clamped
            );
            self.probe_workers = clamped;
        }
        self.session_workers = self.session_workers.max(1);
        if self.timeouts.host_deadline < MIN_HOST_DEADLINE {
            self.timeouts.host_deadline = MIN_HOST_DEADLINE;
        }
        self.prefer_vendor = self
            .prefer_vendor
            .take()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        self
    }

    /// Rejects settings the collector cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_workers == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "session_workers".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.probe_workers == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "probe_workers".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.probe_ports.is_empty() {
            return Err(ConfigError::InvalidSetting {
                name: "probe_ports".to_string(),
                reason: "at least one port is required".to_string(),
            });
        }
        if self.heartbeat_enabled && self.heartbeat_interval.is_zero() {
            return Err(ConfigError::InvalidSetting {
                name: "heartbeat_interval".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
