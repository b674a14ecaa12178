//! Per-host collection protocol.
//!
//! For one live address the collector checks the management ports,
//! classifies the device, then walks an ordered list of
//! `(profile, transport)` candidates until one session succeeds:
//!
//! ```text
//! CANDIDATES_PENDING -> ATTEMPTING(profile, transport) -> SUCCESS
//!                                   |
//!                                   +-> ATTEMPT_FAILED -> next candidate
//!                                                      -> DONE(fail)
//! ```
//!
//! The per-host deadline is checked before each candidate; an attempt
//! already running ends on its own I/O timeouts. Command failures never
//! abort a host, they leave a marker in the collected output instead.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::classify::{Classification, Classifier, VendorHints};
use crate::config::{CollectConfig, Timeouts};
use crate::profile::{DEFAULT_TRY_ORDER, ProfileCatalog};
use crate::probe::PortProbe;
use crate::report::truncate;
use crate::session::{
    Credentials, DeviceSession, SessionConnector, SessionParams, Transport,
};
use crate::storage::RawStore;
use crate::templates::driver_for_profile;

/// Diagnostics kept per host.
pub const MAX_DIAGNOSTICS: usize = 4;

/// Longest single diagnostic; longer text is cut with `...`.
pub const MAX_DIAGNOSTIC_CHARS: usize = 240;

/// Diagnostic recorded when the per-host deadline stops the candidate walk.
pub const DEADLINE_EXCEEDED: &str = "deadline_exceeded";

/// Command used when a profile resolves to an empty command list.
const DEFAULT_COMMAND: &str = "show version";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Ok,
    Fail,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStatus::Ok => f.write_str("ok"),
            HostStatus::Fail => f.write_str("fail"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "diagnostic", rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failed(String),
}

/// One `(profile, transport)` try.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub profile: String,
    pub transport: Transport,
    pub outcome: AttemptOutcome,
}

/// Final result for one live address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOutcome {
    pub address: String,
    pub status: HostStatus,
    /// Profile plus transport suffix of the successful session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    /// At most [`MAX_DIAGNOSTICS`] entries.
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    pub attempts: Vec<AttemptRecord>,
}

impl HostOutcome {
    /// Failed outcome carrying a single diagnostic.
    pub fn failed(address: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        let diagnostic: String = diagnostic.into();
        Self {
            address: address.into(),
            status: HostStatus::Fail,
            device_type: None,
            errors: vec![short_diagnostic(&diagnostic)],
            artifact: None,
            attempts: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HostStatus::Ok
    }
}

/// A candidate pairing tried for one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub profile: String,
    pub transport: Transport,
}

impl Candidate {
    pub fn device_type(&self) -> String {
        self.transport.device_type(&self.profile)
    }
}

/// Ordered command output of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedOutput {
    blocks: Vec<(String, String)>,
}

impl CollectedOutput {
    pub fn push(&mut self, command: impl Into<String>, text: impl Into<String>) {
        self.blocks.push((command.into(), text.into()));
    }

    /// Artifact text: a `$ <command>` delimiter line before each block.
    pub fn render(&self) -> String {
        self.blocks
            .iter()
            .map(|(command, text)| format!("\n\n$ {command}\n{text}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Marker substituted when both send modes failed for a command.
pub fn command_error_marker(primary: &str, fallback: &str) -> String {
    format!("[ERROR executing command: {primary}; fallback_timing_failed: {fallback}]")
}

/// Candidate list for a classification.
///
/// A resolved profile is tried alone; otherwise the default try order is
/// used. Telnet is skipped when port 23 did not answer, except for exempt
/// profiles.
pub fn plan_candidates(
    classification: &Classification,
    telnet_open: bool,
    telnet_exempt: &[String],
) -> Vec<Candidate> {
    let profiles: Vec<String> = match &classification.profile {
        Some(profile) => vec![profile.clone()],
        None => DEFAULT_TRY_ORDER.iter().map(|p| p.to_string()).collect(),
    };
    let mut candidates = Vec::new();
    for profile in profiles {
        for transport in Transport::ORDER {
            if transport == Transport::Telnet
                && !telnet_open
                && !telnet_exempt.iter().any(|p| *p == profile)
            {
                continue;
            }
            candidates.push(Candidate {
                profile: profile.clone(),
                transport,
            });
        }
    }
    candidates
}

/// Diagnostic text cut to [`MAX_DIAGNOSTIC_CHARS`].
pub fn short_diagnostic(text: &str) -> String {
    truncate(text, MAX_DIAGNOSTIC_CHARS)
}

/// Caps diagnostics at [`MAX_DIAGNOSTICS`], keeping a deadline entry last.
pub fn bounded_diagnostics(mut errors: Vec<String>) -> Vec<String> {
    let deadline = errors.iter().position(|e| e == DEADLINE_EXCEEDED);
    if let Some(index) = deadline {
        let entry = errors.remove(index);
        errors.truncate(MAX_DIAGNOSTICS - 1);
        errors.push(entry);
    } else {
        errors.truncate(MAX_DIAGNOSTICS);
    }
    errors
}

struct Collected {
    device_type: String,
    artifact: PathBuf,
}

/// Runs the collection protocol against one address at a time.
///
/// Holds only read-only state, so one instance is shared by every worker.
pub struct Collector<C, P> {
    connector: C,
    probe: P,
    credentials: Arc<Credentials>,
    classifier: Classifier,
    catalog: ProfileCatalog,
    store: RawStore,
    timeouts: Timeouts,
    telnet_exempt: Vec<String>,
}

impl<C: SessionConnector, P: PortProbe> Collector<C, P> {
    /// Builds a collector from run settings; loads the vendor hint table.
    pub fn from_config(
        connector: C,
        probe: P,
        credentials: Arc<Credentials>,
        config: &CollectConfig,
    ) -> Self {
        let hints = VendorHints::load(&config.paths.vendor_hints_file());
        if !hints.is_empty() {
            info!("loaded {} vendor hints", hints.len());
        }
        let store = RawStore::new(config.paths.raw_dir.clone());
        Self {
            connector,
            probe,
            credentials,
            classifier: Classifier {
                prefer_vendor: config.prefer_vendor.clone(),
                hints: Arc::new(hints),
                store: store.clone(),
                detect: config.detect,
                connect_timeout: config.timeouts.connect,
                auth_timeout: config.timeouts.auth,
            },
            catalog: ProfileCatalog::new(config.paths.clone()),
            store,
            timeouts: config.timeouts,
            telnet_exempt: config.telnet_probe_exempt.clone(),
        }
    }

    /// Collects one address. Never fails; problems end up in the outcome.
    pub async fn gather_one(&self, address: &str) -> HostOutcome {
        let deadline = Instant::now() + self.timeouts.host_deadline;
        let ssh_open = self
            .probe
            .is_open(address, Transport::Ssh.port(), self.timeouts.probe)
            .await;
        let telnet_open = self
            .probe
            .is_open(address, Transport::Telnet.port(), self.timeouts.probe)
            .await;

        let classification = self
            .classifier
            .classify(address, &self.credentials, &self.connector, ssh_open)
            .await;
        let candidates = plan_candidates(&classification, telnet_open, &self.telnet_exempt);
        debug!(
            "{address} ssh={ssh_open} telnet={telnet_open} class={:?} candidates={}",
            classification.source,
            candidates.len()
        );

        let mut errors = Vec::new();
        let mut attempts = Vec::new();
        for candidate in candidates {
            if Instant::now() > deadline {
                debug!("{address} deadline exceeded before {}", candidate.device_type());
                errors.push(DEADLINE_EXCEEDED.to_string());
                break;
            }
            match self.attempt(address, &candidate, &mut errors).await {
                Ok(collected) => {
                    attempts.push(AttemptRecord {
                        profile: candidate.profile,
                        transport: candidate.transport,
                        outcome: AttemptOutcome::Success,
                    });
                    return HostOutcome {
                        address: address.to_string(),
                        status: HostStatus::Ok,
                        device_type: Some(collected.device_type),
                        errors: bounded_diagnostics(errors),
                        artifact: Some(collected.artifact),
                        attempts,
                    };
                }
                Err(diagnostic) => {
                    debug!("{address} attempt failed: {diagnostic}");
                    let diagnostic = short_diagnostic(&diagnostic);
                    errors.push(diagnostic.clone());
                    attempts.push(AttemptRecord {
                        profile: candidate.profile,
                        transport: candidate.transport,
                        outcome: AttemptOutcome::Failed(diagnostic),
                    });
                }
            }
        }

        HostOutcome {
            address: address.to_string(),
            status: HostStatus::Fail,
            device_type: None,
            errors: bounded_diagnostics(errors),
            artifact: None,
            attempts,
        }
    }

    /// One session: connect, elevate, run commands, persist.
    ///
    /// Non-fatal problems are appended to `errors`; the returned error is
    /// the attempt diagnostic.
    async fn attempt(
        &self,
        address: &str,
        candidate: &Candidate,
        errors: &mut Vec<String>,
    ) -> Result<Collected, String> {
        let device_type = candidate.device_type();
        let profile = self.catalog.resolve(&device_type).await;
        let driver = driver_for_profile(&device_type).map_err(|e| format!("{device_type}: {e}"))?;

        let params = SessionParams {
            host: address.to_string(),
            port: candidate.transport.port(),
            transport: candidate.transport,
            device_type: device_type.clone(),
            driver,
            credentials: self.credentials.clone(),
            connect_timeout: self.timeouts.connect,
            auth_timeout: self.timeouts.auth,
            fast: driver.fast_cli,
        };
        let mut session = self
            .connector
            .connect(params)
            .await
            .map_err(|e| format!("{device_type}: {e}"))?;
        debug!(
            "{address} session open as {device_type} ({} {} driver)",
            driver.vendor, driver.name
        );

        if profile.requires_elevation {
            if let Some(secret) = self.credentials.secret() {
                if let Err(e) = session.enable(secret).await {
                    errors.push(short_diagnostic(&format!(
                        "{device_type}: enable() failed: {e}"
                    )));
                }
            }
        }

        let mut output = CollectedOutput::default();
        let commands: Vec<&str> = if profile.commands.is_empty() {
            vec![DEFAULT_COMMAND]
        } else {
            profile.commands.iter().map(String::as_str).collect()
        };
        for command in commands {
            let text = match session.send_command(command, self.timeouts.command).await {
                Ok(text) => text,
                Err(primary) => {
                    debug!("{address} '{command}' failed, retrying with timing read: {primary}");
                    match session
                        .send_command_timing(command, self.timeouts.command)
                        .await
                    {
                        Ok(text) => text,
                        Err(fallback) => {
                            command_error_marker(&primary.to_string(), &fallback.to_string())
                        }
                    }
                }
            };
            output.push(command, text);
        }

        let prompt = session
            .find_prompt(self.timeouts.auth)
            .await
            .unwrap_or_default();
        session.close().await;

        let artifact = self
            .store
            .persist(address, &output.render(), prompt.trim())
            .await
            .map_err(|e| format!("{device_type}: persist failed: {e}"))?;
        info!("{address} collected as {device_type}");
        Ok(Collected {
            device_type,
            artifact,
        })
    }
}
