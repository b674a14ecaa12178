//! End-to-end collection run.
//!
//! expand targets -> apply exclusions -> probe -> collect -> summarize.
//! Only configuration problems fail the run; everything per-host is
//! reported through the outcomes.

use std::sync::Arc;

use log::info;

use crate::collector::{Collector, HostOutcome};
use crate::config::CollectConfig;
use crate::coordinator::{CoordinatorOptions, ProgressEvent, collect_all};
use crate::error::ConfigError;
use crate::probe::{PortProbe, ProbeOptions, probe_live};
use crate::report::Summary;
use crate::session::{Credentials, SessionConnector};
use crate::targets::{ExclusionSet, expand_targets};

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Addresses left after expansion and exclusion.
    pub candidates: usize,
    /// Addresses that answered the reachability probe.
    pub live: Vec<String>,
    pub outcomes: Vec<HostOutcome>,
    pub summary: Summary,
}

/// Runs one collection pass.
///
/// `probe` is used both for the reachability sweep and for the per-host
/// port pre-check.
pub async fn run<C, P, F>(
    config: CollectConfig,
    credentials: Arc<Credentials>,
    connector: C,
    probe: Arc<P>,
    on_event: F,
) -> Result<RunReport, ConfigError>
where
    C: SessionConnector,
    P: PortProbe,
    F: FnMut(ProgressEvent<'_>),
{
    config.validate()?;

    let exclusions = ExclusionSet::parse(&config.exclusions);
    let expanded = expand_targets(&config.targets, &config.ranges)?;
    let targets: Vec<String> = exclusions.filter(expanded).collect();
    info!("{} candidate targets", targets.len());

    let empty = |candidates: usize, live: Vec<String>| RunReport {
        candidates,
        live,
        outcomes: Vec::new(),
        summary: Summary::from_outcomes(&[], &config.paths.raw_dir),
    };
    if targets.is_empty() {
        info!("no targets to collect");
        return Ok(empty(0, Vec::new()));
    }

    let candidates = targets.len();
    let live = probe_live(targets, probe.clone(), &ProbeOptions::from(&config)).await;
    info!("{} hosts answered on {:?}", live.len(), config.probe_ports);
    if live.is_empty() {
        return Ok(empty(candidates, live));
    }

    let collector = Arc::new(Collector::from_config(connector, probe, credentials, &config));
    let outcomes = collect_all(
        collector,
        live.clone(),
        &CoordinatorOptions::from(&config),
        on_event,
    )
    .await;
    let summary = Summary::from_outcomes(&outcomes, &config.paths.raw_dir);
    info!("{}", summary.counts_line());

    Ok(RunReport {
        candidates,
        live,
        outcomes,
        summary,
    })
}
