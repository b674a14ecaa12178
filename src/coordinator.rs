//! Bounded concurrent collection with progress events.
//!
//! Every live address runs [`Collector::gather_one`] in its own task, at
//! most `max_workers` at a time. Completions are awaited with a bounded
//! wait; when nothing finished for a whole heartbeat interval a
//! [`ProgressEvent::Heartbeat`] is emitted and the wait resumes.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::collector::{Collector, HostOutcome};
use crate::config::CollectConfig;
use crate::probe::PortProbe;
use crate::session::SessionConnector;

/// Upper bound of one wait on the completion set.
const DEFAULT_POLL: Duration = Duration::from_secs(5);

/// Something the caller may want to show while a run progresses.
#[derive(Debug)]
pub enum ProgressEvent<'a> {
    HostDone {
        done: usize,
        total: usize,
        outcome: &'a HostOutcome,
    },
    Heartbeat {
        done: usize,
        total: usize,
    },
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub max_workers: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_enabled: bool,
    /// Longest single wait for a completion.
    pub poll: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            max_workers: 20,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_enabled: true,
            poll: DEFAULT_POLL,
        }
    }
}

impl From<&CollectConfig> for CoordinatorOptions {
    fn from(config: &CollectConfig) -> Self {
        Self {
            max_workers: config.session_workers,
            heartbeat_interval: config.heartbeat_interval,
            heartbeat_enabled: config.heartbeat_enabled,
            poll: DEFAULT_POLL,
        }
    }
}

fn panic_text(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Collects every address in `live` and returns one outcome per address,
/// in completion order.
///
/// A task that panics or is cancelled yields a fail outcome with an
/// `internal error:` diagnostic; the rest of the batch is unaffected.
pub async fn collect_all<C, P, F>(
    collector: Arc<Collector<C, P>>,
    live: Vec<String>,
    options: &CoordinatorOptions,
    mut on_event: F,
) -> Vec<HostOutcome>
where
    C: SessionConnector,
    P: PortProbe,
    F: FnMut(ProgressEvent<'_>),
{
    let semaphore = Arc::new(Semaphore::new(options.max_workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut addresses = HashMap::new();

    for address in live {
        let collector = collector.clone();
        let semaphore = semaphore.clone();
        let task_address = address.clone();
        let handle = tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return HostOutcome::failed(task_address, format!("internal error: {e}")),
            };
            collector.gather_one(&task_address).await
        });
        addresses.insert(handle.id(), address);
    }

    let total = addresses.len();
    info!("collecting {total} hosts with {} workers", options.max_workers.max(1));
    let wait = options.poll.min(options.heartbeat_interval).max(Duration::from_millis(10));
    let mut outcomes = Vec::with_capacity(total);
    let mut last_activity = Instant::now();

    while !tasks.is_empty() {
        let joined = match tokio::time::timeout(wait, tasks.join_next_with_id()).await {
            Ok(Some(joined)) => joined,
            Ok(None) => break,
            Err(_) => {
                if options.heartbeat_enabled
                    && last_activity.elapsed() >= options.heartbeat_interval
                {
                    let done = outcomes.len();
                    info!("heartbeat done {done}/{total}");
                    on_event(ProgressEvent::Heartbeat { done, total });
                    last_activity = Instant::now();
                }
                continue;
            }
        };

        let outcome = match joined {
            Ok((id, outcome)) => {
                addresses.remove(&id);
                outcome
            }
            Err(err) => {
                let address = addresses.remove(&err.id()).unwrap_or_default();
                let reason = if err.is_panic() {
                    panic_text(err.into_panic())
                } else {
                    "task cancelled".to_string()
                };
                warn!("{address} worker failed: {reason}");
                HostOutcome::failed(address, format!("internal error: {reason}"))
            }
        };
        last_activity = Instant::now();
        outcomes.push(outcome);
        if let Some(outcome) = outcomes.last() {
            debug!("{} finished: {}", outcome.address, outcome.status);
            on_event(ProgressEvent::HostDone {
                done: outcomes.len(),
                total,
                outcome,
            });
        }
    }
    outcomes
}
