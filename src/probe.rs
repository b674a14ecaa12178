//! Reachability probing.
//!
//! An address is live when a bare TCP connect succeeds on any of the
//! management ports. Failed checks are expected and only logged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{CollectConfig, MAX_PROBE_WORKERS, MIN_PROBE_WORKERS};

/// Single port check; the seam used by tests.
pub trait PortProbe: Send + Sync + 'static {
    fn is_open(&self, host: &str, port: u16, timeout: Duration)
    -> impl Future<Output = bool> + Send;
}

impl<T: PortProbe> PortProbe for Arc<T> {
    fn is_open(&self, host: &str, port: u16, timeout: Duration)
    -> impl Future<Output = bool> + Send {
        self.as_ref().is_open(host, port, timeout)
    }
}

/// Plain TCP connect bounded by the timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

impl PortProbe for TcpProbe {
    async fn is_open(&self, host: &str, port: u16, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!("{host}:{port} closed: {e}");
                false
            }
            Err(_) => {
                debug!("{host}:{port} timed out after {timeout:?}");
                false
            }
        }
    }
}

/// Prober settings.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub ports: Vec<u16>,
    pub timeout: Duration,
    /// Concurrent checks, clamped to the probe pool bounds.
    pub workers: usize,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            ports: vec![22, 23],
            timeout: Duration::from_secs(1),
            workers: 64,
        }
    }
}

impl From<&CollectConfig> for ProbeOptions {
    fn from(config: &CollectConfig) -> Self {
        Self {
            ports: config.probe_ports.clone(),
            timeout: config.timeouts.probe,
            workers: config.probe_workers,
        }
    }
}

/// True when any of `ports` accepts a connection, checked in order.
pub async fn any_open<P: PortProbe>(probe: &P, host: &str, ports: &[u16], timeout: Duration) -> bool {
    for &port in ports {
        if probe.is_open(host, port, timeout).await {
            return true;
        }
    }
    false
}

/// Returns the live subset of `targets` in completion order.
pub async fn probe_live<I, P>(targets: I, probe: Arc<P>, options: &ProbeOptions) -> Vec<String>
where
    I: IntoIterator<Item = String>,
    P: PortProbe,
{
    let workers = options.workers.clamp(MIN_PROBE_WORKERS, MAX_PROBE_WORKERS);
    let semaphore = Arc::new(Semaphore::new(workers));
    let ports: Arc<[u16]> = options.ports.clone().into();
    let timeout = options.timeout;

    let mut tasks = JoinSet::new();
    let mut live = Vec::new();
    let mut checked = 0usize;
    for host in targets {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        // drain finished checks so results do not pile up in the set
        while let Some(done) = tasks.try_join_next() {
            if let Ok(Some(host)) = done {
                live.push(host);
            }
        }
        checked += 1;
        let probe = probe.clone();
        let ports = ports.clone();
        tasks.spawn(async move {
            let _permit = permit;
            any_open(probe.as_ref(), &host, &ports, timeout)
                .await
                .then_some(host)
        });
    }

    while let Some(done) = tasks.join_next().await {
        match done {
            Ok(Some(host)) => live.push(host),
            Ok(None) => {}
            Err(e) => debug!("probe task failed: {e}"),
        }
    }
    info!("{} of {} candidates answered on {:?}", live.len(), checked, options.ports);
    live
}
