//! # rcollect - Network Device CLI Collector
//!
//! `rcollect` reaches many heterogeneous network devices over SSH or Telnet,
//! guesses their vendor, runs a vendor-specific command list and stores the
//! raw output for a later parsing stage. Hosts are handled concurrently with
//! bounded worker pools; a slow or broken device never blocks the others.
//!
//! ## Features
//!
//! - **Target Expansion**: literal addresses plus prefix ranges, deduplicated, with exclusions
//! - **Reachability Probe**: concurrent TCP checks on the SSH and Telnet ports
//! - **Vendor Classification**: override, stored output, range hints and SSH fingerprinting
//! - **Fallback Ordering**: `(profile, transport)` candidates tried until one session works
//! - **Deadlines**: a per-host wall-clock budget across all attempts
//! - **Maximum Compatibility**: legacy SSH algorithms for old switches
//! - **Async/Await**: Built on Tokio
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rcollect::config::CollectConfig;
//! use rcollect::coordinator::ProgressEvent;
//! use rcollect::probe::TcpProbe;
//! use rcollect::report::Summary;
//! use rcollect::runner::run;
//! use rcollect::session::{Credentials, NetworkConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CollectConfig {
//!         ranges: vec!["192.0.2.0/28".to_string()],
//!         ..Default::default()
//!     }
//!     .normalized();
//!     let credentials = Arc::new(Credentials::new("admin", "password", None));
//!     let connector = NetworkConnector::new(config.security);
//!
//!     let report = run(config, credentials, connector, Arc::new(TcpProbe), |event| {
//!         if let ProgressEvent::HostDone { done, total, outcome } = event {
//!             println!("{}", Summary::progress_line(done, total, outcome));
//!         }
//!     })
//!     .await?;
//!
//!     println!("{}", report.summary);
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`targets`] - Target expansion and exclusion filtering
//! - [`probe::probe_live`] - Reachability sweep
//! - [`classify::Classifier`] - Vendor classification
//! - [`collector::Collector`] - Per-host connect / execute / persist protocol
//! - [`coordinator::collect_all`] - Bounded pool with progress and heartbeat events
//! - [`session::NetworkConnector`] - SSH (russh) and Telnet sessions
//! - [`error::ConnectError`] - Error types for sessions

pub mod classify;
pub mod collector;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod probe;
pub mod profile;
pub mod report;
pub mod runner;
pub mod session;
pub mod storage;
pub mod targets;
pub mod templates;
