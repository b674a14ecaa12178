//! Vendor classification for live addresses.
//!
//! Resolution order, first answer wins:
//!
//! 1. the run-wide `prefer_vendor` override
//! 2. keywords in output stored by an earlier run
//! 3. the vendor hint table, first containing range
//! 4. active SSH fingerprinting, when enabled and port 22 answered
//!
//! Nothing here fails: every problem degrades to the next step and finally
//! to [`FALLBACK_PROFILE`].

use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ipnetwork::IpNetwork;
use log::{debug, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::profile::FALLBACK_PROFILE;
use crate::session::{Credentials, SessionConnector, detection_to_profile};
use crate::storage::RawStore;

/// Characters of stored output scanned for vendor keywords.
pub const STORED_HEAD_CHARS: usize = 4000;

/// Keyword groups checked in this order against lowercased text.
const VENDOR_KEYWORDS: &[(&[&str], &str)] = &[
    (&["routeros", "mikrotik"], "mikrotik"),
    (&["eltex", " mes"], "eltex_mes"),
    (&["huawei", " vrp"], "huawei_vrp"),
    (&["d-link", " dgs", " des-", "des-", "dgs-"], "dlink"),
    (&["qtech", " qsw"], "qtech"),
    (&["cisco ios", "ios-xe", "cisco"], "cisco_ios"),
];

/// Profile guessed from device output, using the fixed keyword order.
pub fn guess_vendor_from_text(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    VENDOR_KEYWORDS
        .iter()
        .find(|(words, _)| words.iter().any(|w| lower.contains(w)))
        .map(|(_, profile)| *profile)
}

/// One `vendor_hints.json` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VendorHint {
    /// Network in prefix notation; host bits are allowed.
    pub cidr: String,
    /// Profile id applied to addresses inside the network.
    pub vendor: String,
}

/// Accepted layouts of the hints file.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum HintsFile {
    List(Vec<VendorHint>),
    Wrapped { ranges: Vec<VendorHint> },
}

/// Exports the hints file format as JSON Schema.
pub fn hints_json_schema() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&schemars::schema_for!(HintsFile))
}

/// Ordered range-to-profile table.
#[derive(Debug, Clone, Default)]
pub struct VendorHints {
    entries: Vec<(IpNetwork, String)>,
}

impl VendorHints {
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (IpNetwork, String)>,
    {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Loads the table; a missing file is an empty table.
    ///
    /// Malformed files are logged and yield an empty table. Records without
    /// a usable `cidr` or `vendor` are skipped one by one.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!("ignoring vendor hints {}: {e}", path.display());
                return Self::default();
            }
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Self::from_value(value),
            Err(e) => {
                warn!("ignoring vendor hints {}: {e}", path.display());
                Self::default()
            }
        }
    }

    fn from_value(value: Value) -> Self {
        let items = match value {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("ranges") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        let mut entries = Vec::new();
        for item in items {
            let Ok(hint) = serde_json::from_value::<VendorHint>(item) else {
                continue;
            };
            let vendor = hint.vendor.trim();
            if vendor.is_empty() {
                continue;
            }
            match hint.cidr.trim().parse::<IpNetwork>() {
                Ok(net) => entries.push((net, vendor.to_string())),
                Err(e) => debug!("skipping vendor hint {}: {e}", hint.cidr),
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Profile of the first range containing `address`.
    pub fn lookup(&self, address: &str) -> Option<&str> {
        let ip = address.parse::<IpAddr>().ok()?;
        self.entries
            .iter()
            .find(|(net, _)| net.contains(ip))
            .map(|(_, vendor)| vendor.as_str())
    }
}

/// Which step produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Override,
    StoredOutput,
    RangeHint,
    Detected,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// `None` when no step resolved a profile.
    pub profile: Option<String>,
    pub source: ClassificationSource,
}

impl Classification {
    fn resolved(profile: impl Into<String>, source: ClassificationSource) -> Self {
        Self {
            profile: Some(profile.into()),
            source,
        }
    }

    pub fn fallback() -> Self {
        Self {
            profile: None,
            source: ClassificationSource::Fallback,
        }
    }

    /// Resolved profile or [`FALLBACK_PROFILE`].
    pub fn profile_id(&self) -> &str {
        self.profile.as_deref().unwrap_or(FALLBACK_PROFILE)
    }
}

/// Read-only classification context shared by every worker.
#[derive(Debug, Clone)]
pub struct Classifier {
    pub prefer_vendor: Option<String>,
    pub hints: Arc<VendorHints>,
    pub store: RawStore,
    pub detect: bool,
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
}

impl Classifier {
    pub async fn classify<C: SessionConnector>(
        &self,
        address: &str,
        credentials: &Arc<Credentials>,
        connector: &C,
        ssh_reachable: bool,
    ) -> Classification {
        if let Some(vendor) = &self.prefer_vendor {
            return Classification::resolved(vendor, ClassificationSource::Override);
        }

        let stored = self.store.read_head(address, STORED_HEAD_CHARS).await;
        if let Some(vendor) = stored.as_deref().and_then(guess_vendor_from_text) {
            debug!("{address} classified {vendor} from stored output");
            return Classification::resolved(vendor, ClassificationSource::StoredOutput);
        }

        if let Some(vendor) = self.hints.lookup(address) {
            debug!("{address} classified {vendor} from vendor hints");
            return Classification::resolved(vendor, ClassificationSource::RangeHint);
        }

        if self.detect && ssh_reachable {
            match connector
                .autodetect(
                    address,
                    credentials.clone(),
                    self.connect_timeout,
                    self.auth_timeout,
                )
                .await
            {
                Ok(Some(driver)) => {
                    let profile = detection_to_profile(&driver);
                    debug!("{address} autodetected {driver} -> {profile}");
                    return Classification::resolved(profile, ClassificationSource::Detected);
                }
                Ok(None) => debug!("{address} autodetect found no signature"),
                Err(e) => debug!("{address} autodetect failed: {e}"),
            }
        }

        Classification::fallback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectError;
    use crate::session::{DeviceSession, SessionParams};

    struct NoSession;

    impl DeviceSession for NoSession {
        async fn enable(&mut self, _secret: &str) -> Result<(), ConnectError> {
            Ok(())
        }
        async fn send_command(&mut self, _c: &str, _t: Duration) -> Result<String, ConnectError> {
            Ok(String::new())
        }
        async fn send_command_timing(
            &mut self,
            _c: &str,
            _t: Duration,
        ) -> Result<String, ConnectError> {
            Ok(String::new())
        }
        async fn find_prompt(&mut self, _t: Duration) -> Result<String, ConnectError> {
            Ok(String::new())
        }
        async fn close(self) {}
    }

    /// Autodetect answers with a fixed driver name.
    struct Detects(Option<&'static str>);

    impl SessionConnector for Detects {
        type Session = NoSession;

        async fn connect(&self, _params: SessionParams) -> Result<NoSession, ConnectError> {
            Err(ConnectError::ChannelDisconnectError)
        }

        async fn autodetect(
            &self,
            _host: &str,
            _credentials: Arc<Credentials>,
            _connect_timeout: Duration,
            _auth_timeout: Duration,
        ) -> Result<Option<String>, ConnectError> {
            match self.0 {
                Some(driver) => Ok(Some(driver.to_string())),
                None => Err(ConnectError::AuthTimeout("detect".to_string())),
            }
        }
    }

    fn classifier(dir: &Path, hints: VendorHints) -> Classifier {
        Classifier {
            prefer_vendor: None,
            hints: Arc::new(hints),
            store: RawStore::new(dir),
            detect: true,
            connect_timeout: Duration::from_secs(1),
            auth_timeout: Duration::from_secs(1),
        }
    }

    fn creds() -> Arc<Credentials> {
        Arc::new(Credentials::new("admin", "pw", None))
    }

    #[test]
    fn keyword_order_is_fixed() {
        assert_eq!(guess_vendor_from_text("MikroTik RouterOS 6.49"), Some("mikrotik"));
        // both eltex and cisco markers: eltex is checked first
        assert_eq!(
            guess_vendor_from_text("Eltex MES2324 (Cisco-like CLI)"),
            Some("eltex_mes")
        );
        assert_eq!(guess_vendor_from_text("Huawei Versatile Routing Platform"), Some("huawei_vrp"));
        assert_eq!(guess_vendor_from_text("DGS-3120-24TC"), Some("dlink"));
        assert_eq!(guess_vendor_from_text("Cisco IOS Software"), Some("cisco_ios"));
        assert_eq!(guess_vendor_from_text("nothing to see"), None);
    }

    #[test]
    fn hints_accept_list_or_ranges_object_and_skip_bad_entries() {
        let list = VendorHints::from_value(serde_json::json!([
            {"cidr": "10.1.0.0/16", "vendor": "huawei_vrp"},
            {"cidr": "bogus", "vendor": "dlink"},
            {"vendor": "snr"},
            {"cidr": "10.1.2.0/24", "vendor": "dlink"},
        ]));
        assert_eq!(list.len(), 2);
        assert_eq!(list.lookup("10.1.2.3"), Some("huawei_vrp"));
        assert_eq!(list.lookup("10.2.0.1"), None);
        assert_eq!(list.lookup("switch-a"), None);

        let wrapped = VendorHints::from_value(serde_json::json!({
            "ranges": [{"cidr": "192.0.2.9/24", "vendor": "snr"}]
        }));
        assert_eq!(wrapped.lookup("192.0.2.77"), Some("snr"));
    }

    #[test]
    fn missing_or_malformed_hints_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(VendorHints::load(&dir.path().join("absent.json")).is_empty());
        let bad = dir.path().join("vendor_hints.json");
        fs::write(&bad, "{ not json").expect("write");
        assert!(VendorHints::load(&bad).is_empty());
    }

    #[test]
    fn hints_schema_names_both_fields() {
        let schema = hints_json_schema().expect("schema");
        assert!(schema.contains("cidr"));
        assert!(schema.contains("ranges"));
    }

    #[tokio::test]
    async fn override_beats_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut c = classifier(dir.path(), VendorHints::default());
        c.prefer_vendor = Some("snr".to_string());
        let got = c.classify("10.0.0.1", &creds(), &Detects(Some("huawei")), true).await;
        assert_eq!(got.profile_id(), "snr");
        assert_eq!(got.source, ClassificationSource::Override);
    }

    #[tokio::test]
    async fn stored_output_is_checked_before_hints() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("10.0.0.1.txt"), "RouterOS 7.1").expect("write");
        let net: IpNetwork = "10.0.0.0/24".parse().expect("net");
        let hints = VendorHints::new([(net, "dlink".to_string())]);
        let c = classifier(dir.path(), hints);
        let got = c.classify("10.0.0.1", &creds(), &Detects(None), true).await;
        assert_eq!(got.profile_id(), "mikrotik");
        assert_eq!(got.source, ClassificationSource::StoredOutput);

        let other = c.classify("10.0.0.2", &creds(), &Detects(None), true).await;
        assert_eq!(other.profile_id(), "dlink");
        assert_eq!(other.source, ClassificationSource::RangeHint);
    }

    #[tokio::test]
    async fn autodetect_result_is_translated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = classifier(dir.path(), VendorHints::default());
        let got = c
            .classify("10.0.0.1", &creds(), &Detects(Some("aruba_procurve")), true)
            .await;
        assert_eq!(got.profile_id(), "hp_procurve");
        assert_eq!(got.source, ClassificationSource::Detected);
    }

    #[tokio::test]
    async fn detection_failures_and_closed_ssh_fall_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = classifier(dir.path(), VendorHints::default());
        let failed = c.classify("10.0.0.1", &creds(), &Detects(None), true).await;
        assert_eq!(failed, Classification::fallback());
        assert_eq!(failed.profile_id(), FALLBACK_PROFILE);

        let skipped = c
            .classify("10.0.0.1", &creds(), &Detects(Some("huawei")), false)
            .await;
        assert_eq!(skipped.profile, None);
    }
}
