//! Vendor command profiles.
//!
//! A profile is the command list collected from one kind of device plus a
//! flag saying whether privilege elevation must happen first. Built-in
//! defaults live in [`BUILTIN_PROFILES`]; operators layer overrides on top
//! through files in the collect config directory. Override fields replace
//! the default field wholesale, lists are never merged.

use std::io;
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};
use moka::future::Cache;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::CollectPaths;

/// Profile used when nothing more specific is known.
pub const FALLBACK_PROFILE: &str = "generic";

/// Suffix that selects the telnet flavour of a profile.
pub const TELNET_SUFFIX: &str = "_telnet";

/// Profiles tried in order when classification gave no answer.
pub const DEFAULT_TRY_ORDER: &[&str] = &[
    "cisco_ios",
    "snr",
    "osnova",
    "eltex_mes",
    "dlink",
    "nis",
    "hp_procurve",
    "juniper_junos",
    "generic",
];

/// Built-in profile entry.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinProfile {
    pub id: &'static str,
    /// Entry this one copies its fields from.
    pub extends: Option<&'static str>,
    /// `None` keeps the value inherited through `extends`.
    pub requires_elevation: Option<bool>,
    /// Empty keeps the inherited list.
    pub commands: &'static [&'static str],
}

impl BuiltinProfile {
    /// Lays this entry's set fields over `profile`.
    fn overlay(&self, profile: &mut VendorProfile) {
        if let Some(flag) = self.requires_elevation {
            profile.requires_elevation = flag;
        }
        if !self.commands.is_empty() {
            profile.commands = self.commands.iter().map(|c| c.to_string()).collect();
        }
    }
}

const fn telnet_of(id: &'static str, base: &'static str) -> BuiltinProfile {
    BuiltinProfile {
        id,
        extends: Some(base),
        requires_elevation: None,
        commands: &[],
    }
}

/// Built-in command profiles.
pub const BUILTIN_PROFILES: &[BuiltinProfile] = &[
    BuiltinProfile {
        id: "cisco_ios",
        extends: None,
        requires_elevation: Some(true),
        commands: &[
            "terminal length 0",
            "show version",
            "show lldp neighbors detail",
        ],
    },
    telnet_of("cisco_ios_telnet", "cisco_ios"),
    BuiltinProfile {
        id: "hp_procurve",
        extends: None,
        requires_elevation: Some(false),
        commands: &["show version", "show lldp info remote-device detail"],
    },
    telnet_of("hp_procurve_telnet", "hp_procurve"),
    BuiltinProfile {
        id: "juniper_junos",
        extends: None,
        requires_elevation: Some(false),
        commands: &["show version", "show lldp neighbors detail"],
    },
    telnet_of("juniper_junos_telnet", "juniper_junos"),
    BuiltinProfile {
        id: "dlink",
        extends: None,
        requires_elevation: Some(false),
        commands: &[
            "show version",
            "show lldp remote_ports",
            "show vlan",
            "show interfaces status",
        ],
    },
    telnet_of("dlink_telnet", "dlink"),
    BuiltinProfile {
        id: "nis",
        extends: None,
        requires_elevation: Some(false),
        commands: &[
            "show running-config",
            "show interface * status",
            "show lldp neighbors",
        ],
    },
    telnet_of("nis_telnet", "nis"),
    BuiltinProfile {
        id: "snr",
        extends: None,
        requires_elevation: Some(false),
        commands: &[
            "show version",
            "show lldp neighbors brief",
            "show running-config",
        ],
    },
    BuiltinProfile {
        id: "generic",
        extends: None,
        requires_elevation: Some(false),
        commands: &["show version"],
    },
    telnet_of("generic_telnet", "generic"),
];

/// Template directory names that differ from the profile id.
const TEMPLATE_DIR_ALIASES: &[(&str, &str)] = &[
    ("cisco_xe", "cisco_ios"),
    ("mikrotik_routeros", "mikrotik"),
    ("huawei", "huawei_vrp"),
    ("dlink_ds", "dlink"),
    ("eltex", "eltex_mes"),
];

/// Strips the telnet suffix from a device type.
pub fn base_id(device_type: &str) -> &str {
    device_type
        .strip_suffix(TELNET_SUFFIX)
        .unwrap_or(device_type)
}

fn builtin(id: &str) -> Option<&'static BuiltinProfile> {
    BUILTIN_PROFILES.iter().find(|p| p.id == id)
}

/// Effective command profile for one device type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VendorProfile {
    /// Device type the profile was resolved for, e.g. `dlink_telnet`.
    pub id: String,
    pub commands: Vec<String>,
    pub requires_elevation: bool,
}

/// Operator supplied replacement for a built-in profile.
///
/// Stored as `<config_dir>/<profile>.json`. Missing fields leave the
/// built-in value alone; present fields replace it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProfileOverride {
    /// Run the privilege elevation step before the command list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_enable: Option<bool>,
    /// Commands collected from the device, in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<String>>,
}

impl ProfileOverride {
    pub fn is_empty(&self) -> bool {
        self.pre_enable.is_none() && self.commands.is_none()
    }

    /// Parses the line format: one command per line, `#` starts a comment,
    /// `# pre_enable=<1|true|yes|on>` sets the elevation flag.
    pub fn from_lines(text: &str) -> Self {
        let mut commands = Vec::new();
        let mut pre_enable = None;
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line.starts_with('#') {
                let lower = line.to_ascii_lowercase();
                if let Some(value) = lower.strip_prefix("# pre_enable=") {
                    pre_enable = Some(matches!(value.trim(), "1" | "true" | "yes" | "on"));
                }
                continue;
            }
            commands.push(line.to_string());
        }
        ProfileOverride {
            pre_enable,
            commands: (!commands.is_empty()).then_some(commands),
        }
    }

    fn sanitized(mut self) -> Self {
        if let Some(commands) = self.commands.take() {
            let commands: Vec<String> = commands
                .into_iter()
                .filter(|c| !c.trim().is_empty())
                .collect();
            self.commands = (!commands.is_empty()).then_some(commands);
        }
        self
    }

    fn apply(&self, profile: &mut VendorProfile) {
        if let Some(flag) = self.pre_enable {
            profile.requires_elevation = flag;
        }
        if let Some(commands) = self.commands.as_ref().filter(|c| !c.is_empty()) {
            profile.commands = commands.clone();
        }
    }
}

/// Exports the override file format as JSON Schema.
pub fn override_json_schema() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&schemars::schema_for!(ProfileOverride))
}

/// Built-in entry with `extends` resolved, before overrides.
///
/// Unknown device types fall back to their base entry and then to
/// [`FALLBACK_PROFILE`].
pub fn builtin_profile(device_type: &str) -> VendorProfile {
    let base = base_id(device_type);
    let entry = builtin(device_type)
        .or_else(|| builtin(base))
        .or_else(|| builtin(FALLBACK_PROFILE));
    let mut profile = VendorProfile {
        id: device_type.to_string(),
        commands: Vec::new(),
        requires_elevation: false,
    };
    let Some(own) = entry else {
        return profile;
    };
    // one level of extension: parent fields first, own non-empty fields on top
    let layers = own.extends.and_then(builtin).into_iter().chain([own]);
    for layer in layers {
        layer.overlay(&mut profile);
    }
    profile
}

/// Reads the override for a base profile id.
///
/// Lookup order: `<config_dir>/<id>.json`, `<config_dir>/<id>.txt`, then
/// `<templates_dir>/<vendor dir>/example.txt`. The first file that exists
/// wins. Unreadable or malformed files are logged and treated as absent.
pub async fn load_override(paths: &CollectPaths, base: &str) -> ProfileOverride {
    let json = paths.config_dir.join(format!("{base}.json"));
    if let Some(bytes) = read_present(&json).await {
        let parsed = bytes.and_then(|b| {
            serde_json::from_slice::<ProfileOverride>(&b).map_err(io::Error::from)
        });
        return match parsed {
            Ok(ov) => ov.sanitized(),
            Err(e) => {
                warn!("ignoring profile override {}: {e}", json.display());
                ProfileOverride::default()
            }
        };
    }

    let txt = paths.config_dir.join(format!("{base}.txt"));
    if let Some(bytes) = read_present(&txt).await {
        return lines_override(&txt, bytes);
    }

    let dir = TEMPLATE_DIR_ALIASES
        .iter()
        .find(|(from, _)| *from == base)
        .map(|(_, to)| *to)
        .unwrap_or(base);
    let example = paths.templates_dir.join(dir).join("example.txt");
    if let Some(bytes) = read_present(&example).await {
        return lines_override(&example, bytes);
    }
    ProfileOverride::default()
}

/// File contents, or `None` when the file does not exist.
async fn read_present(path: &Path) -> Option<io::Result<Vec<u8>>> {
    match fs::read(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        other => Some(other),
    }
}

fn lines_override(path: &Path, bytes: io::Result<Vec<u8>>) -> ProfileOverride {
    match bytes {
        Ok(bytes) => ProfileOverride::from_lines(&String::from_utf8_lossy(&bytes)),
        Err(e) => {
            warn!("ignoring profile override {}: {e}", path.display());
            ProfileOverride::default()
        }
    }
}

/// Resolves and memoizes effective profiles for the duration of a run.
#[derive(Clone)]
pub struct ProfileCatalog {
    paths: Arc<CollectPaths>,
    cache: Cache<String, Arc<VendorProfile>>,
}

impl ProfileCatalog {
    pub fn new(paths: CollectPaths) -> Self {
        Self {
            paths: Arc::new(paths),
            cache: Cache::builder().max_capacity(256).build(),
        }
    }

    /// Effective profile for a device type such as `cisco_ios_telnet`.
    pub async fn resolve(&self, device_type: &str) -> Arc<VendorProfile> {
        let paths = self.paths.clone();
        let key = device_type.to_string();
        self.cache
            .get_with(key.clone(), async move {
                let mut profile = builtin_profile(&key);
                let overlay = load_override(&paths, base_id(&key)).await;
                if !overlay.is_empty() {
                    debug!("profile {key} overridden from {}", paths.config_dir.display());
                }
                overlay.apply(&mut profile);
                Arc::new(profile)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn paths_in(dir: &Path) -> CollectPaths {
        CollectPaths::under(dir)
    }

    #[test]
    fn telnet_entries_extend_their_base() {
        let profile = builtin_profile("cisco_ios_telnet");
        assert_eq!(profile.id, "cisco_ios_telnet");
        assert!(profile.requires_elevation);
        assert_eq!(profile.commands, builtin_profile("cisco_ios").commands);
    }

    #[test]
    fn extending_entry_can_switch_inherited_elevation_off() {
        let parent = BuiltinProfile {
            id: "parent",
            extends: None,
            requires_elevation: Some(true),
            commands: &["show version"],
        };
        let child = BuiltinProfile {
            id: "child",
            extends: Some("parent"),
            requires_elevation: Some(false),
            commands: &[],
        };
        let mut profile = VendorProfile {
            id: "child".to_string(),
            commands: Vec::new(),
            requires_elevation: false,
        };
        parent.overlay(&mut profile);
        child.overlay(&mut profile);
        assert!(!profile.requires_elevation);
        assert_eq!(profile.commands, vec!["show version".to_string()]);

        let inherit = BuiltinProfile {
            requires_elevation: None,
            ..child
        };
        parent.overlay(&mut profile);
        inherit.overlay(&mut profile);
        assert!(profile.requires_elevation);
    }

    #[test]
    fn unknown_profiles_fall_back_to_base_then_generic() {
        assert_eq!(
            builtin_profile("snr_telnet").commands,
            builtin_profile("snr").commands
        );
        let osnova = builtin_profile("osnova");
        assert_eq!(osnova.commands, vec!["show version".to_string()]);
        assert!(!osnova.requires_elevation);
    }

    #[test]
    fn line_format_reads_commands_and_flag() {
        let ov = ProfileOverride::from_lines(
            "# comment\n# PRE_ENABLE=yes\n\nshow clock\n  show lldp neighbors  \n",
        );
        assert_eq!(ov.pre_enable, Some(true));
        assert_eq!(
            ov.commands,
            Some(vec!["show clock".to_string(), "show lldp neighbors".to_string()])
        );

        let off = ProfileOverride::from_lines("# pre_enable=0\n");
        assert_eq!(off.pre_enable, Some(false));
        assert!(off.commands.is_none());
    }

    #[tokio::test]
    async fn json_override_replaces_fields_wholesale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(dir.path());
        fs::create_dir_all(&paths.config_dir).expect("mkdir");
        fs::write(
            paths.config_dir.join("cisco_ios.json"),
            r#"{"pre_enable": false, "commands": ["show inventory"]}"#,
        )
        .expect("write");

        let catalog = ProfileCatalog::new(paths);
        let profile = catalog.resolve("cisco_ios_telnet").await;
        assert_eq!(profile.commands, vec!["show inventory".to_string()]);
        assert!(!profile.requires_elevation);
    }

    #[tokio::test]
    async fn partial_override_keeps_other_builtin_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(dir.path());
        fs::create_dir_all(&paths.config_dir).expect("mkdir");
        fs::write(paths.config_dir.join("dlink.txt"), "# pre_enable=on\n").expect("write");

        let profile = ProfileCatalog::new(paths).resolve("dlink").await;
        assert!(profile.requires_elevation);
        assert_eq!(profile.commands.len(), 4);
    }

    #[tokio::test]
    async fn unreadable_override_is_ignored_without_falling_through() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(dir.path());
        fs::create_dir_all(paths.config_dir.join("snr.json")).expect("mkdir");
        fs::write(paths.config_dir.join("snr.txt"), "show clock\n").expect("write");

        let ov = load_override(&paths, "snr").await;
        assert!(ov.is_empty());
        let profile = ProfileCatalog::new(paths).resolve("snr").await;
        assert_eq!(profile.commands, builtin_profile("snr").commands);
    }

    #[tokio::test]
    async fn template_example_is_the_last_resort() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(dir.path());
        let vendor_dir = paths.templates_dir.join("eltex_mes");
        fs::create_dir_all(&vendor_dir).expect("mkdir");
        fs::write(vendor_dir.join("example.txt"), "show system\nshow lldp neighbors\n")
            .expect("write");

        let profile = ProfileCatalog::new(paths).resolve("eltex_mes").await;
        assert_eq!(
            profile.commands,
            vec!["show system".to_string(), "show lldp neighbors".to_string()]
        );
    }

    #[tokio::test]
    async fn malformed_json_override_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(dir.path());
        fs::create_dir_all(&paths.config_dir).expect("mkdir");
        fs::write(paths.config_dir.join("snr.json"), "{not json").expect("write");

        let profile = ProfileCatalog::new(paths).resolve("snr").await;
        assert_eq!(profile.commands, builtin_profile("snr").commands);
    }

    #[test]
    fn override_schema_names_both_fields() {
        let schema = override_json_schema().expect("schema");
        assert!(schema.contains("pre_enable"));
        assert!(schema.contains("commands"));
    }
}
