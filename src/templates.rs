//! Predefined driver templates.
//!
//! A driver template describes how to talk to one CLI family: what its
//! prompts look like, how it pages output and how privilege elevation is
//! requested. Vendor profiles are mapped onto these drivers by
//! [`driver_for_profile`].

use crate::device::PromptMatcher;
use crate::error::ConnectError;
use crate::profile::base_id;

/// Built-in driver names supported by this crate.
pub const BUILTIN_TEMPLATES: &[&str] = &[
    "cisco_ios",
    "eltex",
    "dlink_ds",
    "hp_procurve",
    "juniper_junos",
    "mikrotik_routeros",
    "huawei",
];

/// Profile id to driver name.
///
/// Profiles for cisco-like CLIs without a dedicated driver reuse
/// `cisco_ios`.
pub const PROFILE_TO_DRIVER: &[(&str, &str)] = &[
    ("cisco_ios", "cisco_ios"),
    ("eltex_mes", "eltex"),
    ("dlink", "dlink_ds"),
    ("hp_procurve", "hp_procurve"),
    ("juniper_junos", "juniper_junos"),
    ("mikrotik", "mikrotik_routeros"),
    ("huawei_vrp", "huawei"),
    ("qtech", "cisco_ios"),
    ("generic", "cisco_ios"),
    ("nis", "cisco_ios"),
    ("zes", "cisco_ios"),
    ("osnova", "cisco_ios"),
    ("snr", "cisco_ios"),
];

/// Everything a session needs to know about a CLI family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverTemplate {
    pub name: &'static str,
    pub vendor: &'static str,
    pub prompts: &'static [&'static str],
    pub more: &'static [&'static str],
    /// Command that requests privileged mode.
    pub enable_command: Option<&'static str>,
    /// Pattern a prompt matches once in privileged mode.
    pub privileged_prompt: Option<&'static str>,
    /// Shorter idle windows for timing reads.
    pub fast_cli: bool,
}

impl DriverTemplate {
    /// Compiles the prompt matcher for a new session.
    pub fn matcher(&self) -> Result<PromptMatcher, ConnectError> {
        PromptMatcher::new(
            self.prompts.iter().copied(),
            self.privileged_prompt,
            self.more.iter().copied(),
        )
    }
}

const CISCO_PROMPTS: &[&str] = &[r"^[\w\-.:/()@]+(\(\S+\))?[>#]\s*$"];
const CISCO_MORE: &[&str] = &[r"(?i)-+\s*more\s*-+", r"\s*<--- More --->\s*"];

/// Returns the template for Cisco IOS/IOS-XE and cisco-like CLIs.
pub fn cisco_ios() -> DriverTemplate {
    DriverTemplate {
        name: "cisco_ios",
        vendor: "Cisco",
        prompts: CISCO_PROMPTS,
        more: CISCO_MORE,
        enable_command: Some("enable"),
        privileged_prompt: Some(r"#\s*$"),
        fast_cli: true,
    }
}

/// Returns the template for Eltex MES switches.
pub fn eltex() -> DriverTemplate {
    DriverTemplate {
        name: "eltex",
        vendor: "Eltex",
        prompts: CISCO_PROMPTS,
        more: &[r"More: <space>,\s+Quit: q", r"(?i)-+\s*more\s*-+"],
        enable_command: Some("enable"),
        privileged_prompt: Some(r"#\s*$"),
        fast_cli: false,
    }
}

/// Returns the template for D-Link DES/DGS switches.
pub fn dlink_ds() -> DriverTemplate {
    DriverTemplate {
        name: "dlink_ds",
        vendor: "D-Link",
        prompts: &[r"^\S+:(\S+)?[#>]\s*$", r"^[\w\-.]+[#>]\s*$"],
        more: &[r"CTRL\+C\s+ESC\s+q\s+Quit\s+SPACE\s+n\s+Next Page"],
        enable_command: Some("enable admin"),
        privileged_prompt: None,
        fast_cli: false,
    }
}

/// Returns the template for HP ProCurve / Aruba switches.
pub fn hp_procurve() -> DriverTemplate {
    DriverTemplate {
        name: "hp_procurve",
        vendor: "HP",
        prompts: &[r"^[\w\-.()]+[>#]\s*$"],
        more: &[
            r"-- MORE --, next page: Space",
            r"Press any key to continue",
        ],
        enable_command: Some("enable"),
        privileged_prompt: Some(r"#\s*$"),
        fast_cli: false,
    }
}

/// Returns the template for Juniper JunOS devices.
pub fn juniper_junos() -> DriverTemplate {
    DriverTemplate {
        name: "juniper_junos",
        vendor: "Juniper",
        prompts: &[r"^(\{\w+(:\w+)?\}\s*)?[\w\-.]+@[\w\-.]+[>#%]\s*$"],
        more: &[r"---\(more( \d+%)?\)---"],
        enable_command: None,
        privileged_prompt: None,
        fast_cli: false,
    }
}

/// Returns the template for MikroTik RouterOS.
pub fn mikrotik_routeros() -> DriverTemplate {
    DriverTemplate {
        name: "mikrotik_routeros",
        vendor: "MikroTik",
        prompts: &[r"\[[^\]]+@[^\]]+\]\s*(/[\w\-/ ]*)?>\s*$"],
        more: &[],
        enable_command: None,
        privileged_prompt: None,
        fast_cli: false,
    }
}

/// Returns the template for Huawei VRP devices.
pub fn huawei() -> DriverTemplate {
    DriverTemplate {
        name: "huawei",
        vendor: "Huawei",
        prompts: &[r"^(HRP_M|HRP_S)?\[.+\]\s*$", r"^(RBM_P|RBM_S)?<.+>\s*$"],
        more: &[r"\s*---- More ----\s*"],
        enable_command: None,
        privileged_prompt: None,
        fast_cli: false,
    }
}

/// Returns names of all built-in templates.
pub fn available_templates() -> &'static [&'static str] {
    BUILTIN_TEMPLATES
}

/// Creates a built-in template by name (case-insensitive).
pub fn by_name(name: &str) -> Result<DriverTemplate, ConnectError> {
    match name.to_ascii_lowercase().as_str() {
        "cisco_ios" => Ok(cisco_ios()),
        "eltex" => Ok(eltex()),
        "dlink_ds" => Ok(dlink_ds()),
        "hp_procurve" => Ok(hp_procurve()),
        "juniper_junos" => Ok(juniper_junos()),
        "mikrotik_routeros" => Ok(mikrotik_routeros()),
        "huawei" => Ok(huawei()),
        _ => Err(ConnectError::TemplateNotFound(name.to_string())),
    }
}

/// Driver name for a profile or device type such as `dlink_telnet`.
///
/// Profiles missing from [`PROFILE_TO_DRIVER`] are passed through as the
/// driver name, so an unknown profile surfaces later as
/// [`ConnectError::TemplateNotFound`].
pub fn driver_name_for_profile(device_type: &str) -> &str {
    let base = base_id(device_type);
    PROFILE_TO_DRIVER
        .iter()
        .find(|(profile, _)| *profile == base)
        .map(|(_, driver)| *driver)
        .unwrap_or(base)
}

/// Resolves the driver template used for a profile.
pub fn driver_for_profile(device_type: &str) -> Result<DriverTemplate, ConnectError> {
    by_name(driver_name_for_profile(device_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LineKind;

    #[test]
    fn available_templates_contains_expected_names() {
        let names = available_templates();
        assert!(names.contains(&"cisco_ios"));
        assert!(names.contains(&"huawei"));
        assert!(names.contains(&"dlink_ds"));
    }

    #[test]
    fn by_name_is_case_insensitive() {
        assert!(by_name("Cisco_IOS").is_ok());
        assert!(by_name("HUAWEI").is_ok());
    }

    #[test]
    fn by_name_returns_template_not_found_for_unknown_name() {
        let err = match by_name("unknown-vendor") {
            Ok(_) => panic!("unknown template should return error"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::TemplateNotFound(name) if name == "unknown-vendor"));
    }

    #[test]
    fn every_builtin_template_compiles() {
        for name in BUILTIN_TEMPLATES {
            let template = by_name(name).expect("builtin");
            template.matcher().expect("valid regexes");
            assert_eq!(template.name, *name);
            assert!(!template.vendor.is_empty());
        }
    }

    #[test]
    fn cisco_like_profiles_share_the_cisco_driver() {
        for profile in ["snr", "osnova", "nis", "generic", "qtech", "snr_telnet"] {
            assert_eq!(driver_name_for_profile(profile), "cisco_ios");
        }
        assert_eq!(driver_name_for_profile("eltex_mes"), "eltex");
        assert_eq!(driver_name_for_profile("dlink_telnet"), "dlink_ds");
    }

    #[test]
    fn unmapped_profile_fails_template_lookup() {
        let err = match driver_for_profile("acme_os") {
            Ok(_) => panic!("unmapped profile should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::TemplateNotFound(_)));
    }

    #[test]
    fn vendor_prompts_are_recognized() {
        let cases = [
            ("cisco_ios", "core-sw1#"),
            ("cisco_ios", "access-sw(config)#"),
            ("eltex", "mes2324>"),
            ("dlink_ds", "DGS-3120-24TC:admin#"),
            ("hp_procurve", "HP-2530-48G# "),
            ("juniper_junos", "admin@ex4300> "),
            ("mikrotik_routeros", "[admin@MikroTik] > "),
            ("huawei", "<HUAWEI>"),
        ];
        for (name, prompt) in cases {
            let mut matcher = by_name(name).expect("builtin").matcher().expect("matcher");
            assert_eq!(matcher.read(prompt), LineKind::Prompt, "{name}: {prompt}");
        }
    }

    #[test]
    fn pager_prompts_are_recognized() {
        let mut cisco = cisco_ios().matcher().expect("matcher");
        assert_eq!(cisco.read(" --More-- "), LineKind::More);
        let mut huawei = huawei().matcher().expect("matcher");
        assert_eq!(huawei.read("  ---- More ----"), LineKind::More);
    }
}
