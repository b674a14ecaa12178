//! Best-effort SSH fingerprinting.
//!
//! Logs in with a permissive prompt template, runs a handful of version
//! commands and matches their output against known signatures. The result
//! is a driver name, translated to a profile id by [`detection_to_profile`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use once_cell::sync::Lazy;
use regex::RegexSet;

use super::{Credentials, SecurityLevel, SessionParams, Transport, ssh};
use crate::error::ConnectError;
use crate::templates::DriverTemplate;

/// Driver name to profile id for fingerprint results.
const DETECTION_TO_PROFILE: &[(&str, &str)] = &[
    ("cisco_ios", "cisco_ios"),
    ("hp_procurve", "hp_procurve"),
    ("aruba_procurve", "hp_procurve"),
    ("juniper_junos", "juniper_junos"),
    ("juniper", "juniper_junos"),
    ("eltex", "eltex_mes"),
    ("dlink_ds", "dlink"),
    ("mikrotik_routeros", "mikrotik"),
    ("huawei", "huawei_vrp"),
];

/// Profile id for a detected driver; unknown names pass through.
pub fn detection_to_profile(driver: &str) -> String {
    DETECTION_TO_PROFILE
        .iter()
        .find(|(from, _)| *from == driver)
        .map(|(_, to)| to.to_string())
        .unwrap_or_else(|| driver.to_string())
}

/// One fingerprint: the command to run and what its output must contain.
#[derive(Debug)]
pub struct Signature {
    pub driver: &'static str,
    pub command: &'static str,
    patterns: RegexSet,
}

fn signature(driver: &'static str, command: &'static str, patterns: &[&str]) -> Signature {
    match RegexSet::new(patterns) {
        Ok(patterns) => Signature {
            driver,
            command,
            patterns,
        },
        Err(err) => panic!("invalid signature regex for {driver}: {err}"),
    }
}

/// Fingerprints in match priority order.
pub static SIGNATURES: Lazy<Vec<Signature>> = Lazy::new(|| {
    vec![
        signature(
            "mikrotik_routeros",
            "/system resource print",
            &[r"(?i)platform:\s+mikrotik", r"RouterOS"],
        ),
        signature(
            "juniper_junos",
            "show version",
            &[r"JUNOS Software Release", r"JUNOS .+ Software", r"Junos: \d"],
        ),
        signature(
            "huawei",
            "display version",
            &[
                r"Huawei Versatile Routing Platform Software",
                r"Huawei Technologies",
            ],
        ),
        signature("eltex", "show version", &[r"(?i)eltex", r"MES\d{4}"]),
        signature(
            "dlink_ds",
            "show switch",
            &[r"D-Link", r"Device Type\s+:\s+D[GE]S-"],
        ),
        signature(
            "aruba_procurve",
            "show version",
            &[r"Image stamp.*/code/build", r"(?i)aruba"],
        ),
        signature(
            "cisco_ios",
            "show version",
            &[
                r"Cisco IOS Software",
                r"Cisco Internetwork Operating System Software",
            ],
        ),
    ]
});

/// First signature whose command output matches.
pub fn match_signatures(outputs: &HashMap<&str, String>) -> Option<&'static str> {
    SIGNATURES.iter().find_map(|sig| {
        outputs
            .get(sig.command)
            .filter(|text| sig.patterns.is_match(text))
            .map(|_| sig.driver)
    })
}

/// Accepts any `>`, `#`, `$`, `%` or `]` terminated prompt.
const DETECT_TEMPLATE: DriverTemplate = DriverTemplate {
    name: "autodetect",
    vendor: "any",
    prompts: &[r"^\S.*[>#$%\]]\s*$"],
    more: &[r"(?i)-+\s*more\s*-+", r"---- More ----"],
    enable_command: None,
    privileged_prompt: None,
    fast_cli: true,
};

/// Logs in over SSH and fingerprints the device.
///
/// Connection and login use the given timeouts; the fingerprint commands
/// together are bounded by the auth timeout.
pub async fn autodetect_ssh(
    host: &str,
    credentials: Arc<Credentials>,
    connect_timeout: Duration,
    auth_timeout: Duration,
    security: SecurityLevel,
) -> Result<Option<String>, ConnectError> {
    let params = SessionParams {
        host: host.to_string(),
        port: Transport::Ssh.port(),
        transport: Transport::Ssh,
        device_type: "autodetect".to_string(),
        driver: DETECT_TEMPLATE,
        credentials,
        connect_timeout,
        auth_timeout,
        fast: true,
    };
    let (handle, mut shell) = ssh::open(&params, security).await?;

    let mut commands: Vec<&'static str> = Vec::new();
    for sig in SIGNATURES.iter() {
        if !commands.contains(&sig.command) {
            commands.push(sig.command);
        }
    }

    let mut outputs: HashMap<&str, String> = HashMap::new();
    let exchange = async {
        for command in commands {
            let text = shell
                .send_command_timing(command, auth_timeout)
                .await?;
            outputs.insert(command, text);
            if let Some(driver) = match_signatures(&outputs) {
                return Ok::<_, ConnectError>(Some(driver));
            }
        }
        Ok(None)
    };
    let found = tokio::time::timeout(auth_timeout, exchange).await;

    shell.close().await;
    ssh::disconnect(handle).await;

    match found {
        Ok(Ok(driver)) => {
            debug!("{host} autodetect result {driver:?}");
            Ok(driver.map(str::to_string))
        }
        Ok(Err(err)) => Err(err),
        Err(_) => Err(ConnectError::AuthTimeout(format!("{host} autodetect"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_maps_driver_names_to_profiles() {
        assert_eq!(detection_to_profile("aruba_procurve"), "hp_procurve");
        assert_eq!(detection_to_profile("huawei"), "huawei_vrp");
        assert_eq!(detection_to_profile("mikrotik_routeros"), "mikrotik");
        assert_eq!(detection_to_profile("brocade_fastiron"), "brocade_fastiron");
    }

    #[test]
    fn cisco_version_output_matches_cisco_signature() {
        let mut outputs = HashMap::new();
        outputs.insert(
            "show version",
            "Cisco IOS Software, C2960 Software (C2960-LANBASEK9-M)".to_string(),
        );
        assert_eq!(match_signatures(&outputs), Some("cisco_ios"));
    }

    #[test]
    fn signature_priority_prefers_specific_vendor() {
        let mut outputs = HashMap::new();
        outputs.insert(
            "show version",
            "Eltex MES2324 ... based on Cisco IOS Software compatible CLI".to_string(),
        );
        assert_eq!(match_signatures(&outputs), Some("eltex"));
    }

    #[test]
    fn unrelated_output_matches_nothing() {
        let mut outputs = HashMap::new();
        outputs.insert("show version", "% Invalid input detected".to_string());
        outputs.insert("display version", "Unrecognized command".to_string());
        assert_eq!(match_signatures(&outputs), None);
    }
}
