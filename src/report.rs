//! Run summary rendering.

use std::fmt;
use std::path::{Path, PathBuf};

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table, modifiers};

use crate::collector::{HostOutcome, HostStatus};

/// Longest info cell before it is cut with `...`.
pub const MAX_INFO_CHARS: usize = 120;

/// Info text for one outcome: the device type when ok, the joined and
/// truncated diagnostics otherwise.
pub fn info_text(outcome: &HostOutcome) -> String {
    match outcome.status {
        HostStatus::Ok => outcome.device_type.clone().unwrap_or_default(),
        HostStatus::Fail => truncate(&outcome.errors.join("; "), MAX_INFO_CHARS),
    }
}

/// Cuts `text` to at most `max` characters, ending with `...` when cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub address: String,
    pub status: HostStatus,
    pub info: String,
}

/// Aggregated view of a finished run.
#[derive(Debug, Clone)]
pub struct Summary {
    pub ok: usize,
    pub total: usize,
    pub rows: Vec<SummaryRow>,
    pub raw_dir: PathBuf,
}

impl Summary {
    pub fn from_outcomes(outcomes: &[HostOutcome], raw_dir: &Path) -> Self {
        let rows: Vec<SummaryRow> = outcomes
            .iter()
            .map(|o| SummaryRow {
                address: o.address.clone(),
                status: o.status,
                info: info_text(o),
            })
            .collect();
        Self {
            ok: rows.iter().filter(|r| r.status == HostStatus::Ok).count(),
            total: rows.len(),
            rows,
            raw_dir: raw_dir.to_path_buf(),
        }
    }

    /// Per-host completion line: `<done>/<total> <ip>: <status> <info>`.
    pub fn progress_line(done: usize, total: usize, outcome: &HostOutcome) -> String {
        format!(
            "{done}/{total} {}: {} {}",
            outcome.address,
            outcome.status,
            info_text(outcome)
        )
    }

    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .apply_modifier(modifiers::UTF8_ROUND_CORNERS);
        table.set_header(vec!["IP/Host", "Status", "Info / Errors"]);
        for row in &self.rows {
            let status = match row.status {
                HostStatus::Ok => Cell::new("ok").fg(Color::Green),
                HostStatus::Fail => Cell::new("fail").fg(Color::Red),
            };
            table.add_row(vec![Cell::new(&row.address), status, Cell::new(&row.info)]);
        }
        table
    }

    /// `ok: <ok>/<total>` footer line.
    pub fn counts_line(&self) -> String {
        format!("ok: {}/{}", self.ok, self.total)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.table())?;
        writeln!(f, "{}", self.counts_line())?;
        write!(f, "raw output: {}", self.raw_dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(address: &str, device_type: &str) -> HostOutcome {
        HostOutcome {
            address: address.to_string(),
            status: HostStatus::Ok,
            device_type: Some(device_type.to_string()),
            errors: vec!["cisco_ios: authentication failed for user admin".to_string()],
            artifact: Some(PathBuf::from("data/raw/unknown/x.txt")),
            attempts: Vec::new(),
        }
    }

    #[test]
    fn counts_and_info_follow_status() {
        let mut fail = HostOutcome::failed("10.0.0.2", "cisco_ios: connect timeout after 3s");
        fail.errors.push("snr: connect timeout after 3s".to_string());
        let summary = Summary::from_outcomes(
            &[ok("10.0.0.1", "huawei_vrp_telnet"), fail],
            Path::new("data/raw"),
        );
        assert_eq!(summary.counts_line(), "ok: 1/2");
        assert_eq!(summary.rows[0].info, "huawei_vrp_telnet");
        assert_eq!(
            summary.rows[1].info,
            "cisco_ios: connect timeout after 3s; snr: connect timeout after 3s"
        );
    }

    #[test]
    fn long_diagnostics_are_truncated() {
        let outcome = HostOutcome::failed("10.0.0.3", "x".repeat(200));
        let info = info_text(&outcome);
        assert_eq!(info.chars().count(), MAX_INFO_CHARS);
        assert!(info.ends_with("..."));
        assert_eq!(truncate(&"y".repeat(120), MAX_INFO_CHARS), "y".repeat(120));
    }

    #[test]
    fn progress_line_shows_device_type() {
        let line = Summary::progress_line(3, 10, &ok("10.0.0.1", "dlink_telnet"));
        assert_eq!(line, "3/10 10.0.0.1: ok dlink_telnet");
    }

    #[test]
    fn rendered_summary_mentions_raw_dir() {
        let summary = Summary::from_outcomes(&[ok("10.0.0.1", "snr")], Path::new("/tmp/raw"));
        let text = summary.to_string();
        assert!(text.contains("10.0.0.1"));
        assert!(text.contains("ok: 1/1"));
        assert!(text.ends_with("raw output: /tmp/raw"));
    }
}
