use std::io::{self, Write};

use chrono::Local;
use serde::Serialize;
use tracing::info;

use crate::acquire::AcquisitionReport;
use crate::app::{ProgressEvent, ProgressSink, RunReport, StatusReport, fmt_elapsed};
use crate::prepare::PrepareReport;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_acquire(report: &AcquisitionReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_prepare(report: &PrepareReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_run(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_status<T: Serialize>(report: &T) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress as log lines: `[h:mm:ss AM] <text>`.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        let (phase, text) = split_phase(&event.message);
        match event.elapsed {
            Some(elapsed) => info!(
                phase,
                elapsed = %fmt_elapsed(elapsed),
                "[{}] {text}",
                log_timestamp()
            ),
            None => info!(phase, "[{}] {text}", log_timestamp()),
        }
    }
}

/// Plain-text status table for interactive terminals.
pub fn render_status(report: &StatusReport) -> String {
    let mut out = format!(
        "target {}: {}/{} layers complete\n",
        report.target_epsg,
        report.complete(),
        report.layers.len()
    );
    for entry in &report.layers {
        let status = serde_json::to_value(entry.status)
            .ok()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default();
        out.push_str(&format!("  {:<14} {:<8} {}\n", entry.key, status, entry.location.dataset()));
    }
    out
}

fn log_timestamp() -> String {
    Local::now().format("%-I:%M:%S %p").to_string()
}

fn split_phase(message: &str) -> (&str, &str) {
    message
        .strip_prefix("phase=")
        .and_then(|rest| rest.split_once(';'))
        .map(|(phase, text)| (phase.trim(), text.trim()))
        .unwrap_or(("", message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_prefix_is_split() {
        assert_eq!(
            split_phase("phase=Fetch; done: oahu.nc"),
            ("Fetch", "done: oahu.nc")
        );
        assert_eq!(split_phase("plain message"), ("", "plain message"));
    }

    #[test]
    fn timestamp_is_twelve_hour() {
        let stamp = log_timestamp();
        assert!(stamp.ends_with("AM") || stamp.ends_with("PM"));
    }
}
