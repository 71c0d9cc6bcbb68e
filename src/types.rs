use std::collections::BTreeMap;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// One URL string read from the job source. Echoed as-is into results.
pub type ScanTarget = String;

/// Response headers copied into every result. Missing ones render as "".
pub const CAPTURED_HEADERS: [&str; 2] = ["Content-Type", "Server"];

/// Outcome of one successful fetch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub status: String,
}

impl ScanResult {
    /// Build a result from the response parts, capturing only the well-known headers.
    /// `reason` is the server's own reason phrase, when it sent a non-standard one.
    pub fn from_response(
        url: impl Into<String>,
        status: StatusCode,
        reason: Option<&[u8]>,
        headers: &HeaderMap,
    ) -> Self {
        let headers = CAPTURED_HEADERS
            .iter()
            .map(|&name| {
                let value = headers
                    .get(name)
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                    .unwrap_or_default();
                (name.to_string(), value)
            })
            .collect();
        Self {
            url: url.into(),
            headers,
            status: status_line(status, reason),
        }
    }
}

/// Render a status as `"<code> <reason>"`, e.g. `"200 OK"`.
///
/// The server's reason phrase wins over the canonical one; a code with
/// neither renders as the bare number.
pub fn status_line(status: StatusCode, reason: Option<&[u8]>) -> String {
    let reason = match reason {
        Some(raw) => Some(String::from_utf8_lossy(raw).into_owned()),
        None => status.canonical_reason().map(str::to_string),
    };
    match reason {
        Some(reason) if !reason.is_empty() => format!("{} {}", status.as_u16(), reason),
        _ => status.as_u16().to_string(),
    }
}

/// How a run ended.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    /// Every worker exited and the result stream was drained.
    Completed,
    /// The run deadline fired first.
    TimedOut,
    /// The cancellation token was fired from outside (e.g. Ctrl-C).
    Interrupted,
}

impl ScanOutcome {
    pub fn status_line(&self) -> &'static str {
        match self {
            ScanOutcome::Completed => "All tasks processed.",
            ScanOutcome::TimedOut => "Timeout reached, terminating...",
            ScanOutcome::Interrupted => "Interrupted, terminating...",
        }
    }
}

/// Counters reported at the end of a run.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub outcome: ScanOutcome,
    pub dispatched: u64,
    pub fetched: u64,
    pub failed: u64,
    pub emitted: u64,
    pub skipped: u64,
}
