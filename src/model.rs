use crate::programs::ProgramDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// One upstream row: whatever fields the API returned, plus the program tag.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Column injected into every fetched record.
pub const PROGRAM_NAME_FIELD: &str = "program_studi";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectConfig {
    pub programs_path: PathBuf,
    pub output_path: PathBuf,
    pub relay_url: String,
    pub api_base: String,
    pub portal_origin: String,
    pub procurement_code: u32,
    pub start_offset: u64,
    pub page_size: u64,
    #[serde(with = "humantime_serde")]
    pub fault_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub page_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub page_jitter: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

/// Body of `POST /proxy`. Shared by the relay and the collector's client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRequest {
    pub url: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// What the relay handed back for one page, before classification.
#[derive(Debug, Clone)]
pub struct PageReply {
    pub status: u16,
    pub body: String,
}

/// Why pagination for a program ended before the expected count was covered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StopReason {
    /// HTTP 200 but the body lacked `data.data` as a list of objects.
    UnexpectedShape { body: serde_json::Value },
    /// Relay answered with something other than 200.
    Status(u16),
    /// Connection failure or an unparseable body.
    Transport(String),
}

impl StopReason {
    pub fn to_message(&self) -> String {
        match self {
            StopReason::UnexpectedShape { body } => {
                format!("unexpected data structure received from the API: {body}")
            }
            StopReason::Status(code) => format!("failed to retrieve data, status code {code}"),
            StopReason::Transport(err) => format!("error during API call: {err}"),
        }
    }
}

/// Progress emitted by the collector engine and rendered by the CLI layer.
#[derive(Debug, Clone)]
pub enum CollectEvent {
    SeedLoaded {
        path: PathBuf,
        records: usize,
    },
    SeedFailed {
        path: PathBuf,
        error: String,
    },
    ProgramStarted {
        index: usize,
        total: usize,
        program: ProgramDescriptor,
    },
    ProgramSkipped {
        program: ProgramDescriptor,
        reason: SkipReason,
    },
    PageFetched {
        call: u64,
        offset: u64,
        records: usize,
        program: ProgramDescriptor,
    },
    PageStopped {
        call: u64,
        offset: u64,
        reason: StopReason,
        program: ProgramDescriptor,
    },
    ProgramFinished {
        program: ProgramDescriptor,
        records: usize,
    },
    Saved {
        path: PathBuf,
        total: usize,
    },
    Info(InfoEvent),
}

/// Why a program was passed over without any page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `jumlahData` is zero or negative.
    NoData,
    /// The list entry carries no id to query with.
    MissingId,
}

impl SkipReason {
    pub fn to_message(self) -> &'static str {
        match self {
            SkipReason::NoData => "No data available",
            SkipReason::MissingId => "No program id recorded",
        }
    }
}

/// Free-form notices that don't belong to a specific page.
#[derive(Debug, Clone)]
pub enum InfoEvent {
    Message(String),
    FaultPause { delay: Duration },
}

impl InfoEvent {
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::FaultPause { delay } => format!(
                "Waiting {} before continuing...",
                humantime::format_duration(*delay)
            ),
        }
    }
}

/// A program whose pagination ended early.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncatedProgram {
    pub id: String,
    pub program_name: String,
    pub offset: u64,
    pub reason: StopReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectSummary {
    #[serde(default)]
    pub started_utc: String,
    #[serde(default)]
    pub finished_utc: String,
    pub programs_path: PathBuf,
    pub output_path: PathBuf,
    pub programs_total: usize,
    pub programs_skipped: usize,
    pub programs_fetched: usize,
    pub pages_requested: u64,
    pub records_seeded: usize,
    pub records_fetched: usize,
    pub records_total: usize,
    #[serde(default)]
    pub truncated: Vec<TruncatedProgram>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn proxy_request_defaults_missing_payload_and_headers() {
        let req: ProxyRequest =
            serde_json::from_value(json!({ "url": "https://example.test/a" })).unwrap();
        assert_eq!(req.url, "https://example.test/a");
        assert!(req.payload.is_null());
        assert!(req.headers.is_empty());
    }

    #[test]
    fn fault_pause_message_uses_human_duration() {
        let msg = InfoEvent::FaultPause {
            delay: Duration::from_secs(30),
        }
        .to_message();
        assert_eq!(msg, "Waiting 30s before continuing...");
    }

    #[test]
    fn status_stop_reason_mentions_code() {
        assert!(StopReason::Status(503).to_message().contains("503"));
    }
}
