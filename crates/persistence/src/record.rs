//! The call record itself (§6 "Persisted state layout"): the one thing
//! this engine's core owns past session close. Everything else
//! (transcript archives, analytics, CRM sync) is a consumer of this
//! NDJSON stream, not this crate's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bumped whenever a field is added, removed, or changes meaning so
/// readers of the NDJSON stream can branch on `schema_version` instead
/// of guessing from field presence.
pub const CALL_RECORD_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Completed,
    ProviderFatal,
    TransportUnavailable,
    InvariantViolation,
    CallerHangupEarly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub name: String,
    pub status: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub role: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub call_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: CallOutcome,
    pub turn_count: u32,
    #[serde(default)]
    pub tool_invocations: Vec<ToolInvocationRecord>,
    /// Present only when transcript retention is enabled for the call's context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Vec<TranscriptLine>>,
}

fn default_schema_version() -> u32 {
    CALL_RECORD_SCHEMA_VERSION
}

impl CallRecord {
    pub fn new(call_id: impl Into<String>, started_at: DateTime<Utc>, ended_at: DateTime<Utc>, outcome: CallOutcome, turn_count: u32) -> Self {
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            schema_version: CALL_RECORD_SCHEMA_VERSION,
            call_id: call_id.into(),
            started_at,
            ended_at,
            duration_ms,
            outcome,
            turn_count,
            tool_invocations: Vec::new(),
            transcript: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_is_derived_from_the_timestamp_pair() {
        let started = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let ended = DateTime::parse_from_rfc3339("2026-01-01T00:00:03.500Z").unwrap().with_timezone(&Utc);
        let record = CallRecord::new("call-1", started, ended, CallOutcome::Completed, 2);
        assert_eq!(record.duration_ms, 3_500);
    }

    #[test]
    fn schema_version_defaults_on_deserialize_of_an_older_record() {
        let raw = r#"{"call_id":"call-1","started_at":"2026-01-01T00:00:00Z","ended_at":"2026-01-01T00:00:01Z","duration_ms":1000,"outcome":"completed","turn_count":1}"#;
        let record: CallRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.schema_version, CALL_RECORD_SCHEMA_VERSION);
        assert!(record.transcript.is_none());
    }

    #[test]
    fn transcript_is_omitted_from_json_when_not_retained() {
        let started = Utc::now();
        let record = CallRecord::new("call-1", started, started, CallOutcome::Completed, 0);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("transcript").is_none());
    }
}
