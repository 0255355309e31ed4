//! Append-only NDJSON call-record writer (§6 "Persisted state layout").
//! This is the only history the core engine owns; anything beyond the
//! closing record per call is a downstream consumer's concern.

pub mod error;
pub mod record;
pub mod writer;

pub use error::{PersistenceError, Result};
pub use record::{CallOutcome, CallRecord, ToolInvocationRecord, TranscriptLine, CALL_RECORD_SCHEMA_VERSION};
pub use writer::CallRecordWriter;
