//! Tool Registry & Executor (§4.8): the tool catalog, argument
//! validation, per-tool timeout, and phase routing shared by every call.
//! Telephony built-ins live in [`builtins`]; operator-declared HTTP
//! tools are driven by [`http_tool`]; the hangup guardrail and attended
//! transfer sub-state-machine each get their own module since both are
//! non-trivial enough to test in isolation.

pub mod builtins;
pub mod guardrail;
pub mod http_tool;
pub mod registry;
pub mod tool;
pub mod transfer;

pub use builtins::{
    AttendedTransferTool, BlindTransferTool, CallControl, CancelTransferTool, ExtensionStatus,
    ExtensionStatusTool, HangupTool, RequestTranscriptTool, SendEmailSummaryTool, VoicemailDropTool,
};
pub use guardrail::{check_hangup, GuardrailConfig, HangupPolicy, FAREWELL_HANGUP_DELAY};
pub use http_tool::{load_specs, render_template, CallContext, HttpMethod, HttpTool, HttpToolSpec};
pub use registry::{ToolCall, ToolCallTracker, ToolExecutor, ToolRegistry};
pub use tool::Tool;
pub use transfer::{run_attended_transfer, TransferControl, TransferOutcome, DEFAULT_ACCEPT_TIMEOUT, DEFAULT_DIAL_TIMEOUT};
