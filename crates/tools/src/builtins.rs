//! Built-in telephony tools (§4.8): blind transfer, attended transfer,
//! cancel transfer, voicemail drop, hangup, extension-status, send an
//! email summary, request the transcript. Each tool is a thin adapter
//! from a JSON-Schema-validated `ToolInvocation` onto the call's
//! `CallControl` handle; the handle is injected per-session by the call
//! lifecycle controller, not owned by this crate.
//!
//! Grounded in the teacher's `registry.rs` tool-as-`Arc<dyn Tool>` shape,
//! generalized to the telephony action set this spec names.

use crate::guardrail::{check_hangup, GuardrailConfig};
use crate::tool::Tool;
use crate::transfer::{run_attended_transfer, TransferControl, TransferOutcome, DEFAULT_ACCEPT_TIMEOUT, DEFAULT_DIAL_TIMEOUT};
use async_trait::async_trait;
use std::time::Duration;
use voxrelay_core::{Result, ToolDefinition, ToolInvocation, ToolOutput, ToolPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionStatus {
    Idle,
    Ringing,
    InUse,
    Unreachable,
}

/// Call-control actions the built-in tools dispatch onto. One
/// implementation per session, backed by the ARI-equivalent channel and
/// bridge surface.
#[async_trait]
pub trait CallControl: TransferControl {
    async fn blind_transfer(&self, destination: &str) -> Result<()>;
    async fn cancel_transfer(&self) -> Result<()>;
    async fn play_voicemail_greeting_and_record(&self) -> Result<String>;
    async fn hangup(&self) -> Result<()>;
    async fn extension_status(&self, extension: &str) -> Result<ExtensionStatus>;
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()>;
    async fn transcript(&self) -> Result<String>;

    /// The caller's most recent utterance, for the hangup guardrail.
    fn last_caller_utterance(&self) -> String;
    /// Whether the assistant's own last turn contained a farewell marker.
    fn assistant_just_said_farewell(&self) -> bool;
}

fn schema_with(properties: serde_json::Value, required: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

pub struct BlindTransferTool {
    definition: ToolDefinition,
    control: std::sync::Arc<dyn CallControl>,
}

impl BlindTransferTool {
    pub fn new(control: std::sync::Arc<dyn CallControl>) -> Self {
        Self {
            definition: ToolDefinition {
                name: "transfer_call".into(),
                description: "Blind-transfer the call to another extension or queue, without waiting for accept".into(),
                input_schema: schema_with(
                    serde_json::json!({ "destination": { "type": "string" } }),
                    &["destination"],
                ),
                phase: ToolPhase::InCall,
                timeout: Duration::from_secs(10),
            },
            control,
        }
    }
}

#[async_trait]
impl Tool for BlindTransferTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        let destination = invocation.arguments["destination"].as_str().unwrap_or_default();
        self.control.blind_transfer(destination).await?;
        Ok(ToolOutput::ok(format!("transferred to {destination}")))
    }
}

pub struct AttendedTransferTool {
    definition: ToolDefinition,
    control: std::sync::Arc<dyn CallControl>,
    dial_timeout: Duration,
    accept_timeout: Duration,
}

impl AttendedTransferTool {
    pub fn new(control: std::sync::Arc<dyn CallControl>) -> Self {
        Self {
            definition: ToolDefinition {
                name: "attended_transfer_call".into(),
                description: "Warm-transfer the call: ring the destination, announce, and wait for a DTMF accept/decline before bridging".into(),
                input_schema: schema_with(
                    serde_json::json!({ "destination": { "type": "string" } }),
                    &["destination"],
                ),
                phase: ToolPhase::InCall,
                timeout: DEFAULT_DIAL_TIMEOUT + DEFAULT_ACCEPT_TIMEOUT + Duration::from_secs(5),
            },
            control,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
        }
    }
}

#[async_trait]
impl Tool for AttendedTransferTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        let destination = invocation.arguments["destination"].as_str().unwrap_or_default();
        let outcome = run_attended_transfer(
            self.control.as_ref(),
            destination,
            self.dial_timeout,
            self.accept_timeout,
        )
        .await?;

        match outcome {
            TransferOutcome::Bridged => Ok(ToolOutput::ok(outcome.message())),
            _ => Ok(ToolOutput::error(outcome.message())),
        }
    }
}

pub struct CancelTransferTool {
    definition: ToolDefinition,
    control: std::sync::Arc<dyn CallControl>,
}

impl CancelTransferTool {
    pub fn new(control: std::sync::Arc<dyn CallControl>) -> Self {
        Self {
            definition: ToolDefinition {
                name: "cancel_transfer".into(),
                description: "Cancel an in-progress attended transfer and return to the caller".into(),
                input_schema: schema_with(serde_json::json!({}), &[]),
                phase: ToolPhase::InCall,
                timeout: Duration::from_secs(5),
            },
            control,
        }
    }
}

#[async_trait]
impl Tool for CancelTransferTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, _invocation: &ToolInvocation) -> Result<ToolOutput> {
        self.control.cancel_transfer().await?;
        Ok(ToolOutput::ok("transfer cancelled"))
    }
}

pub struct VoicemailDropTool {
    definition: ToolDefinition,
    control: std::sync::Arc<dyn CallControl>,
}

impl VoicemailDropTool {
    pub fn new(control: std::sync::Arc<dyn CallControl>) -> Self {
        Self {
            definition: ToolDefinition {
                name: "voicemail_drop".into(),
                description: "Play the configured voicemail greeting and record the caller's message".into(),
                input_schema: schema_with(serde_json::json!({}), &[]),
                phase: ToolPhase::InCall,
                timeout: Duration::from_secs(60),
            },
            control,
        }
    }
}

#[async_trait]
impl Tool for VoicemailDropTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, _invocation: &ToolInvocation) -> Result<ToolOutput> {
        let recording_id = self.control.play_voicemail_greeting_and_record().await?;
        Ok(ToolOutput::ok_with_data(
            "voicemail recorded",
            serde_json::json!({ "recording_id": recording_id }),
        ))
    }
}

pub struct HangupTool {
    definition: ToolDefinition,
    control: std::sync::Arc<dyn CallControl>,
    guardrail: GuardrailConfig,
}

impl HangupTool {
    pub fn new(control: std::sync::Arc<dyn CallControl>, guardrail: GuardrailConfig) -> Self {
        Self {
            definition: ToolDefinition {
                name: "hangup_call".into(),
                description: "End the call".into(),
                input_schema: schema_with(serde_json::json!({}), &[]),
                phase: ToolPhase::InCall,
                timeout: Duration::from_secs(5),
            },
            control,
            guardrail,
        }
    }
}

#[async_trait]
impl Tool for HangupTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, _invocation: &ToolInvocation) -> Result<ToolOutput> {
        if let Err(reason) = check_hangup(
            &self.guardrail,
            &self.control.last_caller_utterance(),
            self.control.assistant_just_said_farewell(),
        ) {
            return Ok(ToolOutput::error(reason));
        }

        self.control.hangup().await?;
        Ok(ToolOutput::ok("call ended"))
    }
}

pub struct ExtensionStatusTool {
    definition: ToolDefinition,
    control: std::sync::Arc<dyn CallControl>,
}

impl ExtensionStatusTool {
    pub fn new(control: std::sync::Arc<dyn CallControl>) -> Self {
        Self {
            definition: ToolDefinition {
                name: "extension_status".into(),
                description: "Check whether an extension is idle, ringing, in use, or unreachable before offering a transfer".into(),
                input_schema: schema_with(
                    serde_json::json!({ "extension": { "type": "string" } }),
                    &["extension"],
                ),
                phase: ToolPhase::InCall,
                timeout: Duration::from_secs(5),
            },
            control,
        }
    }
}

#[async_trait]
impl Tool for ExtensionStatusTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        let extension = invocation.arguments["extension"].as_str().unwrap_or_default();
        let status = self.control.extension_status(extension).await?;
        let label = match status {
            ExtensionStatus::Idle => "idle",
            ExtensionStatus::Ringing => "ringing",
            ExtensionStatus::InUse => "in_use",
            ExtensionStatus::Unreachable => "unreachable",
        };
        Ok(ToolOutput::ok_with_data(label, serde_json::json!({ "status": label })))
    }
}

pub struct SendEmailSummaryTool {
    definition: ToolDefinition,
    control: std::sync::Arc<dyn CallControl>,
}

impl SendEmailSummaryTool {
    pub fn new(control: std::sync::Arc<dyn CallControl>) -> Self {
        Self {
            definition: ToolDefinition {
                name: "send_email_summary".into(),
                description: "Send a summary of the call so far to the given address".into(),
                input_schema: schema_with(
                    serde_json::json!({
                        "to": { "type": "string" },
                        "subject": { "type": "string" },
                        "body": { "type": "string" },
                    }),
                    &["to", "subject", "body"],
                ),
                phase: ToolPhase::PostCall,
                timeout: Duration::from_secs(10),
            },
            control,
        }
    }
}

#[async_trait]
impl Tool for SendEmailSummaryTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        let to = invocation.arguments["to"].as_str().unwrap_or_default();
        let subject = invocation.arguments["subject"].as_str().unwrap_or_default();
        let body = invocation.arguments["body"].as_str().unwrap_or_default();
        self.control.send_email(to, subject, body).await?;
        Ok(ToolOutput::ok(format!("email sent to {to}")))
    }
}

pub struct RequestTranscriptTool {
    definition: ToolDefinition,
    control: std::sync::Arc<dyn CallControl>,
}

impl RequestTranscriptTool {
    pub fn new(control: std::sync::Arc<dyn CallControl>) -> Self {
        Self {
            definition: ToolDefinition {
                name: "request_transcript".into(),
                description: "Fetch the call transcript accumulated so far".into(),
                input_schema: schema_with(serde_json::json!({}), &[]),
                phase: ToolPhase::InCall,
                timeout: Duration::from_secs(5),
            },
            control,
        }
    }
}

#[async_trait]
impl Tool for RequestTranscriptTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, _invocation: &ToolInvocation) -> Result<ToolOutput> {
        let transcript = self.control.transcript().await?;
        Ok(ToolOutput::ok_with_data(
            "transcript fetched",
            serde_json::json!({ "transcript": transcript }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeControl {
        hung_up: Mutex<bool>,
        farewell: bool,
        utterance: Mutex<String>,
    }

    #[async_trait]
    impl TransferControl for FakeControl {
        async fn dial(&self, _destination: &str) -> Result<bool> {
            Ok(true)
        }
        async fn play_announcement(&self, _destination: &str) -> Result<()> {
            Ok(())
        }
        async fn wait_for_dtmf(&self, _destination: &str, _timeout: Duration) -> Result<Option<char>> {
            Ok(Some('1'))
        }
        async fn bridge(&self, _destination: &str) -> Result<()> {
            Ok(())
        }
        async fn revive_caller(&self, _message: &str) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl CallControl for FakeControl {
        async fn blind_transfer(&self, _destination: &str) -> Result<()> {
            Ok(())
        }
        async fn cancel_transfer(&self) -> Result<()> {
            Ok(())
        }
        async fn play_voicemail_greeting_and_record(&self) -> Result<String> {
            Ok("rec-1".into())
        }
        async fn hangup(&self) -> Result<()> {
            *self.hung_up.lock().unwrap() = true;
            Ok(())
        }
        async fn extension_status(&self, _extension: &str) -> Result<ExtensionStatus> {
            Ok(ExtensionStatus::Idle)
        }
        async fn send_email(&self, _to: &str, _subject: &str, _body: &str) -> Result<()> {
            Ok(())
        }
        async fn transcript(&self) -> Result<String> {
            Ok("caller: hi\nagent: hello".into())
        }
        fn last_caller_utterance(&self) -> String {
            self.utterance.lock().unwrap().clone()
        }
        fn assistant_just_said_farewell(&self) -> bool {
            self.farewell
        }
    }

    #[tokio::test]
    async fn hangup_proceeds_when_guardrail_allows() {
        let control = std::sync::Arc::new(FakeControl::default());
        *control.utterance.lock().unwrap() = "ok, goodbye".into();
        let tool = HangupTool::new(control.clone(), GuardrailConfig::default());
        let output = tool
            .execute(&ToolInvocation {
                id: "1".into(),
                name: "hangup_call".into(),
                arguments: serde_json::json!({}),
            })
            .await
            .unwrap();
        assert!(output.is_ok());
        assert!(*control.hung_up.lock().unwrap());
    }

    #[tokio::test]
    async fn hangup_is_rejected_by_the_guardrail_without_a_marker() {
        let control = std::sync::Arc::new(FakeControl::default());
        *control.utterance.lock().unwrap() = "thanks for that".into();
        let tool = HangupTool::new(control.clone(), GuardrailConfig::default());
        let output = tool
            .execute(&ToolInvocation {
                id: "1".into(),
                name: "hangup_call".into(),
                arguments: serde_json::json!({}),
            })
            .await
            .unwrap();
        assert!(!output.is_ok());
        assert!(!*control.hung_up.lock().unwrap());
    }

    #[tokio::test]
    async fn attended_transfer_bridges_on_accept() {
        let control = std::sync::Arc::new(FakeControl::default());
        let tool = AttendedTransferTool::new(control);
        let output = tool
            .execute(&ToolInvocation {
                id: "1".into(),
                name: "attended_transfer_call".into(),
                arguments: serde_json::json!({ "destination": "sales" }),
            })
            .await
            .unwrap();
        assert!(output.is_ok());
    }
}
