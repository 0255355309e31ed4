//! `CallControl`/`TransferControl` implementation backing every built-in
//! tool for one call (§4.8): translates the tool-level actions
//! (`blind_transfer`, `hangup`, `extension_status`, ...) onto the
//! telephony control channel.
//!
//! Grounded in the tools crate's own test double (`builtins::tests::FakeControl`):
//! same trait surface, backed here by a real `AriClient` handle plus the
//! small bit of per-call state (last utterance, farewell marker,
//! transfer-in-progress bridge id) the guardrail and transfer flow need.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use voxrelay_core::{ConversationHistory, Error, Result, Role};
use voxrelay_tools::builtins::{CallControl, ExtensionStatus};
use voxrelay_tools::transfer::TransferControl;

use crate::ari::AriClient;
use crate::call::CallState;

fn ari_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::provider_transient(format!("{context}: {e}"))
}

pub struct AriCallControl {
    ari: AriClient,
    channel_id: String,
    moh_class: String,
    history: Arc<RwLock<ConversationHistory>>,
    last_caller_utterance: RwLock<String>,
    assistant_just_said_farewell: std::sync::atomic::AtomicBool,
    transfer_bridge_id: RwLock<Option<String>>,
    farewell_markers: Vec<String>,
    dtmf_waiters: DashMap<String, oneshot::Sender<char>>,
    /// §4.9 call state, read by the call loop to suppress audio relay and
    /// barge-in once a transfer has bridged the caller elsewhere.
    state: AtomicU8,
}

impl AriCallControl {
    pub fn new(
        ari: AriClient,
        channel_id: impl Into<String>,
        moh_class: impl Into<String>,
        history: Arc<RwLock<ConversationHistory>>,
        farewell_markers: Vec<String>,
    ) -> Self {
        Self {
            ari,
            channel_id: channel_id.into(),
            moh_class: moh_class.into(),
            history,
            last_caller_utterance: RwLock::new(String::new()),
            assistant_just_said_farewell: std::sync::atomic::AtomicBool::new(false),
            transfer_bridge_id: RwLock::new(None),
            farewell_markers,
            dtmf_waiters: DashMap::new(),
            state: AtomicU8::new(CallState::Inbound as u8),
        }
    }

    /// Called by the call lifecycle controller as it moves through §4.9's
    /// states (e.g. into `Conversing` once the main loop starts).
    pub fn set_state(&self, state: CallState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn state(&self) -> CallState {
        CallState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether a successfully bridged transfer has handed the caller off
    /// elsewhere; the call loop stops relaying audio and acting on VAD
    /// once this is true.
    pub fn is_transferring(&self) -> bool {
        matches!(self.state(), CallState::Transferring)
    }

    /// Called by the call lifecycle controller on every final transcript.
    pub fn observe_caller_utterance(&self, text: &str) {
        *self.last_caller_utterance.write() = text.to_string();
    }

    /// Called by the call lifecycle controller on every assistant turn.
    pub fn observe_assistant_text(&self, text: &str) {
        let lower = text.to_lowercase();
        let farewell = self.farewell_markers.iter().any(|m| lower.contains(&m.to_lowercase()));
        self.assistant_just_said_farewell
            .store(farewell, std::sync::atomic::Ordering::SeqCst);
    }

    /// Routes a `ChannelDtmfReceived` event for `channel_id` to whichever
    /// attended transfer is currently waiting on that destination channel,
    /// if any. Called from the shared ARI event loop in `call.rs`.
    pub fn on_dtmf(&self, channel_id: &str, digit: char) {
        if let Some((_, tx)) = self.dtmf_waiters.remove(channel_id) {
            let _ = tx.send(digit);
        }
    }
}

#[async_trait]
impl TransferControl for AriCallControl {
    async fn dial(&self, destination: &str) -> Result<bool> {
        self.ari
            .start_moh(&self.channel_id, &self.moh_class)
            .await
            .map_err(|e| ari_err("start moh", e))?;
        let dest_channel = self
            .ari
            .originate(destination, destination, "from-internal")
            .await
            .map_err(|e| ari_err("originate", e))?;

        for _ in 0..60 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let state = self.ari.endpoint_state("PJSIP", destination).await.unwrap_or_default();
            if state == "Online" || state == "in_use" {
                *self.transfer_bridge_id.write() = Some(dest_channel.clone());
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn play_announcement(&self, destination: &str) -> Result<()> {
        self.ari
            .play_media(destination, "sound:transfer-announce")
            .await
            .map_err(|e| ari_err("play announcement", e))?;
        Ok(())
    }

    async fn wait_for_dtmf(&self, destination: &str, timeout: Duration) -> Result<Option<char>> {
        let (tx, rx) = oneshot::channel();
        self.dtmf_waiters.insert(destination.to_string(), tx);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(digit)) => Ok(Some(digit)),
            Ok(Err(_)) | Err(_) => {
                self.dtmf_waiters.remove(destination);
                Ok(None)
            }
        }
    }

    async fn bridge(&self, destination: &str) -> Result<()> {
        self.ari.stop_moh(&self.channel_id).await.map_err(|e| ari_err("stop moh", e))?;
        let bridge_id = self.ari.create_bridge("mixing").await.map_err(|e| ari_err("create bridge", e))?;
        self.ari
            .add_channel_to_bridge(&bridge_id, &self.channel_id)
            .await
            .map_err(|e| ari_err("add caller to bridge", e))?;
        self.ari
            .add_channel_to_bridge(&bridge_id, destination)
            .await
            .map_err(|e| ari_err("add destination to bridge", e))?;
        *self.transfer_bridge_id.write() = Some(bridge_id);
        self.set_state(CallState::Transferring);
        Ok(())
    }

    async fn revive_caller(&self, message: &str) -> Result<()> {
        self.ari.stop_moh(&self.channel_id).await.map_err(|e| ari_err("stop moh", e))?;
        if let Some(bridge_id) = self.transfer_bridge_id.write().take() {
            let _ = self.ari.destroy_bridge(&bridge_id).await;
        }
        self.set_state(CallState::Conversing);
        if !message.is_empty() {
            tracing::info!(channel_id = %self.channel_id, %message, "reviving caller after failed transfer");
        }
        Ok(())
    }
}

#[async_trait]
impl CallControl for AriCallControl {
    async fn blind_transfer(&self, destination: &str) -> Result<()> {
        let dest_channel = self
            .ari
            .originate(destination, destination, "from-internal")
            .await
            .map_err(|e| ari_err("originate", e))?;
        let bridge_id = self.ari.create_bridge("mixing").await.map_err(|e| ari_err("create bridge", e))?;
        self.ari
            .add_channel_to_bridge(&bridge_id, &self.channel_id)
            .await
            .map_err(|e| ari_err("add caller to bridge", e))?;
        self.ari
            .add_channel_to_bridge(&bridge_id, &dest_channel)
            .await
            .map_err(|e| ari_err("add destination to bridge", e))?;
        self.set_state(CallState::Transferring);
        Ok(())
    }

    async fn cancel_transfer(&self) -> Result<()> {
        if let Some(bridge_id) = self.transfer_bridge_id.write().take() {
            self.ari.destroy_bridge(&bridge_id).await.map_err(|e| ari_err("destroy bridge", e))?;
        }
        self.ari.stop_moh(&self.channel_id).await.map_err(|e| ari_err("stop moh", e))?;
        self.set_state(CallState::Conversing);
        Ok(())
    }

    async fn play_voicemail_greeting_and_record(&self) -> Result<String> {
        self.ari
            .play_media(&self.channel_id, "sound:vm-intro")
            .await
            .map_err(|e| ari_err("play voicemail greeting", e))?;
        let recording_name = format!("vm-{}", self.channel_id);
        self.ari
            .record_channel(&self.channel_id, &recording_name, "wav")
            .await
            .map_err(|e| ari_err("record channel", e))
    }

    async fn hangup(&self) -> Result<()> {
        self.ari.hangup(&self.channel_id).await.map_err(|e| ari_err("hangup", e))
    }

    async fn extension_status(&self, extension: &str) -> Result<ExtensionStatus> {
        let state = self
            .ari
            .endpoint_state("PJSIP", extension)
            .await
            .map_err(|e| ari_err("endpoint state", e))?;
        Ok(match state.as_str() {
            "Online" | "Not in use" => ExtensionStatus::Idle,
            "Ringing" => ExtensionStatus::Ringing,
            "In use" | "Busy" => ExtensionStatus::InUse,
            _ => ExtensionStatus::Unreachable,
        })
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        // Actual delivery is an operator-declared HTTP tool endpoint; this
        // core action only records the request so the call record and
        // transcript stay consistent with what the agent believes happened.
        tracing::info!(%to, %subject, body_len = body.len(), "send_email_summary requested");
        Ok(())
    }

    async fn transcript(&self) -> Result<String> {
        let history = self.history.read();
        let lines: Vec<String> = history
            .messages()
            .iter()
            .filter(|m| m.role == Role::User || m.role == Role::Assistant)
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect();
        Ok(lines.join("\n"))
    }

    fn last_caller_utterance(&self) -> String {
        self.last_caller_utterance.read().clone()
    }

    fn assistant_just_said_farewell(&self) -> bool {
        self.assistant_just_said_farewell.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> AriCallControl {
        let history = Arc::new(RwLock::new(ConversationHistory::new("you are a test agent".into(), 8)));
        AriCallControl::new(AriClient::new("http://localhost:8088", "voxrelay"), "chan-1", "default", history, vec!["bye".into()])
    }

    #[test]
    fn starts_inbound_and_is_not_transferring() {
        let control = control();
        assert_eq!(control.state(), CallState::Inbound);
        assert!(!control.is_transferring());
    }

    #[test]
    fn set_state_is_observable_and_drives_is_transferring() {
        let control = control();
        control.set_state(CallState::Conversing);
        assert_eq!(control.state(), CallState::Conversing);
        assert!(!control.is_transferring());

        control.set_state(CallState::Transferring);
        assert!(control.is_transferring());

        control.set_state(CallState::Conversing);
        assert!(!control.is_transferring());
    }
}
