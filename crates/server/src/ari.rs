//! Telephony control channel (§6): a WebSocket subscription to an
//! ARI-equivalent endpoint plus the HTTP control surface it pairs with
//! (originate, bridge create/destroy, add/remove channel, play media,
//! hangup, snoop).
//!
//! Grounded in the teacher's `websocket.rs` connect-then-forward-events
//! idiom (a background task reading frames and forwarding typed events
//! over an mpsc channel), generalized from a chat socket to the
//! Stasis-application event stream this spec names.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::{Result, ServerError};

/// Events this application subscribes to (§6).
#[derive(Debug, Clone)]
pub enum AriEvent {
    StasisStart { channel_id: String, caller_number: String, callee_number: String },
    StasisEnd { channel_id: String },
    ChannelDtmfReceived { channel_id: String, digit: String },
    ChannelHangupRequest { channel_id: String },
    BridgeAttendedTransfer { bridge_id: String },
    PlaybackFinished { playback_id: String },
    ChannelStateChange { channel_id: String, state: String },
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    channel: Option<RawChannel>,
    #[serde(default)]
    bridge: Option<RawBridge>,
    #[serde(default)]
    playback: Option<RawPlayback>,
    #[serde(default)]
    digit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    id: String,
    #[serde(default)]
    caller: Option<RawCallerId>,
    #[serde(default)]
    dialplan: Option<RawDialplan>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCallerId {
    #[serde(default)]
    number: String,
}

#[derive(Debug, Deserialize)]
struct RawDialplan {
    #[serde(default)]
    exten: String,
}

#[derive(Debug, Deserialize)]
struct RawBridge {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawPlayback {
    id: String,
}

fn parse_event(raw: &str) -> Option<AriEvent> {
    let event: RawEvent = serde_json::from_str(raw).ok()?;
    match event.kind.as_str() {
        "StasisStart" => {
            let channel = event.channel?;
            Some(AriEvent::StasisStart {
                channel_id: channel.id,
                caller_number: channel.caller.map(|c| c.number).unwrap_or_default(),
                callee_number: channel.dialplan.map(|d| d.exten).unwrap_or_default(),
            })
        }
        "StasisEnd" => Some(AriEvent::StasisEnd { channel_id: event.channel?.id }),
        "ChannelDtmfReceived" => Some(AriEvent::ChannelDtmfReceived {
            channel_id: event.channel?.id,
            digit: event.digit.unwrap_or_default(),
        }),
        "ChannelHangupRequest" => Some(AriEvent::ChannelHangupRequest { channel_id: event.channel?.id }),
        "BridgeAttendedTransfer" => Some(AriEvent::BridgeAttendedTransfer { bridge_id: event.bridge?.id }),
        "PlaybackFinished" => Some(AriEvent::PlaybackFinished { playback_id: event.playback?.id }),
        "ChannelStateChange" => {
            let channel = event.channel?;
            Some(AriEvent::ChannelStateChange {
                channel_id: channel.id,
                state: channel.state.unwrap_or_default(),
            })
        }
        _ => None,
    }
}

/// Telephony control handle: HTTP control calls plus the background
/// WebSocket reader feeding `AriEvent`s to the call lifecycle controller.
#[derive(Clone)]
pub struct AriClient {
    http: reqwest::Client,
    base_url: String,
    app_name: String,
}

impl AriClient {
    pub fn new(base_url: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            app_name: app_name.into(),
        }
    }

    /// Opens the event WebSocket and spawns the reader task. The returned
    /// receiver closes when the connection drops; the caller (main.rs)
    /// treats that as §6 exit code 69 after the startup grace period.
    pub async fn connect_events(&self) -> Result<mpsc::Receiver<AriEvent>> {
        let ws_url = format!(
            "{}/events?app={}&subscribeAll=true",
            self.base_url.replacen("http", "ws", 1),
            self.app_name
        );
        let (stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("connect {ws_url}: {e}")))?;

        let (mut write, mut read) = stream.split();
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if let Some(event) = parse_event(&text) {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(WsMessage::Ping(payload)) => {
                        if write.send(WsMessage::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            tracing::warn!("telephony control channel closed");
        });

        Ok(rx)
    }

    pub async fn answer(&self, channel_id: &str) -> Result<()> {
        self.post_empty(&format!("/channels/{channel_id}/answer")).await
    }

    pub async fn hangup(&self, channel_id: &str) -> Result<()> {
        self.http
            .delete(self.url(&format!("/channels/{channel_id}")))
            .send()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("hangup {channel_id}: {e}")))?;
        Ok(())
    }

    pub async fn originate(&self, endpoint: &str, extension: &str, context: &str) -> Result<String> {
        let resp = self
            .http
            .post(self.url("/channels"))
            .query(&[
                ("endpoint", endpoint),
                ("extension", extension),
                ("context", context),
                ("app", &self.app_name),
            ])
            .send()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("originate {endpoint}: {e}")))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("originate response: {e}")))?;
        body["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ServerError::AriUnreachable("originate response missing channel id".into()))
    }

    pub async fn create_bridge(&self, bridge_type: &str) -> Result<String> {
        let resp = self
            .http
            .post(self.url("/bridges"))
            .query(&[("type", bridge_type)])
            .send()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("create bridge: {e}")))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("create bridge response: {e}")))?;
        body["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ServerError::AriUnreachable("create bridge response missing id".into()))
    }

    pub async fn destroy_bridge(&self, bridge_id: &str) -> Result<()> {
        self.http
            .delete(self.url(&format!("/bridges/{bridge_id}")))
            .send()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("destroy bridge {bridge_id}: {e}")))?;
        Ok(())
    }

    pub async fn add_channel_to_bridge(&self, bridge_id: &str, channel_id: &str) -> Result<()> {
        self.http
            .post(self.url(&format!("/bridges/{bridge_id}/addChannel")))
            .query(&[("channel", channel_id)])
            .send()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("add channel {channel_id} to bridge {bridge_id}: {e}")))?;
        Ok(())
    }

    pub async fn remove_channel_from_bridge(&self, bridge_id: &str, channel_id: &str) -> Result<()> {
        self.http
            .post(self.url(&format!("/bridges/{bridge_id}/removeChannel")))
            .query(&[("channel", channel_id)])
            .send()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("remove channel {channel_id} from bridge {bridge_id}: {e}")))?;
        Ok(())
    }

    pub async fn play_media(&self, channel_id: &str, media_uri: &str) -> Result<String> {
        let resp = self
            .http
            .post(self.url(&format!("/channels/{channel_id}/play")))
            .query(&[("media", media_uri)])
            .send()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("play media on {channel_id}: {e}")))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("play media response: {e}")))?;
        body["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ServerError::AriUnreachable("play media response missing id".into()))
    }

    pub async fn stop_playback(&self, playback_id: &str) -> Result<()> {
        self.http
            .delete(self.url(&format!("/playbacks/{playback_id}")))
            .send()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("stop playback {playback_id}: {e}")))?;
        Ok(())
    }

    pub async fn record_channel(&self, channel_id: &str, name: &str, format: &str) -> Result<String> {
        self.http
            .post(self.url(&format!("/channels/{channel_id}/record")))
            .query(&[("name", name), ("format", format)])
            .send()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("record {channel_id}: {e}")))?;
        Ok(name.to_string())
    }

    /// Best-effort idle/ringing/in-use/unreachable probe for a dialable
    /// extension, used by the `extension_status` tool (§4.8).
    pub async fn endpoint_state(&self, technology: &str, resource: &str) -> Result<String> {
        let resp = self
            .http
            .get(self.url(&format!("/endpoints/{technology}/{resource}")))
            .send()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("endpoint state {resource}: {e}")))?;
        if !resp.status().is_success() {
            return Ok("unreachable".to_string());
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("endpoint state response: {e}")))?;
        Ok(body["state"].as_str().unwrap_or("unreachable").to_string())
    }

    pub async fn start_moh(&self, channel_id: &str, moh_class: &str) -> Result<()> {
        self.http
            .post(self.url(&format!("/channels/{channel_id}/moh")))
            .query(&[("mohClass", moh_class)])
            .send()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("start moh on {channel_id}: {e}")))?;
        Ok(())
    }

    pub async fn stop_moh(&self, channel_id: &str) -> Result<()> {
        self.http
            .delete(self.url(&format!("/channels/{channel_id}/moh")))
            .send()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("stop moh on {channel_id}: {e}")))?;
        Ok(())
    }

    pub async fn snoop_channel(&self, channel_id: &str, spy: &str) -> Result<String> {
        let resp = self
            .http
            .post(self.url(&format!("/channels/{channel_id}/snoop")))
            .query(&[("spy", spy), ("app", &self.app_name)])
            .send()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("snoop {channel_id}: {e}")))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("snoop response: {e}")))?;
        body["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ServerError::AriUnreachable("snoop response missing id".into()))
    }

    /// Best-effort reachability probe for `/ready` (§4.10).
    pub async fn is_reachable(&self) -> bool {
        self.http
            .get(self.url("/asterisk/info"))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn post_empty(&self, path: &str) -> Result<()> {
        self.http
            .post(self.url(path))
            .send()
            .await
            .map_err(|e| ServerError::AriUnreachable(format!("{path}: {e}")))?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stasis_start_with_caller_and_dialplan() {
        let raw = r#"{
            "type": "StasisStart",
            "channel": {
                "id": "chan-1",
                "caller": { "number": "15551234567" },
                "dialplan": { "exten": "100" }
            }
        }"#;
        let event = parse_event(raw).unwrap();
        match event {
            AriEvent::StasisStart { channel_id, caller_number, callee_number } => {
                assert_eq!(channel_id, "chan-1");
                assert_eq!(caller_number, "15551234567");
                assert_eq!(callee_number, "100");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parses_dtmf_event() {
        let raw = r#"{"type":"ChannelDtmfReceived","channel":{"id":"chan-1"},"digit":"1"}"#;
        let event = parse_event(raw).unwrap();
        match event {
            AriEvent::ChannelDtmfReceived { channel_id, digit } => {
                assert_eq!(channel_id, "chan-1");
                assert_eq!(digit, "1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unrecognized_event_type_is_ignored() {
        assert!(parse_event(r#"{"type":"DeviceStateChanged"}"#).is_none());
    }

    #[test]
    fn malformed_json_is_ignored_not_panicked_on() {
        assert!(parse_event("not json").is_none());
    }
}
