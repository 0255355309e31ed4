//! Audio transport and codec layer (§4.1 "Audio Resampler & Codec", §4.2
//! "Audio Transport"): RTP/ExternalMedia and AudioSocket connections to
//! Asterisk, plus the linear-interpolation resampler and G.711 codec that
//! sit between the wire and the pipeline's internal PCM16 rate.

pub mod audiosocket;
pub mod codec;
pub mod resampler;
pub mod rtp;

use async_trait::async_trait;
use voxrelay_core::{AudioFrame, Result};

/// Reason a transport connection ended, surfaced to the call lifecycle
/// controller so it can decide whether to retry, drain, or close.
#[derive(Debug, Clone)]
pub enum TransportClosed {
    PeerClosed,
    Idle,
    Error(String),
}

/// One ingress/egress audio connection for a call, independent of whether
/// the wire protocol is RTP or AudioSocket (§4.2).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one egress frame, already encoded to the transport's wire
    /// encoding (the caller is responsible for resampling/encoding first).
    async fn send_egress(&self, frame: AudioFrame) -> Result<()>;

    /// Receive the next ingress frame, decoded to PCM16 at the transport's
    /// native rate. Returns `Ok(None)` when the peer has closed cleanly.
    async fn recv_ingress(&self) -> Result<Option<AudioFrame>>;

    async fn close(&self) -> Result<()>;
}
