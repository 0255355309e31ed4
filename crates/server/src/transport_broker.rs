//! Transport correlation (§4.2, §6 "telephony"): the call lifecycle
//! controller asks for a transport before it knows which wire connection
//! Asterisk will use to carry it; this module resolves that request into
//! a live `Transport`.
//!
//! AudioSocket connections are opened by Asterisk *to* us and identified
//! only by the UUID frame sent as the first message: a call registers
//! interest in a UUID, and a shared accept loop wakes it once the matching
//! connection shows up. RTP is the reverse shape: we pick a port up front
//! so the ARI originate call can reference it in the ExternalMedia request.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use voxrelay_config::RtpPortRange;
use voxrelay_core::audio::AudioEncoding;
use voxrelay_core::{Error, Result};
use voxrelay_transport::audiosocket::AudioSocketTransport;
use voxrelay_transport::rtp::RtpTransport;

const KIND_UUID: u8 = 0x01;

/// Shared AudioSocket accept loop plus RTP port bookkeeping for one server
/// process. A single instance lives in `AppState`.
pub struct TransportBroker {
    waiters: DashMap<String, oneshot::Sender<TcpStream>>,
    rtp_cursor: AtomicU32,
    rtp_port_range: RtpPortRange,
    advertise_host: String,
}

impl TransportBroker {
    pub fn new(rtp_port_range: RtpPortRange, advertise_host: impl Into<String>) -> Self {
        Self {
            waiters: DashMap::new(),
            rtp_cursor: AtomicU32::new(0),
            rtp_port_range,
            advertise_host: advertise_host.into(),
        }
    }

    /// Run the AudioSocket TCP accept loop. Spawned once at startup; runs
    /// until the process shuts down or the bind itself fails.
    pub async fn run_audiosocket_listener(self: Arc<Self>, bind_addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| Error::TransportUnavailable(format!("audiosocket listen {bind_addr}: {e}")))?;
        tracing::info!(%bind_addr, "audiosocket listener bound");
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(%e, "audiosocket accept failed");
                    continue;
                }
            };
            let broker = self.clone();
            tokio::spawn(async move {
                broker.handle_audiosocket_connection(stream, peer).await;
            });
        }
    }

    async fn handle_audiosocket_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        let mut header = [0u8; 3];
        if stream.read_exact(&mut header).await.is_err() {
            tracing::warn!(%peer, "audiosocket connection closed before uuid frame");
            return;
        }
        if header[0] != KIND_UUID {
            tracing::warn!(%peer, kind = header[0], "audiosocket first frame was not a uuid frame");
            return;
        }
        let len = u16::from_be_bytes([header[1], header[2]]) as usize;
        let mut payload = vec![0u8; len];
        if len > 0 && stream.read_exact(&mut payload).await.is_err() {
            tracing::warn!(%peer, "audiosocket connection closed mid uuid frame");
            return;
        }
        let uuid = String::from_utf8_lossy(&payload).to_string();

        match self.waiters.remove(&uuid) {
            Some((_, tx)) => {
                let _ = tx.send(stream);
            }
            None => {
                tracing::warn!(%peer, %uuid, "audiosocket connection for unknown or already-resolved call");
            }
        }
    }

    /// Register interest in the AudioSocket connection for `call_uuid` and
    /// wait up to `timeout` (the transport-open budget, §5) for it to arrive.
    pub async fn wait_for_audiosocket(
        &self,
        call_uuid: &str,
        rate_hz: u32,
        timeout: Duration,
    ) -> Result<Arc<AudioSocketTransport>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(call_uuid.to_string(), tx);

        let stream = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(_)) => {
                self.waiters.remove(call_uuid);
                return Err(Error::TransportUnavailable(format!(
                    "audiosocket waiter for {call_uuid} dropped before connecting"
                )));
            }
            Err(_) => {
                self.waiters.remove(call_uuid);
                return Err(Error::TransportUnavailable(format!(
                    "no audiosocket connection for {call_uuid} within {timeout:?}"
                )));
            }
        };

        Ok(Arc::new(AudioSocketTransport::new(stream, rate_hz)))
    }

    /// Bind the next UDP port in the configured range for one call's RTP
    /// (ExternalMedia) leg, cycling through the range round-robin and
    /// skipping ports that fail to bind (already in use).
    pub async fn bind_rtp(&self, encoding: AudioEncoding, rate_hz: u32, ssrc: u32) -> Result<(Arc<RtpTransport>, SocketAddr)> {
        let span = self.rtp_port_range.max.saturating_sub(self.rtp_port_range.min).max(1) as u32;
        for _ in 0..=span {
            let port = self.next_port(span);
            let bind_addr: SocketAddr = format!("0.0.0.0:{port}")
                .parse()
                .map_err(|e| Error::TransportUnavailable(format!("invalid rtp bind addr: {e}")))?;
            match RtpTransport::bind(bind_addr, encoding, rate_hz, ssrc).await {
                Ok(transport) => {
                    let advertise: SocketAddr = format!("{}:{port}", self.advertise_host)
                        .parse()
                        .map_err(|e| Error::TransportUnavailable(format!("invalid advertise addr: {e}")))?;
                    return Ok((transport, advertise));
                }
                Err(_) => continue,
            }
        }
        Err(Error::TransportUnavailable("no free rtp port in configured range".into()))
    }

    fn next_port(&self, span: u32) -> u16 {
        let offset = self.rtp_cursor.fetch_add(1, Ordering::SeqCst) % span;
        self.rtp_port_range.min + offset as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waiter_times_out_when_no_connection_arrives() {
        let broker = TransportBroker::new(RtpPortRange { min: 20_000, max: 20_010 }, "127.0.0.1");
        let result = broker.wait_for_audiosocket("missing-call", 8_000, Duration::from_millis(50)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn bind_rtp_cycles_through_the_configured_range() {
        let broker = TransportBroker::new(RtpPortRange { min: 20_100, max: 20_103 }, "127.0.0.1");
        let (_t1, addr1) = broker.bind_rtp(AudioEncoding::Mulaw8k, 8_000, 1).await.unwrap();
        let (_t2, addr2) = broker.bind_rtp(AudioEncoding::Mulaw8k, 8_000, 2).await.unwrap();
        assert_ne!(addr1.port(), addr2.port());
    }
}
