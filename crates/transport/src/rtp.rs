//! RTP (Asterisk ExternalMedia) transport: a raw UDP socket speaking a
//! minimal RTP framing, with NAT-tolerant binding (the socket we bind is
//! not necessarily reachable at the address we advertise to Asterisk) and
//! a small out-of-order reorder window for ingress.
//!
//! No RTP crate in the corpus speaks the ExternalMedia dialect directly;
//! this is written against `tokio::net::UdpSocket` the way the teacher's
//! lower-level transport code talks to its underlying library directly
//! rather than outsourcing the whole media path to a heavyweight stack.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use voxrelay_core::audio::AudioEncoding;
use voxrelay_core::{AudioFrame, Direction, Error, Result};

const RTP_HEADER_LEN: usize = 12;
const RTP_VERSION: u8 = 2;
/// Ingress packets may arrive at most this far out of sequence before
/// being flushed regardless (§4.2 "bounded reorder window").
const REORDER_WINDOW: u16 = 5;

/// Static RTP payload type numbers (RFC 3551) for the two telephony
/// codecs; SLIN has no static assignment, so it rides a dynamic type as
/// Asterisk's own `chan_pjsip`/`res_rtp_asterisk` do for linear audio.
const PT_PCMU: u8 = 0;
const PT_PCMA: u8 = 8;
const PT_SLIN_DYNAMIC: u8 = 118;

fn rtp_payload_type_for(encoding: AudioEncoding) -> u8 {
    match encoding {
        AudioEncoding::Mulaw8k => PT_PCMU,
        AudioEncoding::Alaw8k => PT_PCMA,
        AudioEncoding::Pcm16 => PT_SLIN_DYNAMIC,
    }
}

#[derive(Debug, Clone, Copy)]
struct RtpHeader {
    payload_type: u8,
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
}

fn write_header(buf: &mut Vec<u8>, header: &RtpHeader) {
    buf.push((RTP_VERSION << 6) & 0xc0);
    buf.push(header.payload_type & 0x7f);
    buf.extend_from_slice(&header.sequence.to_be_bytes());
    buf.extend_from_slice(&header.timestamp.to_be_bytes());
    buf.extend_from_slice(&header.ssrc.to_be_bytes());
}

fn parse_header(bytes: &[u8]) -> Option<(RtpHeader, &[u8])> {
    if bytes.len() < RTP_HEADER_LEN {
        return None;
    }
    let version = bytes[0] >> 6;
    if version != RTP_VERSION {
        return None;
    }
    let payload_type = bytes[1] & 0x7f;
    let sequence = u16::from_be_bytes([bytes[2], bytes[3]]);
    let timestamp = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let ssrc = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    Some((
        RtpHeader {
            payload_type,
            sequence,
            timestamp,
            ssrc,
        },
        &bytes[RTP_HEADER_LEN..],
    ))
}

/// One RTP (ExternalMedia) connection for a call.
///
/// `bind_addr` is where we listen; `peer_addr` is where Asterisk sends
/// from and where we send egress to — these may differ from whatever
/// address we'd naively advertise, since the host doing the binding is
/// often behind NAT relative to the PBX.
pub struct RtpTransport {
    socket: UdpSocket,
    peer_addr: Mutex<Option<SocketAddr>>,
    payload_type: u8,
    encoding: AudioEncoding,
    rate_hz: u32,
    ssrc: u32,
    seq: AtomicU16,
    timestamp: AtomicU32,
    reorder: Mutex<BTreeMap<u16, Vec<u8>>>,
    next_expected: AtomicU16,
}

impl RtpTransport {
    pub async fn bind(bind_addr: SocketAddr, encoding: AudioEncoding, rate_hz: u32, ssrc: u32) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| Error::TransportUnavailable(format!("rtp bind {bind_addr}: {e}")))?;
        Ok(Arc::new(Self {
            socket,
            peer_addr: Mutex::new(None),
            payload_type: rtp_payload_type_for(encoding),
            encoding,
            rate_hz,
            ssrc,
            seq: AtomicU16::new(0),
            timestamp: AtomicU32::new(0),
            reorder: Mutex::new(BTreeMap::new()),
            next_expected: AtomicU16::new(0),
        }))
    }

    /// Learn the peer's address from the first packet received, since
    /// Asterisk's ExternalMedia source port is not always the one
    /// advertised in the channel-creation response.
    async fn learn_peer(&self, addr: SocketAddr) {
        let mut peer = self.peer_addr.lock().await;
        if peer.is_none() {
            *peer = Some(addr);
        }
    }

    fn samples_per_packet(&self, chunk_ms: u32) -> u32 {
        self.rate_hz * chunk_ms / 1000
    }

    /// Encode PCM16 samples to this transport's negotiated wire encoding.
    fn encode(&self, samples: &[i16]) -> Vec<u8> {
        match self.encoding {
            AudioEncoding::Mulaw8k => crate::codec::encode_mulaw(samples),
            AudioEncoding::Alaw8k => crate::codec::encode_alaw(samples),
            AudioEncoding::Pcm16 => samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
        }
    }

    /// Decode this transport's negotiated wire encoding back to PCM16.
    fn decode(&self, bytes: &[u8]) -> Vec<i16> {
        match self.encoding {
            AudioEncoding::Mulaw8k => crate::codec::decode_mulaw(bytes),
            AudioEncoding::Alaw8k => crate::codec::decode_alaw(bytes),
            AudioEncoding::Pcm16 => bytes.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect(),
        }
    }
}

#[async_trait]
impl crate::Transport for RtpTransport {
    async fn send_egress(&self, frame: AudioFrame) -> Result<()> {
        let peer = *self.peer_addr.lock().await;
        let Some(peer) = peer else {
            return Err(Error::TransportUnavailable(
                "rtp egress attempted before peer address learned".into(),
            ));
        };

        let payload = self.encode(&frame.samples);
        let sequence = self.seq.fetch_add(1, Ordering::SeqCst);
        let timestamp = self
            .timestamp
            .fetch_add(frame.samples.len() as u32, Ordering::SeqCst);

        let mut buf = Vec::with_capacity(RTP_HEADER_LEN + payload.len());
        write_header(
            &mut buf,
            &RtpHeader {
                payload_type: self.payload_type,
                sequence,
                timestamp,
                ssrc: self.ssrc,
            },
        );
        buf.extend_from_slice(&payload);

        self.socket
            .send_to(&buf, peer)
            .await
            .map_err(|e| Error::TransportUnavailable(format!("rtp send: {e}")))?;
        Ok(())
    }

    async fn recv_ingress(&self) -> Result<Option<AudioFrame>> {
        let mut buf = vec![0u8; 2048];
        loop {
            let (len, from) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(|e| Error::TransportUnavailable(format!("rtp recv: {e}")))?;
            self.learn_peer(from).await;

            let Some((header, payload)) = parse_header(&buf[..len]) else {
                continue;
            };

            let mut reorder = self.reorder.lock().await;
            reorder.insert(header.sequence, payload.to_vec());

            let expected = self.next_expected.load(Ordering::SeqCst);
            let ready = reorder.contains_key(&expected)
                || reorder
                    .keys()
                    .next()
                    .map(|&earliest| earliest.wrapping_sub(expected) >= REORDER_WINDOW)
                    .unwrap_or(false);

            if !ready {
                continue;
            }

            let next_key = *reorder.keys().next().unwrap();
            let bytes = reorder.remove(&next_key).unwrap();
            self.next_expected.store(next_key.wrapping_add(1), Ordering::SeqCst);

            let samples = self.decode(&bytes);
            let sequence = next_key as u64;
            return Ok(Some(AudioFrame::new(samples, self.rate_hz, sequence, Direction::Ingress)));
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = RtpHeader {
            payload_type: 0,
            sequence: 42,
            timestamp: 12345,
            ssrc: 0xdead_beef,
        };
        let mut buf = Vec::new();
        write_header(&mut buf, &header);
        buf.extend_from_slice(&[1, 2, 3]);

        let (parsed, payload) = parse_header(&buf).unwrap();
        assert_eq!(parsed.sequence, 42);
        assert_eq!(parsed.timestamp, 12345);
        assert_eq!(parsed.ssrc, 0xdead_beef);
        assert_eq!(payload, &[1, 2, 3]);
    }

    #[test]
    fn rejects_short_packets() {
        assert!(parse_header(&[0u8; 4]).is_none());
    }

    #[tokio::test]
    async fn samples_per_packet_matches_chunking() {
        let transport = RtpTransport::bind("127.0.0.1:0".parse().unwrap(), AudioEncoding::Mulaw8k, 8_000, 1)
            .await
            .unwrap();
        assert_eq!(transport.samples_per_packet(20), 160);
    }

    #[tokio::test]
    async fn payload_type_and_codec_follow_the_bound_encoding() {
        let mulaw = RtpTransport::bind("127.0.0.1:0".parse().unwrap(), AudioEncoding::Mulaw8k, 8_000, 1)
            .await
            .unwrap();
        assert_eq!(mulaw.payload_type, PT_PCMU);
        assert_eq!(mulaw.encode(&[0, 1000, -1000]), crate::codec::encode_mulaw(&[0, 1000, -1000]));

        let alaw = RtpTransport::bind("127.0.0.1:0".parse().unwrap(), AudioEncoding::Alaw8k, 8_000, 2)
            .await
            .unwrap();
        assert_eq!(alaw.payload_type, PT_PCMA);
        assert_eq!(alaw.encode(&[0, 1000, -1000]), crate::codec::encode_alaw(&[0, 1000, -1000]));

        let slin = RtpTransport::bind("127.0.0.1:0".parse().unwrap(), AudioEncoding::Pcm16, 16_000, 3)
            .await
            .unwrap();
        assert_eq!(slin.payload_type, PT_SLIN_DYNAMIC);
        let encoded = slin.encode(&[1, -1, 12345]);
        assert_eq!(slin.decode(&encoded), vec![1, -1, 12345]);
    }
}
