//! AudioSocket transport: a framed TCP connection to Asterisk's
//! `AudioSocket` dialplan application, `[type:u8][length:u16-be][payload]`.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use voxrelay_core::{AudioFrame, Direction, Error, Result};

const KIND_TERMINATE: u8 = 0x00;
const KIND_UUID: u8 = 0x01;
const KIND_AUDIO: u8 = 0x10;
const KIND_ERROR: u8 = 0xff;

/// One AudioSocket connection for a call. The PCM16 payload is assumed to
/// already be at the session's negotiated rate; resampling happens above
/// this layer.
pub struct AudioSocketTransport {
    stream: Mutex<TcpStream>,
    rate_hz: u32,
    sequence: Mutex<u64>,
}

impl AudioSocketTransport {
    pub fn new(stream: TcpStream, rate_hz: u32) -> Self {
        Self {
            stream: Mutex::new(stream),
            rate_hz,
            sequence: Mutex::new(0),
        }
    }

    async fn write_frame(stream: &mut TcpStream, kind: u8, payload: &[u8]) -> Result<()> {
        let len = u16::try_from(payload.len())
            .map_err(|_| Error::Codec("audiosocket payload exceeds u16 length".into()))?;
        let mut header = Vec::with_capacity(3);
        header.push(kind);
        header.extend_from_slice(&len.to_be_bytes());
        stream
            .write_all(&header)
            .await
            .map_err(|e| Error::TransportUnavailable(format!("audiosocket write header: {e}")))?;
        stream
            .write_all(payload)
            .await
            .map_err(|e| Error::TransportUnavailable(format!("audiosocket write payload: {e}")))?;
        Ok(())
    }

    async fn read_frame(stream: &mut TcpStream) -> Result<Option<(u8, Vec<u8>)>> {
        let mut header = [0u8; 3];
        match stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(Error::TransportUnavailable(format!("audiosocket read header: {e}"))),
        }
        let kind = header[0];
        let len = u16::from_be_bytes([header[1], header[2]]) as usize;
        let mut payload = vec![0u8; len];
        if len > 0 {
            stream
                .read_exact(&mut payload)
                .await
                .map_err(|e| Error::TransportUnavailable(format!("audiosocket read payload: {e}")))?;
        }
        Ok(Some((kind, payload)))
    }

    /// Send the call's UUID frame; AudioSocket requires this be the first
    /// frame on the connection before any audio.
    pub async fn send_uuid(&self, call_uuid: &str) -> Result<()> {
        let mut stream = self.stream.lock().await;
        Self::write_frame(&mut stream, KIND_UUID, call_uuid.as_bytes()).await
    }
}

#[async_trait]
impl crate::Transport for AudioSocketTransport {
    async fn send_egress(&self, frame: AudioFrame) -> Result<()> {
        let mut bytes = Vec::with_capacity(frame.samples.len() * 2);
        for sample in &frame.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        let mut stream = self.stream.lock().await;
        Self::write_frame(&mut stream, KIND_AUDIO, &bytes).await
    }

    async fn recv_ingress(&self) -> Result<Option<AudioFrame>> {
        loop {
            let mut stream = self.stream.lock().await;
            let Some((kind, payload)) = Self::read_frame(&mut stream).await? else {
                return Ok(None);
            };
            match kind {
                KIND_AUDIO => {
                    let samples: Vec<i16> = payload
                        .chunks_exact(2)
                        .map(|b| i16::from_le_bytes([b[0], b[1]]))
                        .collect();
                    let mut sequence = self.sequence.lock().await;
                    *sequence += 1;
                    return Ok(Some(AudioFrame::new(samples, self.rate_hz, *sequence, Direction::Ingress)));
                }
                KIND_TERMINATE => return Ok(None),
                KIND_ERROR => {
                    return Err(Error::TransportUnavailable(format!(
                        "audiosocket error frame: {}",
                        String::from_utf8_lossy(&payload)
                    )));
                }
                _ => continue,
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut stream = self.stream.lock().await;
        Self::write_frame(&mut stream, KIND_TERMINATE, &[]).await?;
        stream
            .shutdown()
            .await
            .map_err(|e| Error::TransportUnavailable(format!("audiosocket shutdown: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uuid_and_audio_frames_round_trip_over_a_loopback_pair() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_stream, _) = listener.accept().await.unwrap();
        let client_stream = client.await.unwrap();

        let server = AudioSocketTransport::new(server_stream, 8_000);
        server.send_uuid("11111111-1111-1111-1111-111111111111").await.unwrap();

        let mut client_stream = client_stream;
        let (kind, payload) = AudioSocketTransport::read_frame(&mut client_stream)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kind, KIND_UUID);
        assert_eq!(payload, b"11111111-1111-1111-1111-111111111111");
    }
}
