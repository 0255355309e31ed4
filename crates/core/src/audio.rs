//! Audio data model shared by every component that touches call audio.
//!
//! The resampler and codec implementations live in `voxrelay-transport`;
//! this module only defines the shapes that cross component boundaries so
//! that every byte of audio is always paired with its encoding and rate.

use serde::{Deserialize, Serialize};

/// Encodings understood anywhere on the ingress/egress boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioEncoding {
    Mulaw8k,
    Alaw8k,
    Pcm16,
}

impl AudioEncoding {
    /// Native sample rate for encodings that imply one (the telephony codecs).
    /// `Pcm16` carries no implied rate; pair it with an explicit rate.
    pub fn implied_rate_hz(self) -> Option<u32> {
        match self {
            AudioEncoding::Mulaw8k | AudioEncoding::Alaw8k => Some(8_000),
            AudioEncoding::Pcm16 => None,
        }
    }
}

/// Immutable, per-call negotiated audio shape (§3 "Audio Profile").
///
/// Every byte crossing a component boundary in a session either carries
/// this pair explicitly or is known by context to match it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioProfile {
    /// Internal PCM16 working rate used by VAD/STT/TTS.
    pub internal_rate_hz: u32,
    pub ingress_encoding: AudioEncoding,
    pub ingress_rate_hz: u32,
    pub egress_encoding: AudioEncoding,
    pub egress_rate_hz: u32,
    /// Frame size the pipeline is chunked at.
    pub chunk_ms: u32,
    /// Encoding the transport puts on the wire (may equal egress_encoding).
    pub transport_output_encoding: AudioEncoding,
}

impl AudioProfile {
    pub fn samples_per_chunk(&self, rate_hz: u32) -> usize {
        (rate_hz as u64 * self.chunk_ms as u64 / 1000) as usize
    }
}

/// Direction of an `AudioFrame`, used for the per-direction sequence counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
}

/// An ordered span of PCM16 samples at the profile's internal rate.
///
/// Sequence numbers are monotonic within one (session, direction) pair;
/// they are not meaningful across sessions or across directions.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate_hz: u32,
    pub duration_ms: u32,
    pub sequence: u64,
    pub direction: Direction,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate_hz: u32, sequence: u64, direction: Direction) -> Self {
        let duration_ms = (samples.len() as u64 * 1000 / sample_rate_hz.max(1) as u64) as u32;
        Self {
            samples,
            sample_rate_hz,
            duration_ms,
            sequence,
            direction,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.samples.len() * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_duration_derives_from_rate() {
        let frame = AudioFrame::new(vec![0; 320], 16_000, 1, Direction::Ingress);
        assert_eq!(frame.duration_ms, 20);
    }

    #[test]
    fn profile_chunk_sizing() {
        let profile = AudioProfile {
            internal_rate_hz: 16_000,
            ingress_encoding: AudioEncoding::Mulaw8k,
            ingress_rate_hz: 8_000,
            egress_encoding: AudioEncoding::Mulaw8k,
            egress_rate_hz: 8_000,
            chunk_ms: 20,
            transport_output_encoding: AudioEncoding::Mulaw8k,
        };
        assert_eq!(profile.samples_per_chunk(8_000), 160);
        assert_eq!(profile.samples_per_chunk(16_000), 320);
    }
}
