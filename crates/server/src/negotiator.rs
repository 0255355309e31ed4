//! Audio Profile Negotiator (§4.11).
//!
//! Pure function: given the set of audio profiles a provider supports, the
//! set a transport supports, and a context's preferred profile name, picks
//! one concrete profile. No I/O, no session state — called once per call
//! setup and once per config reload (to catch a now-empty intersection
//! before any call ever reaches it).

use std::collections::HashMap;

use voxrelay_core::audio::AudioProfile;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("no audio profile is supported by both the provider and the transport")]
    EmptyIntersection,
}

/// One named candidate, as they appear in the `audio_profiles` configuration
/// section.
#[derive(Debug, Clone)]
pub struct NamedProfile<'a> {
    pub name: &'a str,
    pub profile: &'a AudioProfile,
}

/// Number of encoding/rate conversions a profile forces on the hot path.
/// Lower is better: a profile whose ingress/egress already match the
/// transport's wire encoding and the engine's internal rate costs nothing.
fn transcoding_count(profile: &AudioProfile) -> u32 {
    let mut count = 0;
    if profile.ingress_encoding != profile.transport_output_encoding {
        count += 1;
    }
    if profile.egress_encoding != profile.transport_output_encoding {
        count += 1;
    }
    if profile.ingress_rate_hz != profile.internal_rate_hz {
        count += 1;
    }
    if profile.egress_rate_hz != profile.internal_rate_hz {
        count += 1;
    }
    count
}

/// Picks the negotiated profile per the algorithm in §4.11: intersect,
/// prefer the context's named choice if it survives, else rank by highest
/// internal rate, then lowest transcoding count, then name.
pub fn negotiate<'a>(
    provider_profiles: &[NamedProfile<'a>],
    transport_profiles: &[NamedProfile<'a>],
    preferred_name: &str,
) -> Result<NamedProfile<'a>, NegotiationError> {
    let transport_by_profile: HashMap<&AudioProfile, &str> = transport_profiles
        .iter()
        .map(|p| (p.profile, p.name))
        .collect();

    let intersection: Vec<NamedProfile<'a>> = provider_profiles
        .iter()
        .filter(|p| transport_by_profile.contains_key(p.profile))
        .cloned()
        .collect();

    if intersection.is_empty() {
        return Err(NegotiationError::EmptyIntersection);
    }

    if let Some(preferred) = intersection.iter().find(|p| p.name == preferred_name) {
        return Ok(preferred.clone());
    }

    let mut ranked = intersection;
    ranked.sort_by(|a, b| {
        b.profile
            .internal_rate_hz
            .cmp(&a.profile.internal_rate_hz)
            .then_with(|| transcoding_count(a.profile).cmp(&transcoding_count(b.profile)))
            .then_with(|| a.name.cmp(b.name))
    });

    Ok(ranked.into_iter().next().expect("non-empty checked above"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxrelay_core::audio::AudioEncoding;

    fn profile(internal_rate_hz: u32, chunk_ms: u32) -> AudioProfile {
        AudioProfile {
            internal_rate_hz,
            ingress_encoding: AudioEncoding::Mulaw8k,
            ingress_rate_hz: 8_000,
            egress_encoding: AudioEncoding::Mulaw8k,
            egress_rate_hz: 8_000,
            chunk_ms,
            transport_output_encoding: AudioEncoding::Mulaw8k,
        }
    }

    #[test]
    fn empty_intersection_is_an_error() {
        let a = profile(16_000, 20);
        let b = profile(8_000, 20);
        let provider = vec![NamedProfile { name: "a", profile: &a }];
        let transport = vec![NamedProfile { name: "b", profile: &b }];
        assert_eq!(
            negotiate(&provider, &transport, "a").unwrap_err(),
            NegotiationError::EmptyIntersection
        );
    }

    #[test]
    fn preferred_profile_wins_when_present_in_intersection() {
        let low = profile(8_000, 20);
        let high = profile(16_000, 20);
        let provider = vec![
            NamedProfile { name: "low", profile: &low },
            NamedProfile { name: "high", profile: &high },
        ];
        let transport = provider.clone();
        let chosen = negotiate(&provider, &transport, "low").unwrap();
        assert_eq!(chosen.name, "low");
    }

    #[test]
    fn highest_internal_rate_wins_without_a_surviving_preference() {
        let low = profile(8_000, 20);
        let high = profile(16_000, 20);
        let provider = vec![
            NamedProfile { name: "low", profile: &low },
            NamedProfile { name: "high", profile: &high },
        ];
        let transport = provider.clone();
        let chosen = negotiate(&provider, &transport, "missing").unwrap();
        assert_eq!(chosen.name, "high");
    }

    #[test]
    fn name_is_the_final_tiebreak() {
        let x = profile(16_000, 20);
        let y = profile(16_000, 30);
        let provider = vec![
            NamedProfile { name: "zebra", profile: &x },
            NamedProfile { name: "alpha", profile: &y },
        ];
        let transport = provider.clone();
        let chosen = negotiate(&provider, &transport, "missing").unwrap();
        assert_eq!(chosen.name, "alpha");
    }
}
