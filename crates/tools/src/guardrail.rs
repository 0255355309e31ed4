//! Hangup guardrail (§4.8): second-guesses the `hangup_call` tool before
//! it reaches the executor, so a polite mid-conversation "thanks" doesn't
//! end the call.
//!
//! Grounded in the teacher's policy-enum-over-config pattern (the same
//! shape as the teacher's stage/transition guards), generalized to the
//! end-call-marker matching this spec describes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HangupPolicy {
    /// Always allow hangup_call through.
    Relaxed,
    /// Require an end-call marker in the caller's last utterance.
    Normal,
    /// Same check as `Normal`, reserved for pipelines that want the
    /// rejection message worded more firmly; matching behavior is
    /// identical today (§9 open question left undecided by the source).
    Strict,
    /// Defer to the configured global default policy.
    Auto,
}

#[derive(Debug, Clone)]
pub struct GuardrailConfig {
    pub policy: HangupPolicy,
    pub end_call_markers: Vec<String>,
    pub default_policy: HangupPolicy,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            policy: HangupPolicy::Normal,
            end_call_markers: vec![
                "goodbye".into(),
                "bye".into(),
                "nothing else".into(),
                "that's all".into(),
                "hang up".into(),
            ],
            default_policy: HangupPolicy::Normal,
        }
    }
}

impl GuardrailConfig {
    fn effective_policy(&self) -> HangupPolicy {
        match self.policy {
            HangupPolicy::Auto => self.default_policy,
            other => other,
        }
    }
}

/// Decide whether an emitted `hangup_call` may proceed, given the
/// caller's most recent utterance. The assistant's own farewell marker
/// is not a substitute for one: an agent that believes the call is over
/// still needs the caller to actually say so before hangup executes.
pub fn check_hangup(
    config: &GuardrailConfig,
    last_caller_utterance: &str,
    _assistant_just_said_farewell: bool,
) -> Result<(), String> {
    match config.effective_policy() {
        HangupPolicy::Relaxed => Ok(()),
        HangupPolicy::Normal | HangupPolicy::Strict => {
            let caller_lower = last_caller_utterance.to_lowercase();
            let matched = config
                .end_call_markers
                .iter()
                .any(|marker| caller_lower.contains(&marker.to_lowercase()));

            if matched {
                Ok(())
            } else {
                Err("no end-call marker detected in the caller's last utterance".into())
            }
        }
        HangupPolicy::Auto => unreachable!("effective_policy resolves Auto"),
    }
}

/// Default farewell-drain wait before requesting the channel hangup.
pub const FAREWELL_HANGUP_DELAY: Duration = Duration::from_millis(2_500);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relaxed_policy_always_allows() {
        let config = GuardrailConfig {
            policy: HangupPolicy::Relaxed,
            ..GuardrailConfig::default()
        };
        assert!(check_hangup(&config, "thanks for your help with that", false).is_ok());
    }

    #[test]
    fn normal_policy_rejects_polite_thanks_without_a_marker() {
        let config = GuardrailConfig::default();
        assert!(check_hangup(&config, "thank you for your help with that", false).is_err());
    }

    #[test]
    fn normal_policy_allows_when_a_marker_is_present() {
        let config = GuardrailConfig::default();
        assert!(check_hangup(&config, "no thanks, goodbye", false).is_ok());
    }

    #[test]
    fn assistant_farewell_alone_does_not_permit_hangup() {
        let config = GuardrailConfig::default();
        assert!(check_hangup(&config, "ok", true).is_err());
    }

    #[test]
    fn auto_defers_to_the_configured_default() {
        let config = GuardrailConfig {
            policy: HangupPolicy::Auto,
            default_policy: HangupPolicy::Relaxed,
            ..GuardrailConfig::default()
        };
        assert!(check_hangup(&config, "whatever", false).is_ok());
    }
}
