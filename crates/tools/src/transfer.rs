//! Attended-transfer sub-state-machine (§4.8): ring destination with
//! music-on-hold, announce to the destination once it answers, prompt
//! for DTMF accept/decline, bridge on accept or return the caller to the
//! LLM loop on decline/timeout.
//!
//! This sub-state-machine is new relative to the teacher (no gold-loan
//! tool touches call control), grounded in the ARI bridge/channel
//! control surface this spec describes and the teacher's `async-trait`
//! executor idiom for injecting dependencies into a tool.

use async_trait::async_trait;
use std::time::Duration;
use voxrelay_core::Result;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Bridged,
    Declined,
    NoAnswer,
    AcceptTimedOut,
}

impl TransferOutcome {
    pub fn message(self) -> &'static str {
        match self {
            TransferOutcome::Bridged => "transfer accepted",
            TransferOutcome::Declined => "destination declined the transfer",
            TransferOutcome::NoAnswer => "no answer",
            TransferOutcome::AcceptTimedOut => "destination did not respond to the accept prompt",
        }
    }
}

/// Call-control actions the attended-transfer driver needs. Implemented
/// by the call lifecycle controller against the real ARI-equivalent
/// channel/bridge surface; a test double stands in for unit tests here.
#[async_trait]
pub trait TransferControl: Send + Sync {
    /// Originate a channel to `destination` and play music-on-hold to
    /// the caller while it rings. Resolves once the destination answers.
    async fn dial(&self, destination: &str) -> Result<bool>;

    /// Play a one-way announcement to the destination channel only.
    async fn play_announcement(&self, destination: &str) -> Result<()>;

    /// Wait for a single DTMF digit from the destination, honoring
    /// `timeout`. `None` means the timeout elapsed with no input.
    async fn wait_for_dtmf(&self, destination: &str, timeout: Duration) -> Result<Option<char>>;

    /// Bridge caller and destination together.
    async fn bridge(&self, destination: &str) -> Result<()>;

    /// Tear down the destination channel and resume the caller in the
    /// original conversation, optionally speaking `message` first.
    async fn revive_caller(&self, message: &str) -> Result<()>;
}

const ACCEPT_DIGIT: char = '1';
const DECLINE_DIGIT: char = '2';

/// Drive one attended transfer to completion against `control`.
pub async fn run_attended_transfer(
    control: &dyn TransferControl,
    destination: &str,
    dial_timeout: Duration,
    accept_timeout: Duration,
) -> Result<TransferOutcome> {
    let answered = match tokio::time::timeout(dial_timeout, control.dial(destination)).await {
        Ok(Ok(answered)) => answered,
        Ok(Err(e)) => return Err(e),
        Err(_) => false,
    };

    if !answered {
        control.revive_caller(TransferOutcome::NoAnswer.message()).await?;
        return Ok(TransferOutcome::NoAnswer);
    }

    control.play_announcement(destination).await?;

    let digit = control.wait_for_dtmf(destination, accept_timeout).await?;

    match digit {
        Some(ACCEPT_DIGIT) => {
            control.bridge(destination).await?;
            Ok(TransferOutcome::Bridged)
        }
        Some(DECLINE_DIGIT) | Some(_) => {
            control.revive_caller(TransferOutcome::Declined.message()).await?;
            Ok(TransferOutcome::Declined)
        }
        None => {
            control
                .revive_caller(TransferOutcome::AcceptTimedOut.message())
                .await?;
            Ok(TransferOutcome::AcceptTimedOut)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedControl {
        answers: bool,
        digit: Option<char>,
        log: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl TransferControl for ScriptedControl {
        async fn dial(&self, _destination: &str) -> Result<bool> {
            self.log.lock().unwrap().push("dial");
            Ok(self.answers)
        }
        async fn play_announcement(&self, _destination: &str) -> Result<()> {
            self.log.lock().unwrap().push("announce");
            Ok(())
        }
        async fn wait_for_dtmf(&self, _destination: &str, _timeout: Duration) -> Result<Option<char>> {
            self.log.lock().unwrap().push("dtmf");
            Ok(self.digit)
        }
        async fn bridge(&self, _destination: &str) -> Result<()> {
            self.log.lock().unwrap().push("bridge");
            Ok(())
        }
        async fn revive_caller(&self, _message: &str) -> Result<()> {
            self.log.lock().unwrap().push("revive");
            Ok(())
        }
    }

    #[tokio::test]
    async fn no_answer_revives_the_caller_without_announcing() {
        let control = ScriptedControl {
            answers: false,
            ..Default::default()
        };
        let outcome = run_attended_transfer(&control, "sales", Duration::from_secs(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, TransferOutcome::NoAnswer);
        assert_eq!(*control.log.lock().unwrap(), vec!["dial", "revive"]);
    }

    #[tokio::test]
    async fn accept_digit_bridges() {
        let control = ScriptedControl {
            answers: true,
            digit: Some(ACCEPT_DIGIT),
            ..Default::default()
        };
        let outcome = run_attended_transfer(&control, "sales", Duration::from_secs(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, TransferOutcome::Bridged);
        assert_eq!(*control.log.lock().unwrap(), vec!["dial", "announce", "dtmf", "bridge"]);
    }

    #[tokio::test]
    async fn decline_digit_revives_the_caller() {
        let control = ScriptedControl {
            answers: true,
            digit: Some(DECLINE_DIGIT),
            ..Default::default()
        };
        let outcome = run_attended_transfer(&control, "sales", Duration::from_secs(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, TransferOutcome::Declined);
    }

    #[tokio::test]
    async fn no_dtmf_within_timeout_revives_the_caller() {
        let control = ScriptedControl {
            answers: true,
            digit: None,
            ..Default::default()
        };
        let outcome = run_attended_transfer(&control, "sales", Duration::from_secs(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, TransferOutcome::AcceptTimedOut);
    }
}
