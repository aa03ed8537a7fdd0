//! Voice confirmation loop: per-attempt sub-state and retry policy.
//!
//! Each attempt runs `Idle → Listening → {Result | Error | EndWithoutResult}`.
//! Retryable failures restart listening after a backoff, but never past the
//! session deadline; the timer is authoritative for termination. Fatal
//! failures disable voice for the rest of the session.

use guardian_protocol::RecognitionErrorCode;
use std::time::Duration;

/// Retryable errors restart the loop; fatal ones disable it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

pub fn classify_error(code: RecognitionErrorCode) -> ErrorClass {
    match code {
        RecognitionErrorCode::Network
        | RecognitionErrorCode::Server
        | RecognitionErrorCode::NoSpeech
        | RecognitionErrorCode::SpeechTimeout
        | RecognitionErrorCode::RecognizerBusy
        | RecognitionErrorCode::NoMatch => ErrorClass::Retryable,
        RecognitionErrorCode::InsufficientPermissions
        | RecognitionErrorCode::AudioFailure
        | RecognitionErrorCode::ClientError => ErrorClass::Fatal,
    }
}

/// A voice restart is scheduled only if the next attempt would begin
/// strictly before the deadline.
pub fn retry_fits_window(now: Duration, delay: Duration, deadline: Duration) -> bool {
    now + delay < deadline
}

/// Platform speech recognizer. Results arrive asynchronously as
/// `RecognitionEvent`s delivered to the session.
pub trait Recognizer: Send + Sync {
    fn start_listening(&self);
    fn stop(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Listening,
    WaitingNextAttempt,
}

/// Loop state owned by the session; all mutation happens under the session
/// lock.
#[derive(Debug)]
pub struct VoiceLoop {
    enabled: bool,
    attempt: AttemptState,
    attempts_started: u32,
}

impl VoiceLoop {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            attempt: AttemptState::Idle,
            attempts_started: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn attempt(&self) -> AttemptState {
        self.attempt
    }

    pub fn attempts_started(&self) -> u32 {
        self.attempts_started
    }

    /// Transition into a new listening attempt. Returns false when the loop
    /// is disabled or already listening.
    pub fn begin_attempt(&mut self) -> bool {
        if !self.enabled || self.attempt == AttemptState::Listening {
            return false;
        }
        self.attempt = AttemptState::Listening;
        self.attempts_started += 1;
        true
    }

    pub fn wait_for_retry(&mut self) {
        if self.enabled {
            self.attempt = AttemptState::WaitingNextAttempt;
        }
    }

    /// Fatal error or permission loss: no further attempts this session.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.attempt = AttemptState::Idle;
    }

    pub fn settle(&mut self) {
        self.attempt = AttemptState::Idle;
    }
}
