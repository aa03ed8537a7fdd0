//! Contract types between the fall-detector host and the escalation controller.
//!
//! This crate is shared by the controller and its host adapters (detector,
//! platform permission layer, speech recognizer, location provider) to prevent
//! schema drift. The controller remains the authority on validation, but hosts
//! can reuse the same types to construct valid inputs.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Platform capability required before a session may activate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityId {
    Microphone,
    Location,
    Sms,
    Telephony,
}

impl CapabilityId {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityId::Microphone => "microphone",
            CapabilityId::Location => "location",
            CapabilityId::Sms => "sms",
            CapabilityId::Telephony => "telephony",
        }
    }
}

impl std::fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event from the fall detector that starts a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FallTrigger {
    /// RFC3339 timestamp of the detected impact.
    pub triggered_at: String,
    /// Detector confidence in [0.0, 1.0], if the detector reports one.
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl FallTrigger {
    pub fn validate(&self) -> Result<(), String> {
        if DateTime::parse_from_rfc3339(&self.triggered_at).is_err() {
            return Err("triggered_at must be RFC3339".to_string());
        }
        if let Some(confidence) = self.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err("confidence must be within 0.0..=1.0".to_string());
            }
        }
        Ok(())
    }
}

/// Result of a platform permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionResult {
    pub capability: CapabilityId,
    pub granted: bool,
}

/// Error codes reported by the platform speech recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionErrorCode {
    Network,
    Server,
    NoSpeech,
    SpeechTimeout,
    RecognizerBusy,
    AudioFailure,
    NoMatch,
    InsufficientPermissions,
    ClientError,
}

/// Event from the platform speech recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RecognitionEvent {
    ReadyForSpeech,
    BeginningOfSpeech,
    EndOfSpeech,
    Error { code: RecognitionErrorCode },
    /// Ranked transcripts, best first.
    Results { transcripts: Vec<String> },
}

impl RecognitionEvent {
    pub fn validate(&self) -> Result<(), String> {
        if let RecognitionEvent::Results { transcripts } = self {
            if transcripts.is_empty() {
                return Err("results must carry at least one transcript".to_string());
            }
            if transcripts.iter().any(|t| t.trim().is_empty()) {
                return Err("transcripts must not be blank".to_string());
            }
        }
        Ok(())
    }
}

/// Best-effort location fix from the location collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationSnapshot {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
}

impl LocationSnapshot {
    pub fn validate(&self) -> Result<(), String> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err("lat must be within -90.0..=90.0".to_string());
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err("lng must be within -180.0..=180.0".to_string());
        }
        if let Some(accuracy) = self.accuracy_m {
            if accuracy < 0.0 {
                return Err("accuracy_m must be non-negative".to_string());
            }
        }
        Ok(())
    }
}

/// Emergency contact injected at session creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmergencyContact {
    pub name: String,
    pub phone: String,
}

impl EmergencyContact {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("contact name is required".to_string());
        }
        if self.phone.trim().is_empty() {
            return Err("contact phone is required".to_string());
        }
        Ok(())
    }
}

/// Final resolution of a session. Produced exactly once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    /// The user confirmed they are okay (manual button or cancel phrase).
    UserFine,
    /// A voice escalate phrase resolved the session toward help.
    Escalate,
    /// The confirmation window elapsed with no resolution.
    Timeout,
    /// A required capability was denied before activation.
    PermissionDenied,
}

impl ConfirmationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationOutcome::UserFine => "user_fine",
            ConfirmationOutcome::Escalate => "escalate",
            ConfirmationOutcome::Timeout => "timeout",
            ConfirmationOutcome::PermissionDenied => "permission_denied",
        }
    }

    /// Whether this outcome commits the escalation side effect.
    pub fn escalates(&self) -> bool {
        matches!(
            self,
            ConfirmationOutcome::Escalate | ConfirmationOutcome::Timeout
        )
    }
}

impl std::fmt::Display for ConfirmationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status line pushed to the host UI while a session is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub text: String,
    /// Remaining confirmation window, present only on countdown ticks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<u64>,
}

impl StatusUpdate {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            remaining_ms: None,
        }
    }

    pub fn countdown(text: impl Into<String>, remaining_ms: u64) -> Self {
        Self {
            text: text.into(),
            remaining_ms: Some(remaining_ms),
        }
    }
}

/// Terminal signal to the host so it can dismiss the alert screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionClosed {
    pub session_id: String,
    pub outcome: ConfirmationOutcome,
}
