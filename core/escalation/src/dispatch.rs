//! Escalation dispatch: alert composition and the append-only record.
//!
//! The session commits the single `Active → Escalating` transition before
//! anything here runs; this module owns what happens next: best-effort
//! location, message composition, and the one `EscalationRecord` per
//! session. The notifier call is fire-and-forget: a failure is logged by the
//! session, never retried, and never delays teardown.

use chrono::{DateTime, Utc};
use guardian_protocol::{EmergencyContact, LocationSnapshot};
use serde::Serialize;

/// Why the escalation fired; wording differs between silence and an explicit
/// call for help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationCause {
    /// No confirmation and no recognized phrase before the deadline.
    NoResponse,
    /// A voice escalate phrase resolved the session.
    VoiceHelp,
}

/// External collaborator that delivers the emergency alert. Best-effort;
/// the transport (SMS, call) is out of scope.
pub trait Notifier: Send + Sync {
    fn send_alert(&self, contact: &EmergencyContact, message: &str) -> Result<(), String>;
}

/// External collaborator supplying a best-effort location fix. The reply
/// callback may fire at any later time, or never; the session bounds the
/// wait with its own scheduled timeout.
pub trait LocationProvider: Send + Sync {
    fn request_location(&self, reply: Box<dyn FnOnce(Option<LocationSnapshot>) + Send>);
}

/// Append-only audit artifact. Created at most once per session and never
/// mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationRecord {
    pub session_id: String,
    pub contact: EmergencyContact,
    pub message: String,
    pub location: Option<LocationSnapshot>,
    pub dispatched_at: DateTime<Utc>,
}

pub fn compose_message(cause: EscalationCause, location: Option<&LocationSnapshot>) -> String {
    let lead = match cause {
        EscalationCause::NoResponse => {
            "Guardian alert: a fall was detected and there was no response within the confirmation window."
        }
        EscalationCause::VoiceHelp => {
            "Guardian alert: a fall was detected and the user called for help."
        }
    };
    match location {
        Some(fix) => format!(
            "{} Last known location: {:.5}, {:.5}",
            lead, fix.lat, fix.lng
        ),
        None => format!("{} Location unavailable.", lead),
    }
}
