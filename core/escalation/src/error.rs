//! Error taxonomy for the escalation controller.
//!
//! Fatal-to-the-session errors are distinguished from transient ones the
//! session absorbs: permission denial kills a session before activation,
//! recognition errors retry or disable voice, and location/notifier failures
//! never block escalation or teardown.

use guardian_protocol::{CapabilityId, RecognitionErrorCode};

/// All errors that can occur in controller operations.
#[derive(Debug, thiserror::Error)]
pub enum EscalationError {
    /// Fatal to the session; no timer or voice activity ever starts.
    #[error("required capabilities denied: {}", format_capabilities(.0))]
    PermissionDenied(Vec<CapabilityId>),

    /// Retried with backoff, bounded by the remaining confirmation window.
    #[error("transient recognition error: {code:?}")]
    RecognitionTransient { code: RecognitionErrorCode },

    /// Voice loop disabled; the timer remains authoritative.
    #[error("fatal recognition error: {code:?}")]
    RecognitionFatal { code: RecognitionErrorCode },

    /// Non-fatal; escalation proceeds without coordinates.
    #[error("location unavailable: {reason}")]
    LocationUnavailable { reason: String },

    /// Non-fatal and never retried; the session must still close promptly.
    #[error("notifier failure: {reason}")]
    NotifierFailure { reason: String },

    #[error("invalid session config: {reason}")]
    InvalidConfig { reason: String },

    #[error("invalid fall trigger: {reason}")]
    InvalidTrigger { reason: String },

    #[error("invalid emergency contact: {reason}")]
    InvalidContact { reason: String },
}

fn format_capabilities(capabilities: &[CapabilityId]) -> String {
    capabilities
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience alias for controller results.
pub type Result<T> = std::result::Result<T, EscalationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_lists_capabilities() {
        let err = EscalationError::PermissionDenied(vec![
            CapabilityId::Microphone,
            CapabilityId::Sms,
        ]);
        assert_eq!(
            err.to_string(),
            "required capabilities denied: microphone, sms"
        );
    }

    #[test]
    fn invalid_config_carries_reason() {
        let err = EscalationError::InvalidConfig {
            reason: "window_ms must be non-zero".to_string(),
        };
        assert!(err.to_string().contains("window_ms"));
    }
}
