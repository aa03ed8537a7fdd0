//! Session configuration: window, delays, phrase sets, enabled modalities.
//!
//! Supplied by the host at session creation and never re-read mid-session.

use guardian_protocol::CapabilityId;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::EscalationError;

pub const DEFAULT_WINDOW_MS: u64 = 7_000;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_VOICE_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_CONFIRM_GRACE_MS: u64 = 1_500;
pub const DEFAULT_LOCATION_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_DISMISS_DELAY_MS: u64 = 1_500;

static DEFAULT_CANCEL_PHRASES: Lazy<Vec<String>> = Lazy::new(|| {
    ["fine", "okay", "ok", "alright", "i am fine", "i'm fine", "i am okay"]
        .into_iter()
        .map(str::to_string)
        .collect()
});

static DEFAULT_ESCALATE_PHRASES: Lazy<Vec<String>> = Lazy::new(|| {
    ["help", "emergency", "need help"]
        .into_iter()
        .map(str::to_string)
        .collect()
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Confirmation window; the deadline is session start plus this.
    pub window_ms: u64,
    /// Countdown status interval for the host display.
    pub tick_interval_ms: u64,
    /// Delay before restarting listening after a retryable voice failure.
    pub voice_retry_delay_ms: u64,
    /// Pause after a voice cancel confirmation before dismissal.
    pub confirm_grace_ms: u64,
    /// Bounded wait for a location fix during escalation.
    pub location_timeout_ms: u64,
    /// How long final status text stays visible before the session closes.
    pub dismiss_delay_ms: u64,
    /// Substrings that resolve the session as `UserFine`.
    pub cancel_phrases: Vec<String>,
    /// Substrings that resolve the session as `Escalate`.
    pub escalate_phrases: Vec<String>,
    /// Whether the voice modality runs (manual confirm is always available).
    pub voice_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            voice_retry_delay_ms: DEFAULT_VOICE_RETRY_DELAY_MS,
            confirm_grace_ms: DEFAULT_CONFIRM_GRACE_MS,
            location_timeout_ms: DEFAULT_LOCATION_TIMEOUT_MS,
            dismiss_delay_ms: DEFAULT_DISMISS_DELAY_MS,
            cancel_phrases: DEFAULT_CANCEL_PHRASES.clone(),
            escalate_phrases: DEFAULT_ESCALATE_PHRASES.clone(),
            voice_enabled: true,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), EscalationError> {
        if self.window_ms == 0 {
            return Err(invalid("window_ms must be non-zero"));
        }
        if self.tick_interval_ms == 0 {
            return Err(invalid("tick_interval_ms must be non-zero"));
        }
        if self.tick_interval_ms > self.window_ms {
            return Err(invalid("tick_interval_ms must not exceed window_ms"));
        }
        if self.voice_enabled {
            if self.cancel_phrases.iter().all(|p| p.trim().is_empty()) {
                return Err(invalid("cancel_phrases must not be empty with voice enabled"));
            }
            if self.escalate_phrases.iter().all(|p| p.trim().is_empty()) {
                return Err(invalid(
                    "escalate_phrases must not be empty with voice enabled",
                ));
            }
        }
        Ok(())
    }

    /// Capabilities the permission gate requires before activation.
    pub fn required_capabilities(&self) -> BTreeSet<CapabilityId> {
        let mut required = BTreeSet::from([CapabilityId::Sms, CapabilityId::Location]);
        if self.voice_enabled {
            required.insert(CapabilityId::Microphone);
        }
        required
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn voice_retry_delay(&self) -> Duration {
        Duration::from_millis(self.voice_retry_delay_ms)
    }

    pub fn confirm_grace(&self) -> Duration {
        Duration::from_millis(self.confirm_grace_ms)
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::from_millis(self.location_timeout_ms)
    }

    pub fn dismiss_delay(&self) -> Duration {
        Duration::from_millis(self.dismiss_delay_ms)
    }
}

fn invalid(reason: &str) -> EscalationError {
    EscalationError::InvalidConfig {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_window() {
        let config = SessionConfig {
            window_ms: 0,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_tick_longer_than_window() {
        let config = SessionConfig {
            window_ms: 1_000,
            tick_interval_ms: 2_000,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_phrases_only_when_voice_enabled() {
        let config = SessionConfig {
            cancel_phrases: vec![],
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            cancel_phrases: vec![],
            escalate_phrases: vec![],
            voice_enabled: false,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn microphone_required_only_with_voice() {
        let with_voice = SessionConfig::default();
        assert!(with_voice
            .required_capabilities()
            .contains(&CapabilityId::Microphone));

        let without_voice = SessionConfig {
            voice_enabled: false,
            ..SessionConfig::default()
        };
        assert!(!without_voice
            .required_capabilities()
            .contains(&CapabilityId::Microphone));
    }

    #[test]
    fn config_round_trips_through_json_with_defaults() {
        let parsed: SessionConfig =
            serde_json::from_str(r#"{"window_ms": 5000}"#).expect("parse");
        assert_eq!(parsed.window_ms, 5_000);
        assert_eq!(parsed.tick_interval_ms, DEFAULT_TICK_INTERVAL_MS);
        assert!(parsed.voice_enabled);
    }
}
