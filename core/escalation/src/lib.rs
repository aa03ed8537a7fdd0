//! # guardian-escalation
//!
//! Core library for Guardian's fall-response flow: the bounded confirmation
//! window that decides, after a detected fall, whether the user is fine or
//! an emergency contact must be alerted.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Scheduling goes through
//!   the [`clock::Clock`] trait; hosts can back it with whatever they run on.
//! - **Single serialization point**: Every event for a session passes through
//!   one mutex-guarded handler. Side effects run after the lock is released.
//! - **At most one escalation**: A session produces exactly one outcome and
//!   at most one dispatched alert, no matter how callbacks race.
//! - **Deterministic testing**: [`clock::VirtualClock`] drives full session
//!   timelines in virtual time, no sleeps.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use guardian_escalation::{Collaborators, EscalationSession, SessionConfig};
//!
//! let session = EscalationSession::new(collaborators, contact, SessionConfig::default())?;
//! session.start(&trigger)?;
//! // ...later, from the button handler:
//! session.manual_confirm();
//! ```

// Public modules
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod permissions;
pub mod phrases;
pub mod session;
pub mod timer;
pub mod voice;

// Re-export commonly used items at crate root
pub use clock::{Clock, SystemClock, TaskHandle, VirtualClock};
pub use config::SessionConfig;
pub use dispatch::{EscalationCause, EscalationRecord, LocationProvider, Notifier};
pub use error::{EscalationError, Result};
pub use permissions::{PermissionCheck, PermissionProvider, PermissionSet};
pub use phrases::{classify, classify_ranked, TranscriptClass};
pub use session::{Collaborators, EscalationSession, HostBridge, SessionSnapshot, SessionState};
pub use timer::ConfirmationTimer;
pub use voice::{classify_error, ErrorClass, Recognizer, VoiceLoop};
