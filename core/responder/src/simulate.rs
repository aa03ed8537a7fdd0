//! Scenario runner: drives a full session timeline on a virtual clock.
//!
//! A scenario scripts the outside world for one session: which capabilities
//! are granted, what the recognizer hears and when, whether the location
//! provider answers, whether the notifier works. The runner schedules the
//! scripted events, starts the session at t=0, advances virtual time, and
//! reports everything the host observed with millisecond timestamps.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use guardian_escalation::{
    Clock, Collaborators, EscalationRecord, EscalationSession, HostBridge, LocationProvider,
    Notifier, PermissionCheck, PermissionProvider, Recognizer, SessionConfig, VirtualClock,
};
use guardian_protocol::{
    CapabilityId, ConfirmationOutcome, EmergencyContact, FallTrigger, LocationSnapshot,
    PermissionResult, RecognitionEvent, SessionClosed, StatusUpdate,
};
use serde::{Deserialize, Serialize};

fn default_run_until_ms() -> u64 {
    30_000
}

fn default_location_delay_ms() -> u64 {
    500
}

/// Everything scripted about the world outside the session.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub contact: EmergencyContact,
    #[serde(default)]
    pub config: SessionConfig,
    pub trigger: FallTrigger,
    /// Capabilities granted up front. Absent means everything is granted.
    #[serde(default)]
    pub granted: Option<Vec<CapabilityId>>,
    /// Location fix the provider will deliver, if any.
    #[serde(default)]
    pub location: Option<LocationSnapshot>,
    #[serde(default = "default_location_delay_ms")]
    pub location_delay_ms: u64,
    #[serde(default)]
    pub notifier_fails: bool,
    #[serde(default)]
    pub events: Vec<ScriptedEvent>,
    #[serde(default = "default_run_until_ms")]
    pub run_until_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct ScriptedEvent {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: ScriptedAction,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScriptedAction {
    ManualConfirm,
    Recognition { event: RecognitionEvent },
    Permission { result: PermissionResult },
    Stop,
}

/// What the host observed, with virtual-time stamps.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub session_id: String,
    pub final_state: String,
    pub outcome: Option<ConfirmationOutcome>,
    pub attempts_started: u32,
    pub recognizer_starts: u32,
    pub recognizer_stops: u32,
    pub statuses: Vec<TimedStatus>,
    pub alerts: Vec<TimedAlert>,
    pub closed: Vec<TimedClose>,
    pub record: Option<EscalationRecord>,
}

#[derive(Debug, Serialize)]
pub struct TimedStatus {
    pub at_ms: u64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct TimedAlert {
    pub at_ms: u64,
    pub message: String,
    pub delivered: bool,
}

#[derive(Debug, Serialize)]
pub struct TimedClose {
    pub at_ms: u64,
    pub outcome: ConfirmationOutcome,
}

struct ScenarioPermissions {
    granted: Option<Vec<CapabilityId>>,
}

impl PermissionProvider for ScenarioPermissions {
    fn check(&self, required: &[CapabilityId]) -> PermissionCheck {
        let Some(granted) = &self.granted else {
            return PermissionCheck::Granted;
        };
        let missing: Vec<CapabilityId> = required
            .iter()
            .copied()
            .filter(|cap| !granted.contains(cap))
            .collect();
        if missing.is_empty() {
            PermissionCheck::Granted
        } else {
            PermissionCheck::Missing(missing)
        }
    }

    fn request(&self, missing: &[CapabilityId]) {
        tracing::debug!(?missing, "Scenario permission prompt shown");
    }
}

#[derive(Default)]
struct CountingRecognizer {
    starts: AtomicU32,
    stops: AtomicU32,
}

impl Recognizer for CountingRecognizer {
    fn start_listening(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScenarioLocation {
    clock: Arc<VirtualClock>,
    fix: Option<LocationSnapshot>,
    delay: Duration,
}

impl LocationProvider for ScenarioLocation {
    fn request_location(&self, reply: Box<dyn FnOnce(Option<LocationSnapshot>) + Send>) {
        let fix = self.fix.clone();
        self.clock.schedule(self.delay, Box::new(move || reply(fix)));
    }
}

struct ScenarioNotifier {
    clock: Arc<VirtualClock>,
    fails: bool,
    alerts: Mutex<Vec<TimedAlert>>,
}

impl Notifier for ScenarioNotifier {
    fn send_alert(&self, _contact: &EmergencyContact, message: &str) -> Result<(), String> {
        let delivered = !self.fails;
        self.alerts.lock().unwrap().push(TimedAlert {
            at_ms: self.clock.now().as_millis() as u64,
            message: message.to_string(),
            delivered,
        });
        if self.fails {
            Err("scenario notifier configured to fail".to_string())
        } else {
            Ok(())
        }
    }
}

struct ScenarioHost {
    clock: Arc<VirtualClock>,
    statuses: Mutex<Vec<TimedStatus>>,
    closed: Mutex<Vec<TimedClose>>,
}

impl HostBridge for ScenarioHost {
    fn status(&self, update: StatusUpdate) {
        self.statuses.lock().unwrap().push(TimedStatus {
            at_ms: self.clock.now().as_millis() as u64,
            text: update.text,
            remaining_ms: update.remaining_ms,
        });
    }

    fn escalation_dispatched(&self, record: &EscalationRecord) {
        tracing::debug!(session_id = %record.session_id, "Escalation record emitted");
    }

    fn session_closed(&self, closed: SessionClosed) {
        self.closed.lock().unwrap().push(TimedClose {
            at_ms: self.clock.now().as_millis() as u64,
            outcome: closed.outcome,
        });
    }
}

pub fn run(scenario: Scenario) -> Result<SimulationReport, String> {
    let epoch = scenario
        .trigger
        .triggered_at
        .parse::<chrono::DateTime<chrono::Utc>>()
        .map_err(|e| format!("invalid trigger timestamp: {e}"))?;
    let clock = Arc::new(VirtualClock::with_epoch(epoch));

    let recognizer = Arc::new(CountingRecognizer::default());
    let notifier = Arc::new(ScenarioNotifier {
        clock: Arc::clone(&clock),
        fails: scenario.notifier_fails,
        alerts: Mutex::new(Vec::new()),
    });
    let host = Arc::new(ScenarioHost {
        clock: Arc::clone(&clock),
        statuses: Mutex::new(Vec::new()),
        closed: Mutex::new(Vec::new()),
    });

    let session = EscalationSession::new(
        Collaborators {
            clock: Arc::clone(&clock) as Arc<dyn Clock>,
            permissions: Arc::new(ScenarioPermissions {
                granted: scenario.granted.clone(),
            }),
            recognizer: Some(Arc::clone(&recognizer) as Arc<dyn Recognizer>),
            location: Arc::new(ScenarioLocation {
                clock: Arc::clone(&clock),
                fix: scenario.location,
                delay: Duration::from_millis(scenario.location_delay_ms),
            }),
            notifier: Arc::clone(&notifier) as Arc<dyn Notifier>,
            host: Arc::clone(&host) as Arc<dyn HostBridge>,
        },
        scenario.contact.clone(),
        scenario.config.clone(),
    )
    .map_err(|e| e.to_string())?;
    let session = Arc::new(session);

    // Script the outside world before time starts moving. Entries scheduled
    // here run ahead of session timers due at the same instant, which is the
    // deterministic stand-in for a same-millisecond race.
    for event in scenario.events {
        let session = Arc::clone(&session);
        let task: Box<dyn FnOnce() + Send> = match event.action {
            ScriptedAction::ManualConfirm => Box::new(move || session.manual_confirm()),
            ScriptedAction::Recognition { event } => {
                Box::new(move || session.recognition_event(event))
            }
            ScriptedAction::Permission { result } => {
                Box::new(move || session.permission_result(result))
            }
            ScriptedAction::Stop => Box::new(move || session.stop()),
        };
        clock.schedule(Duration::from_millis(event.at_ms), task);
    }

    session.start(&scenario.trigger).map_err(|e| e.to_string())?;
    clock.advance_to(Duration::from_millis(scenario.run_until_ms));

    let snapshot = session.snapshot();
    let statuses = std::mem::take(&mut *host.statuses.lock().unwrap());
    let alerts = std::mem::take(&mut *notifier.alerts.lock().unwrap());
    let closed = std::mem::take(&mut *host.closed.lock().unwrap());
    Ok(SimulationReport {
        session_id: snapshot.session_id,
        final_state: snapshot.state.as_str().to_string(),
        outcome: snapshot.outcome,
        attempts_started: snapshot.attempts_started,
        recognizer_starts: recognizer.starts.load(Ordering::SeqCst),
        recognizer_stops: recognizer.stops.load(Ordering::SeqCst),
        statuses,
        alerts,
        closed,
        record: session.escalation_record(),
    })
}
