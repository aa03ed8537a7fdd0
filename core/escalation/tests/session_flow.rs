//! End-to-end session timelines on a virtual clock.
//!
//! Each test scripts the outside world (button presses, recognizer events,
//! permission results, location replies) as clock tasks, starts a session,
//! advances virtual time, and checks what the host observed.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use guardian_escalation::{
    Clock, Collaborators, EscalationRecord, EscalationSession, HostBridge, LocationProvider,
    Notifier, PermissionCheck, PermissionProvider, Recognizer, SessionConfig, SessionState,
    VirtualClock,
};
use guardian_protocol::{
    CapabilityId, ConfirmationOutcome, EmergencyContact, FallTrigger, LocationSnapshot,
    PermissionResult, RecognitionErrorCode, RecognitionEvent, SessionClosed, StatusUpdate,
};

struct GrantAll;

impl PermissionProvider for GrantAll {
    fn check(&self, _required: &[CapabilityId]) -> PermissionCheck {
        PermissionCheck::Granted
    }

    fn request(&self, _missing: &[CapabilityId]) {}
}

struct PromptFor(Vec<CapabilityId>);

impl PermissionProvider for PromptFor {
    fn check(&self, required: &[CapabilityId]) -> PermissionCheck {
        let missing: Vec<CapabilityId> = required
            .iter()
            .copied()
            .filter(|cap| self.0.contains(cap))
            .collect();
        if missing.is_empty() {
            PermissionCheck::Granted
        } else {
            PermissionCheck::Missing(missing)
        }
    }

    fn request(&self, _missing: &[CapabilityId]) {}
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

/// Replies with the configured fix after a fixed delay on the shared clock.
struct DelayedLocation {
    clock: Arc<VirtualClock>,
    fix: Option<LocationSnapshot>,
    delay: Duration,
}

impl LocationProvider for DelayedLocation {
    fn request_location(&self, reply: Box<dyn FnOnce(Option<LocationSnapshot>) + Send>) {
        let fix = self.fix.clone();
        self.clock.schedule(self.delay, Box::new(move || reply(fix)));
    }
}

#[derive(Default)]
struct CountingNotifier {
    sent: Mutex<Vec<String>>,
}

impl Notifier for CountingNotifier {
    fn send_alert(
        &self,
        _contact: &EmergencyContact,
        message: &str,
    ) -> Result<(), String> {
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct Observer {
    statuses: Mutex<Vec<StatusUpdate>>,
    records: Mutex<Vec<EscalationRecord>>,
    closed: Mutex<Vec<SessionClosed>>,
}

impl HostBridge for Observer {
    fn status(&self, update: StatusUpdate) {
        self.statuses.lock().unwrap().push(update);
    }

    fn escalation_dispatched(&self, record: &EscalationRecord) {
        self.records.lock().unwrap().push(record.clone());
    }

    fn session_closed(&self, closed: SessionClosed) {
        self.closed.lock().unwrap().push(closed);
    }
}

struct Harness {
    clock: Arc<VirtualClock>,
    recognizer: Arc<CountingRecognizer>,
    notifier: Arc<CountingNotifier>,
    observer: Arc<Observer>,
    session: Arc<EscalationSession>,
}

fn contact() -> EmergencyContact {
    EmergencyContact {
        name: "Asha".to_string(),
        phone: "+9779800000000".to_string(),
    }
}

fn trigger() -> FallTrigger {
    FallTrigger {
        triggered_at: "2026-08-30T12:00:00Z".to_string(),
        confidence: Some(0.88),
    }
}

fn fix() -> LocationSnapshot {
    LocationSnapshot {
        lat: 27.7172,
        lng: 85.324,
        accuracy_m: Some(10.0),
    }
}

fn harness_with(
    permissions: Arc<dyn PermissionProvider>,
    with_recognizer: bool,
    location_fix: Option<LocationSnapshot>,
    location_delay: Duration,
) -> Harness {
    let clock = Arc::new(VirtualClock::new());
    let recognizer = Arc::new(CountingRecognizer::default());
    let notifier = Arc::new(CountingNotifier::default());
    let observer = Arc::new(Observer::default());
    let session = EscalationSession::new(
        Collaborators {
            clock: Arc::clone(&clock) as Arc<dyn Clock>,
            permissions,
            recognizer: with_recognizer
                .then(|| Arc::clone(&recognizer) as Arc<dyn Recognizer>),
            location: Arc::new(DelayedLocation {
                clock: Arc::clone(&clock),
                fix: location_fix,
                delay: location_delay,
            }),
            notifier: Arc::clone(&notifier) as Arc<dyn Notifier>,
            host: Arc::clone(&observer) as Arc<dyn HostBridge>,
        },
        contact(),
        SessionConfig::default(),
    )
    .expect("session construction");
    Harness {
        clock,
        recognizer,
        notifier,
        observer,
        session: Arc::new(session),
    }
}

fn harness() -> Harness {
    harness_with(
        Arc::new(GrantAll),
        true,
        Some(fix()),
        Duration::from_millis(300),
    )
}

impl Harness {
    fn at(&self, ms: u64, task: impl FnOnce() + Send + 'static) {
        self.clock.schedule(Duration::from_millis(ms), Box::new(task));
    }

    fn results(&self, ms: u64, transcript: &str) {
        let session = Arc::clone(&self.session);
        let transcript = transcript.to_string();
        self.at(ms, move || {
            session.recognition_event(RecognitionEvent::Results {
                transcripts: vec![transcript],
            });
        });
    }

    fn error(&self, ms: u64, code: RecognitionErrorCode) {
        let session = Arc::clone(&self.session);
        self.at(ms, move || {
            session.recognition_event(RecognitionEvent::Error { code });
        });
    }

    fn run_to(&self, ms: u64) {
        self.clock.advance_to(Duration::from_millis(ms));
    }

    fn close_outcomes(&self) -> Vec<ConfirmationOutcome> {
        self.observer
            .closed
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.outcome)
            .collect()
    }
}

#[test]
fn manual_confirm_at_two_seconds_resolves_without_alert() {
    let h = harness();
    let session = Arc::clone(&h.session);
    h.at(2_000, move || session.manual_confirm());

    h.session.start(&trigger()).expect("start");
    h.run_to(30_000);

    assert_eq!(h.session.state(), SessionState::Resolved);
    assert_eq!(h.session.outcome(), Some(ConfirmationOutcome::UserFine));
    assert!(h.notifier.sent.lock().unwrap().is_empty());
    assert!(h.observer.records.lock().unwrap().is_empty());
    assert_eq!(h.close_outcomes().len(), 1);
    assert_eq!(h.recognizer.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn escalate_phrase_dispatches_with_location() {
    let h = harness();
    h.results(1_000, "help me please");

    h.session.start(&trigger()).expect("start");
    h.run_to(30_000);

    assert_eq!(h.session.outcome(), Some(ConfirmationOutcome::Escalate));
    let records = h.observer.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].message.contains("called for help"));
    assert_eq!(records[0].location, Some(fix()));
    // Location reply at 1300, dismissal 1500 later.
    let sent = h.notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(h.close_outcomes(), vec![ConfirmationOutcome::Escalate]);
}

#[test]
fn cancel_phrase_stands_down_after_the_grace_delay() {
    let h = harness();
    h.results(3_200, "ok");

    h.session.start(&trigger()).expect("start");

    // Grace runs 3200..4700; the session is resolving in between.
    h.run_to(4_000);
    assert_eq!(h.session.state(), SessionState::Resolving);
    assert!(h.observer.closed.lock().unwrap().is_empty());

    h.run_to(4_700);
    assert_eq!(h.session.state(), SessionState::Resolved);
    assert_eq!(h.session.outcome(), Some(ConfirmationOutcome::UserFine));
    assert!(h.observer.records.lock().unwrap().is_empty());
    assert_eq!(h.close_outcomes().len(), 1);

    // The old deadline passes without any escalation.
    h.run_to(30_000);
    assert!(h.notifier.sent.lock().unwrap().is_empty());
}

#[test]
fn transient_errors_then_cancel_phrase_follows_the_retry_cadence() {
    let h = harness();
    h.error(500, RecognitionErrorCode::NoSpeech);
    h.error(1_700, RecognitionErrorCode::Network);
    h.results(3_200, "ok");

    h.session.start(&trigger()).expect("start");
    h.run_to(30_000);

    // Initial attempt plus restarts at 1500 and 2700.
    assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 3);
    assert_eq!(h.session.outcome(), Some(ConfirmationOutcome::UserFine));
    assert!(h.observer.records.lock().unwrap().is_empty());
    assert_eq!(h.close_outcomes().len(), 1);
}

#[test]
fn no_response_escalates_at_the_deadline() {
    let h = harness();
    h.session.start(&trigger()).expect("start");
    h.run_to(30_000);

    assert_eq!(h.session.outcome(), Some(ConfirmationOutcome::Timeout));
    let records = h.observer.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].message.contains("no response"));
    assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
}

#[test]
fn missing_recognizer_runs_timer_only_and_escalates() {
    let h = harness_with(
        Arc::new(GrantAll),
        false,
        Some(fix()),
        Duration::from_millis(300),
    );
    h.session.start(&trigger()).expect("start");
    h.run_to(30_000);

    assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 0);
    assert_eq!(h.session.outcome(), Some(ConfirmationOutcome::Timeout));
    assert_eq!(h.observer.records.lock().unwrap().len(), 1);
}

#[test]
fn denied_required_capability_fails_before_any_timer_starts() {
    let h = harness_with(
        Arc::new(PromptFor(vec![CapabilityId::Sms])),
        true,
        None,
        Duration::from_millis(300),
    );
    let session = Arc::clone(&h.session);
    h.at(200, move || {
        session.permission_result(PermissionResult {
            capability: CapabilityId::Sms,
            granted: false,
        });
    });

    h.session.start(&trigger()).expect("start");
    assert_eq!(h.session.state(), SessionState::PermissionPending);
    assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 0);

    h.run_to(30_000);
    assert_eq!(h.session.state(), SessionState::Failed);
    assert_eq!(
        h.session.outcome(),
        Some(ConfirmationOutcome::PermissionDenied)
    );
    assert!(h.notifier.sent.lock().unwrap().is_empty());
    assert_eq!(h.close_outcomes(), vec![ConfirmationOutcome::PermissionDenied]);
}

#[test]
fn microphone_denial_degrades_to_timer_only() {
    let h = harness_with(
        Arc::new(PromptFor(vec![CapabilityId::Microphone])),
        true,
        Some(fix()),
        Duration::from_millis(300),
    );
    let session = Arc::clone(&h.session);
    h.at(200, move || {
        session.permission_result(PermissionResult {
            capability: CapabilityId::Microphone,
            granted: false,
        });
    });

    h.session.start(&trigger()).expect("start");
    h.run_to(30_000);

    // Activation happened at 200ms without the voice modality.
    assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 0);
    assert_eq!(h.session.outcome(), Some(ConfirmationOutcome::Timeout));
    assert_eq!(h.observer.records.lock().unwrap().len(), 1);
}

#[test]
fn deadline_race_produces_exactly_one_record() {
    // Scripted before start, the transcript at 7000 runs ahead of the
    // expiry task due at the same instant. Exactly one of them commits.
    let h = harness();
    h.results(7_000, "help");

    h.session.start(&trigger()).expect("start");
    h.run_to(30_000);

    assert_eq!(h.session.outcome(), Some(ConfirmationOutcome::Escalate));
    assert_eq!(h.observer.records.lock().unwrap().len(), 1);
    assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
    assert_eq!(h.close_outcomes().len(), 1);
}

#[test]
fn expiry_first_ignores_the_late_transcript() {
    let h = harness();
    h.session.start(&trigger()).expect("start");
    // Scheduled after start, so at 7000 the expiry task runs first.
    h.results(7_000, "help");
    h.run_to(30_000);

    assert_eq!(h.session.outcome(), Some(ConfirmationOutcome::Timeout));
    assert_eq!(h.observer.records.lock().unwrap().len(), 1);
}

#[test]
fn no_voice_retry_starts_past_the_deadline() {
    let h = harness();
    // Retry would land at 7500, past the 7000 deadline.
    h.error(6_500, RecognitionErrorCode::Network);

    h.session.start(&trigger()).expect("start");
    h.run_to(30_000);

    assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 1);
    assert_eq!(h.session.outcome(), Some(ConfirmationOutcome::Timeout));
}

#[test]
fn fatal_recognition_error_disables_voice_but_keeps_the_timer() {
    let h = harness();
    h.error(1_000, RecognitionErrorCode::AudioFailure);

    h.session.start(&trigger()).expect("start");
    h.run_to(30_000);

    assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 1);
    assert_eq!(h.recognizer.stops.load(Ordering::SeqCst), 1);
    assert_eq!(h.session.outcome(), Some(ConfirmationOutcome::Timeout));
    assert_eq!(h.observer.records.lock().unwrap().len(), 1);
}

#[test]
fn unrecognized_speech_restarts_listening() {
    let h = harness();
    h.results(2_000, "what a lovely day");
    h.results(4_000, "i'm fine");

    h.session.start(&trigger()).expect("start");
    h.run_to(30_000);

    // Restart at 3000 after the unrecognized transcript at 2000.
    assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 2);
    assert_eq!(h.session.outcome(), Some(ConfirmationOutcome::UserFine));
    assert!(h.observer.records.lock().unwrap().is_empty());
}

#[test]
fn slow_location_query_times_out_and_dispatches_without_a_fix() {
    let h = harness_with(
        Arc::new(GrantAll),
        true,
        Some(fix()),
        Duration::from_millis(5_000),
    );
    h.session.start(&trigger()).expect("start");
    h.run_to(30_000);

    let records = h.observer.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].location.is_none());
    assert!(records[0].message.contains("Location unavailable"));
    // The late fix at 12000 lands on a settled session.
    assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
}

#[test]
fn stop_during_the_window_prevents_any_outcome() {
    let h = harness();
    let session = Arc::clone(&h.session);
    h.at(3_000, move || session.stop());

    h.session.start(&trigger()).expect("start");
    h.run_to(30_000);

    assert!(h.session.outcome().is_none());
    assert!(h.notifier.sent.lock().unwrap().is_empty());
    assert!(h.observer.closed.lock().unwrap().is_empty());
    assert_eq!(h.recognizer.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn countdown_statuses_tick_down_each_second() {
    let h = harness();
    let session = Arc::clone(&h.session);
    h.at(3_500, move || session.manual_confirm());

    h.session.start(&trigger()).expect("start");
    h.run_to(30_000);

    let statuses = h.observer.statuses.lock().unwrap();
    let countdowns: Vec<u64> = statuses.iter().filter_map(|s| s.remaining_ms).collect();
    assert_eq!(countdowns, vec![7_000, 6_000, 5_000, 4_000]);
    assert!(statuses.iter().any(|s| s.text == "Stay safe!"));
}
