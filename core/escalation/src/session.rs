//! Session lifecycle manager: the single serialization point for every
//! event that can touch a session.
//!
//! Timer ticks, recognition callbacks, manual confirmation, permission
//! results, and location replies all funnel into one `handle_event` behind
//! one mutex. `handle_event` only mutates state and returns effects; effects
//! (host callbacks, collaborator calls, scheduling) run after the lock is
//! released. That split is what makes "at most one escalation per session"
//! a checked invariant instead of a hope.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use guardian_protocol::{
    CapabilityId, ConfirmationOutcome, EmergencyContact, FallTrigger, PermissionResult,
    RecognitionEvent, SessionClosed, StatusUpdate,
};
use serde::Serialize;
use ulid::Ulid;

use crate::clock::{Clock, TaskHandle};
use crate::config::SessionConfig;
use crate::dispatch::{
    compose_message, EscalationCause, EscalationRecord, LocationProvider, Notifier,
};
use crate::error::{EscalationError, Result};
use crate::permissions::{PermissionCheck, PermissionProvider, PermissionSet};
use crate::phrases::{classify_ranked, TranscriptClass};
use crate::timer::{remaining_secs, ConfirmationTimer};
use crate::voice::{classify_error, retry_fits_window, AttemptState, ErrorClass, Recognizer, VoiceLoop};

/// Host-side observer: status text for the alert screen, the audit record
/// on dispatch, and the final close signal.
pub trait HostBridge: Send + Sync {
    fn status(&self, update: StatusUpdate);
    fn escalation_dispatched(&self, record: &EscalationRecord);
    fn session_closed(&self, closed: SessionClosed);
}

/// External collaborators injected at session creation.
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub permissions: Arc<dyn PermissionProvider>,
    /// Absent recognizer disables the voice modality regardless of config.
    pub recognizer: Option<Arc<dyn Recognizer>>,
    pub location: Arc<dyn LocationProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub host: Arc<dyn HostBridge>,
}

/// Lifecycle states. One-directional except the voice retry cycle inside
/// `Active`, which lives in [`VoiceLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    PermissionPending,
    Active,
    /// Committed `UserFine` via voice; grace delay running before close.
    Resolving,
    /// Escalation committed; waiting on the bounded location query.
    Escalating,
    Resolved,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::PermissionPending => "permission_pending",
            SessionState::Active => "active",
            SessionState::Resolving => "resolving",
            SessionState::Escalating => "escalating",
            SessionState::Resolved => "resolved",
            SessionState::Failed => "failed",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Resolved | SessionState::Failed)
    }
}

/// Read-only view of a session for hosts and tests.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: SessionState,
    pub outcome: Option<ConfirmationOutcome>,
    pub attempts_started: u32,
    pub last_transcript: Option<String>,
    pub created_at: DateTime<Utc>,
}

// Every input, external or scheduled, becomes one of these and passes
// through the same serialized handler.
enum SessionEvent {
    Start {
        confidence: Option<f64>,
        check: PermissionCheck,
    },
    Permission(PermissionResult),
    ManualConfirm,
    Recognition(RecognitionEvent),
    TimerTick,
    TimerExpired,
    VoiceRetryDue,
    GraceElapsed,
    LocationResolved(Option<guardian_protocol::LocationSnapshot>),
    LocationTimedOut,
    DismissDue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleSlot {
    Tick,
    Expire,
    Retry,
    Grace,
    LocationTimeout,
    Dismiss,
}

#[derive(Default)]
struct Handles {
    tick: Option<TaskHandle>,
    expire: Option<TaskHandle>,
    retry: Option<TaskHandle>,
    grace: Option<TaskHandle>,
    location_timeout: Option<TaskHandle>,
    dismiss: Option<TaskHandle>,
}

impl Handles {
    fn slot(&mut self, slot: HandleSlot) -> &mut Option<TaskHandle> {
        match slot {
            HandleSlot::Tick => &mut self.tick,
            HandleSlot::Expire => &mut self.expire,
            HandleSlot::Retry => &mut self.retry,
            HandleSlot::Grace => &mut self.grace,
            HandleSlot::LocationTimeout => &mut self.location_timeout,
            HandleSlot::Dismiss => &mut self.dismiss,
        }
    }

    fn store(&mut self, slot: HandleSlot, handle: TaskHandle) {
        if let Some(previous) = self.slot(slot).replace(handle) {
            previous.cancel();
        }
    }

    fn cancel(&mut self, slot: HandleSlot) {
        if let Some(handle) = self.slot(slot).take() {
            handle.cancel();
        }
    }

    fn cancel_all(&mut self) {
        for slot in [
            HandleSlot::Tick,
            HandleSlot::Expire,
            HandleSlot::Retry,
            HandleSlot::Grace,
            HandleSlot::LocationTimeout,
            HandleSlot::Dismiss,
        ] {
            self.cancel(slot);
        }
    }
}

// Side effects computed under the lock, executed outside it.
enum Effect {
    Status(StatusUpdate),
    StartListening,
    StopRecognizer,
    RequestPermissions(Vec<CapabilityId>),
    RequestLocation,
    DispatchAlert(EscalationRecord),
    Schedule {
        delay: Duration,
        slot: HandleSlot,
        event: SessionEvent,
    },
    Closed(SessionClosed),
}

struct EventCtx {
    now: Duration,
    wall_now: DateTime<Utc>,
}

struct SessionInner {
    id: String,
    config: SessionConfig,
    contact: EmergencyContact,
    state: SessionState,
    created_at: DateTime<Utc>,
    permissions: PermissionSet,
    voice: VoiceLoop,
    timer: Option<ConfirmationTimer>,
    handles: Handles,
    outcome: Option<ConfirmationOutcome>,
    last_transcript: Option<String>,
    trigger_confidence: Option<f64>,
    record: Option<EscalationRecord>,
    escalation_cause: Option<EscalationCause>,
    location_settled: bool,
    recognizer_started: bool,
    torn_down: bool,
    closed: bool,
}

struct SessionShared {
    collaborators: Collaborators,
    inner: Mutex<SessionInner>,
}

/// One run of the escalation controller for a single fall trigger.
///
/// Sessions are single-shot: exactly one `ConfirmationOutcome`, at most one
/// `EscalationRecord`, and destruction always follows resolution. A new
/// trigger needs a new session.
pub struct EscalationSession {
    shared: Arc<SessionShared>,
}

impl EscalationSession {
    pub fn new(
        collaborators: Collaborators,
        contact: EmergencyContact,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;
        contact
            .validate()
            .map_err(|reason| EscalationError::InvalidContact { reason })?;

        let id = Ulid::new().to_string();
        let voice_enabled = config.voice_enabled && collaborators.recognizer.is_some();
        if config.voice_enabled && !voice_enabled {
            tracing::info!(session_id = %id, "No recognizer available; voice modality disabled");
        }
        let created_at = collaborators.clock.wall_now();

        let inner = SessionInner {
            id: id.clone(),
            config,
            contact,
            state: SessionState::Created,
            created_at,
            permissions: PermissionSet::default(),
            voice: VoiceLoop::new(voice_enabled),
            timer: None,
            handles: Handles::default(),
            outcome: None,
            last_transcript: None,
            trigger_confidence: None,
            record: None,
            escalation_cause: None,
            location_settled: false,
            recognizer_started: false,
            torn_down: false,
            closed: false,
        };

        Ok(Self {
            shared: Arc::new(SessionShared {
                collaborators,
                inner: Mutex::new(inner),
            }),
        })
    }

    /// Begin the session for a validated fall trigger. Runs the permission
    /// gate; on full grant the timer and voice loop start immediately.
    pub fn start(&self, trigger: &FallTrigger) -> Result<()> {
        trigger
            .validate()
            .map_err(|reason| EscalationError::InvalidTrigger { reason })?;

        let required: Vec<CapabilityId> = {
            let inner = lock_inner(&self.shared);
            inner.config.required_capabilities().into_iter().collect()
        };
        let check = self.shared.collaborators.permissions.check(&required);

        tracing::info!(
            session_id = %self.id(),
            confidence = ?trigger.confidence,
            triggered_at = %trigger.triggered_at,
            "Fall trigger received"
        );
        Self::dispatch(
            &self.shared,
            SessionEvent::Start {
                confidence: trigger.confidence,
                check,
            },
        );
        Ok(())
    }

    /// Platform permission result, delivered while the gate is pending.
    pub fn permission_result(&self, result: PermissionResult) {
        Self::dispatch(&self.shared, SessionEvent::Permission(result));
    }

    /// Explicit "I'm fine" action. Resolves immediately, bypassing voice.
    pub fn manual_confirm(&self) {
        Self::dispatch(&self.shared, SessionEvent::ManualConfirm);
    }

    /// Recognition event from the platform recognizer's delivery thread.
    pub fn recognition_event(&self, event: RecognitionEvent) {
        if let Err(reason) = event.validate() {
            tracing::warn!(session_id = %self.id(), reason = %reason, "Dropping invalid recognition event");
            return;
        }
        Self::dispatch(&self.shared, SessionEvent::Recognition(event));
    }

    /// Host-driven teardown. Idempotent; safe from any callback context. No
    /// close signal is emitted for a session the host aborts itself.
    pub fn stop(&self) {
        Self::dispatch(&self.shared, SessionEvent::Stop);
    }

    pub fn id(&self) -> String {
        lock_inner(&self.shared).id.clone()
    }

    pub fn state(&self) -> SessionState {
        lock_inner(&self.shared).state
    }

    pub fn outcome(&self) -> Option<ConfirmationOutcome> {
        lock_inner(&self.shared).outcome
    }

    /// The audit record, present only after an escalation dispatched.
    pub fn escalation_record(&self) -> Option<EscalationRecord> {
        lock_inner(&self.shared).record.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = lock_inner(&self.shared);
        SessionSnapshot {
            session_id: inner.id.clone(),
            state: inner.state,
            outcome: inner.outcome,
            attempts_started: inner.voice.attempts_started(),
            last_transcript: inner.last_transcript.clone(),
            created_at: inner.created_at,
        }
    }

    fn dispatch(shared: &Arc<SessionShared>, event: SessionEvent) {
        let effects = {
            let ctx = EventCtx {
                now: shared.collaborators.clock.now(),
                wall_now: shared.collaborators.clock.wall_now(),
            };
            let mut inner = lock_inner(shared);
            inner.handle_event(event, &ctx)
        };
        Self::apply_effects(shared, effects);
    }

    fn apply_effects(shared: &Arc<SessionShared>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Status(update) => {
                    let host = Arc::clone(&shared.collaborators.host);
                    guarded(shared, "host status", move || host.status(update));
                }
                Effect::StartListening => {
                    if let Some(recognizer) = shared.collaborators.recognizer.clone() {
                        guarded(shared, "recognizer start", move || {
                            recognizer.start_listening()
                        });
                    }
                }
                Effect::StopRecognizer => {
                    if let Some(recognizer) = shared.collaborators.recognizer.clone() {
                        guarded(shared, "recognizer stop", move || recognizer.stop());
                    }
                }
                Effect::RequestPermissions(missing) => {
                    let provider = Arc::clone(&shared.collaborators.permissions);
                    guarded(shared, "permission request", move || {
                        provider.request(&missing)
                    });
                }
                Effect::RequestLocation => {
                    let weak = Arc::downgrade(shared);
                    let location = Arc::clone(&shared.collaborators.location);
                    guarded(shared, "location request", move || {
                        location.request_location(Box::new(move |fix| {
                            if let Some(shared) = weak.upgrade() {
                                Self::dispatch(&shared, SessionEvent::LocationResolved(fix));
                            }
                        }));
                    });
                }
                Effect::DispatchAlert(record) => {
                    let notifier = Arc::clone(&shared.collaborators.notifier);
                    let sent = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        notifier.send_alert(&record.contact, &record.message)
                    }));
                    match sent {
                        Ok(Ok(())) => {}
                        // Never retried: the user may be incapacitated and a
                        // stuck retry must not delay session closure.
                        Ok(Err(reason)) => tracing::warn!(
                            session_id = %record.session_id,
                            reason = %reason,
                            "Notifier failed; continuing session closure"
                        ),
                        Err(_) => tracing::error!(
                            session_id = %record.session_id,
                            "Notifier panicked; continuing session closure"
                        ),
                    }
                    let host = Arc::clone(&shared.collaborators.host);
                    guarded(shared, "host dispatch record", move || {
                        host.escalation_dispatched(&record)
                    });
                }
                Effect::Schedule { delay, slot, event } => {
                    let weak = Arc::downgrade(shared);
                    let handle = shared.collaborators.clock.schedule(
                        delay,
                        Box::new(move || {
                            if let Some(shared) = weak.upgrade() {
                                Self::dispatch(&shared, event);
                            }
                        }),
                    );
                    let mut inner = lock_inner(shared);
                    if inner.torn_down {
                        handle.cancel();
                    } else {
                        inner.handles.store(slot, handle);
                    }
                }
                Effect::Closed(closed) => {
                    let host = Arc::clone(&shared.collaborators.host);
                    guarded(shared, "host close", move || host.session_closed(closed));
                }
            }
        }
    }
}

impl Drop for EscalationSession {
    fn drop(&mut self) {
        // Belt and braces: dropping the handle releases resources even if the
        // host forgot to stop an unresolved session.
        let mut inner = lock_inner(&self.shared);
        if !inner.torn_down {
            inner.teardown();
        }
    }
}

// A panicking collaborator or host callback must not take the session down
// with it; teardown still has to run.
fn guarded(shared: &Arc<SessionShared>, context: &'static str, f: impl FnOnce()) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
        let session_id = lock_inner(shared).id.clone();
        tracing::error!(session_id = %session_id, context, "Callback panicked; continuing");
    }
}

fn lock_inner(shared: &SessionShared) -> MutexGuard<'_, SessionInner> {
    match shared.inner.lock() {
        Ok(guard) => guard,
        // A poisoned lock means a panic inside handle_event; state is still
        // structurally sound and teardown must remain reachable.
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SessionInner {
    fn handle_event(&mut self, event: SessionEvent, ctx: &EventCtx) -> Vec<Effect> {
        if self.torn_down {
            return Vec::new();
        }
        match event {
            SessionEvent::Start { confidence, check } => self.on_start(confidence, check, ctx),
            SessionEvent::Permission(result) => self.on_permission(result, ctx),
            SessionEvent::ManualConfirm => self.on_manual_confirm(ctx),
            SessionEvent::Recognition(event) => self.on_recognition(event, ctx),
            SessionEvent::TimerTick => self.on_tick(ctx),
            SessionEvent::TimerExpired => self.on_expired(ctx),
            SessionEvent::VoiceRetryDue => self.on_voice_retry_due(),
            SessionEvent::GraceElapsed => self.on_grace_elapsed(),
            SessionEvent::LocationResolved(fix) => self.on_location(fix, ctx),
            SessionEvent::LocationTimedOut => self.on_location_timeout(ctx),
            SessionEvent::DismissDue => self.on_dismiss_due(),
            SessionEvent::Stop => self.on_stop(),
        }
    }

    fn on_start(
        &mut self,
        confidence: Option<f64>,
        check: PermissionCheck,
        ctx: &EventCtx,
    ) -> Vec<Effect> {
        if self.state != SessionState::Created {
            tracing::warn!(session_id = %self.id, state = %self.state.as_str(), "Ignoring duplicate start");
            return Vec::new();
        }
        self.trigger_confidence = confidence;

        match check {
            PermissionCheck::Granted => {
                self.permissions = PermissionSet::all_granted(&self.config.required_capabilities());
                self.activate(ctx)
            }
            PermissionCheck::Missing(missing) => {
                // Capabilities the check did not flag are already granted;
                // only the missing ones go through the prompt.
                for cap in self.config.required_capabilities() {
                    if !missing.contains(&cap) {
                        self.permissions.record(PermissionResult {
                            capability: cap,
                            granted: true,
                        });
                    }
                }
                self.state = SessionState::PermissionPending;
                tracing::info!(
                    session_id = %self.id,
                    missing = ?missing,
                    "Capabilities missing; session activation suspended"
                );
                vec![
                    Effect::Status(StatusUpdate::text("Checking permissions...")),
                    Effect::RequestPermissions(missing),
                ]
            }
        }
    }

    fn on_permission(&mut self, result: PermissionResult, ctx: &EventCtx) -> Vec<Effect> {
        if self.state != SessionState::PermissionPending {
            tracing::debug!(
                session_id = %self.id,
                state = %self.state.as_str(),
                "Ignoring permission result outside the gate"
            );
            return Vec::new();
        }
        self.permissions.record(result);
        let required = self.config.required_capabilities();

        let denied = self.permissions.denied(&required);
        if result.capability == CapabilityId::Microphone && !result.granted {
            // Microphone loss alone only costs the voice modality; the
            // session can still run on the timer and manual confirm.
            self.voice.disable();
        }
        let fatal: Vec<CapabilityId> = denied
            .into_iter()
            .filter(|cap| *cap != CapabilityId::Microphone)
            .collect();
        if !fatal.is_empty() {
            return self.fail_permission_denied(fatal);
        }

        let mut still_required = required;
        if !self.voice.enabled() {
            still_required.remove(&CapabilityId::Microphone);
        }
        if self.permissions.covers(&still_required) {
            return self.activate(ctx);
        }
        tracing::debug!(
            session_id = %self.id,
            unresolved = ?self.permissions.unresolved(&still_required),
            "Waiting for remaining permission results"
        );
        Vec::new()
    }

    fn fail_permission_denied(&mut self, denied: Vec<CapabilityId>) -> Vec<Effect> {
        self.state = SessionState::Failed;
        self.outcome = Some(ConfirmationOutcome::PermissionDenied);
        tracing::error!(
            session_id = %self.id,
            denied = ?denied,
            "Required capability denied; session failed before activation"
        );
        vec![
            Effect::Status(StatusUpdate::text(
                "Emergency response unavailable: required permission denied.",
            )),
            Effect::Schedule {
                delay: self.config.dismiss_delay(),
                slot: HandleSlot::Dismiss,
                event: SessionEvent::DismissDue,
            },
        ]
    }

    fn activate(&mut self, ctx: &EventCtx) -> Vec<Effect> {
        self.state = SessionState::Active;
        let timer = ConfirmationTimer::new(ctx.now, self.config.window(), self.config.tick_interval());
        let window_ms = self.config.window_ms;
        self.timer = Some(timer);

        tracing::info!(
            session_id = %self.id,
            window_ms,
            voice = self.voice.enabled(),
            "Session active; confirmation window started"
        );

        let mut effects = vec![
            Effect::Status(StatusUpdate::countdown(
                "Fall detected! Say 'I'm fine' or press the button.",
                window_ms,
            )),
            Effect::Schedule {
                delay: self.config.tick_interval(),
                slot: HandleSlot::Tick,
                event: SessionEvent::TimerTick,
            },
            Effect::Schedule {
                delay: self.config.window(),
                slot: HandleSlot::Expire,
                event: SessionEvent::TimerExpired,
            },
        ];
        if self.voice.begin_attempt() {
            self.recognizer_started = true;
            effects.push(Effect::StartListening);
        }
        effects
    }

    fn on_tick(&mut self, ctx: &EventCtx) -> Vec<Effect> {
        if self.state != SessionState::Active {
            return Vec::new();
        }
        let Some(timer) = self.timer.as_ref() else {
            return Vec::new();
        };
        let remaining = timer.remaining(ctx.now);
        if remaining.is_zero() {
            // Expiry owns the deadline instant.
            return Vec::new();
        }
        let mut effects = vec![Effect::Status(StatusUpdate::countdown(
            format!("I'm fine ({}s)", remaining_secs(remaining)),
            remaining.as_millis() as u64,
        ))];
        if timer.next_tick_fits(ctx.now) {
            effects.push(Effect::Schedule {
                delay: self.config.tick_interval(),
                slot: HandleSlot::Tick,
                event: SessionEvent::TimerTick,
            });
        }
        effects
    }

    fn on_expired(&mut self, ctx: &EventCtx) -> Vec<Effect> {
        // Checked against the session at fire time, not assumed: a resolved
        // session makes expiry a no-op even if cancellation lost the race.
        if self.state != SessionState::Active {
            tracing::debug!(session_id = %self.id, "Timer expiry after resolution; no-op");
            return Vec::new();
        }
        let fired = self.timer.as_mut().map(ConfirmationTimer::mark_expired);
        if fired != Some(true) {
            return Vec::new();
        }
        tracing::info!(session_id = %self.id, "Confirmation window expired");
        self.commit_escalation(ConfirmationOutcome::Timeout, EscalationCause::NoResponse, ctx)
    }

    fn on_manual_confirm(&mut self, _ctx: &EventCtx) -> Vec<Effect> {
        if self.state != SessionState::Active {
            tracing::debug!(session_id = %self.id, state = %self.state.as_str(), "Manual confirm ignored");
            return Vec::new();
        }
        tracing::info!(session_id = %self.id, "Manual confirmation; user is fine");
        self.outcome = Some(ConfirmationOutcome::UserFine);
        self.state = SessionState::Resolved;
        let mut effects = self.cancel_active_inputs();
        effects.push(Effect::Status(StatusUpdate::text("Stay safe!")));
        effects.extend(self.close());
        effects
    }

    fn on_recognition(&mut self, event: RecognitionEvent, ctx: &EventCtx) -> Vec<Effect> {
        if self.state != SessionState::Active || !self.voice.enabled() {
            tracing::debug!(session_id = %self.id, "Recognition event outside active voice loop");
            return Vec::new();
        }
        match event {
            RecognitionEvent::ReadyForSpeech | RecognitionEvent::BeginningOfSpeech => {
                tracing::debug!(session_id = %self.id, "Recognizer progress");
                Vec::new()
            }
            RecognitionEvent::EndOfSpeech => self.on_end_of_speech(ctx),
            RecognitionEvent::Error { code } => self.on_recognition_error(code, ctx),
            RecognitionEvent::Results { transcripts } => self.on_transcripts(transcripts, ctx),
        }
    }

    fn on_end_of_speech(&mut self, ctx: &EventCtx) -> Vec<Effect> {
        if self.voice.attempt() != AttemptState::Listening {
            return Vec::new();
        }
        // End of speech without a result yet: line up a restart. If results
        // arrive before the retry fires, on_transcripts cancels it.
        self.schedule_voice_restart(ctx)
    }

    fn on_transcripts(&mut self, transcripts: Vec<String>, ctx: &EventCtx) -> Vec<Effect> {
        if self.voice.attempt() == AttemptState::Idle {
            tracing::debug!(session_id = %self.id, "Transcripts with no attempt in flight; ignoring");
            return Vec::new();
        }
        self.handles.cancel(HandleSlot::Retry);
        self.last_transcript = transcripts.first().cloned();

        match classify_ranked(
            &transcripts,
            &self.config.cancel_phrases,
            &self.config.escalate_phrases,
        ) {
            TranscriptClass::Escalate => {
                tracing::info!(
                    session_id = %self.id,
                    transcript = ?self.last_transcript,
                    "Escalate phrase recognized"
                );
                self.commit_escalation(ConfirmationOutcome::Escalate, EscalationCause::VoiceHelp, ctx)
            }
            TranscriptClass::Cancel => {
                tracing::info!(
                    session_id = %self.id,
                    transcript = ?self.last_transcript,
                    "Cancel phrase recognized; user is fine"
                );
                self.outcome = Some(ConfirmationOutcome::UserFine);
                self.state = SessionState::Resolving;
                let mut effects = self.cancel_active_inputs();
                effects.push(Effect::Status(StatusUpdate::text(
                    "Okay, glad you're alright. Standing down.",
                )));
                effects.push(Effect::Schedule {
                    delay: self.config.confirm_grace(),
                    slot: HandleSlot::Grace,
                    event: SessionEvent::GraceElapsed,
                });
                effects
            }
            TranscriptClass::Unrecognized => {
                tracing::info!(
                    session_id = %self.id,
                    transcript = ?self.last_transcript,
                    "Unrecognized speech; restarting listening"
                );
                let mut effects = vec![Effect::Status(StatusUpdate::text(
                    "Didn't catch that. Say 'I'm fine' or 'help'.",
                ))];
                effects.extend(self.schedule_voice_restart(ctx));
                effects
            }
        }
    }

    fn on_recognition_error(
        &mut self,
        code: guardian_protocol::RecognitionErrorCode,
        ctx: &EventCtx,
    ) -> Vec<Effect> {
        match classify_error(code) {
            ErrorClass::Retryable => {
                tracing::warn!(
                    session_id = %self.id,
                    error = %EscalationError::RecognitionTransient { code },
                    "Voice attempt failed; will retry within the window"
                );
                self.schedule_voice_restart(ctx)
            }
            ErrorClass::Fatal => {
                // Permissions were granted at the gate, so a fatal error
                // here only disables voice; the timer stays authoritative.
                tracing::warn!(
                    session_id = %self.id,
                    error = %EscalationError::RecognitionFatal { code },
                    "Voice loop disabled for the rest of the session"
                );
                self.voice.disable();
                self.handles.cancel(HandleSlot::Retry);
                if self.recognizer_started {
                    self.recognizer_started = false;
                    return vec![Effect::StopRecognizer];
                }
                Vec::new()
            }
        }
    }

    fn schedule_voice_restart(&mut self, ctx: &EventCtx) -> Vec<Effect> {
        let Some(deadline) = self.timer.as_ref().map(ConfirmationTimer::deadline) else {
            return Vec::new();
        };
        let delay = self.config.voice_retry_delay();
        if !retry_fits_window(ctx.now, delay, deadline) {
            // No attempt may start past the deadline; the timer decides.
            tracing::debug!(session_id = %self.id, "No retry scheduled; next attempt would miss the deadline");
            self.voice.settle();
            return Vec::new();
        }
        self.voice.wait_for_retry();
        vec![Effect::Schedule {
            delay,
            slot: HandleSlot::Retry,
            event: SessionEvent::VoiceRetryDue,
        }]
    }

    fn on_voice_retry_due(&mut self) -> Vec<Effect> {
        if self.state != SessionState::Active
            || self.voice.attempt() != AttemptState::WaitingNextAttempt
        {
            return Vec::new();
        }
        if self.voice.begin_attempt() {
            tracing::debug!(
                session_id = %self.id,
                attempt = self.voice.attempts_started(),
                "Restarting listening"
            );
            self.recognizer_started = true;
            return vec![Effect::StartListening];
        }
        Vec::new()
    }

    fn on_grace_elapsed(&mut self) -> Vec<Effect> {
        if self.state != SessionState::Resolving {
            return Vec::new();
        }
        self.state = SessionState::Resolved;
        self.close()
    }

    /// The single irreversible commit. Only an `Active` session can enter
    /// `Escalating`; whichever caller loses the race becomes a no-op
    /// upstream because the state check already failed.
    fn commit_escalation(
        &mut self,
        outcome: ConfirmationOutcome,
        cause: EscalationCause,
        _ctx: &EventCtx,
    ) -> Vec<Effect> {
        debug_assert!(self.state == SessionState::Active);
        self.state = SessionState::Escalating;
        self.outcome = Some(outcome);
        self.escalation_cause = Some(cause);

        let mut effects = self.cancel_active_inputs();
        let text = match cause {
            EscalationCause::NoResponse => "No response heard. Contacting your emergency contact.",
            EscalationCause::VoiceHelp => "Help is on the way. Contacting your emergency contact.",
        };
        effects.push(Effect::Status(StatusUpdate::text(text)));
        effects.push(Effect::RequestLocation);
        effects.push(Effect::Schedule {
            delay: self.config.location_timeout(),
            slot: HandleSlot::LocationTimeout,
            event: SessionEvent::LocationTimedOut,
        });
        effects
    }

    fn on_location(
        &mut self,
        fix: Option<guardian_protocol::LocationSnapshot>,
        ctx: &EventCtx,
    ) -> Vec<Effect> {
        let fix = match fix {
            Some(fix) => match fix.validate() {
                Ok(()) => Some(fix),
                Err(reason) => {
                    tracing::warn!(session_id = %self.id, reason = %reason, "Dropping invalid location fix");
                    None
                }
            },
            None => None,
        };
        if fix.is_none() {
            tracing::warn!(
                session_id = %self.id,
                error = %EscalationError::LocationUnavailable {
                    reason: "provider reported no fix".to_string()
                },
                "Escalating without coordinates"
            );
        }
        self.handles.cancel(HandleSlot::LocationTimeout);
        self.finish_dispatch(fix, ctx)
    }

    fn on_location_timeout(&mut self, ctx: &EventCtx) -> Vec<Effect> {
        if self.state == SessionState::Escalating && !self.location_settled {
            tracing::warn!(
                session_id = %self.id,
                error = %EscalationError::LocationUnavailable {
                    reason: "location query timed out".to_string()
                },
                "Escalating without coordinates"
            );
        }
        self.finish_dispatch(None, ctx)
    }

    fn finish_dispatch(
        &mut self,
        fix: Option<guardian_protocol::LocationSnapshot>,
        ctx: &EventCtx,
    ) -> Vec<Effect> {
        // First of {location reply, location timeout} wins; the other is a
        // no-op. This is what keeps the record at-most-once.
        if self.state != SessionState::Escalating || self.location_settled {
            return Vec::new();
        }
        self.location_settled = true;

        let cause = self.escalation_cause.unwrap_or(EscalationCause::NoResponse);
        let record = EscalationRecord {
            session_id: self.id.clone(),
            contact: self.contact.clone(),
            message: compose_message(cause, fix.as_ref()),
            location: fix,
            dispatched_at: ctx.wall_now,
        };
        self.record = Some(record.clone());
        self.state = SessionState::Resolved;
        tracing::info!(
            session_id = %self.id,
            contact = %record.contact.name,
            with_location = record.location.is_some(),
            "Escalation dispatched"
        );

        vec![
            Effect::DispatchAlert(record),
            Effect::Status(StatusUpdate::text(format!(
                "Alert sent to {}.",
                self.contact.name
            ))),
            Effect::Schedule {
                delay: self.config.dismiss_delay(),
                slot: HandleSlot::Dismiss,
                event: SessionEvent::DismissDue,
            },
        ]
    }

    fn on_dismiss_due(&mut self) -> Vec<Effect> {
        if !self.state.is_terminal() {
            return Vec::new();
        }
        self.close()
    }

    fn on_stop(&mut self) -> Vec<Effect> {
        tracing::info!(session_id = %self.id, "Host requested stop");
        self.closed = true;
        self.teardown_effects()
    }

    /// Cancel everything that could still feed events into an unresolved
    /// session: timer handles, voice retry, and the live recognizer.
    fn cancel_active_inputs(&mut self) -> Vec<Effect> {
        self.handles.cancel(HandleSlot::Tick);
        self.handles.cancel(HandleSlot::Expire);
        self.handles.cancel(HandleSlot::Retry);
        self.voice.settle();
        if self.recognizer_started {
            self.recognizer_started = false;
            return vec![Effect::StopRecognizer];
        }
        Vec::new()
    }

    fn close(&mut self) -> Vec<Effect> {
        let mut effects = self.teardown_effects();
        if self.closed {
            return effects;
        }
        self.closed = true;
        let outcome = match self.outcome {
            Some(outcome) => outcome,
            // close() is only reachable from terminal states, which always
            // set an outcome first; this is a defensive fallback.
            None => ConfirmationOutcome::Timeout,
        };
        tracing::info!(session_id = %self.id, outcome = %outcome, "Session closed");
        effects.push(Effect::Closed(SessionClosed {
            session_id: self.id.clone(),
            outcome,
        }));
        effects
    }

    /// Idempotent: cancels every pending handle and releases the recognizer
    /// exactly once, from any callback context.
    fn teardown_effects(&mut self) -> Vec<Effect> {
        if self.torn_down {
            return Vec::new();
        }
        self.torn_down = true;
        self.teardown();
        if self.recognizer_started {
            self.recognizer_started = false;
            return vec![Effect::StopRecognizer];
        }
        Vec::new()
    }

    // Handle-only portion of teardown, shared with Drop (which cannot emit
    // effects).
    fn teardown(&mut self) {
        self.handles.cancel_all();
        self.voice.settle();
        self.torn_down = true;
    }
}
