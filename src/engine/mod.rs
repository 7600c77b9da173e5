//! The session state machine engine.
//!
//! [`SessionEngine`] owns the current [`StateInfo`] and the negotiated
//! [`CapabilityDescriptor`]. Any number of threads may call
//! [`submit`](SessionEngine::submit); application is serialized by one mutex,
//! so exactly one `(state, event)` pair, including its side effects, is in
//! flight at a time.
//!
//! # Event Processing
//!
//! ```text
//! submit(event)
//!     │ lock
//!     v
//! ┌────────────────────────────────────────────────────────────┐
//! │ queue = [event]                                            │
//! │ while let Some(e) = queue.pop_front()                      │
//! │     row = table().lookup(state, e.kind)   ── none ──> violation
//! │     state = row.destination                                │
//! │     run side effects  ── may push follow-ups onto queue ──┐ │
//! │     cancel timers whose phase was left                   │ │
//! │     publish StateChanged to every subscriber <───────────┘ │
//! └────────────────────────────────────────────────────────────┘
//!     │ unlock
//!     v
//! StateInfo
//! ```
//!
//! Follow-up events (validation verdict, negotiation send result) are applied
//! inside the same critical section, so no other producer can interleave
//! between a `NegotiationReceived` and the `NegotiationCompleted` it caused.
//!
//! # Timers
//!
//! The negotiation timer is armed on entry to the negotiation phase and the
//! reconnect timer on entry to `Reconnecting`. Both are cancelled when the
//! machine leaves their phase. Expiry goes through the same apply path as
//! `submit`; a per-timer generation discards an expiry that raced with its
//! own cancellation.

mod notify;
mod timer;

pub use notify::{Notification, StateChange, Subscription, SubscriptionId, ViolationReport};
pub use timer::{ExpiryCallback, TimerHandle, TimerService, TokioTimerService};

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use notify::Notifier;

use crate::config::Config;
use crate::error::{RemotingError, Result};
use crate::protocol::{
    table, CapabilityDescriptor, CapabilityValidator, CompatibilityValidator, FailureCategory,
    FailureReason, SessionEnvelope, SessionEvent, SessionEventKind, SessionState, SideEffect,
    StateInfo, Verdict, NEGOTIATION_TIMEOUT_MS, RECONNECT_TIMEOUT_MS,
};
use crate::transport::SessionTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Negotiation,
    Reconnect,
}

#[derive(Debug, Clone, Copy)]
struct ArmedTimer {
    handle: TimerHandle,
    generation: u64,
}

struct EngineCore {
    info: StateInfo,
    capability: Option<CapabilityDescriptor>,
    resume: Option<SessionState>,
    negotiation_timer: Option<ArmedTimer>,
    reconnect_timer: Option<ArmedTimer>,
    generation: u64,
    applied: u64,
}

impl EngineCore {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<ArmedTimer> {
        match kind {
            TimerKind::Negotiation => &mut self.negotiation_timer,
            TimerKind::Reconnect => &mut self.reconnect_timer,
        }
    }
}

struct EngineInner {
    id: String,
    core: Mutex<EngineCore>,
    notifier: Notifier,
    local_capability: CapabilityDescriptor,
    validator: Arc<dyn CapabilityValidator>,
    timers: Arc<dyn TimerService>,
    transport: Option<Arc<dyn SessionTransport>>,
    negotiation_timeout: Duration,
    reconnect_timeout: Duration,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let core = self.core.get_mut().unwrap_or_else(PoisonError::into_inner);
        for armed in [core.negotiation_timer.take(), core.reconnect_timer.take()]
            .into_iter()
            .flatten()
        {
            self.timers.cancel(armed.handle);
        }
    }
}

/// Remote session state machine.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEngine")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("capability", &self.capability())
            .finish_non_exhaustive()
    }
}

impl SessionEngine {
    /// Start building an engine
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Engine with default validator, tokio timers and no transport
    pub fn new(local_capability: CapabilityDescriptor) -> Result<Self> {
        Self::builder().local_capability(local_capability).build()
    }

    /// Session ID
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Capability advertised by this side
    pub fn local_capability(&self) -> CapabilityDescriptor {
        self.inner.local_capability
    }

    /// Snapshot of the current state
    pub fn current_state(&self) -> StateInfo {
        self.lock().info.clone()
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.lock().info.state
    }

    /// Negotiated capability, once `Established` has been reached
    pub fn capability(&self) -> Option<CapabilityDescriptor> {
        self.lock().capability
    }

    /// Transitions applied so far (data deliveries included)
    pub fn transitions_applied(&self) -> u64 {
        self.lock().applied
    }

    /// Subscribe with a channel receiver
    pub fn subscribe(&self) -> Subscription {
        self.inner.notifier.subscribe()
    }

    /// Register a callback, driven by its own tokio task.
    ///
    /// The callback may call back into [`submit`](Self::submit).
    pub fn register<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(Notification) + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RemotingError::Runtime(format!("Callback dispatch needs a tokio runtime: {e}")))?;
        let mut subscription = self.subscribe();
        let id = subscription.id();
        runtime.spawn(async move {
            while let Some(notification) = subscription.recv().await {
                callback(notification);
            }
        });
        Ok(id)
    }

    /// Remove a subscription or callback
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        self.inner.notifier.unsubscribe(id)
    }

    /// Live subscriptions
    pub fn observer_count(&self) -> usize {
        self.inner.notifier.len()
    }

    /// Apply one event.
    ///
    /// Returns the snapshot after the event and any follow-up events it
    /// raised. An event that is illegal in the current state is logged,
    /// published as a violation, and returned as an error; the state is
    /// unchanged and the session continues.
    pub fn submit(&self, event: impl Into<SessionEvent>) -> Result<StateInfo> {
        let mut core = self.lock();
        self.apply(&mut core, event.into())
    }

    fn on_timer(&self, kind: TimerKind, generation: u64, event: SessionEvent) {
        let mut core = self.lock();
        let slot = core.slot(kind);
        if slot.map(|armed| armed.generation) != Some(generation) {
            tracing::debug!(session = %self.inner.id, ?kind, generation, "stale timer expiry discarded");
            return;
        }
        *slot = None;

        tracing::warn!(session = %self.inner.id, ?kind, "timer expired");
        if let Err(err) = self.apply(&mut core, event) {
            tracing::debug!(session = %self.inner.id, %err, "timer event refused");
        }
    }

    fn apply(&self, core: &mut EngineCore, event: SessionEvent) -> Result<StateInfo> {
        let mut queue = VecDeque::new();
        self.step(core, event, &mut queue)?;

        while let Some(follow_up) = queue.pop_front() {
            if let Err(err) = self.step(core, follow_up, &mut queue) {
                tracing::debug!(session = %self.inner.id, %err, "follow-up event refused");
            }
        }

        Ok(core.info.clone())
    }

    fn step(
        &self,
        core: &mut EngineCore,
        event: SessionEvent,
        queue: &mut VecDeque<SessionEvent>,
    ) -> Result<()> {
        let (kind, capability, payload, reason) = event.into_parts();
        let from = core.info.state;

        if kind == SessionEventKind::InvalidEvent {
            self.report_violation(from, kind);
            return Err(RemotingError::InvalidEvent(
                "InvalidEvent is never legal".to_string(),
            ));
        }

        let Some(transition) = table().lookup(from, kind) else {
            self.report_violation(from, kind);
            return Err(RemotingError::ProtocolViolation { state: from, event: kind });
        };

        if kind == SessionEventKind::NegotiationCompleted && capability.is_none() {
            self.report_violation(from, kind);
            return Err(RemotingError::InvalidEvent(
                "NegotiationCompleted must carry a capability".to_string(),
            ));
        }

        let Some(to) = transition.destination(from, core.resume) else {
            self.report_violation(from, kind);
            return Err(RemotingError::InvalidEvent(format!(
                "{kind} has no remembered state to resume"
            )));
        };

        let mut published_payload = None;
        for effect in transition.effects {
            match effect {
                SideEffect::RememberResumeState => core.resume = from.resume_target(),
                SideEffect::RecordCapability => self.record_capability(core, capability),
                SideEffect::PublishPayload => published_payload = payload.clone(),
                _ => {},
            }
        }

        if to != from || kind.is_failure() {
            core.info = StateInfo::with_reason(to, reason);
        }
        if from == SessionState::Reconnecting && to != SessionState::Reconnecting {
            core.resume = None;
        }
        core.applied += 1;

        if !to.is_negotiating() {
            self.disarm(core, TimerKind::Negotiation);
        }
        if to != SessionState::Reconnecting {
            self.disarm(core, TimerKind::Reconnect);
        }

        for effect in transition.effects {
            match effect {
                SideEffect::StartNegotiationTimer => {
                    self.arm(core, TimerKind::Negotiation, self.inner.negotiation_timeout);
                },
                SideEffect::StartReconnectTimer => {
                    self.arm(core, TimerKind::Reconnect, self.inner.reconnect_timeout);
                },
                SideEffect::SendCapability => self.send_capability(queue),
                SideEffect::ValidateCapability => {
                    if let Some(remote) = capability {
                        queue.push_back(self.validate(&remote));
                    }
                },
                _ => {},
            }
        }

        tracing::debug!(
            session = %self.inner.id,
            from = %from,
            to = %to,
            event = %kind,
            "transition"
        );
        if to == SessionState::Closed {
            match &core.info.reason {
                Some(reason) => tracing::info!(session = %self.inner.id, %reason, "session closed"),
                None => tracing::info!(session = %self.inner.id, "session closed"),
            }
        } else if to == SessionState::Established && from != SessionState::Established {
            tracing::info!(session = %self.inner.id, capability = ?core.capability, "session established");
        }

        self.inner
            .notifier
            .publish(&Notification::StateChanged(StateChange {
                previous: from,
                current: core.info.clone(),
                event: kind,
                payload: published_payload,
                capability,
            }));

        Ok(())
    }

    fn record_capability(&self, core: &mut EngineCore, capability: Option<CapabilityDescriptor>) {
        match (core.capability, capability) {
            (None, Some(negotiated)) => core.capability = Some(negotiated),
            (Some(recorded), Some(offered)) if recorded != offered => {
                tracing::warn!(
                    session = %self.inner.id,
                    ?recorded,
                    ?offered,
                    "capability already negotiated; keeping the recorded descriptor"
                );
            },
            _ => {},
        }
    }

    fn validate(&self, remote: &CapabilityDescriptor) -> SessionEvent {
        match self.inner.validator.validate(remote) {
            Verdict::Accept => SessionEvent::negotiation_completed(*remote),
            Verdict::Reject(why) => {
                tracing::warn!(session = %self.inner.id, ?remote, %why, "capability rejected");
                SessionEvent::failed(SessionEventKind::NegotiationFailed, why)
            },
        }
    }

    fn send_capability(&self, queue: &mut VecDeque<SessionEvent>) {
        let Some(transport) = &self.inner.transport else {
            return;
        };

        let sent = SessionEnvelope::capability(self.inner.local_capability)
            .with_session(&self.inner.id)
            .to_bytes()
            .and_then(|bytes| transport.send_bytes(&bytes));

        queue.push_back(match sent {
            Ok(()) => SessionEvent::new(SessionEventKind::NegotiationSendCompleted),
            Err(err) => {
                tracing::warn!(session = %self.inner.id, transport = transport.name(), %err, "capability send failed");
                SessionEvent::failed(SessionEventKind::SendFailed, err.to_string())
            },
        });
    }

    fn arm(&self, core: &mut EngineCore, kind: TimerKind, duration: Duration) {
        self.disarm(core, kind);
        core.generation += 1;
        let generation = core.generation;

        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let on_expire: ExpiryCallback = Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let event = match kind {
                TimerKind::Negotiation => SessionEvent::failed(
                    SessionEventKind::NegotiationTimeout,
                    format!("negotiation did not complete within {duration:?}"),
                ),
                TimerKind::Reconnect => SessionEvent::with_reason(
                    SessionEventKind::ReconnectFailed,
                    FailureReason::new(
                        FailureCategory::Timeout,
                        format!("reconnect did not complete within {duration:?}"),
                    ),
                ),
            };
            SessionEngine { inner }.on_timer(kind, generation, event);
        });

        let handle = self.inner.timers.start(duration, on_expire);
        *core.slot(kind) = Some(ArmedTimer { handle, generation });
    }

    fn disarm(&self, core: &mut EngineCore, kind: TimerKind) {
        if let Some(armed) = core.slot(kind).take() {
            self.inner.timers.cancel(armed.handle);
        }
    }

    fn report_violation(&self, state: SessionState, event: SessionEventKind) {
        tracing::warn!(session = %self.inner.id, %state, %event, "protocol violation: event ignored");
        self.inner
            .notifier
            .publish(&Notification::ProtocolViolation(ViolationReport { state, event }));
    }

    fn lock(&self) -> MutexGuard<'_, EngineCore> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builder for [`SessionEngine`]
#[derive(Default)]
pub struct EngineBuilder {
    id: Option<String>,
    local_capability: Option<CapabilityDescriptor>,
    validator: Option<Arc<dyn CapabilityValidator>>,
    timers: Option<Arc<dyn TimerService>>,
    transport: Option<Arc<dyn SessionTransport>>,
    negotiation_timeout: Option<Duration>,
    reconnect_timeout: Option<Duration>,
}

impl EngineBuilder {
    /// Use an existing session ID
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Capability sent during negotiation
    pub fn local_capability(mut self, capability: CapabilityDescriptor) -> Self {
        self.local_capability = Some(capability);
        self
    }

    /// Validator for the remote capability
    pub fn validator(mut self, validator: impl CapabilityValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Timer service
    pub fn timers(mut self, timers: Arc<dyn TimerService>) -> Self {
        self.timers = Some(timers);
        self
    }

    /// Transport used to send the local capability
    pub fn transport(mut self, transport: Arc<dyn SessionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Negotiation deadline
    pub fn negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = Some(timeout);
        self
    }

    /// Reconnect deadline
    pub fn reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.reconnect_timeout = Some(timeout);
        self
    }

    /// Take capability, required features and timeouts from config
    pub fn config(mut self, config: &Config) -> Result<Self> {
        let local = config.capability.descriptor()?;
        let required = config.capability.required()?;
        self.local_capability = Some(local);
        self.validator = Some(Arc::new(
            CompatibilityValidator::new(local).with_required(required),
        ));
        self.negotiation_timeout = Some(config.session.negotiation_timeout());
        self.reconnect_timeout = Some(config.session.reconnect_timeout());
        Ok(self)
    }

    /// Build the engine in `Idle`.
    ///
    /// Without an explicit timer service this needs a tokio runtime.
    pub fn build(self) -> Result<SessionEngine> {
        let local_capability = self.local_capability.unwrap_or_default();
        let timers: Arc<dyn TimerService> = match self.timers {
            Some(timers) => timers,
            None => Arc::new(TokioTimerService::new()?),
        };
        let validator = self
            .validator
            .unwrap_or_else(|| Arc::new(CompatibilityValidator::new(local_capability)));
        let id = self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        tracing::debug!(session = %id, capability = ?local_capability, "session engine created");

        Ok(SessionEngine {
            inner: Arc::new(EngineInner {
                id,
                core: Mutex::new(EngineCore {
                    info: StateInfo::new(SessionState::Idle),
                    capability: None,
                    resume: None,
                    negotiation_timer: None,
                    reconnect_timer: None,
                    generation: 0,
                    applied: 0,
                }),
                notifier: Notifier::default(),
                local_capability,
                validator,
                timers,
                transport: self.transport,
                negotiation_timeout: self
                    .negotiation_timeout
                    .unwrap_or(Duration::from_millis(NEGOTIATION_TIMEOUT_MS)),
                reconnect_timeout: self
                    .reconnect_timeout
                    .unwrap_or(Duration::from_millis(RECONNECT_TIMEOUT_MS)),
            }),
        })
    }
}
