//! The transition table.
//!
//! A process-wide, immutable map from `(state, event kind)` to the next state
//! and the side effects the engine runs on the way. Built once on first use
//! and read without locking afterwards.
//!
//! Rows are grouped the way the session moves:
//!
//! ```text
//!  Idle ─CreateSession/ConnectSession─> Connecting ─NegotiationSending*─> NegotiationSending*
//!    │                                                                        │ SendCompleted
//!    └─NegotiationPending─> NegotiationPending <─NegotiationPending─ NegotiationSent
//!                                 │ NegotiationReceived                       │
//!                                 └──────────────> NegotiationReceived <──────┘
//!                                                        │ NegotiationCompleted
//!                                                        v
//!      Reconnecting ─ReconnectCompleted─> (resume)   Established ─Key*─> EstablishedAndKey*
//!        ^       ^                                       │
//!        │       └─ReconnectStart─ RCDisconnecting <─RCDisconnectStarted─┤
//!        └─ReconnectStart─ Disconnected <─ Disconnecting <─DisconnectStart┘
//!
//!  any non-terminal ─Close─> ClosingConnection ─CloseCompleted/CloseFailed─> Closed
//!  any non-terminal ─FatalError / *Failed / NegotiationTimeout─> Closed
//! ```

use std::collections::{BTreeSet, HashMap};

use lazy_static::lazy_static;

use super::{SessionEventKind, SessionState};

/// Where a transition leads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A fixed state
    To(SessionState),
    /// Stay in the current state (data delivery)
    Stay,
    /// The state remembered when the disconnect began
    Resume,
}

/// Work the engine performs as part of a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// Arm the negotiation timer
    StartNegotiationTimer,
    /// Send the local capability descriptor over the transport
    SendCapability,
    /// Run the capability validator on a carried descriptor
    ValidateCapability,
    /// Record the negotiated descriptor
    RecordCapability,
    /// Remember where a later reconnect resumes
    RememberResumeState,
    /// Arm the reconnect timer
    StartReconnectTimer,
    /// Hand the carried payload to observers
    PublishPayload,
}

/// One table row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Destination
    pub target: Target,
    /// Side effects, in execution order
    pub effects: &'static [SideEffect],
}

impl Transition {
    const fn to(state: SessionState) -> Self {
        Self {
            target: Target::To(state),
            effects: &[],
        }
    }

    const fn with(target: Target, effects: &'static [SideEffect]) -> Self {
        Self { target, effects }
    }

    /// Resolve the destination
    pub fn destination(&self, current: SessionState, resume: Option<SessionState>) -> Option<SessionState> {
        match self.target {
            Target::To(state) => Some(state),
            Target::Stay => Some(current),
            Target::Resume => resume,
        }
    }
}

/// Event kinds that close the session from any non-terminal state
pub const FAILURE_KINDS: [SessionEventKind; 11] = [
    SessionEventKind::FatalError,
    SessionEventKind::ConnectFailed,
    SessionEventKind::NegotiationTimeout,
    SessionEventKind::NegotiationFailed,
    SessionEventKind::SendFailed,
    SessionEventKind::ReceiveFailed,
    SessionEventKind::KeySendFailed,
    SessionEventKind::KeyReceiveFailed,
    SessionEventKind::KeyRequestFailed,
    SessionEventKind::DisconnectFailed,
    SessionEventKind::ReconnectFailed,
];

const NEGOTIATE: &[SideEffect] = &[SideEffect::StartNegotiationTimer, SideEffect::SendCapability];

/// Static `(state, event) → transition` map
#[derive(Debug)]
pub struct TransitionTable {
    entries: HashMap<(SessionState, SessionEventKind), Transition>,
}

lazy_static! {
    static ref TABLE: TransitionTable = TransitionTable::build();
}

/// The process-wide table
pub fn table() -> &'static TransitionTable {
    &TABLE
}

impl TransitionTable {
    fn build() -> Self {
        use SessionEventKind as E;
        use SessionState as S;

        let mut t = Self {
            entries: HashMap::new(),
        };

        // Opening
        t.add(S::Idle, E::CreateSession, Transition::to(S::Connecting));
        t.add(S::Idle, E::ConnectSession, Transition::to(S::Connecting));
        t.add(
            S::Idle,
            E::NegotiationPending,
            Transition::with(
                Target::To(S::NegotiationPending),
                &[SideEffect::StartNegotiationTimer],
            ),
        );

        // Negotiation
        t.add(
            S::Connecting,
            E::NegotiationSending,
            Transition::with(Target::To(S::NegotiationSending), NEGOTIATE),
        );
        t.add(
            S::Connected,
            E::NegotiationSending,
            Transition::with(Target::To(S::NegotiationSending), NEGOTIATE),
        );
        t.add(
            S::Connecting,
            E::NegotiationSendingOnConnect,
            Transition::with(Target::To(S::NegotiationSendingOnConnect), NEGOTIATE),
        );
        for from in [S::NegotiationSending, S::NegotiationSendingOnConnect] {
            t.add(from, E::NegotiationSendCompleted, Transition::to(S::NegotiationSent));
        }
        t.add(S::NegotiationSent, E::NegotiationPending, Transition::to(S::NegotiationPending));
        for from in [S::NegotiationSent, S::NegotiationPending] {
            t.add(
                from,
                E::NegotiationReceived,
                Transition::with(
                    Target::To(S::NegotiationReceived),
                    &[SideEffect::PublishPayload, SideEffect::ValidateCapability],
                ),
            );
        }
        t.add(
            S::NegotiationReceived,
            E::NegotiationCompleted,
            Transition::with(Target::To(S::Established), &[SideEffect::RecordCapability]),
        );

        // Key exchange
        t.add(S::Established, E::KeyRequested, Transition::to(S::EstablishedAndKeyRequested));
        t.add(S::Established, E::KeySent, Transition::to(S::EstablishedAndKeySent));
        t.add(S::Established, E::KeyReceived, Transition::to(S::EstablishedAndKeyReceived));
        t.add(
            S::EstablishedAndKeyRequested,
            E::KeyReceived,
            Transition::to(S::EstablishedAndKeyReceived),
        );
        t.add(
            S::EstablishedAndKeyReceived,
            E::KeySent,
            Transition::to(S::EstablishedAndKeyExchanged),
        );
        t.add(
            S::EstablishedAndKeySent,
            E::KeyReceived,
            Transition::to(S::EstablishedAndKeyExchanged),
        );

        // Data, disconnect
        for from in S::ALL.into_iter().filter(SessionState::is_connected_family) {
            t.add(
                from,
                E::MessageReceived,
                Transition::with(Target::Stay, &[SideEffect::PublishPayload]),
            );
            t.add(
                from,
                E::DisconnectStart,
                Transition::with(Target::To(S::Disconnecting), &[SideEffect::RememberResumeState]),
            );
        }
        for from in S::ALL
            .into_iter()
            .filter(|s| s.is_connected_family() || s.is_negotiating())
        {
            t.add(
                from,
                E::RCDisconnectStarted,
                Transition::with(Target::To(S::RCDisconnecting), &[SideEffect::RememberResumeState]),
            );
        }
        t.add(S::Disconnecting, E::DisconnectCompleted, Transition::to(S::Disconnected));

        // Reconnect
        for from in [S::Disconnected, S::RCDisconnecting] {
            t.add(
                from,
                E::ReconnectStart,
                Transition::with(Target::To(S::Reconnecting), &[SideEffect::StartReconnectTimer]),
            );
        }
        t.add(S::Reconnecting, E::ReconnectCompleted, Transition::with(Target::Resume, &[]));

        // Closing and failure, from every live state
        for from in S::ALL
            .into_iter()
            .filter(|s| !s.is_terminal() && *s != S::Undefined)
        {
            t.add(from, E::Close, Transition::to(S::ClosingConnection));
            for kind in FAILURE_KINDS {
                t.add(from, kind, Transition::to(S::Closed));
            }
        }
        t.add(S::ClosingConnection, E::CloseCompleted, Transition::to(S::Closed));
        t.add(S::ClosingConnection, E::CloseFailed, Transition::to(S::Closed));

        t
    }

    fn add(&mut self, from: SessionState, event: SessionEventKind, transition: Transition) {
        let previous = self.entries.insert((from, event), transition);
        debug_assert!(previous.is_none(), "duplicate row {from:?} x {event:?}");
    }

    /// Look up the row for `(state, event)`
    pub fn lookup(&self, state: SessionState, event: SessionEventKind) -> Option<&Transition> {
        self.entries.get(&(state, event))
    }

    /// Row exists
    pub fn is_legal(&self, state: SessionState, event: SessionEventKind) -> bool {
        self.entries.contains_key(&(state, event))
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Table has no rows
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows ordered by state then event
    pub fn rows(&self) -> Vec<(SessionState, SessionEventKind, Transition)> {
        let mut rows: Vec<_> = self
            .entries
            .iter()
            .map(|(&(state, event), &transition)| (state, event, transition))
            .collect();
        rows.sort_by_key(|(state, event, _)| (*state, *event));
        rows
    }

    /// Every state some row can lead to
    pub fn destinations(&self) -> BTreeSet<SessionState> {
        let mut out = BTreeSet::new();
        for (&(from, _), transition) in &self.entries {
            match transition.target {
                Target::To(state) => {
                    out.insert(state);
                },
                Target::Stay => {
                    out.insert(from);
                },
                Target::Resume => {
                    out.extend(SessionState::ALL.iter().filter_map(SessionState::resume_target));
                },
            }
        }
        out
    }
}
