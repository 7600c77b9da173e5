//! Notification fan-out.
//!
//! Every subscriber owns an unbounded channel. Publishing is a non-blocking
//! send per subscriber, so the engine can publish while holding its session
//! lock (which keeps notification order identical to transition order) and
//! a slow observer never stalls it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

use crate::protocol::{CapabilityDescriptor, SessionEnvelope, SessionEventKind, SessionState, StateInfo};

/// One applied transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// State before the event
    pub previous: SessionState,
    /// Snapshot after the event
    pub current: StateInfo,
    /// Event that caused the transition
    pub event: SessionEventKind,
    /// Data carried by `MessageReceived` / `NegotiationReceived`
    pub payload: Option<SessionEnvelope>,
    /// Capability carried by `NegotiationReceived` / `NegotiationCompleted`
    pub capability: Option<CapabilityDescriptor>,
}

/// An event the engine refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationReport {
    /// State the session stayed in
    pub state: SessionState,
    /// Refused event
    pub event: SessionEventKind,
}

/// Delivered to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A transition was applied
    StateChanged(StateChange),
    /// An event was illegal in the current state
    ProtocolViolation(ViolationReport),
}

impl Notification {
    /// The state change, if this is one
    pub fn as_state_change(&self) -> Option<&StateChange> {
        match self {
            Notification::StateChanged(change) => Some(change),
            Notification::ProtocolViolation(_) => None,
        }
    }
}

/// Identifies a subscriber for `unregister`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving end of a subscription
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: UnboundedReceiver<Notification>,
}

impl Subscription {
    /// Subscription id
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next notification; `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }

    /// Next notification from synchronous code
    pub fn blocking_recv(&mut self) -> Option<Notification> {
        self.receiver.blocking_recv()
    }

    /// Next notification if one is queued
    pub fn try_recv(&mut self) -> Option<Notification> {
        match self.receiver.try_recv() {
            Ok(notification) => Some(notification),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drain everything currently queued
    pub fn drain(&mut self) -> Vec<Notification> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[derive(Debug, Default)]
pub(crate) struct Notifier {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, UnboundedSender<Notification>)>>,
}

impl Notifier {
    pub(crate) fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, receiver) = mpsc::unbounded_channel();
        self.lock().push((id, tx));
        Subscription { id, receiver }
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub(crate) fn publish(&self, notification: &Notification) {
        // Dropped receivers unsubscribe themselves
        self.lock()
            .retain(|(_, tx)| tx.send(notification.clone()).is_ok());
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, UnboundedSender<Notification>)>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
