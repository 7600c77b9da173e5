//! Timer service used for negotiation and reconnect deadlines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{RemotingError, Result};

/// Opaque handle for a started timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Create from a raw id (for custom timer services)
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Raw id
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Callback run when a timer expires
pub type ExpiryCallback = Box<dyn FnOnce() + Send + 'static>;

/// Clock/timer collaborator.
///
/// `start` is called while the engine holds its session lock, so an
/// implementation must never run `on_expire` synchronously from `start`.
pub trait TimerService: Send + Sync {
    /// Run `on_expire` once after `duration`
    fn start(&self, duration: Duration, on_expire: ExpiryCallback) -> TimerHandle;

    /// Cancel a timer; unknown or already fired handles are ignored
    fn cancel(&self, handle: TimerHandle);
}

/// Timers backed by `tokio::time::sleep` tasks
#[derive(Debug)]
pub struct TokioTimerService {
    runtime: Handle,
    next_id: AtomicU64,
    timers: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
}

impl TokioTimerService {
    /// Use the runtime of the calling context
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| RemotingError::Runtime(format!("Timer service needs a tokio runtime: {e}")))?;
        Ok(Self::with_handle(runtime))
    }

    /// Use an explicit runtime handle
    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: AtomicU64::new(1),
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Timers started and not yet fired or cancelled
    pub fn active(&self) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl TimerService for TokioTimerService {
    fn start(&self, duration: Duration, on_expire: ExpiryCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);

        // Hold the map while spawning so the task cannot remove itself first
        let mut guard = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            let fired = timers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id)
                .is_some();
            if fired {
                on_expire();
            }
        });
        guard.insert(id, task);

        tracing::trace!(timer = id, ?duration, "timer started");
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        let task = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.0);
        if let Some(task) = task {
            task.abort();
            tracing::trace!(timer = handle.0, "timer cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn test_timer_fires() {
        let timers = TokioTimerService::new().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();

        timers.start(
            Duration::from_millis(10),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );

        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("timer did not fire")
            .unwrap();
        assert_eq!(timers.active(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_timer_never_fires() {
        let timers = TokioTimerService::new().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let handle = timers.start(
            Duration::from_millis(20),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        assert_eq!(timers.active(), 1);
        timers.cancel(handle);
        assert_eq!(timers.active(), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_needs_runtime() {
        assert!(matches!(TokioTimerService::new(), Err(RemotingError::Runtime(_))));
    }
}
