//! Cancellable one-shot timers.
//!
//! Each scheduled timer gets a fresh [`TimerId`]. Owners remember the id they
//! armed and ignore any fired id that no longer matches.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

pub trait TimerScheduler: Send {
    fn schedule(&mut self, delay: Duration) -> TimerId;

    /// Cancelling an unknown or already fired id is a no-op.
    fn cancel(&mut self, id: TimerId);
}

/// Timers backed by `tokio::time::sleep` tasks.
///
/// Fired ids are delivered on the channel given to [`TokioTimers::new`].
pub struct TokioTimers {
    fired: mpsc::UnboundedSender<TimerId>,
    next_id: u64,
    handles: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioTimers {
    pub fn new(fired: mpsc::UnboundedSender<TimerId>) -> Self {
        Self {
            fired,
            next_id: 0,
            handles: HashMap::new(),
        }
    }

    /// Timers armed and not yet fired or cancelled.
    pub fn armed(&self) -> usize {
        self.handles.values().filter(|h| !h.is_finished()).count()
    }
}

impl TimerScheduler for TokioTimers {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        self.handles.retain(|_, handle| !handle.is_finished());
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let sender = self.fired.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(id);
        });
        trace!("Timer {:?} armed for {:?}", id, delay);
        self.handles.insert(id, handle);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.handles.remove(&id) {
            trace!("Timer {:?} cancelled", id);
            handle.abort();
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}
