// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Debounce Flush Scheduler
//!
//! Small seam between the activity store and wall-clock time. The store only
//! ever wants "run this once, `delay` from now, replacing whatever was
//! pending" — so that is the whole interface. The Tokio implementation backs
//! production; [`ManualFlushScheduler`] lets tests fire the pending flush
//! deterministically instead of racing real timers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// One-shot, replace-on-reschedule timer.
pub trait FlushScheduler: Send + Sync {
    /// Schedule `task` to run after `delay`, cancelling any pending task.
    fn schedule_once(&self, delay: Duration, task: Box<dyn FnOnce() + Send>);

    /// Cancel the pending task, if any.
    fn cancel(&self);
}

/// Production scheduler: a spawned Tokio sleep. Aborting the previous task
/// on reschedule gives cancel-and-reschedule semantics; an aborted sleep
/// never runs its flush. Spawned timers never keep the host process alive on
/// their own — dropping the runtime drops them.
pub struct TokioFlushScheduler {
    handle: tokio::runtime::Handle,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl TokioFlushScheduler {
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
            pending: Mutex::new(None),
        }
    }
}

impl FlushScheduler for TokioFlushScheduler {
    fn schedule_once(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) {
        let spawned = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });

        if let Some(previous) = self.pending.lock().replace(spawned) {
            previous.abort();
        }
    }

    fn cancel(&self) {
        if let Some(previous) = self.pending.lock().take() {
            previous.abort();
        }
    }
}

/// Deterministic scheduler for tests: holds the latest task until
/// [`ManualFlushScheduler::fire`] is called.
#[derive(Default)]
pub struct ManualFlushScheduler {
    pending: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ManualFlushScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run the pending task, if any. Returns whether one ran.
    pub fn fire(&self) -> bool {
        match self.pending.lock().take() {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

impl FlushScheduler for ManualFlushScheduler {
    fn schedule_once(&self, _delay: Duration, task: Box<dyn FnOnce() + Send>) {
        // Replace-on-reschedule, same as production.
        *self.pending.lock() = Some(task);
    }

    fn cancel(&self) {
        self.pending.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_manual_scheduler_replaces_pending() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = ManualFlushScheduler::new();

        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            scheduler.schedule_once(
                Duration::from_millis(1),
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        assert!(scheduler.fire());
        assert!(!scheduler.fire());
        // Three schedules coalesced into one run.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tokio_scheduler_runs_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = TokioFlushScheduler::new();

        let task_counter = Arc::clone(&counter);
        scheduler.schedule_once(
            Duration::from_millis(5),
            Box::new(move || {
                task_counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tokio_scheduler_cancel() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = TokioFlushScheduler::new();

        let task_counter = Arc::clone(&counter);
        scheduler.schedule_once(
            Duration::from_millis(5),
            Box::new(move || {
                task_counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        scheduler.cancel();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
