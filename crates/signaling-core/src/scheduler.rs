//! Periodic task scheduling capability
//!
//! The session never sleeps in line. Offer resends are scheduled on a
//! host-supplied [`Scheduler`] and cancelled through the returned
//! [`ScheduledTask`] when the session is disposed.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Work run on every tick of a periodic schedule
pub type PeriodicTask = Box<dyn FnMut() -> BoxFuture<'static, ()> + Send>;

/// Host capability for periodic callbacks
pub trait Scheduler: Send + Sync {
    /// Run `task` every `period`, starting one period from now, until the
    /// returned handle is cancelled or dropped
    fn schedule_periodic(&self, period: Duration, task: PeriodicTask) -> ScheduledTask;
}

/// Cancellation handle for a scheduled task
///
/// Dropping the handle cancels the task.
pub struct ScheduledTask {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl ScheduledTask {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// [`Scheduler`] backed by a tokio runtime
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler on the runtime of the calling task
    ///
    /// Panics outside a tokio runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_periodic(&self, period: Duration, mut task: PeriodicTask) -> ScheduledTask {
        // tokio intervals reject a zero period
        let period = period.max(Duration::from_millis(1));
        let join = self.handle.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                task().await;
            }
        });
        ScheduledTask::new(move || join.abort())
    }
}
