//! One-shot, cancelable timers for retransmission scheduling.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within a bounded time.  [`TimerHandle::schedule`] runs a task
//! after a delay on the current thread's [`tokio::task::LocalSet`];
//! cancelling the handle (or dropping it) aborts the task if it has not
//! fired yet.
//!
//! A connection stores at most one handle and replaces it when re-arming, so
//! overwriting the slot cancels the previous timer — timers never stack.

use std::time::Duration;

use tokio::task::AbortHandle;

/// Fixed interval between retransmissions of the oldest unacked segment.
///
/// No back-off is applied: the interval is constant for the life of the
/// connection.
pub const RETRANSMIT_INTERVAL: Duration = Duration::from_millis(1000);

/// A pending one-shot timer.  Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    /// Run `task` after `delay` on the current [`tokio::task::LocalSet`].
    ///
    /// Must be called from within a `LocalSet` context; the task is `!Send`
    /// because the whole transport runs on one thread.
    pub fn schedule(delay: Duration, task: impl FnOnce() + 'static) -> Self {
        // Pin the deadline now: `sleep(delay)` would only start counting at
        // the task's first poll, which under paused test time can lag a full
        // interval behind the schedule call.
        let deadline = tokio::time::Instant::now() + delay;
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep_until(deadline).await;
            task();
        });
        Self {
            abort: handle.abort_handle(),
        }
    }

    /// Cancel the timer.  A no-op if it already fired.
    pub fn cancel(&self) {
        self.abort.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.abort.abort();
    }
}
