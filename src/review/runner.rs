//! Off-thread execution with keep-alive ticks.
//!
//! [`Offloaded`] moves a unit of work off the task that drives the response stream, either
//! onto its own tokio task or onto the blocking pool. [`run_with_heartbeat`] races that work
//! against a heartbeat interval and an absolute deadline, yielding zero or more
//! [`RunnerEvent::Heartbeat`] items followed by exactly one [`RunnerEvent::Finished`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_stream::stream;
use futures_core::Stream;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

use super::types::StageError;

/// Handle to work running away from the caller's task.
///
/// Awaiting the handle yields the work's own result; a panic or cancellation surfaces as
/// [`StageError::Panicked`] or [`StageError::Cancelled`]. Dropping the handle aborts the work.
pub struct Offloaded<T> {
    handle: JoinHandle<Result<T, StageError>>,
}

impl<T: Send + 'static> Offloaded<T> {
    /// Run an async unit of work on its own tokio task.
    pub fn spawn<F>(work: F) -> Self
    where
        F: Future<Output = Result<T, StageError>> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(work),
        }
    }

    /// Run a CPU-bound or blocking unit of work on the blocking pool.
    pub fn spawn_blocking<F>(work: F) -> Self
    where
        F: FnOnce() -> Result<T, StageError> + Send + 'static,
    {
        Self {
            handle: tokio::task::spawn_blocking(work),
        }
    }
}

impl<T> Offloaded<T> {
    /// Request cancellation. Blocking work that already started runs to completion.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl<T> Future for Offloaded<T> {
    type Output = Result<T, StageError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|joined| joined.unwrap_or_else(|error| Err(join_failure(error))))
    }
}

impl<T> Drop for Offloaded<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn join_failure(error: JoinError) -> StageError {
    if error.is_cancelled() {
        StageError::Cancelled(error.to_string())
    } else {
        StageError::Panicked(error.to_string())
    }
}

/// Timing knobs for one supervised unit of work.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatSettings {
    /// Period between heartbeats.
    pub interval: Duration,
    /// Absolute budget measured from the moment the runner is first polled.
    pub timeout: Duration,
}

/// Item yielded by [`run_with_heartbeat`].
#[derive(Debug)]
pub enum RunnerEvent<T> {
    /// The work is still running.
    Heartbeat,
    /// The work finished, failed, or exceeded its budget. Always the last item.
    Finished(Result<T, StageError>),
}

/// Supervise offloaded work, emitting a heartbeat every `settings.interval`.
///
/// When the budget elapses first the work is aborted and the terminal item carries
/// [`StageError::Timeout`].
pub fn run_with_heartbeat<T>(
    mut work: Offloaded<T>,
    settings: HeartbeatSettings,
) -> impl Stream<Item = RunnerEvent<T>>
where
    T: Send + 'static,
{
    stream! {
        let started = Instant::now();
        let deadline = started + settings.timeout;
        let mut ticker = tokio::time::interval_at(started + settings.interval, settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                biased;
                result = &mut work => Step::Finished(result),
                _ = tokio::time::sleep_until(deadline) => Step::Expired,
                _ = ticker.tick() => Step::Tick,
            };

            match step {
                Step::Tick => yield RunnerEvent::Heartbeat,
                Step::Finished(result) => {
                    yield RunnerEvent::Finished(result);
                    break;
                }
                Step::Expired => {
                    work.abort();
                    tracing::debug!(
                        timeout_secs = settings.timeout.as_secs(),
                        "Offloaded work exceeded its budget"
                    );
                    yield RunnerEvent::Finished(Err(StageError::Timeout(settings.timeout)));
                    break;
                }
            }
        }
    }
}

enum Step<T> {
    Tick,
    Finished(Result<T, StageError>),
    Expired,
}
