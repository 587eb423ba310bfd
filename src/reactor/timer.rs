//! One-shot and repeating timers bound to a reactor.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::ReactorHandle;

/// Error type for timer setup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimerError {
    /// The interval must be greater than zero.
    #[error("invalid timer interval: {0:?}")]
    InvalidArgument(Duration),
}

/// Whether a timer fires once or keeps re-arming itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Fire once, then disarm.
    OneShot,
    /// Re-arm with the same interval after every firing.
    Repeating,
}

/// Timer whose callback runs on the reactor thread.
///
/// Calling [`setup`](Self::setup) while armed cancels the pending firing.
/// Dropping the timer guarantees the callback never runs again.
#[derive(Debug)]
pub struct IntervalTimer {
    reactor: ReactorHandle,
    task: Option<JoinHandle<()>>,
    interval: Option<Duration>,
}

impl IntervalTimer {
    /// Create a disarmed timer.
    pub fn new(reactor: &ReactorHandle) -> Self {
        Self {
            reactor: reactor.clone(),
            task: None,
            interval: None,
        }
    }

    /// Arm the timer.
    pub fn setup<F>(&mut self, callback: F, interval: Duration, mode: TimerMode) -> Result<(), TimerError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if interval.is_zero() {
            return Err(TimerError::InvalidArgument(interval));
        }
        self.cancel();

        let callback = Arc::new(callback);
        let task = match mode {
            TimerMode::OneShot => self.reactor.spawn(async move {
                time::sleep(interval).await;
                callback();
            }),
            TimerMode::Repeating => self.reactor.spawn(async move {
                let mut ticker = time::interval_at(Instant::now() + interval, interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    callback();
                }
            }),
        };

        self.task = Some(task);
        self.interval = Some(interval);
        Ok(())
    }

    /// Cancel a pending firing, if any.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.interval = None;
    }

    /// Interval of the current arming.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Whether a firing is still pending.
    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
