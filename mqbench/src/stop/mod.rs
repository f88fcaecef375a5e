//! Stop controllers deciding when a load run ends.
//!
//! A [`StopController`] answers the single question "should workers keep running?".
//! The answer is monotonic: once it turns false it stays false forever, even if the
//! underlying condition would evaluate to true again (a count target raised, a clock
//! adjusted). The first false also latches a done signal so tasks parked in
//! [`StopController::wait_for_done`] wake immediately instead of sleeping out their
//! full timeout.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::bail;
use crate::error::{BenchResult, ErrorKind};
use crate::types::Counter;

/// Decides whether load workers should keep running.
///
/// Shared across workers as `Arc<StopController>`; all of them observe the same
/// latched decision.
#[derive(Debug)]
pub struct StopController {
    kind: StopKind,
    done_tx: watch::Sender<bool>,
}

#[derive(Debug)]
enum StopKind {
    /// Stop once the observed counter reaches the target.
    Count { target: u64, counter: Counter },
    /// Stop once the deadline passes.
    Time { deadline: Instant },
    /// Keep running while at least one child keeps running.
    Chain { children: Vec<StopController> },
}

impl StopController {
    /// Creates a controller that stops after `target` completed units of work.
    ///
    /// The controller keeps running while `counter.value() < target`: with a target of
    /// N it still runs at N-1 completions and stops at N. A zero target is rejected
    /// since such a controller would be born stopped.
    pub fn after_count(target: u64, counter: Counter) -> BenchResult<Self> {
        if target == 0 {
            bail!(
                ErrorKind::ConfigError,
                "Invalid stop target",
                "a count stop controller requires a target of at least 1"
            );
        }

        Ok(Self::with_kind(StopKind::Count { target, counter }))
    }

    /// Creates a controller that stops once `duration` has elapsed.
    ///
    /// The deadline is fixed at construction time, not at first use.
    pub fn after_duration(duration: Duration) -> Self {
        Self::with_kind(StopKind::Time {
            deadline: Instant::now() + duration,
        })
    }

    /// Creates a controller that composes `children` with OR semantics.
    ///
    /// The chain keeps running while at least one child keeps running, so it stops
    /// only when every child has stopped. An empty chain is stopped from the start.
    pub fn chain(children: Vec<StopController>) -> Self {
        Self::with_kind(StopKind::Chain { children })
    }

    fn with_kind(kind: StopKind) -> Self {
        Self {
            kind,
            done_tx: watch::channel(false).0,
        }
    }

    /// Returns whether workers should continue.
    ///
    /// Monotonic: the first `false` latches, and every later call returns `false`
    /// without re-evaluating the condition. The transition to `false` releases all
    /// tasks parked in [`StopController::wait_for_done`].
    pub fn keep_running(&self) -> bool {
        if *self.done_tx.borrow() {
            return false;
        }

        if self.evaluate() {
            return true;
        }

        debug!("stop condition reached, releasing waiting workers");
        self.done_tx.send_replace(true);

        false
    }

    /// Evaluates the raw condition without consulting or updating the latch.
    fn evaluate(&self) -> bool {
        match &self.kind {
            StopKind::Count { target, counter } => counter.value() < *target,
            StopKind::Time { deadline } => Instant::now() < *deadline,
            StopKind::Chain { children } => {
                // Evaluate every child so each one latches independently.
                let mut any_running = false;
                for child in children {
                    if child.keep_running() {
                        any_running = true;
                    }
                }

                any_running
            }
        }
    }

    /// Waits until the controller stops or `timeout` elapses, whichever is first.
    ///
    /// Returns immediately when already stopped. The wait is latch-driven rather than
    /// polled, so a stop triggered by another task is observed right away.
    pub async fn wait_for_done(&self, timeout: Duration) {
        if !self.keep_running() {
            return;
        }

        let mut done_rx = self.done_tx.subscribe();

        // wait_for checks the current value first, so a stop signaled between the
        // keep_running call above and this await is not missed.
        let _ = tokio::time::timeout(timeout, done_rx.wait_for(|done| *done)).await;
    }

    /// Latches the controller into the stopped state directly.
    ///
    /// Used to propagate an external stop (operator shutdown) through the same
    /// mechanism workers already observe.
    pub fn stop(&self) {
        if !*self.done_tx.borrow() {
            debug!("stop requested externally");
            self.done_tx.send_replace(true);
        }
    }
}
