//! Depth-based flow control for producer workers.
//!
//! A [`FlowController`] owns a background task that periodically samples the depth of
//! the monitored queue and drives a boolean gate with hysteresis: the gate closes when
//! the depth reaches the pause threshold and reopens only once the depth has drained
//! to the resume threshold or below. Producers call
//! [`FlowController::wait_until_open`] before each unit of work; consumers are never
//! gated.
//!
//! Sampling failures are tolerated up to a ceiling of consecutive errors. Past the
//! ceiling the sampler forces the gate open and terminates, so producers can never be
//! blocked forever by an unreachable depth source.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use mqbench_config::shared::FlowControlConfig;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::BenchResult;
use crate::metrics::{
    DIRECTION_LABEL, HARNESS_ID_LABEL, MQBENCH_FLOW_GATE_CLOSED,
    MQBENCH_FLOW_GATE_TRANSITIONS_TOTAL, MQBENCH_SAMPLING_ERRORS_TOTAL,
};
use crate::types::HarnessId;

/// Upper bound on a single gate wait slice.
///
/// Waiters re-check the gate at least this often even if no transition is signaled.
const MAX_WAIT_SLICE: Duration = Duration::from_secs(10);

/// Source of queue depth readings for flow control.
pub trait DepthSampler: Send + Sync + 'static {
    /// Samples the current depth of the named queue.
    fn sample_depth(&self, queue: &str) -> impl Future<Output = BenchResult<u64>> + Send;
}

#[derive(Debug)]
struct FlowControllerInner {
    gate_closed_tx: watch::Sender<bool>,
    stop_tx: watch::Sender<bool>,
    sampler_task: Mutex<Option<JoinHandle<()>>>,
}

/// Gate pacing producers against the depth of a monitored queue.
///
/// Cloning is cheap; all clones observe the same gate.
#[derive(Debug, Clone)]
pub struct FlowController {
    inner: Arc<FlowControllerInner>,
}

impl FlowController {
    /// Validates `config`, spawns the sampler task, and returns the controller.
    ///
    /// The gate starts open; the first sample is taken one poll interval after
    /// construction. The sampler stops on [`FlowController::close`], on shutdown, or
    /// after too many consecutive sampling failures, always leaving the gate open.
    pub fn new<S>(
        harness_id: HarnessId,
        config: FlowControlConfig,
        queue: String,
        sampler: S,
        shutdown_rx: ShutdownRx,
    ) -> BenchResult<Self>
    where
        S: DepthSampler,
    {
        config.validate()?;

        let gate_closed_tx = watch::channel(false).0;
        let stop_tx = watch::channel(false).0;

        emit_gate_closed_metric(harness_id, false);

        let task = tokio::spawn(sampler_loop(
            gate_closed_tx.clone(),
            stop_tx.subscribe(),
            harness_id,
            config,
            queue,
            sampler,
            shutdown_rx,
        ));

        Ok(Self {
            inner: Arc::new(FlowControllerInner {
                gate_closed_tx,
                stop_tx,
                sampler_task: Mutex::new(Some(task)),
            }),
        })
    }

    /// Returns whether the gate is currently closed.
    pub fn is_gate_closed(&self) -> bool {
        *self.inner.gate_closed_tx.borrow()
    }

    /// Waits until the gate is open.
    ///
    /// Returns immediately when the gate is open. Otherwise parks on the gate signal
    /// in bounded slices so a missed notification can delay a waiter by at most one
    /// slice. A dropped sampler counts as an open gate.
    pub async fn wait_until_open(&self) {
        let mut gate_rx = self.inner.gate_closed_tx.subscribe();

        loop {
            // wait_for checks the current value before parking.
            match tokio::time::timeout(MAX_WAIT_SLICE, gate_rx.wait_for(|closed| !closed)).await {
                Ok(Ok(_)) => return,
                // Sender dropped; nothing can close the gate anymore.
                Ok(Err(_)) => return,
                // Slice elapsed, loop and re-check.
                Err(_) => continue,
            }
        }
    }

    /// Stops the sampler task and leaves the gate open.
    ///
    /// Idempotent; later calls are no-ops. Waits for the sampler task to finish so
    /// no further transitions can happen after this returns.
    pub async fn close(&self) {
        let _ = self.inner.stop_tx.send(true);

        let task = self.inner.sampler_task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }

        // Covers the case where the task was already gone before we signaled it.
        set_gate_closed(&self.inner.gate_closed_tx, false);
    }
}

/// Updates the gate state and notifies waiters when it changes.
fn set_gate_closed(gate_closed_tx: &watch::Sender<bool>, gate_closed: bool) {
    let _ = gate_closed_tx.send_if_modified(|current| {
        if *current == gate_closed {
            return false;
        }

        *current = gate_closed;

        true
    });
}

/// Background loop sampling queue depth and driving the gate.
async fn sampler_loop<S>(
    gate_closed_tx: watch::Sender<bool>,
    mut stop_rx: watch::Receiver<bool>,
    harness_id: HarnessId,
    config: FlowControlConfig,
    queue: String,
    sampler: S,
    shutdown_rx: ShutdownRx,
) where
    S: DepthSampler,
{
    let poll_interval = Duration::from_secs(config.poll_interval_secs);

    // Delay the first tick by one interval; the gate is already open at start.
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut currently_closed = false;
    let mut consecutive_errors: u32 = 0;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.wait_for_shutdown() => {
                info!(harness_id, "flow sampler stopped due to shutdown");
                break;
            }

            // Drop the non-Send watch::Ref inside this arm so the select output
            // stays Send across the sampling await below.
            _ = async {
                let _ = stop_rx.wait_for(|stop| *stop).await;
            } => {
                debug!(harness_id, "flow sampler stopped due to close");
                break;
            }

            _ = ticker.tick() => {
                match sampler.sample_depth(&queue).await {
                    Ok(depth) => {
                        consecutive_errors = 0;

                        let next_closed = compute_next_gate_closed(
                            currently_closed,
                            depth,
                            config.pause_at_depth,
                            config.resume_at_depth,
                        );

                        debug!(
                            harness_id,
                            queue,
                            depth,
                            gate_closed = currently_closed,
                            next_gate_closed = next_closed,
                            "flow sampler refreshed queue depth"
                        );

                        if next_closed != currently_closed {
                            info!(
                                harness_id,
                                queue,
                                depth,
                                gate_closed = next_closed,
                                "flow gate state changed"
                            );

                            emit_gate_closed_metric(harness_id, next_closed);
                            emit_transition_metric(harness_id, next_closed);
                        }

                        currently_closed = next_closed;
                        set_gate_closed(&gate_closed_tx, next_closed);
                    }
                    Err(err) => {
                        consecutive_errors += 1;

                        counter!(
                            MQBENCH_SAMPLING_ERRORS_TOTAL,
                            HARNESS_ID_LABEL => harness_id.to_string()
                        )
                        .increment(1);

                        warn!(
                            harness_id,
                            queue,
                            consecutive_errors,
                            error = %err,
                            "flow sampler failed to read queue depth"
                        );

                        if consecutive_errors >= config.max_consecutive_sampling_errors {
                            error!(
                                harness_id,
                                queue,
                                consecutive_errors,
                                "flow sampler giving up, gate stays open"
                            );
                            break;
                        }
                    }
                }
            }
        }
    }

    // Whatever ended the loop, producers must not stay blocked.
    set_gate_closed(&gate_closed_tx, false);
    emit_gate_closed_metric(harness_id, false);
}

/// Computes the next gate state given the current state and queue depth.
///
/// An open gate closes when the depth reaches the pause threshold; a closed gate
/// reopens only once the depth has drained to the resume threshold or below.
fn compute_next_gate_closed(
    currently_closed: bool,
    depth: u64,
    pause_at_depth: u64,
    resume_at_depth: u64,
) -> bool {
    if currently_closed {
        return depth > resume_at_depth;
    }

    depth >= pause_at_depth
}

fn emit_gate_closed_metric(harness_id: HarnessId, gate_closed: bool) {
    gauge!(
        MQBENCH_FLOW_GATE_CLOSED,
        HARNESS_ID_LABEL => harness_id.to_string()
    )
    .set(if gate_closed { 1.0 } else { 0.0 });
}

fn emit_transition_metric(harness_id: HarnessId, gate_closed: bool) {
    counter!(
        MQBENCH_FLOW_GATE_TRANSITIONS_TOTAL,
        HARNESS_ID_LABEL => harness_id.to_string(),
        DIRECTION_LABEL => if gate_closed { "pause" } else { "resume" }
    )
    .increment(1);
}

#[cfg(any(test, feature = "test-utils"))]
impl FlowController {
    /// Creates a flow controller without spawning a sampler task.
    pub fn new_for_test() -> Self {
        Self {
            inner: Arc::new(FlowControllerInner {
                gate_closed_tx: watch::channel(false).0,
                stop_tx: watch::channel(false).0,
                sampler_task: Mutex::new(None),
            }),
        }
    }

    /// Updates the gate state in tests.
    pub fn set_gate_closed_for_test(&self, gate_closed: bool) {
        set_gate_closed(&self.inner.gate_closed_tx, gate_closed);
    }
}
