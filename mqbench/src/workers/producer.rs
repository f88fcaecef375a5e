//! Producer worker publishing units of work until told to stop.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{BenchError, BenchResult, ErrorKind};
use crate::flow::FlowController;
use crate::metrics::{
    HARNESS_ID_LABEL, MQBENCH_MESSAGES_SENT_TOTAL, MQBENCH_UNITS_COMMITTED_TOTAL,
    MQBENCH_UNITS_ROLLED_BACK_TOTAL, WORKER_LABEL,
};
use crate::messaging::base::MessageProducer;
use crate::resource::ResourceManager;
use crate::stop::StopController;
use crate::types::{Counter, HarnessId, Message};
use crate::workers::pool::WorkerId;

/// Upper bound on a single gated wait before stop conditions are re-checked.
const GATE_RECHECK_PERIOD: Duration = Duration::from_secs(1);

/// Worker that produces messages in transacted units of work.
///
/// Each unit opens a transaction, sends a fixed batch of messages, and commits.
/// Committed units advance the shared counter; failed units are rolled back and the
/// worker moves on, except for failures that make further work pointless.
#[derive(Debug)]
pub struct ProducerWorker<R> {
    id: WorkerId,
    harness_id: HarnessId,
    resource: R,
    stop: Arc<StopController>,
    counter: Counter,
    flow: Option<FlowController>,
    shutdown_rx: ShutdownRx,
    messages_per_commit: u32,
    message_size_bytes: usize,
}

impl<R> ProducerWorker<R>
where
    R: ResourceManager + 'static,
{
    /// Creates a producer worker.
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        id: WorkerId,
        harness_id: HarnessId,
        resource: R,
        stop: Arc<StopController>,
        counter: Counter,
        flow: Option<FlowController>,
        shutdown_rx: ShutdownRx,
        messages_per_commit: u32,
        message_size_bytes: usize,
    ) -> Self {
        Self {
            id,
            harness_id,
            resource,
            stop,
            counter,
            flow,
            shutdown_rx,
            messages_per_commit,
            message_size_bytes,
        }
    }

    /// Runs the worker until a stop condition, shutdown, or fatal error.
    ///
    /// Resources are released before returning, whatever the outcome.
    pub async fn run(mut self) -> BenchResult<()> {
        info!(worker = %self.id, harness_id = self.harness_id, "producer worker started");

        let result = self.run_inner().await;
        self.resource.close().await;

        match &result {
            Ok(()) => info!(worker = %self.id, "producer worker finished"),
            Err(err) => warn!(worker = %self.id, error = %err, "producer worker failed"),
        }

        result
    }

    async fn run_inner(&mut self) -> BenchResult<()> {
        loop {
            if self.shutdown_rx.is_shutdown() {
                debug!(worker = %self.id, "producer stopping due to shutdown");
                break;
            }

            if !self.stop.keep_running() {
                debug!(worker = %self.id, "producer reached stop condition");
                break;
            }

            // A closed gate parks the worker, but stop and shutdown must still be
            // observed, so the wait is sliced.
            if let Some(flow) = &self.flow
                && flow.is_gate_closed()
            {
                tokio::select! {
                    biased;

                    _ = self.shutdown_rx.wait_for_shutdown() => {}
                    _ = self.stop.wait_for_done(GATE_RECHECK_PERIOD) => {}
                    _ = flow.wait_until_open() => {}
                }

                continue;
            }

            match self.send_unit().await {
                Ok(()) => {
                    self.counter.increment();
                    self.emit_unit_metrics();
                }
                Err(err) => self.recover_unit(err).await?,
            }
        }

        Ok(())
    }

    /// Sends one transacted batch of messages.
    async fn send_unit(&mut self) -> BenchResult<()> {
        self.resource.start_transaction().await?;

        let producer = self.resource.producer().await?;
        for _ in 0..self.messages_per_commit {
            let message = Message::with_random_payload(self.message_size_bytes);
            producer.send(message).await?;
        }

        self.resource.commit().await
    }

    /// Handles a failed unit of work.
    ///
    /// A begin failure means no further transactions can be expected to start, and a
    /// heuristic outcome leaves the system in a state the run cannot reason about;
    /// both end the worker. Everything else is rolled back and the worker continues.
    async fn recover_unit(&mut self, err: BenchError) -> BenchResult<()> {
        if matches!(
            err.kind(),
            ErrorKind::TransactionStartFailed | ErrorKind::HeuristicOutcome
        ) {
            return Err(err);
        }

        warn!(worker = %self.id, error = %err, "unit of work failed, rolling back");

        match self.resource.rollback().await {
            Ok(()) => {}
            // The failure already ended the transaction; nothing left to roll back.
            Err(rollback_err) if rollback_err.kind() == ErrorKind::InvalidState => {}
            Err(rollback_err) => return Err(rollback_err),
        }

        counter!(
            MQBENCH_UNITS_ROLLED_BACK_TOTAL,
            HARNESS_ID_LABEL => self.harness_id.to_string(),
            WORKER_LABEL => self.id.to_string()
        )
        .increment(1);

        Ok(())
    }

    fn emit_unit_metrics(&self) {
        counter!(
            MQBENCH_UNITS_COMMITTED_TOTAL,
            HARNESS_ID_LABEL => self.harness_id.to_string(),
            WORKER_LABEL => self.id.to_string()
        )
        .increment(1);

        counter!(
            MQBENCH_MESSAGES_SENT_TOTAL,
            HARNESS_ID_LABEL => self.harness_id.to_string(),
            WORKER_LABEL => self.id.to_string()
        )
        .increment(u64::from(self.messages_per_commit));
    }
}
