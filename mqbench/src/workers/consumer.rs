//! Consumer worker draining messages in transacted units of work.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{BenchError, BenchResult, ErrorKind};
use crate::metrics::{
    HARNESS_ID_LABEL, MQBENCH_MESSAGES_RECEIVED_TOTAL, MQBENCH_MESSAGE_LATENCY_SECONDS,
    MQBENCH_UNITS_COMMITTED_TOTAL, MQBENCH_UNITS_ROLLED_BACK_TOTAL, WORKER_LABEL,
};
use crate::messaging::base::MessageConsumer;
use crate::resource::ResourceManager;
use crate::stop::StopController;
use crate::types::{Counter, HarnessId};
use crate::workers::pool::WorkerId;

/// Worker that consumes messages in transacted units of work.
///
/// Each unit opens a transaction, receives up to a fixed batch of messages, and
/// commits. Only units that actually received something advance the shared counter,
/// so an idle consumer polling an empty queue never satisfies a count stop condition.
/// Consumers are never gated by flow control.
#[derive(Debug)]
pub struct ConsumerWorker<R> {
    id: WorkerId,
    harness_id: HarnessId,
    resource: R,
    stop: Arc<StopController>,
    counter: Counter,
    shutdown_rx: ShutdownRx,
    messages_per_commit: u32,
    receive_timeout: Duration,
}

impl<R> ConsumerWorker<R>
where
    R: ResourceManager + 'static,
{
    /// Creates a consumer worker.
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        id: WorkerId,
        harness_id: HarnessId,
        resource: R,
        stop: Arc<StopController>,
        counter: Counter,
        shutdown_rx: ShutdownRx,
        messages_per_commit: u32,
        receive_timeout: Duration,
    ) -> Self {
        Self {
            id,
            harness_id,
            resource,
            stop,
            counter,
            shutdown_rx,
            messages_per_commit,
            receive_timeout,
        }
    }

    /// Runs the worker until a stop condition, shutdown, or fatal error.
    ///
    /// Resources are released before returning, whatever the outcome.
    pub async fn run(mut self) -> BenchResult<()> {
        info!(worker = %self.id, harness_id = self.harness_id, "consumer worker started");

        let result = self.run_inner().await;
        self.resource.close().await;

        match &result {
            Ok(()) => info!(worker = %self.id, "consumer worker finished"),
            Err(err) => warn!(worker = %self.id, error = %err, "consumer worker failed"),
        }

        result
    }

    async fn run_inner(&mut self) -> BenchResult<()> {
        loop {
            if self.shutdown_rx.is_shutdown() {
                debug!(worker = %self.id, "consumer stopping due to shutdown");
                break;
            }

            if !self.stop.keep_running() {
                debug!(worker = %self.id, "consumer reached stop condition");
                break;
            }

            match self.receive_unit().await {
                Ok(received) if received > 0 => {
                    self.counter.increment();
                    self.emit_unit_metrics(received);
                }
                // An empty unit is not progress; loop and poll again.
                Ok(_) => {}
                Err(err) => self.recover_unit(err).await?,
            }
        }

        Ok(())
    }

    /// Receives one transacted batch of messages, returning how many arrived.
    ///
    /// The batch is cut short as soon as a receive times out, so a drained queue
    /// commits whatever was gathered instead of waiting out the full batch.
    async fn receive_unit(&mut self) -> BenchResult<u64> {
        self.resource.start_transaction().await?;

        let consumer = self.resource.consumer().await?;
        let mut received = 0u64;
        for _ in 0..self.messages_per_commit {
            match consumer.receive(self.receive_timeout).await? {
                Some(message) => {
                    received += 1;
                    self.record_latency(&message);
                }
                None => break,
            }
        }

        self.resource.commit().await?;

        Ok(received)
    }

    /// Handles a failed unit of work; mirrors the producer's recovery policy.
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

    fn record_latency(&self, message: &crate::types::Message) {
        let latency = Utc::now().signed_duration_since(message.created_at);
        // Clock skew between producer and consumer can produce negative readings.
        let seconds = (latency.num_milliseconds().max(0) as f64) / 1000.0;

        histogram!(
            MQBENCH_MESSAGE_LATENCY_SECONDS,
            HARNESS_ID_LABEL => self.harness_id.to_string()
        )
        .record(seconds);
    }

    fn emit_unit_metrics(&self, received: u64) {
        counter!(
            MQBENCH_UNITS_COMMITTED_TOTAL,
            HARNESS_ID_LABEL => self.harness_id.to_string(),
            WORKER_LABEL => self.id.to_string()
        )
        .increment(1);

        counter!(
            MQBENCH_MESSAGES_RECEIVED_TOTAL,
            HARNESS_ID_LABEL => self.harness_id.to_string(),
            WORKER_LABEL => self.id.to_string()
        )
        .increment(received);
    }
}
