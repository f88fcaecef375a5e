//! The load harness tying configuration, workers, and flow control together.

use std::sync::Arc;
use std::time::Duration;

use mqbench_config::shared::HarnessConfig;
use tracing::{error, info};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::error::{BenchResult, ErrorKind};
use crate::flow::{DepthSampler, FlowController};
use crate::resource::ResourceManagerFactory;
use crate::stop::StopController;
use crate::types::{Counter, HarnessId};
use crate::workers::consumer::ConsumerWorker;
use crate::workers::pool::{WorkerId, WorkerPool};
use crate::workers::producer::ProducerWorker;

#[derive(Debug)]
enum HarnessState {
    NotStarted,
    Started {
        pool: WorkerPool,
        stop: Arc<StopController>,
    },
}

/// A configured load run against one destination.
///
/// The harness spawns the configured producer and consumer workers, wires them to a
/// shared stop controller and completion counter, and optionally paces producers with
/// depth-based flow control. Workers run until a stop condition fires or shutdown is
/// requested.
#[derive(Debug)]
pub struct LoadHarness<F> {
    config: Arc<HarnessConfig>,
    factory: F,
    counter: Counter,
    flow: Option<FlowController>,
    state: HarnessState,
    shutdown_tx: ShutdownTx,
}

impl<F> LoadHarness<F>
where
    F: ResourceManagerFactory,
{
    /// Creates a harness in the not-started state.
    ///
    /// `factory` creates one resource manager per worker, so every worker owns its
    /// connection, session, and transaction lifecycle independently.
    pub fn new(config: HarnessConfig, factory: F) -> Self {
        // The receiver is dropped on purpose; workers subscribe to the sender when
        // they are spawned.
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            factory,
            counter: Counter::new(),
            flow: None,
            state: HarnessState::NotStarted,
            shutdown_tx,
        }
    }

    /// Identifier of this harness.
    pub fn id(&self) -> HarnessId {
        self.config.id
    }

    /// Returns a handle that can request shutdown of this harness.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Units of work committed so far across all workers.
    pub fn units_completed(&self) -> u64 {
        self.counter.value()
    }

    /// Enables depth-based producer flow control using `sampler` for depth readings.
    ///
    /// Requires a `flow_control` section in the configuration and must be called
    /// before [`LoadHarness::start`].
    pub fn enable_flow_control<S>(&mut self, sampler: S) -> BenchResult<()>
    where
        S: DepthSampler,
    {
        if matches!(self.state, HarnessState::Started { .. }) {
            bail!(
                ErrorKind::InvalidState,
                "Harness already started",
                "flow control must be enabled before start"
            );
        }

        let Some(flow_config) = self.config.flow_control.clone() else {
            bail!(
                ErrorKind::ConfigError,
                "Missing flow control configuration",
                "enable_flow_control requires a flow_control section in the harness config"
            );
        };

        self.flow = Some(FlowController::new(
            self.config.id,
            flow_config,
            self.config.destination.name.clone(),
            sampler,
            self.shutdown_tx.subscribe(),
        )?);

        Ok(())
    }

    /// Validates the configuration and spawns all workers.
    pub async fn start(&mut self) -> BenchResult<()> {
        if matches!(self.state, HarnessState::Started { .. }) {
            bail!(
                ErrorKind::InvalidState,
                "Harness already started",
                "a harness can be started only once"
            );
        }

        info!(
            harness_id = self.config.id,
            destination = %self.config.destination.name,
            producers = self.config.producers,
            consumers = self.config.consumers,
            "starting load harness"
        );

        self.config.validate()?;

        let stop = Arc::new(self.build_stop_controller()?);
        let pool = WorkerPool::new();

        for index in 0..self.config.producers {
            let worker_id = WorkerId::Producer(u32::from(index));
            let worker = ProducerWorker::new(
                worker_id,
                self.config.id,
                self.factory.create(self.config.destination.clone()),
                stop.clone(),
                self.counter.clone(),
                self.flow.clone(),
                self.shutdown_tx.subscribe(),
                self.config.messages_per_commit,
                self.config.message_size_bytes,
            );
            pool.spawn(worker_id, worker.run()).await;
        }

        for index in 0..self.config.consumers {
            let worker_id = WorkerId::Consumer(u32::from(index));
            let worker = ConsumerWorker::new(
                worker_id,
                self.config.id,
                self.factory.create(self.config.destination.clone()),
                stop.clone(),
                self.counter.clone(),
                self.shutdown_tx.subscribe(),
                self.config.messages_per_commit,
                Duration::from_millis(self.config.receive_timeout_ms),
            );
            pool.spawn(worker_id, worker.run()).await;
        }

        self.state = HarnessState::Started { pool, stop };

        Ok(())
    }

    /// Waits for every worker to finish and tears down flow control.
    ///
    /// Worker failures are aggregated; the flow sampler is stopped even when workers
    /// failed.
    pub async fn wait(self) -> BenchResult<()> {
        let HarnessState::Started { pool, stop: _ } = self.state else {
            info!("harness was not started, nothing to wait for");

            return Ok(());
        };

        info!(harness_id = self.config.id, "waiting for workers to complete");

        let mut errors = vec![];

        if let Err(err) = pool.wait_all().await {
            errors.push(err);
        }

        if let Some(flow) = &self.flow {
            flow.close().await;
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        info!(
            harness_id = self.config.id,
            units_completed = self.counter.value(),
            "load harness finished"
        );

        Ok(())
    }

    /// Requests shutdown of all workers and the flow sampler.
    pub fn shutdown(&self) {
        info!(harness_id = self.config.id, "trying to shut down the harness");

        if let HarnessState::Started { stop, .. } = &self.state {
            // Wake workers parked on the stop latch as well as on the shutdown signal.
            stop.stop();
        }

        if let Err(err) = self.shutdown_tx.shutdown() {
            error!("failed to send shutdown signal to the harness: {}", err);
            return;
        }

        info!("shutdown signal successfully sent to all workers");
    }

    /// Requests shutdown and waits for all workers to finish.
    pub async fn shutdown_and_wait(self) -> BenchResult<()> {
        self.shutdown();
        self.wait().await
    }

    /// Builds the stop controller described by the configuration.
    ///
    /// With both a count and a duration configured, the run continues until both have
    /// fired, letting consumers keep draining after producers hit their target.
    fn build_stop_controller(&self) -> BenchResult<StopController> {
        let stop_config = &self.config.stop;

        let mut controllers = vec![];
        if let Some(count) = stop_config.stop_after_count {
            controllers.push(StopController::after_count(count, self.counter.clone())?);
        }
        if let Some(secs) = stop_config.stop_after_secs {
            controllers.push(StopController::after_duration(Duration::from_secs(secs)));
        }

        Ok(match controllers.len() {
            0 => bail!(
                ErrorKind::ConfigError,
                "Missing stop condition",
                "the stop section must configure at least one condition"
            ),
            1 => controllers.swap_remove(0),
            _ => StopController::chain(controllers),
        })
    }
}
