//! Load worker tasks and the pool that owns them.

pub mod consumer;
pub mod pool;
pub mod producer;

pub use consumer::ConsumerWorker;
pub use pool::{WorkerId, WorkerPool};
pub use producer::ProducerWorker;
