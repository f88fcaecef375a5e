pub mod concurrency;
pub mod coordinator;
pub mod error;
pub mod flow;
mod macros;
pub mod messaging;
pub mod metrics;
pub mod pipeline;
pub mod resource;
pub mod stop;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
