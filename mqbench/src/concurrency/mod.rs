//! Concurrency primitives shared across workers.

pub mod shutdown;
