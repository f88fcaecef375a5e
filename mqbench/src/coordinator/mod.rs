//! Distributed transaction coordination.

pub mod base;
pub mod memory;

pub use base::{
    BranchOutcome, CoordinatedTransaction, TransactionBranch, TransactionCoordinator,
};
pub use memory::{InMemoryCoordinator, InMemoryTransaction};
