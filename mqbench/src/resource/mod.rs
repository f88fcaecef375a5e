//! Transactional resource managers.

pub mod base;
pub mod local;
pub mod xa;

pub use base::{ResourceManager, ResourceManagerFactory};
pub use local::{LocalResourceManager, LocalTransactionFactory};
pub use xa::{XaResourceManager, XaTransactionFactory};
