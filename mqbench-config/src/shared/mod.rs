//! Shared configuration types for mqbench harnesses.

mod base;
mod destination;
mod flow;
mod harness;
mod stop;

pub use base::ValidationError;
pub use destination::{DestinationKind, DestinationSpec};
pub use flow::FlowControlConfig;
pub use harness::HarnessConfig;
pub use stop::StopConfig;
