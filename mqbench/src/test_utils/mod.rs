//! Shared helpers for unit and integration tests.

pub mod sampler;

pub use sampler::ScriptedDepthSampler;
