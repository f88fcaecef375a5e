//! Configuration types for mqbench load harnesses.

pub mod shared;
