//! Depth sampler with scripted readings for flow control tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::bail;
use crate::error::{BenchResult, ErrorKind};
use crate::flow::DepthSampler;

#[derive(Debug, Clone, Copy)]
enum Sample {
    Depth(u64),
    Error,
}

/// Sampler that replays a scripted sequence of depth readings.
///
/// Once the script runs out, every further sample returns the fallback depth. Cloning
/// is cheap; all clones share the same script.
#[derive(Debug, Clone)]
pub struct ScriptedDepthSampler {
    script: Arc<Mutex<VecDeque<Sample>>>,
    fallback_depth: u64,
}

impl ScriptedDepthSampler {
    /// Creates a sampler with an empty script and the given fallback depth.
    pub fn new(fallback_depth: u64) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback_depth,
        }
    }

    /// Appends a successful depth reading to the script.
    pub fn push_depth(&self, depth: u64) {
        self.script.lock().unwrap().push_back(Sample::Depth(depth));
    }

    /// Appends a failed reading to the script.
    pub fn push_error(&self) {
        self.script.lock().unwrap().push_back(Sample::Error);
    }

    /// Number of scripted readings not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

impl DepthSampler for ScriptedDepthSampler {
    async fn sample_depth(&self, _queue: &str) -> BenchResult<u64> {
        let sample = self.script.lock().unwrap().pop_front();

        match sample {
            Some(Sample::Depth(depth)) => Ok(depth),
            Some(Sample::Error) => {
                bail!(
                    ErrorKind::SamplingFailed,
                    "Depth sampling failed",
                    "sampling failure injected by test"
                );
            }
            None => Ok(self.fallback_depth),
        }
    }
}
