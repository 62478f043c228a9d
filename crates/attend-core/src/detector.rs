//! Face-count sampling for the detection cycle.
//!
//! Each detection tick asks a [`FaceCounter`] for one independent sample.
//! No smoothing is applied across ticks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// Strategy producing the number of faces visible at one detection tick.
pub trait FaceCounter: Send {
    fn sample(&mut self) -> u32;
}

/// Synthetic detector: uniform face count in `0..=max_faces`.
pub struct RandomFaceCounter {
    max_faces: u32,
    rng: StdRng,
}

impl RandomFaceCounter {
    pub fn new(max_faces: u32) -> Self {
        Self {
            max_faces,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic sampler for reproducible runs.
    pub fn with_seed(max_faces: u32, seed: u64) -> Self {
        Self {
            max_faces,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl FaceCounter for RandomFaceCounter {
    fn sample(&mut self) -> u32 {
        self.rng.gen_range(0..=self.max_faces)
    }
}

/// Replays a fixed sequence of face counts, then repeats the last one.
///
/// An empty script always reports zero faces.
pub struct ScriptedFaceCounter {
    script: VecDeque<u32>,
    last: u32,
}

impl ScriptedFaceCounter {
    pub fn new(script: impl IntoIterator<Item = u32>) -> Self {
        Self {
            script: script.into_iter().collect(),
            last: 0,
        }
    }
}

impl FaceCounter for ScriptedFaceCounter {
    fn sample(&mut self) -> u32 {
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        self.last
    }
}
