//! Recognition resolvers.
//!
//! A [`Recognizer`] turns a non-zero face count into a candidate identity
//! with a confidence score, or reports no match. Resolvers see only the
//! current tick; detection history never reaches them.

use crate::types::{RecognitionCandidate, UNKNOWN_IDENTITY};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Default confidence bounds for synthetic recognition (whole percent).
pub const DEFAULT_CONFIDENCE_RANGE: RangeInclusive<u16> = 70..=99;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecognizerError {
    #[error("roster is empty and the unknown identity is disabled")]
    EmptyRoster,
    #[error("invalid confidence range {min}..={max} (need min <= max <= 100)")]
    InvalidConfidenceRange { min: u16, max: u16 },
}

/// Strategy for resolving who is in front of the camera.
pub trait Recognizer: Send {
    /// Resolve a candidate for `face_count` (> 0) faces. `None` means no match.
    fn recognize(&mut self, face_count: u32) -> Option<RecognitionCandidate>;
}

/// Synthetic recognizer drawing uniformly from a roster.
pub struct RosterRecognizer {
    identities: Vec<String>,
    confidence: RangeInclusive<u8>,
    rng: StdRng,
}

impl RosterRecognizer {
    /// Build a recognizer over `roster`, optionally adding the `"unknown"` sentinel.
    pub fn new(
        roster: Vec<String>,
        include_unknown: bool,
        confidence: RangeInclusive<u16>,
    ) -> Result<Self, RecognizerError> {
        Self::with_rng(roster, include_unknown, confidence, StdRng::from_entropy())
    }

    /// Same as [`new`](Self::new) with a fixed seed.
    pub fn with_seed(
        roster: Vec<String>,
        include_unknown: bool,
        confidence: RangeInclusive<u16>,
        seed: u64,
    ) -> Result<Self, RecognizerError> {
        Self::with_rng(roster, include_unknown, confidence, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        roster: Vec<String>,
        include_unknown: bool,
        confidence: RangeInclusive<u16>,
        rng: StdRng,
    ) -> Result<Self, RecognizerError> {
        let (min, max) = (*confidence.start(), *confidence.end());
        if min > max || max > 100 {
            return Err(RecognizerError::InvalidConfidenceRange { min, max });
        }

        let mut identities: Vec<String> = roster
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        if include_unknown && !identities.iter().any(|n| n == UNKNOWN_IDENTITY) {
            identities.push(UNKNOWN_IDENTITY.to_string());
        }
        if identities.is_empty() {
            return Err(RecognizerError::EmptyRoster);
        }

        tracing::debug!(
            identities = identities.len(),
            min_confidence = min,
            max_confidence = max,
            "roster recognizer ready"
        );

        Ok(Self {
            identities,
            // Both bounds are <= 100 here.
            confidence: (min as u8)..=(max as u8),
            rng,
        })
    }

    /// Identities this recognizer may report.
    pub fn identities(&self) -> &[String] {
        &self.identities
    }
}

impl Recognizer for RosterRecognizer {
    fn recognize(&mut self, face_count: u32) -> Option<RecognitionCandidate> {
        if face_count == 0 {
            return None;
        }
        let identity = self.identities.choose(&mut self.rng)?.clone();
        let confidence = self.rng.gen_range(self.confidence.clone());
        Some(RecognitionCandidate::new(identity, confidence))
    }
}

/// Replays a fixed sequence of results, then repeats the last one.
pub struct ScriptedRecognizer {
    script: VecDeque<Option<RecognitionCandidate>>,
    last: Option<RecognitionCandidate>,
}

impl ScriptedRecognizer {
    pub fn new(script: impl IntoIterator<Item = Option<RecognitionCandidate>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            last: None,
        }
    }

    /// Always resolve to the same candidate.
    pub fn always(identity: &str, confidence: u8) -> Self {
        Self::new([Some(RecognitionCandidate::new(identity, confidence))])
    }
}

impl Recognizer for ScriptedRecognizer {
    fn recognize(&mut self, _face_count: u32) -> Option<RecognitionCandidate> {
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        self.last.clone()
    }
}
