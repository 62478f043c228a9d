use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity reported for a face that does not match anyone on the roster.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Attendance outcome recorded for a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
        }
    }
}

/// One committed attendance entry. Immutable once appended to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub status: AttendanceStatus,
    /// Recognition confidence in [0, 1]. Only set for `Present` records.
    pub confidence: Option<f32>,
}

impl AttendanceRecord {
    /// Build a `Present` record from a recognition candidate.
    pub fn present(candidate: &RecognitionCandidate, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: candidate.identity.clone(),
            timestamp,
            status: AttendanceStatus::Present,
            confidence: Some(candidate.normalized()),
        }
    }
}

/// Identity resolved for the faces in the latest detection tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionCandidate {
    pub identity: String,
    /// Confidence score as a whole percentage (0–100).
    pub confidence: u8,
}

impl RecognitionCandidate {
    pub fn new(identity: impl Into<String>, confidence: u8) -> Self {
        Self {
            identity: identity.into(),
            confidence: confidence.min(100),
        }
    }

    /// Confidence mapped to [0, 1].
    pub fn normalized(&self) -> f32 {
        f32::from(self.confidence.min(100)) / 100.0
    }

    pub fn is_unknown(&self) -> bool {
        self.identity == UNKNOWN_IDENTITY
    }
}

/// Coarse session phase, derived from [`SessionSnapshot`] fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Inactive,
    ActiveIdle,
    ActiveCandidate,
    Capturing,
}

/// Read-only view of the session handed to presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub active: bool,
    pub detected_face_count: u32,
    pub candidate: Option<RecognitionCandidate>,
    pub capturing: bool,
}
