//! attend-core — Attendance session core.
//!
//! Owns the session state machine that gates capture against live
//! detection results, the append-only attendance ledger, and the
//! pluggable face-count and recognition strategies that feed it.

pub mod detector;
pub mod ledger;
pub mod recognizer;
pub mod session;
pub mod types;

pub use detector::{FaceCounter, RandomFaceCounter, ScriptedFaceCounter};
pub use ledger::{present_count, Ledger};
pub use recognizer::{
    Recognizer, RecognizerError, RosterRecognizer, ScriptedRecognizer, DEFAULT_CONFIDENCE_RANGE,
};
pub use session::{
    CaptureCompletion, CaptureRequest, CaptureTicket, CommandError, Generation, SessionMachine,
    TickOutcome,
};
pub use types::{
    AttendanceRecord, AttendanceStatus, RecognitionCandidate, SessionPhase, SessionSnapshot,
    UNKNOWN_IDENTITY,
};
