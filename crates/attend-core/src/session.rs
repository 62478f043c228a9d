//! Attendance session state machine.
//!
//! [`SessionMachine`] is synchronous and owns all session state plus the
//! ledger. Timers, media acquisition and the detection ticker live in the
//! caller; they report back through the handlers here, and every handler
//! runs to completion before the next one starts.
//!
//! Staleness is tracked with two counters. Each activation bumps the
//! session [`Generation`], and ticks carry the generation they were
//! sampled in. Each accepted capture gets a fresh ticket id, and only the
//! ticket currently in flight can commit.

use crate::ledger::Ledger;
use crate::recognizer::Recognizer;
use crate::types::{AttendanceRecord, RecognitionCandidate, SessionPhase, SessionSnapshot};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Activation counter. Bumped on every successful `activate()`.
pub type Generation = u64;

/// Commands rejected synchronously, without any state change.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("system already active")]
    AlreadyActive,
    #[error("system not active")]
    NotActive,
    #[error("no faces detected")]
    NoFacesDetected,
    #[error("no recognition candidate")]
    NoCandidate,
}

/// Handle for one accepted capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTicket {
    pub id: u64,
    pub generation: Generation,
}

/// Outcome of a valid capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureRequest {
    /// A new capture is now in flight.
    Started(CaptureTicket),
    /// A capture was already in flight; nothing was queued.
    AlreadyInFlight,
}

/// Outcome of a capture's delayed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureCompletion {
    Committed(AttendanceRecord),
    /// The session stopped or restarted, or another capture superseded it.
    Stale,
}

/// Outcome of a detection tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Applied(SessionPhase),
    /// Inactive session or a tick from an earlier generation.
    Dropped,
}

struct InFlightCapture {
    ticket: CaptureTicket,
    candidate: RecognitionCandidate,
}

/// Single-writer owner of session state and the attendance ledger.
pub struct SessionMachine<R> {
    recognizer: R,
    active: bool,
    generation: Generation,
    detected_face_count: u32,
    candidate: Option<RecognitionCandidate>,
    in_flight: Option<InFlightCapture>,
    next_capture_id: u64,
    ledger: Ledger,
}

impl<R: Recognizer> SessionMachine<R> {
    pub fn new(recognizer: R) -> Self {
        Self {
            recognizer,
            active: false,
            generation: 0,
            detected_face_count: 0,
            candidate: None,
            in_flight: None,
            next_capture_id: 1,
            ledger: Ledger::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        if !self.active {
            SessionPhase::Inactive
        } else if self.in_flight.is_some() {
            SessionPhase::Capturing
        } else if self.detected_face_count > 0 && self.candidate.is_some() {
            SessionPhase::ActiveCandidate
        } else {
            SessionPhase::ActiveIdle
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase(),
            active: self.active,
            detected_face_count: self.detected_face_count,
            candidate: self.candidate.clone(),
            capturing: self.in_flight.is_some(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Enter `ActiveIdle` once the media source has been acquired.
    pub fn activate(&mut self) -> Result<Generation, CommandError> {
        if self.active {
            return Err(CommandError::AlreadyActive);
        }
        self.generation += 1;
        self.active = true;
        self.detected_face_count = 0;
        self.candidate = None;
        self.in_flight = None;
        tracing::info!(generation = self.generation, "session activated");
        Ok(self.generation)
    }

    /// Return to `Inactive`. An in-flight capture becomes stale.
    pub fn deactivate(&mut self) -> Result<(), CommandError> {
        if !self.active {
            return Err(CommandError::NotActive);
        }
        if let Some(pending) = self.in_flight.take() {
            tracing::debug!(
                capture_id = pending.ticket.id,
                "capture in flight at stop; result will be discarded"
            );
        }
        self.active = false;
        self.detected_face_count = 0;
        self.candidate = None;
        tracing::info!(generation = self.generation, "session deactivated");
        Ok(())
    }

    /// Apply one detection sample taken during `generation`.
    pub fn on_detection_tick(&mut self, generation: Generation, face_count: u32) -> TickOutcome {
        if !self.active || generation != self.generation {
            tracing::trace!(
                generation,
                current = self.generation,
                active = self.active,
                "dropping detection tick"
            );
            return TickOutcome::Dropped;
        }

        self.detected_face_count = face_count;
        self.candidate = if face_count == 0 {
            None
        } else {
            self.recognizer.recognize(face_count)
        };

        tracing::debug!(
            faces = face_count,
            candidate = ?self.candidate.as_ref().map(|c| (&c.identity, c.confidence)),
            "detection tick"
        );
        TickOutcome::Applied(self.phase())
    }

    /// Validate a capture intent and, if accepted, put a capture in flight.
    ///
    /// The candidate is frozen at this point; later ticks do not change
    /// what the capture commits.
    pub fn request_capture(&mut self) -> Result<CaptureRequest, CommandError> {
        if !self.active {
            return Err(CommandError::NotActive);
        }
        if self.detected_face_count == 0 {
            return Err(CommandError::NoFacesDetected);
        }
        if self.in_flight.is_some() {
            return Ok(CaptureRequest::AlreadyInFlight);
        }
        let candidate = self.candidate.clone().ok_or(CommandError::NoCandidate)?;

        let ticket = CaptureTicket {
            id: self.next_capture_id,
            generation: self.generation,
        };
        self.next_capture_id += 1;

        tracing::info!(
            capture_id = ticket.id,
            identity = %candidate.identity,
            confidence = candidate.confidence,
            "capture started"
        );
        self.in_flight = Some(InFlightCapture { ticket, candidate });
        Ok(CaptureRequest::Started(ticket))
    }

    /// Finish a capture after its processing delay.
    pub fn complete_capture(
        &mut self,
        ticket: CaptureTicket,
        completed_at: DateTime<Utc>,
    ) -> CaptureCompletion {
        let current = self.active
            && ticket.generation == self.generation
            && self
                .in_flight
                .as_ref()
                .is_some_and(|pending| pending.ticket == ticket);
        if !current {
            tracing::debug!(
                capture_id = ticket.id,
                generation = ticket.generation,
                "stale capture discarded"
            );
            return CaptureCompletion::Stale;
        }

        let Some(pending) = self.in_flight.take() else {
            return CaptureCompletion::Stale;
        };
        let record = AttendanceRecord::present(&pending.candidate, completed_at);
        self.ledger.append(record.clone());

        tracing::info!(
            capture_id = ticket.id,
            name = %record.name,
            confidence = ?record.confidence,
            ledger_len = self.ledger.len(),
            "attendance marked"
        );
        CaptureCompletion::Committed(record)
    }
}
