//! Append-only attendance ledger.

use crate::types::{AttendanceRecord, AttendanceStatus};

/// Ordered attendance records, in capture-completion order.
///
/// Only the session state machine holds a mutable ledger; everything
/// else sees `all()` or a cloned copy of it.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    records: Vec<AttendanceRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record at the end.
    pub fn append(&mut self, record: AttendanceRecord) {
        self.records.push(record);
    }

    /// All records in insertion order.
    pub fn all(&self) -> &[AttendanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Number of `Present` records ("total present" in the status panel).
pub fn present_count(records: &[AttendanceRecord]) -> usize {
    records
        .iter()
        .filter(|r| r.status == AttendanceStatus::Present)
        .count()
}
