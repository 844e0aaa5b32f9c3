//! Status transitions for a single enrollment.
//!
//! `active ↔ paused` is the only two-way edge. `completed`, `failed`, and
//! `unsubscribed` are terminal. A paused enrollment cannot complete or fail
//! directly; it must resume first. The exclusion and removal paths may
//! unsubscribe a paused enrollment without resuming it.

use chrono::{DateTime, Utc};

use super::domain::{Enrollment, EnrollmentStatus, ExecutionLogEntry, StepId};

/// A requested transition that the enrollment's current status forbids.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} an enrollment in status {}", .status.label())]
pub struct InvalidTransition {
    pub action: &'static str,
    pub status: EnrollmentStatus,
}

impl Enrollment {
    fn require(&self, action: &'static str, allowed: &[EnrollmentStatus]) -> Result<(), InvalidTransition> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(InvalidTransition {
                action,
                status: self.status,
            })
        }
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    pub(crate) fn log(&mut self, at: DateTime<Utc>, step_id: Option<StepId>, note: impl Into<String>) {
        self.execution_log.push(ExecutionLogEntry {
            at,
            step_id,
            note: note.into(),
        });
    }

    /// `active → paused`. Clears `next_execution_at` so the send-scheduler
    /// stops picking the enrollment up.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.require("pause", &[EnrollmentStatus::Active])?;
        self.status = EnrollmentStatus::Paused;
        self.paused_at = Some(now);
        self.next_execution_at = None;
        self.touch(now);
        Ok(())
    }

    /// `paused → active`. The engine recomputes `next_execution_at` from the
    /// current step's delay before calling this.
    pub fn resume(
        &mut self,
        now: DateTime<Utc>,
        next_execution_at: Option<DateTime<Utc>>,
    ) -> Result<(), InvalidTransition> {
        self.require("resume", &[EnrollmentStatus::Paused])?;
        self.status = EnrollmentStatus::Active;
        self.paused_at = None;
        self.next_execution_at = next_execution_at;
        self.touch(now);
        Ok(())
    }

    /// Move the step cursor after the send-scheduler executed a step. Passing
    /// a step order at or past the sequence length completes the enrollment.
    pub fn advance(
        &mut self,
        now: DateTime<Utc>,
        next_step_id: Option<StepId>,
        next_step_order: u32,
        next_execution_at: Option<DateTime<Utc>>,
        sequence_len: u32,
    ) -> Result<(), InvalidTransition> {
        self.require("advance", &[EnrollmentStatus::Active])?;
        self.last_executed_at = Some(now);
        self.current_step_order = next_step_order;
        if next_step_order >= sequence_len {
            self.status = EnrollmentStatus::Completed;
            self.completed_at = Some(now);
            self.current_step_id = None;
            self.next_execution_at = None;
        } else {
            self.current_step_id = next_step_id;
            self.next_execution_at = next_execution_at;
        }
        self.touch(now);
        Ok(())
    }

    /// `active → failed`, recording the reason in the execution log.
    pub fn mark_failed(&mut self, now: DateTime<Utc>, reason: &str) -> Result<(), InvalidTransition> {
        self.require("fail", &[EnrollmentStatus::Active])?;
        self.status = EnrollmentStatus::Failed;
        self.next_execution_at = None;
        self.log(now, self.current_step_id.clone(), format!("failed: {reason}"));
        self.touch(now);
        Ok(())
    }

    /// `active/paused → unsubscribed`. Used by candidate opt-out and by the
    /// exclude-stage path, which may act on paused enrollments too.
    pub fn unsubscribe(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.require(
            "unsubscribe",
            &[EnrollmentStatus::Active, EnrollmentStatus::Paused],
        )?;
        self.status = EnrollmentStatus::Unsubscribed;
        self.paused_at = None;
        self.next_execution_at = None;
        self.touch(now);
        Ok(())
    }

    /// Tombstone the enrollment. Open enrollments are unsubscribed first;
    /// already-removed ones are left untouched. Never an error.
    pub fn remove(&mut self, now: DateTime<Utc>) {
        if self.removed {
            return;
        }
        if self.status.is_open() {
            self.status = EnrollmentStatus::Unsubscribed;
            self.paused_at = None;
            self.next_execution_at = None;
        }
        self.removed = true;
        self.log(now, None, "removed");
        self.touch(now);
    }
}
