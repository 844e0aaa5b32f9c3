use super::common::*;
use crate::sequences::enrollments::domain::{
    EnrollmentStatus, EnrollmentTrigger, SequenceId, StepId,
};
use crate::sequences::enrollments::repository::{EnrollmentStore, StoreError};
use crate::sequences::enrollments::service::{AdvanceRequest, EnrollmentError, NewEnrollment};
use crate::sequences::enrollments::EnrollmentId;
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

#[test]
fn manual_enrollment_starts_active_at_step_zero() {
    let h = harness();
    let enrollment = h.engine.enroll(manual_request(1)).expect("enrolls");

    assert_eq!(enrollment.status, EnrollmentStatus::Active);
    assert_eq!(enrollment.trigger, EnrollmentTrigger::Manual);
    assert_eq!(enrollment.current_step_order, 0);
    assert_eq!(
        enrollment.current_step_id,
        Some(StepId("step-intro".to_string()))
    );
    assert!(enrollment.next_execution_at.is_some());
    assert_eq!(enrollment.job_id, job_id());
    assert_eq!(enrollment.version, 1);
    assert_eq!(enrollment.execution_log.len(), 1);
}

#[test]
fn duplicate_open_enrollment_is_rejected() {
    let h = harness();
    h.engine.enroll(manual_request(1)).expect("first enrolls");

    match h.engine.enroll(manual_request(1)) {
        Err(EnrollmentError::DuplicateEnrollment {
            sequence_id,
            job_application_id,
        }) => {
            assert_eq!(sequence_id, super::common::sequence_id());
            assert_eq!(job_application_id, application(1));
        }
        other => panic!("expected duplicate enrollment, got {other:?}"),
    }
}

#[test]
fn unknown_references_are_surfaced() {
    let h = harness();

    let unknown_sequence = NewEnrollment {
        sequence_id: SequenceId("seq-missing".to_string()),
        ..manual_request(1)
    };
    assert!(matches!(
        h.engine.enroll(unknown_sequence),
        Err(EnrollmentError::UnknownSequence(_))
    ));

    let unknown_application = NewEnrollment {
        job_application_id: application(99),
        ..manual_request(1)
    };
    assert!(matches!(
        h.engine.enroll(unknown_application),
        Err(EnrollmentError::UnknownApplication(_))
    ));

    assert!(matches!(
        h.engine.pause(&EnrollmentId("enr-none".to_string())),
        Err(EnrollmentError::NotFound(_))
    ));
}

#[test]
fn pause_clears_next_execution_and_resume_restores_it() {
    let h = harness();
    let enrollment = h.engine.enroll(manual_request(1)).expect("enrolls");

    let paused = h.engine.pause(&enrollment.id).expect("pauses");
    assert_eq!(paused.status, EnrollmentStatus::Paused);
    assert!(paused.paused_at.is_some());
    assert!(paused.next_execution_at.is_none());

    let resumed = h.engine.resume(&paused.id).expect("resumes");
    assert_eq!(resumed.status, EnrollmentStatus::Active);
    assert!(resumed.paused_at.is_none());
    assert!(resumed.next_execution_at.is_some());
}

#[test]
fn pause_requires_active_status() {
    let h = harness();
    let enrollment = h.engine.enroll(manual_request(1)).expect("enrolls");
    h.engine.pause(&enrollment.id).expect("pauses");

    match h.engine.pause(&enrollment.id) {
        Err(EnrollmentError::InvalidTransition(invalid)) => {
            assert_eq!(invalid.status, EnrollmentStatus::Paused);
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
}

#[test]
fn paused_enrollment_cannot_complete_without_resuming() {
    let h = harness();
    let enrollment = h.engine.enroll(manual_request(1)).expect("enrolls");
    h.engine.pause(&enrollment.id).expect("pauses");

    let advance = AdvanceRequest {
        next_step_id: None,
        next_step_order: 3,
        next_execution_at: None,
    };
    assert!(matches!(
        h.engine.advance(&enrollment.id, advance),
        Err(EnrollmentError::InvalidTransition(_))
    ));
}

#[test]
fn advance_moves_cursor_then_completes_past_last_step() {
    let h = harness();
    let enrollment = h.engine.enroll(manual_request(1)).expect("enrolls");

    let next_due = Utc::now() + Duration::hours(48);
    let advanced = h
        .engine
        .advance(
            &enrollment.id,
            AdvanceRequest {
                next_step_id: Some(StepId("step-follow-up".to_string())),
                next_step_order: 1,
                next_execution_at: Some(next_due),
            },
        )
        .expect("advances");
    assert_eq!(advanced.status, EnrollmentStatus::Active);
    assert_eq!(advanced.current_step_order, 1);
    assert_eq!(advanced.next_execution_at, Some(next_due));
    assert!(advanced.last_executed_at.is_some());

    // Sequence has three steps; order 3 is past the end.
    let completed = h
        .engine
        .advance(
            &enrollment.id,
            AdvanceRequest {
                next_step_id: None,
                next_step_order: 3,
                next_execution_at: None,
            },
        )
        .expect("completes");
    assert_eq!(completed.status, EnrollmentStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert!(completed.next_execution_at.is_none());
    assert!(completed.current_step_id.is_none());
}

#[test]
fn mark_failed_records_reason_in_execution_log() {
    let h = harness();
    let enrollment = h.engine.enroll(manual_request(1)).expect("enrolls");

    let failed = h
        .engine
        .mark_failed(&enrollment.id, "mailbox bounced")
        .expect("fails");
    assert_eq!(failed.status, EnrollmentStatus::Failed);
    assert!(failed.next_execution_at.is_none());
    assert!(failed
        .execution_log
        .iter()
        .any(|entry| entry.note.contains("mailbox bounced")));
}

#[test]
fn update_merges_metadata_without_touching_cursor() {
    let h = harness();
    let enrollment = h.engine.enroll(manual_request(1)).expect("enrolls");

    let mut metadata = BTreeMap::new();
    metadata.insert("enrolledBy".to_string(), "recruiter-7".to_string());
    let updated = h
        .engine
        .update(
            &enrollment.id,
            crate::sequences::enrollments::EnrollmentUpdate {
                metadata: Some(metadata),
                ..Default::default()
            },
        )
        .expect("updates");

    assert_eq!(
        updated.metadata.get("enrolledBy").map(String::as_str),
        Some("recruiter-7")
    );
    assert_eq!(updated.current_step_order, 0);
    assert_eq!(updated.status, EnrollmentStatus::Active);
}

#[test]
fn remove_is_an_idempotent_tombstone() {
    let h = harness();
    let enrollment = h.engine.enroll(manual_request(1)).expect("enrolls");

    let removed = h.engine.remove(&enrollment.id).expect("removes");
    assert!(removed.removed);
    assert_eq!(removed.status, EnrollmentStatus::Unsubscribed);
    assert!(removed.next_execution_at.is_none());

    let again = h.engine.remove(&enrollment.id).expect("no-op removal");
    assert_eq!(again.version, removed.version);
    assert_eq!(again.updated_at, removed.updated_at);
}

#[test]
fn removed_pair_can_be_re_enrolled() {
    let h = harness();
    let enrollment = h.engine.enroll(manual_request(1)).expect("enrolls");
    h.engine.remove(&enrollment.id).expect("removes");

    let second = h.engine.enroll(manual_request(1)).expect("re-enrolls");
    assert_ne!(second.id, enrollment.id);
    assert_eq!(second.status, EnrollmentStatus::Active);
}

#[test]
fn stale_writer_observes_version_mismatch() {
    let h = harness();
    let enrollment = h.engine.enroll(manual_request(1)).expect("enrolls");

    // A concurrent writer moved the row first.
    h.engine.pause(&enrollment.id).expect("pauses");

    let stale = enrollment.clone();
    match h.store.update(stale, enrollment.version.wrapping_sub(1)) {
        Err(StoreError::VersionMismatch) => {}
        other => panic!("expected version mismatch, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_creates_keep_at_most_one_open_enrollment() {
    let h = harness();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&h.engine);
        handles.push(tokio::spawn(async move { engine.enroll(manual_request(2)) }));
    }

    let mut created = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.expect("task joins") {
            Ok(_) => created += 1,
            Err(EnrollmentError::DuplicateEnrollment { .. }) => duplicates += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(duplicates, 7);
}
