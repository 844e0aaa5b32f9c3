//! Auto-enrollment: evaluation of pipeline stage-change events against the
//! per-sequence rule sets, plus the retroactive sweep that runs when a config
//! is newly enabled with `include_existing_candidates`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::bulk::{BulkEnrollmentRequest, BulkOutcome};
use super::domain::{
    Enrollment, EnrollmentTrigger, JobApplicationId, SequenceDefinition, StageChangeEvent,
};
use super::repository::{
    AutoEnrollmentConfigStore, EnrollmentStore, PipelineDirectory, SequenceDirectory,
};
use super::service::{EnrollmentEngine, EnrollmentError, NewEnrollment};

const SWEEP_ATTEMPTS: u32 = 3;
const SWEEP_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// What the evaluator did for one (sequence, application) pair. Events that
/// match nothing produce no outcome at all, which is what makes duplicate
/// delivery a no-op.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Enrolled { enrollment: Enrollment },
    Excluded { enrollment: Enrollment },
}

impl<S, C, P, D> EnrollmentEngine<S, C, P, D>
where
    S: EnrollmentStore + 'static,
    C: AutoEnrollmentConfigStore + 'static,
    P: PipelineDirectory + 'static,
    D: SequenceDirectory + 'static,
{
    fn application_lock(&self, id: &JobApplicationId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .application_locks
            .lock()
            .expect("application lock map poisoned");
        locks.entry(id.clone()).or_default().clone()
    }

    /// Drop the map entry once no other evaluation holds the lock. Checked
    /// under the map mutex, so a waiter that already cloned the `Arc` (strong
    /// count above two) keeps the entry alive and ordering intact.
    fn release_application_lock(&self, id: &JobApplicationId, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .application_locks
            .lock()
            .expect("application lock map poisoned");
        if Arc::strong_count(lock) == 2 {
            locks.remove(id);
        }
    }

    /// Evaluate one stage-change event. Exclude always wins over trigger for
    /// the same pass; enrollment races resolve to a silent skip so
    /// at-least-once delivery from the pipeline feed stays idempotent.
    pub async fn handle_stage_change(
        self: &Arc<Self>,
        event: StageChangeEvent,
    ) -> Result<Vec<TriggerOutcome>, EnrollmentError> {
        // Events for the same application serialize in arrival order; other
        // applications proceed concurrently.
        let lock = self.application_lock(&event.job_application_id);
        let guard = lock.lock().await;
        let result = self.evaluate_stage_change(&event);
        drop(guard);
        self.release_application_lock(&event.job_application_id, &lock);
        result
    }

    fn evaluate_stage_change(
        &self,
        event: &StageChangeEvent,
    ) -> Result<Vec<TriggerOutcome>, EnrollmentError> {
        let application = self
            .pipeline
            .application(&event.job_application_id)?
            .ok_or_else(|| {
                EnrollmentError::UnknownApplication(event.job_application_id.clone())
            })?;

        let mut outcomes = Vec::new();
        for record in self.configs.enabled()? {
            let Some(sequence) = self.sequences.sequence(&record.sequence_id)? else {
                continue;
            };
            if sequence.job_id != application.job_id {
                continue;
            }

            let open = self
                .store
                .find_open(&record.sequence_id, &event.job_application_id)?;

            if record.config.exclude_stages.contains(&event.new_stage_id) {
                if let Some(enrollment) = open {
                    let stage = event.new_stage_id.clone();
                    let updated = self.mutate(&enrollment.id, |enrollment| {
                        let now = Utc::now();
                        enrollment.unsubscribe(now)?;
                        enrollment.log(now, None, format!("excluded by stage {stage}"));
                        Ok(())
                    })?;
                    info!(
                        enrollment = %updated.id,
                        sequence = %record.sequence_id,
                        stage = %event.new_stage_id,
                        "enrollment unsubscribed by exclude stage"
                    );
                    outcomes.push(TriggerOutcome::Excluded { enrollment: updated });
                }
            } else if record.config.trigger_stages.contains(&event.new_stage_id) && open.is_none() {
                let mut metadata = BTreeMap::new();
                metadata.insert("enrolledBy".to_string(), "auto-trigger".to_string());
                metadata.insert("triggerStage".to_string(), event.new_stage_id.0.clone());
                match self.enroll(NewEnrollment {
                    sequence_id: record.sequence_id.clone(),
                    job_application_id: event.job_application_id.clone(),
                    trigger: EnrollmentTrigger::PipelineStage,
                    metadata,
                }) {
                    Ok(enrollment) => outcomes.push(TriggerOutcome::Enrolled { enrollment }),
                    // Lost a race with a concurrent create for the same pair;
                    // the invariant already holds.
                    Err(EnrollmentError::DuplicateEnrollment { .. }) => {}
                    Err(other) => return Err(other),
                }
            }
        }
        Ok(outcomes)
    }

    /// One-time sweep over applications already sitting in a trigger stage.
    /// Reuses the bulk orchestrator for deduplication. A config write racing
    /// the sweep is absorbed by re-running against the fresh rules, bounded.
    pub(crate) async fn sweep_existing(
        self: &Arc<Self>,
        sequence: &SequenceDefinition,
    ) -> Result<BulkOutcome, EnrollmentError> {
        for attempt in 1..=SWEEP_ATTEMPTS {
            let Some(current) = self.configs.get(&sequence.id)? else {
                return Ok(BulkOutcome::default());
            };
            if !current.config.auto_enroll_enabled || !current.config.include_existing_candidates {
                return Ok(BulkOutcome::default());
            }

            let candidates = self
                .pipeline
                .applications_in_stages(&sequence.job_id, &current.config.trigger_stages)?;
            let mut metadata = BTreeMap::new();
            metadata.insert("enrolledBy".to_string(), "auto-enroll-sweep".to_string());
            let outcome = self
                .enroll_bulk(
                    BulkEnrollmentRequest {
                        sequence_id: sequence.id.clone(),
                        job_application_ids: candidates,
                        enrollment_trigger: EnrollmentTrigger::Automatic,
                        metadata,
                    },
                    CancellationToken::new(),
                )
                .await?;

            match self.configs.get(&sequence.id)? {
                Some(after) if after.version == current.version => {
                    info!(
                        sequence = %sequence.id,
                        created = outcome.created.len(),
                        skipped = outcome.skipped.len(),
                        "retroactive enrollment sweep finished"
                    );
                    return Ok(outcome);
                }
                _ if attempt < SWEEP_ATTEMPTS => {
                    warn!(
                        sequence = %sequence.id,
                        attempt,
                        "auto-enrollment config changed during sweep, re-running"
                    );
                    tokio::time::sleep(SWEEP_RETRY_BACKOFF * attempt).await;
                }
                _ => {
                    warn!(
                        sequence = %sequence.id,
                        "auto-enrollment config kept changing during sweep, keeping last pass"
                    );
                    return Ok(outcome);
                }
            }
        }
        Ok(BulkOutcome::default())
    }
}
