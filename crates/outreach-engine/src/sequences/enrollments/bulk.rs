//! Bulk enrollment fan-out: bounded concurrency, per-item retry, itemized
//! partial-failure reporting, and cooperative cancellation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::domain::{Enrollment, EnrollmentTrigger, JobApplicationId, SequenceId};
use super::repository::{
    AutoEnrollmentConfigStore, EnrollmentStore, PipelineDirectory, SequenceDirectory, StoreError,
};
use super::service::{EnrollmentEngine, EnrollmentError, NewEnrollment};

const BULK_ITEM_ATTEMPTS: u32 = 3;
const BULK_RETRY_BACKOFF: Duration = Duration::from_millis(25);
const CANCELLED_REASON: &str = "bulk enrollment cancelled";

/// Request payload for bulk enrollment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEnrollmentRequest {
    pub sequence_id: SequenceId,
    pub job_application_ids: Vec<JobApplicationId>,
    #[serde(default)]
    pub enrollment_trigger: EnrollmentTrigger,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Itemized result of a bulk call. Buckets preserve input order; one item's
/// failure never aborts its siblings.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub created: Vec<Enrollment>,
    pub skipped: Vec<JobApplicationId>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFailure {
    pub job_application_id: JobApplicationId,
    pub reason: String,
}

enum ItemOutcome {
    Created(Enrollment),
    Skipped(JobApplicationId),
    Failed(BulkFailure),
}

impl<S, C, P, D> EnrollmentEngine<S, C, P, D>
where
    S: EnrollmentStore + 'static,
    C: AutoEnrollmentConfigStore + 'static,
    P: PipelineDirectory + 'static,
    D: SequenceDirectory + 'static,
{
    /// Enroll many applications into one sequence. Already-open pairs count
    /// as skipped, not as errors. Items not yet started when `cancel` fires
    /// are reported as failures so the caller can re-issue the remainder;
    /// committed items stand.
    pub async fn enroll_bulk(
        self: &Arc<Self>,
        request: BulkEnrollmentRequest,
        cancel: CancellationToken,
    ) -> Result<BulkOutcome, EnrollmentError> {
        // An unknown sequence fails the whole call up front: no item could
        // succeed against it.
        self.sequences
            .sequence(&request.sequence_id)?
            .ok_or_else(|| EnrollmentError::UnknownSequence(request.sequence_id.clone()))?;

        let total = request.job_application_ids.len();
        let mut slots: Vec<Option<ItemOutcome>> = Vec::with_capacity(total);
        slots.resize_with(total, || None);

        let semaphore = Arc::new(Semaphore::new(self.settings.bulk_concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for (index, job_application_id) in request.job_application_ids.iter().enumerate() {
            let permit = if cancel.is_cancelled() {
                None
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    permit = Arc::clone(&semaphore).acquire_owned() => {
                        Some(permit.expect("bulk semaphore closed"))
                    }
                }
            };
            let Some(permit) = permit else {
                for (rest, id) in request.job_application_ids.iter().enumerate().skip(index) {
                    slots[rest] = Some(ItemOutcome::Failed(BulkFailure {
                        job_application_id: id.clone(),
                        reason: CANCELLED_REASON.to_string(),
                    }));
                }
                break;
            };

            let engine = Arc::clone(self);
            let sequence_id = request.sequence_id.clone();
            let job_application_id = job_application_id.clone();
            let trigger = request.enrollment_trigger;
            let metadata = request.metadata.clone();
            join_set.spawn(async move {
                let _permit = permit;
                let outcome = engine
                    .enroll_one(sequence_id, job_application_id, trigger, metadata)
                    .await;
                (index, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (index, item) = joined.expect("bulk enrollment task panicked");
            slots[index] = Some(item);
        }

        let mut outcome = BulkOutcome::default();
        for slot in slots {
            match slot.expect("bulk slot left unfilled") {
                ItemOutcome::Created(enrollment) => outcome.created.push(enrollment),
                ItemOutcome::Skipped(id) => outcome.skipped.push(id),
                ItemOutcome::Failed(failure) => outcome.failed.push(failure),
            }
        }
        info!(
            sequence = %request.sequence_id,
            created = outcome.created.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failed.len(),
            "bulk enrollment finished"
        );
        Ok(outcome)
    }

    async fn enroll_one(
        &self,
        sequence_id: SequenceId,
        job_application_id: JobApplicationId,
        trigger: EnrollmentTrigger,
        metadata: BTreeMap<String, String>,
    ) -> ItemOutcome {
        // Cheap pre-check; the insert path re-checks under the store's own
        // lock, so a racing create still resolves to a skip below.
        match self.store.find_open(&sequence_id, &job_application_id) {
            Ok(Some(_)) => return ItemOutcome::Skipped(job_application_id),
            Ok(None) | Err(_) => {}
        }

        for attempt in 1..=BULK_ITEM_ATTEMPTS {
            match self.enroll(NewEnrollment {
                sequence_id: sequence_id.clone(),
                job_application_id: job_application_id.clone(),
                trigger,
                metadata: metadata.clone(),
            }) {
                Ok(enrollment) => return ItemOutcome::Created(enrollment),
                Err(EnrollmentError::DuplicateEnrollment { .. }) => {
                    return ItemOutcome::Skipped(job_application_id)
                }
                Err(EnrollmentError::Store(StoreError::Unavailable(reason)))
                    if attempt < BULK_ITEM_ATTEMPTS =>
                {
                    debug!(
                        application = %job_application_id,
                        attempt,
                        reason,
                        "transient store error during bulk enrollment, retrying"
                    );
                    tokio::time::sleep(BULK_RETRY_BACKOFF * attempt).await;
                }
                Err(err) => {
                    return ItemOutcome::Failed(BulkFailure {
                        job_application_id,
                        reason: err.to_string(),
                    })
                }
            }
        }
        ItemOutcome::Failed(BulkFailure {
            job_application_id,
            reason: "store unavailable after retries".to_string(),
        })
    }
}
