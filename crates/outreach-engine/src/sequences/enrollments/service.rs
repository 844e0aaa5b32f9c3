use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::info;

use crate::config::EngineConfig;

use super::domain::{
    AutoEnrollmentConfig, AutoEnrollmentConfigRecord, Enrollment, EnrollmentId, EnrollmentStatus,
    EnrollmentTrigger, JobApplicationId, SequenceDefinition, SequenceId, StageId, StepId,
};
use super::query::{EnrollmentListParams, EnrollmentPage, EnrollmentQuery};
use super::repository::{
    AutoEnrollmentConfigStore, DirectoryError, EnrollmentStore, PipelineDirectory,
    SequenceDirectory, StoreError,
};
use super::state::InvalidTransition;

/// Attempts per mutation before a version race is surfaced as a conflict.
const VERSION_RETRY_LIMIT: usize = 3;

static ENROLLMENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_enrollment_id() -> EnrollmentId {
    let id = ENROLLMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    EnrollmentId(format!("enr-{id:06}"))
}

/// Engine tunables resolved from [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub bulk_concurrency: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            bulk_concurrency: 16,
            default_page_size: 25,
            max_page_size: 200,
        }
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            bulk_concurrency: config.bulk_concurrency.max(1),
            default_page_size: config.default_page_size.max(1),
            max_page_size: config.max_page_size.max(1),
        }
    }
}

/// Request payload for a single enrollment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEnrollment {
    pub sequence_id: SequenceId,
    pub job_application_id: JobApplicationId,
    #[serde(rename = "enrollmentTrigger", default)]
    pub trigger: EnrollmentTrigger,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Send-scheduler callback after executing a step.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceRequest {
    pub next_step_id: Option<StepId>,
    pub next_step_order: u32,
    #[serde(default)]
    pub next_execution_at: Option<DateTime<Utc>>,
}

/// PATCH surface: any subset of the mutable fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentUpdate {
    pub next_step_id: Option<StepId>,
    pub next_step_order: Option<u32>,
    #[serde(default)]
    pub next_execution_at: Option<DateTime<Utc>>,
    pub metadata: Option<BTreeMap<String, String>>,
}

/// Error raised by the enrollment engine.
#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("an active or paused enrollment already exists for sequence {sequence_id} and application {job_application_id}")]
    DuplicateEnrollment {
        sequence_id: SequenceId,
        job_application_id: JobApplicationId,
    },
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("enrollment {0} not found")]
    NotFound(EnrollmentId),
    #[error("unknown sequence {0}")]
    UnknownSequence(SequenceId),
    #[error("unknown job application {0}")]
    UnknownApplication(JobApplicationId),
    #[error("no auto-enrollment config for sequence {0}")]
    ConfigNotFound(SequenceId),
    #[error("stage {0} appears in both trigger and exclude lists")]
    OverlappingStages(StageId),
    #[error("enrollment {0} was modified concurrently")]
    Conflict(EnrollmentId),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Service composing the enrollment store, rule store, and the pipeline and
/// sequence-definition collaborators. All mutations return the updated
/// entity so callers never depend on cache invalidation.
pub struct EnrollmentEngine<S, C, P, D> {
    pub(crate) store: Arc<S>,
    pub(crate) configs: Arc<C>,
    pub(crate) pipeline: Arc<P>,
    pub(crate) sequences: Arc<D>,
    pub(crate) settings: EngineSettings,
    /// One async lock per application so stage-change events for the same
    /// application evaluate in arrival order.
    pub(crate) application_locks: Mutex<HashMap<JobApplicationId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S, C, P, D> EnrollmentEngine<S, C, P, D>
where
    S: EnrollmentStore + 'static,
    C: AutoEnrollmentConfigStore + 'static,
    P: PipelineDirectory + 'static,
    D: SequenceDirectory + 'static,
{
    pub fn new(
        store: Arc<S>,
        configs: Arc<C>,
        pipeline: Arc<P>,
        sequences: Arc<D>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            configs,
            pipeline,
            sequences,
            settings,
            application_locks: Mutex::new(HashMap::new()),
        }
    }

    fn sequence_definition(
        &self,
        sequence_id: &SequenceId,
    ) -> Result<SequenceDefinition, EnrollmentError> {
        self.sequences
            .sequence(sequence_id)?
            .ok_or_else(|| EnrollmentError::UnknownSequence(sequence_id.clone()))
    }

    fn execution_time(
        sequence: &SequenceDefinition,
        order: u32,
        from: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        sequence
            .step_at(order)
            .map(|step| from + Duration::hours(i64::from(step.delay_hours)))
    }

    /// Enroll one application into a sequence. Fails with
    /// [`EnrollmentError::DuplicateEnrollment`] when an open enrollment for
    /// the pair already exists.
    pub fn enroll(&self, request: NewEnrollment) -> Result<Enrollment, EnrollmentError> {
        let sequence = self.sequence_definition(&request.sequence_id)?;
        let application = self
            .pipeline
            .application(&request.job_application_id)?
            .ok_or_else(|| {
                EnrollmentError::UnknownApplication(request.job_application_id.clone())
            })?;

        let now = Utc::now();
        let mut enrollment = Enrollment {
            id: next_enrollment_id(),
            sequence_id: request.sequence_id.clone(),
            job_application_id: request.job_application_id.clone(),
            job_id: application.job_id,
            status: EnrollmentStatus::Active,
            trigger: request.trigger,
            current_step_id: sequence.step_at(0).map(|step| step.id.clone()),
            current_step_order: 0,
            next_execution_at: Self::execution_time(&sequence, 0, now),
            last_executed_at: None,
            completed_at: None,
            paused_at: None,
            enrolled_at: now,
            updated_at: now,
            removed: false,
            metadata: request.metadata,
            execution_log: Vec::new(),
            version: 0,
        };
        enrollment.log(now, None, format!("enrolled ({})", request.trigger.label()));

        match self.store.insert(enrollment) {
            Ok(stored) => {
                info!(
                    enrollment = %stored.id,
                    sequence = %stored.sequence_id,
                    application = %stored.job_application_id,
                    trigger = stored.trigger.label(),
                    "enrollment created"
                );
                Ok(stored)
            }
            Err(StoreError::OpenPairExists) => Err(EnrollmentError::DuplicateEnrollment {
                sequence_id: request.sequence_id,
                job_application_id: request.job_application_id,
            }),
            Err(other) => Err(other.into()),
        }
    }

    /// Fetch-transition-update cycle with a bounded retry on version races.
    /// The loser of a race re-reads the row; if the transition precondition
    /// no longer holds it observes `InvalidTransition`, never a silent
    /// overwrite.
    pub(crate) fn mutate<F>(
        &self,
        id: &EnrollmentId,
        mut apply: F,
    ) -> Result<Enrollment, EnrollmentError>
    where
        F: FnMut(&mut Enrollment) -> Result<(), EnrollmentError>,
    {
        for _ in 0..VERSION_RETRY_LIMIT {
            let mut enrollment = self
                .store
                .fetch(id)?
                .ok_or_else(|| EnrollmentError::NotFound(id.clone()))?;
            let expected = enrollment.version;
            apply(&mut enrollment)?;
            match self.store.update(enrollment, expected) {
                Ok(stored) => return Ok(stored),
                Err(StoreError::VersionMismatch) => continue,
                Err(other) => return Err(other.into()),
            }
        }
        Err(EnrollmentError::Conflict(id.clone()))
    }

    pub fn pause(&self, id: &EnrollmentId) -> Result<Enrollment, EnrollmentError> {
        let paused = self.mutate(id, |enrollment| {
            enrollment.pause(Utc::now())?;
            Ok(())
        })?;
        info!(enrollment = %paused.id, "enrollment paused");
        Ok(paused)
    }

    /// Resume a paused enrollment, recomputing `next_execution_at` from the
    /// current step's delay.
    pub fn resume(&self, id: &EnrollmentId) -> Result<Enrollment, EnrollmentError> {
        let resumed = self.mutate(id, |enrollment| {
            let sequence = self.sequence_definition(&enrollment.sequence_id)?;
            let now = Utc::now();
            let next = Self::execution_time(&sequence, enrollment.current_step_order, now);
            enrollment.resume(now, next)?;
            Ok(())
        })?;
        info!(enrollment = %resumed.id, "enrollment resumed");
        Ok(resumed)
    }

    /// Send-scheduler entry point: record a step execution and move the
    /// cursor, completing the enrollment past the last step.
    pub fn advance(
        &self,
        id: &EnrollmentId,
        request: AdvanceRequest,
    ) -> Result<Enrollment, EnrollmentError> {
        self.mutate(id, |enrollment| {
            let sequence = self.sequence_definition(&enrollment.sequence_id)?;
            enrollment.advance(
                Utc::now(),
                request.next_step_id.clone(),
                request.next_step_order,
                request.next_execution_at,
                sequence.len(),
            )?;
            Ok(())
        })
    }

    pub fn mark_failed(
        &self,
        id: &EnrollmentId,
        reason: &str,
    ) -> Result<Enrollment, EnrollmentError> {
        let failed = self.mutate(id, |enrollment| {
            enrollment.mark_failed(Utc::now(), reason)?;
            Ok(())
        })?;
        info!(enrollment = %failed.id, reason, "enrollment failed");
        Ok(failed)
    }

    /// PATCH semantics: step fields advance the cursor, metadata entries are
    /// merged. Either part may be absent.
    pub fn update(
        &self,
        id: &EnrollmentId,
        update: EnrollmentUpdate,
    ) -> Result<Enrollment, EnrollmentError> {
        self.mutate(id, |enrollment| {
            let now = Utc::now();
            if let Some(order) = update.next_step_order {
                let sequence = self.sequence_definition(&enrollment.sequence_id)?;
                enrollment.advance(
                    now,
                    update.next_step_id.clone(),
                    order,
                    update.next_execution_at,
                    sequence.len(),
                )?;
            }
            if let Some(metadata) = &update.metadata {
                enrollment
                    .metadata
                    .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
                enrollment.touch(now);
            }
            Ok(())
        })
    }

    /// Idempotent tombstone removal. Removing an already-removed enrollment
    /// is a no-op, not an error.
    pub fn remove(&self, id: &EnrollmentId) -> Result<Enrollment, EnrollmentError> {
        for _ in 0..VERSION_RETRY_LIMIT {
            let mut enrollment = self
                .store
                .fetch(id)?
                .ok_or_else(|| EnrollmentError::NotFound(id.clone()))?;
            if enrollment.removed {
                return Ok(enrollment);
            }
            let expected = enrollment.version;
            enrollment.remove(Utc::now());
            match self.store.update(enrollment, expected) {
                Ok(stored) => {
                    info!(enrollment = %stored.id, "enrollment removed");
                    return Ok(stored);
                }
                Err(StoreError::VersionMismatch) => continue,
                Err(other) => return Err(other.into()),
            }
        }
        Err(EnrollmentError::Conflict(id.clone()))
    }

    pub fn get(&self, id: &EnrollmentId) -> Result<Enrollment, EnrollmentError> {
        self.store
            .fetch(id)?
            .ok_or_else(|| EnrollmentError::NotFound(id.clone()))
    }

    /// Filtered, paginated listing. Raw parameters are normalized here so the
    /// store only ever sees sane pages and limits.
    pub fn list(&self, params: EnrollmentListParams) -> Result<EnrollmentPage, EnrollmentError> {
        let query = EnrollmentQuery {
            sequence_id: params.sequence_id,
            job_id: params.job_id,
            status: params.status,
            trigger: params.trigger,
            include_removed: params.include_removed,
            page: params.page.unwrap_or(1).max(1),
            limit: params
                .limit
                .unwrap_or(self.settings.default_page_size)
                .clamp(1, self.settings.max_page_size),
            sort_by: params.sort_by.unwrap_or_default(),
            sort_order: params.sort_order.unwrap_or_default(),
        };
        Ok(self.store.search(&query)?)
    }

    pub fn auto_config(
        &self,
        sequence_id: &SequenceId,
    ) -> Result<AutoEnrollmentConfigRecord, EnrollmentError> {
        self.configs
            .get(sequence_id)?
            .ok_or_else(|| EnrollmentError::ConfigNotFound(sequence_id.clone()))
    }

    /// Validate and store a sequence's auto-enrollment rules. Newly enabling
    /// with `include_existing_candidates` sweeps applications already sitting
    /// in a trigger stage (see `triggers.rs`).
    pub async fn set_auto_config(
        self: &Arc<Self>,
        sequence_id: &SequenceId,
        config: AutoEnrollmentConfig,
    ) -> Result<AutoEnrollmentConfigRecord, EnrollmentError> {
        if let Some(stage) = config.overlapping_stage() {
            return Err(EnrollmentError::OverlappingStages(stage.clone()));
        }
        let sequence = self.sequence_definition(sequence_id)?;
        let previous = self.configs.get(sequence_id)?;
        let record = self.configs.put(sequence_id, config.clone())?;

        let was_enabled = previous
            .map(|record| record.config.auto_enroll_enabled)
            .unwrap_or(false);
        if config.auto_enroll_enabled && !was_enabled && config.include_existing_candidates {
            self.sweep_existing(&sequence).await?;
        }
        Ok(record)
    }
}
