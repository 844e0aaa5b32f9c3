use std::collections::BTreeSet;

use super::domain::{
    AutoEnrollmentConfig, AutoEnrollmentConfigRecord, Enrollment, EnrollmentId,
    JobApplicationId, JobApplicationSnapshot, JobId, SequenceDefinition, SequenceId, StageId,
};
use super::query::{EnrollmentPage, EnrollmentQuery};

/// Durable record of every enrollment. Implementations must make
/// `insert`'s open-pair check atomic with the write: a check-then-insert
/// split across calls cannot uphold the at-most-one-open invariant under
/// concurrent creates.
pub trait EnrollmentStore: Send + Sync {
    /// Fails with [`StoreError::OpenPairExists`] when an active or paused
    /// enrollment already exists for the (sequence, application) pair.
    fn insert(&self, enrollment: Enrollment) -> Result<Enrollment, StoreError>;

    fn fetch(&self, id: &EnrollmentId) -> Result<Option<Enrollment>, StoreError>;

    /// Optimistic single-writer update: fails with
    /// [`StoreError::VersionMismatch`] if the stored version no longer equals
    /// `expected_version`. Bumps the version on success.
    fn update(&self, enrollment: Enrollment, expected_version: u64)
        -> Result<Enrollment, StoreError>;

    /// The open (active or paused) enrollment for a pair, if any.
    fn find_open(
        &self,
        sequence_id: &SequenceId,
        job_application_id: &JobApplicationId,
    ) -> Result<Option<Enrollment>, StoreError>;

    fn search(&self, query: &EnrollmentQuery) -> Result<EnrollmentPage, StoreError>;
}

/// Per-sequence auto-enrollment rule storage.
pub trait AutoEnrollmentConfigStore: Send + Sync {
    fn get(&self, sequence_id: &SequenceId)
        -> Result<Option<AutoEnrollmentConfigRecord>, StoreError>;

    /// Upserts the config, bumping the record version.
    fn put(
        &self,
        sequence_id: &SequenceId,
        config: AutoEnrollmentConfig,
    ) -> Result<AutoEnrollmentConfigRecord, StoreError>;

    /// All records with `auto_enroll_enabled = true`.
    fn enabled(&self) -> Result<Vec<AutoEnrollmentConfigRecord>, StoreError>;
}

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("an open enrollment already exists for this sequence and application")]
    OpenPairExists,
    #[error("record not found")]
    NotFound,
    #[error("record was modified concurrently")]
    VersionMismatch,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Sequence-definition collaborator: ordered steps and per-step delays used
/// to compute `next_execution_at`.
pub trait SequenceDirectory: Send + Sync {
    fn sequence(&self, id: &SequenceId) -> Result<Option<SequenceDefinition>, DirectoryError>;
}

/// Recruitment-pipeline collaborator: application lookup and stage
/// enumeration for the retroactive sweep.
pub trait PipelineDirectory: Send + Sync {
    fn application(
        &self,
        id: &JobApplicationId,
    ) -> Result<Option<JobApplicationSnapshot>, DirectoryError>;

    fn applications_in_stages(
        &self,
        job_id: &JobId,
        stages: &BTreeSet<StageId>,
    ) -> Result<Vec<JobApplicationId>, DirectoryError>;
}

/// Collaborator lookup error.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}
