//! Enrollment lifecycle and auto-trigger engine.
//!
//! An [`Enrollment`] tracks one job application's progress through one
//! outreach sequence. All mutations flow through the status transitions in
//! `state.rs`; automatic enrollment reacts to pipeline stage-change events
//! per the rules in [`AutoEnrollmentConfig`]; bulk enrollment fans out with
//! bounded concurrency and itemized partial-failure reporting.

pub mod bulk;
pub mod domain;
pub mod memory;
pub mod query;
pub mod repository;
pub mod router;
pub mod state;
pub(crate) mod triggers;

pub mod service;

#[cfg(test)]
mod tests;

pub use bulk::{BulkEnrollmentRequest, BulkFailure, BulkOutcome};
pub use domain::{
    AutoEnrollmentConfig, AutoEnrollmentConfigRecord, Enrollment, EnrollmentId, EnrollmentStatus,
    EnrollmentTrigger, ExecutionLogEntry, JobApplicationId, JobApplicationSnapshot, JobId,
    SequenceDefinition, SequenceId, SequenceStep, StageChangeEvent, StageId, StepId,
};
pub use memory::{
    InMemoryConfigStore, InMemoryEnrollmentStore, InMemoryPipelineDirectory,
    InMemorySequenceDirectory,
};
pub use query::{EnrollmentListParams, EnrollmentPage, EnrollmentQuery, SortBy, SortOrder};
pub use repository::{
    AutoEnrollmentConfigStore, DirectoryError, EnrollmentStore, PipelineDirectory,
    SequenceDirectory, StoreError,
};
pub use router::enrollment_router;
pub use service::{
    AdvanceRequest, EngineSettings, EnrollmentEngine, EnrollmentError, EnrollmentUpdate,
    NewEnrollment,
};
pub use state::InvalidTransition;
pub use triggers::TriggerOutcome;
