use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for enrollment records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnrollmentId(pub String);

/// Identifier wrapper for outreach sequences.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceId(pub String);

/// Identifier for one candidate's application to one job, the enrollment
/// subject. A candidate with several applications enrolls per application.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobApplicationId(pub String);

/// Identifier wrapper for jobs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

/// Identifier wrapper for recruitment-pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StageId(pub String);

/// Identifier wrapper for sequence steps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

macro_rules! impl_id_display {
    ($($id:ident),+ $(,)?) => {
        $(impl fmt::Display for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })+
    };
}

impl_id_display!(EnrollmentId, SequenceId, JobApplicationId, JobId, StageId, StepId);

/// Lifecycle status of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Paused,
    Completed,
    Failed,
    Unsubscribed,
}

impl EnrollmentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Paused => "paused",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Failed => "failed",
            EnrollmentStatus::Unsubscribed => "unsubscribed",
        }
    }

    /// Open enrollments block re-enrollment for their (sequence, application)
    /// pair; terminal ones do not.
    pub const fn is_open(self) -> bool {
        matches!(self, EnrollmentStatus::Active | EnrollmentStatus::Paused)
    }
}

/// Provenance of an enrollment, immutable after creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentTrigger {
    #[default]
    Manual,
    Automatic,
    PipelineStage,
}

impl EnrollmentTrigger {
    pub const fn label(self) -> &'static str {
        match self {
            EnrollmentTrigger::Manual => "manual",
            EnrollmentTrigger::Automatic => "automatic",
            EnrollmentTrigger::PipelineStage => "pipeline_stage",
        }
    }
}

/// Append-style record of what happened to an enrollment. Step-execution
/// entries are owned by the external send-scheduler; the engine only appends
/// lifecycle notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    pub note: String,
}

/// One candidate application's participation in one outreach sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub sequence_id: SequenceId,
    pub job_application_id: JobApplicationId,
    /// Denormalized from the pipeline directory at creation so reads can
    /// filter by job without an extra lookup.
    pub job_id: JobId,
    pub status: EnrollmentStatus,
    #[serde(rename = "enrollmentTrigger")]
    pub trigger: EnrollmentTrigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<StepId>,
    pub current_step_order: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_execution_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Tombstone: removal never physically deletes, so audit history for the
    /// (sequence, application) pair survives.
    pub removed: bool,
    pub metadata: BTreeMap<String, String>,
    pub execution_log: Vec<ExecutionLogEntry>,
    /// Optimistic-concurrency stamp, bumped by the store on every update.
    pub version: u64,
}

/// Per-sequence auto-enrollment rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoEnrollmentConfig {
    pub auto_enroll_enabled: bool,
    #[serde(default)]
    pub trigger_stages: BTreeSet<StageId>,
    #[serde(default)]
    pub exclude_stages: BTreeSet<StageId>,
    #[serde(default)]
    pub include_existing_candidates: bool,
}

impl AutoEnrollmentConfig {
    /// First stage listed as both trigger and exclude, if any. Such configs
    /// are rejected at write time.
    pub fn overlapping_stage(&self) -> Option<&StageId> {
        self.trigger_stages.intersection(&self.exclude_stages).next()
    }
}

/// Stored auto-enrollment config with a version stamp so a sweep can detect a
/// config change that raced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoEnrollmentConfigRecord {
    pub sequence_id: SequenceId,
    #[serde(flatten)]
    pub config: AutoEnrollmentConfig,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// One step of an outreach sequence, as exposed by the sequence-definition
/// collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceStep {
    pub id: StepId,
    pub order: u32,
    pub delay_hours: u32,
}

/// Sequence definition snapshot: ordered steps plus the job the sequence is
/// scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceDefinition {
    pub id: SequenceId,
    pub job_id: JobId,
    pub name: String,
    pub steps: Vec<SequenceStep>,
}

impl SequenceDefinition {
    pub fn step_at(&self, order: u32) -> Option<&SequenceStep> {
        self.steps.iter().find(|step| step.order == order)
    }

    pub fn len(&self) -> u32 {
        self.steps.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Pipeline-side view of a job application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobApplicationSnapshot {
    pub id: JobApplicationId,
    pub job_id: JobId,
    pub current_stage_id: StageId,
}

/// Pipeline stage-change event consumed from the recruitment-pipeline feed.
/// Delivery is at-least-once; evaluation must be idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageChangeEvent {
    pub job_application_id: JobApplicationId,
    pub new_stage_id: StageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_stage_id: Option<StageId>,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}
