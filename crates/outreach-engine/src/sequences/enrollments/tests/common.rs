use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::sequences::enrollments::domain::{
    JobApplicationId, JobApplicationSnapshot, JobId, SequenceDefinition, SequenceId, SequenceStep,
    StageId, StepId,
};
use crate::sequences::enrollments::memory::{
    InMemoryConfigStore, InMemoryEnrollmentStore, InMemoryPipelineDirectory,
    InMemorySequenceDirectory,
};
use crate::sequences::enrollments::service::{EngineSettings, EnrollmentEngine, NewEnrollment};
use crate::sequences::enrollments::EnrollmentTrigger;

pub(super) type MemoryEngine = EnrollmentEngine<
    InMemoryEnrollmentStore,
    InMemoryConfigStore,
    InMemoryPipelineDirectory,
    InMemorySequenceDirectory,
>;

pub(super) struct Harness {
    pub(super) engine: Arc<MemoryEngine>,
    pub(super) store: Arc<InMemoryEnrollmentStore>,
    pub(super) configs: Arc<InMemoryConfigStore>,
    pub(super) pipeline: Arc<InMemoryPipelineDirectory>,
    pub(super) sequences: Arc<InMemorySequenceDirectory>,
}

pub(super) fn sequence_id() -> SequenceId {
    SequenceId("seq-rust-outreach".to_string())
}

pub(super) fn job_id() -> JobId {
    JobId("job-backend-eng".to_string())
}

pub(super) fn application(n: u32) -> JobApplicationId {
    JobApplicationId(format!("app-{n:03}"))
}

pub(super) fn stage(name: &str) -> StageId {
    StageId(name.to_string())
}

pub(super) fn stages(names: &[&str]) -> BTreeSet<StageId> {
    names.iter().map(|name| stage(name)).collect()
}

pub(super) fn three_step_sequence() -> SequenceDefinition {
    SequenceDefinition {
        id: sequence_id(),
        job_id: job_id(),
        name: "Backend engineer outreach".to_string(),
        steps: vec![
            SequenceStep {
                id: StepId("step-intro".to_string()),
                order: 0,
                delay_hours: 0,
            },
            SequenceStep {
                id: StepId("step-follow-up".to_string()),
                order: 1,
                delay_hours: 48,
            },
            SequenceStep {
                id: StepId("step-final-nudge".to_string()),
                order: 2,
                delay_hours: 72,
            },
        ],
    }
}

/// Engine over in-memory stores, seeded with one three-step sequence and six
/// applications sitting in the "applied" stage.
pub(super) fn harness() -> Harness {
    let store = Arc::new(InMemoryEnrollmentStore::default());
    let configs = Arc::new(InMemoryConfigStore::default());
    let pipeline = Arc::new(InMemoryPipelineDirectory::default());
    let sequences = Arc::new(InMemorySequenceDirectory::default());

    sequences.insert(three_step_sequence());
    for n in 1..=6 {
        pipeline.upsert_application(JobApplicationSnapshot {
            id: application(n),
            job_id: job_id(),
            current_stage_id: stage("applied"),
        });
    }

    let engine = Arc::new(EnrollmentEngine::new(
        store.clone(),
        configs.clone(),
        pipeline.clone(),
        sequences.clone(),
        EngineSettings::default(),
    ));

    Harness {
        engine,
        store,
        configs,
        pipeline,
        sequences,
    }
}

pub(super) fn manual_request(n: u32) -> NewEnrollment {
    NewEnrollment {
        sequence_id: sequence_id(),
        job_application_id: application(n),
        trigger: EnrollmentTrigger::Manual,
        metadata: BTreeMap::new(),
    }
}
