use metrics_exporter_prometheus::PrometheusHandle;
use outreach_engine::sequences::enrollments::{
    EngineSettings, EnrollmentEngine, InMemoryConfigStore, InMemoryEnrollmentStore,
    InMemoryPipelineDirectory, InMemorySequenceDirectory, JobApplicationId, JobApplicationSnapshot,
    JobId, SequenceDefinition, SequenceId, SequenceStep, StageId, StepId,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type InMemoryEngine = EnrollmentEngine<
    InMemoryEnrollmentStore,
    InMemoryConfigStore,
    InMemoryPipelineDirectory,
    InMemorySequenceDirectory,
>;

/// Engine plus handles to the seedable directories. The directories are
/// stand-ins for the ATS services that own sequence definitions and pipeline
/// state; the engine only ever sees them through their traits.
pub(crate) struct EngineHandles {
    pub(crate) engine: Arc<InMemoryEngine>,
    pub(crate) pipeline: Arc<InMemoryPipelineDirectory>,
    pub(crate) sequences: Arc<InMemorySequenceDirectory>,
}

pub(crate) fn build_engine(settings: EngineSettings) -> EngineHandles {
    let store = Arc::new(InMemoryEnrollmentStore::default());
    let configs = Arc::new(InMemoryConfigStore::default());
    let pipeline = Arc::new(InMemoryPipelineDirectory::default());
    let sequences = Arc::new(InMemorySequenceDirectory::default());

    let engine = Arc::new(EnrollmentEngine::new(
        store,
        configs,
        pipeline.clone(),
        sequences.clone(),
        settings,
    ));

    EngineHandles {
        engine,
        pipeline,
        sequences,
    }
}

pub(crate) fn sample_sequence_id() -> SequenceId {
    SequenceId("seq-staff-backend".to_string())
}

pub(crate) fn sample_job_id() -> JobId {
    JobId("job-staff-backend".to_string())
}

pub(crate) fn sample_candidate(n: u32) -> JobApplicationId {
    JobApplicationId(format!("app-{n:03}"))
}

/// Load one outreach sequence and a handful of applications so the service is
/// exercisable out of the box.
pub(crate) fn seed_sample_directory(handles: &EngineHandles) {
    handles.sequences.insert(SequenceDefinition {
        id: sample_sequence_id(),
        job_id: sample_job_id(),
        name: "Staff backend engineer outreach".to_string(),
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
                delay_hours: 96,
            },
        ],
    });

    for n in 1..=5 {
        handles.pipeline.upsert_application(JobApplicationSnapshot {
            id: sample_candidate(n),
            job_id: sample_job_id(),
            current_stage_id: StageId("sourced".to_string()),
        });
    }
}
