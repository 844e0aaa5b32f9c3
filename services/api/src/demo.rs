use crate::infra::{build_engine, sample_candidate, sample_sequence_id, seed_sample_directory};
use clap::Args;
use outreach_engine::error::AppError;
use outreach_engine::sequences::enrollments::{
    AdvanceRequest, AutoEnrollmentConfig, BulkEnrollmentRequest, EngineSettings,
    EnrollmentListParams, EnrollmentTrigger, JobApplicationId, NewEnrollment, StageId, StepId,
    TriggerOutcome,
};
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Skip the auto-enrollment trigger portion of the demo.
    #[arg(long)]
    pub(crate) skip_auto: bool,
    /// Print the final enrollment listing, including removed rows.
    #[arg(long)]
    pub(crate) list_enrollments: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let handles = build_engine(EngineSettings::default());
    seed_sample_directory(&handles);
    let engine = &handles.engine;
    let sequence_id = sample_sequence_id();

    println!("Sequence enrollment demo");
    println!("Sequence: {sequence_id} (3 steps, 5 candidates seeded)");

    println!("\nManual enrollment");
    let enrollment = engine.enroll(NewEnrollment {
        sequence_id: sequence_id.clone(),
        job_application_id: sample_candidate(1),
        trigger: EnrollmentTrigger::Manual,
        metadata: BTreeMap::new(),
    })?;
    println!(
        "- {} enrolled {} at step {} ({})",
        enrollment.id,
        enrollment.job_application_id,
        enrollment.current_step_order,
        enrollment.enrolled_at.format("%Y-%m-%d %H:%M UTC")
    );

    let paused = engine.pause(&enrollment.id)?;
    println!(
        "- paused: status {}, next execution cleared ({})",
        paused.status.label(),
        paused
            .next_execution_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "none".to_string())
    );
    let resumed = engine.resume(&enrollment.id)?;
    println!(
        "- resumed: status {}, next execution {}",
        resumed.status.label(),
        resumed
            .next_execution_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "none".to_string())
    );

    println!("\nBulk enrollment (one unknown candidate mixed in)");
    let bulk = engine
        .enroll_bulk(
            BulkEnrollmentRequest {
                sequence_id: sequence_id.clone(),
                job_application_ids: vec![
                    sample_candidate(2),
                    sample_candidate(3),
                    JobApplicationId("app-999".to_string()),
                ],
                enrollment_trigger: EnrollmentTrigger::Manual,
                metadata: BTreeMap::new(),
            },
            CancellationToken::new(),
        )
        .await?;
    println!(
        "- created {}, skipped {}, failed {}",
        bulk.created.len(),
        bulk.skipped.len(),
        bulk.failed.len()
    );
    for failure in &bulk.failed {
        println!("  - {}: {}", failure.job_application_id, failure.reason);
    }

    if !args.skip_auto {
        println!("\nAuto-enrollment triggers");
        let record = engine
            .set_auto_config(
                &sequence_id,
                AutoEnrollmentConfig {
                    auto_enroll_enabled: true,
                    trigger_stages: BTreeSet::from([StageId("replied".to_string())]),
                    exclude_stages: BTreeSet::from([StageId("hired".to_string())]),
                    include_existing_candidates: false,
                },
            )
            .await?;
        println!(
            "- config v{}: trigger on [replied], exclude on [hired]",
            record.version
        );

        let Some(event) = handles
            .pipeline
            .move_to_stage(&sample_candidate(4), StageId("replied".to_string()))
        else {
            println!("- candidate missing from pipeline directory, skipping");
            return Ok(());
        };
        let outcomes = engine.handle_stage_change(event.clone()).await?;
        for outcome in &outcomes {
            match outcome {
                TriggerOutcome::Enrolled { enrollment } => println!(
                    "- stage change to 'replied' enrolled {} ({})",
                    enrollment.job_application_id,
                    enrollment.trigger.label()
                ),
                TriggerOutcome::Excluded { enrollment } => println!(
                    "- stage change unsubscribed {}",
                    enrollment.job_application_id
                ),
            }
        }

        let redelivered = engine.handle_stage_change(event).await?;
        println!(
            "- same event redelivered: {} outcomes (idempotent)",
            redelivered.len()
        );

        if let Some(event) = handles
            .pipeline
            .move_to_stage(&sample_candidate(4), StageId("hired".to_string()))
        {
            let outcomes = engine.handle_stage_change(event).await?;
            for outcome in &outcomes {
                if let TriggerOutcome::Excluded { enrollment } = outcome {
                    println!(
                        "- stage change to 'hired' unsubscribed {} (status {})",
                        enrollment.job_application_id,
                        enrollment.status.label()
                    );
                }
            }
        }
    }

    println!("\nRunning the first enrollment to completion");
    let advanced = engine.advance(
        &enrollment.id,
        AdvanceRequest {
            next_step_id: Some(StepId("step-follow-up".to_string())),
            next_step_order: 1,
            next_execution_at: None,
        },
    )?;
    println!("- advanced to step {}", advanced.current_step_order);
    let advanced = engine.advance(
        &enrollment.id,
        AdvanceRequest {
            next_step_id: Some(StepId("step-final-nudge".to_string())),
            next_step_order: 2,
            next_execution_at: None,
        },
    )?;
    println!("- advanced to step {}", advanced.current_step_order);
    let completed = engine.advance(
        &enrollment.id,
        AdvanceRequest {
            next_step_id: None,
            next_step_order: 3,
            next_execution_at: None,
        },
    )?;
    println!(
        "- completed: status {}, log entries {}",
        completed.status.label(),
        completed.execution_log.len()
    );
    match serde_json::to_string_pretty(&completed) {
        Ok(json) => println!("  Final payload:\n{json}"),
        Err(err) => println!("  Final payload unavailable: {err}"),
    }

    if args.list_enrollments {
        println!("\nAll enrollments");
        let page = engine.list(EnrollmentListParams {
            include_removed: true,
            ..Default::default()
        })?;
        for enrollment in &page.items {
            println!(
                "- {} | {} | {} | step {} | {}",
                enrollment.id,
                enrollment.job_application_id,
                enrollment.status.label(),
                enrollment.current_step_order,
                enrollment.trigger.label()
            );
        }
        println!(
            "({} total, page {}/{})",
            page.total,
            page.page,
            page.total_pages.max(1)
        );
    }

    Ok(())
}
