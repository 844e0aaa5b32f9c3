//! In-memory store and collaborator implementations backing the API service,
//! the CLI demo, and the test suites.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use super::domain::{
    AutoEnrollmentConfig, AutoEnrollmentConfigRecord, Enrollment, EnrollmentId,
    JobApplicationId, JobApplicationSnapshot, JobId, SequenceDefinition, SequenceId, StageChangeEvent,
    StageId,
};
use super::query::{EnrollmentPage, EnrollmentQuery, SortBy, SortOrder};
use super::repository::{
    AutoEnrollmentConfigStore, DirectoryError, EnrollmentStore, PipelineDirectory,
    SequenceDirectory, StoreError,
};

#[derive(Default, Clone)]
pub struct InMemoryEnrollmentStore {
    records: Arc<Mutex<HashMap<EnrollmentId, Enrollment>>>,
}

impl EnrollmentStore for InMemoryEnrollmentStore {
    fn insert(&self, mut enrollment: Enrollment) -> Result<Enrollment, StoreError> {
        let mut guard = self.records.lock().expect("enrollment store mutex poisoned");
        // Check and write under one lock: this is the storage-level
        // uniqueness constraint on open (sequence, application) pairs.
        let open_exists = guard.values().any(|existing| {
            existing.sequence_id == enrollment.sequence_id
                && existing.job_application_id == enrollment.job_application_id
                && existing.status.is_open()
        });
        if open_exists {
            return Err(StoreError::OpenPairExists);
        }
        enrollment.version = 1;
        guard.insert(enrollment.id.clone(), enrollment.clone());
        Ok(enrollment)
    }

    fn fetch(&self, id: &EnrollmentId) -> Result<Option<Enrollment>, StoreError> {
        let guard = self.records.lock().expect("enrollment store mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn update(
        &self,
        mut enrollment: Enrollment,
        expected_version: u64,
    ) -> Result<Enrollment, StoreError> {
        let mut guard = self.records.lock().expect("enrollment store mutex poisoned");
        let current = guard.get(&enrollment.id).ok_or(StoreError::NotFound)?;
        if current.version != expected_version {
            return Err(StoreError::VersionMismatch);
        }
        enrollment.version = expected_version + 1;
        guard.insert(enrollment.id.clone(), enrollment.clone());
        Ok(enrollment)
    }

    fn find_open(
        &self,
        sequence_id: &SequenceId,
        job_application_id: &JobApplicationId,
    ) -> Result<Option<Enrollment>, StoreError> {
        let guard = self.records.lock().expect("enrollment store mutex poisoned");
        Ok(guard
            .values()
            .find(|enrollment| {
                enrollment.sequence_id == *sequence_id
                    && enrollment.job_application_id == *job_application_id
                    && enrollment.status.is_open()
            })
            .cloned())
    }

    fn search(&self, query: &EnrollmentQuery) -> Result<EnrollmentPage, StoreError> {
        let guard = self.records.lock().expect("enrollment store mutex poisoned");
        let mut matches: Vec<Enrollment> = guard
            .values()
            .filter(|enrollment| {
                (query.include_removed || !enrollment.removed)
                    && query
                        .sequence_id
                        .as_ref()
                        .map_or(true, |id| enrollment.sequence_id == *id)
                    && query
                        .job_id
                        .as_ref()
                        .map_or(true, |id| enrollment.job_id == *id)
                    && query.status.map_or(true, |status| enrollment.status == status)
                    && query
                        .trigger
                        .map_or(true, |trigger| enrollment.trigger == trigger)
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| {
            let ordering = match query.sort_by {
                SortBy::EnrolledAt => a.enrolled_at.cmp(&b.enrolled_at),
                SortBy::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                SortBy::NextExecutionAt => a.next_execution_at.cmp(&b.next_execution_at),
                SortBy::Status => a.status.label().cmp(b.status.label()),
            };
            let ordering = match query.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            // Stable tiebreak so pagination never straddles equal keys.
            if ordering == Ordering::Equal {
                a.id.cmp(&b.id)
            } else {
                ordering
            }
        });

        let total = matches.len() as u64;
        let limit = query.limit.max(1);
        let total_pages = (total as u32).div_ceil(limit);
        let offset = (query.page.saturating_sub(1) as usize) * limit as usize;
        let items: Vec<Enrollment> = matches.into_iter().skip(offset).take(limit as usize).collect();

        Ok(EnrollmentPage {
            items,
            total,
            page: query.page,
            limit,
            total_pages,
        })
    }
}

#[derive(Default, Clone)]
pub struct InMemoryConfigStore {
    records: Arc<Mutex<HashMap<SequenceId, AutoEnrollmentConfigRecord>>>,
}

impl AutoEnrollmentConfigStore for InMemoryConfigStore {
    fn get(
        &self,
        sequence_id: &SequenceId,
    ) -> Result<Option<AutoEnrollmentConfigRecord>, StoreError> {
        let guard = self.records.lock().expect("config store mutex poisoned");
        Ok(guard.get(sequence_id).cloned())
    }

    fn put(
        &self,
        sequence_id: &SequenceId,
        config: AutoEnrollmentConfig,
    ) -> Result<AutoEnrollmentConfigRecord, StoreError> {
        let mut guard = self.records.lock().expect("config store mutex poisoned");
        let version = guard.get(sequence_id).map(|record| record.version).unwrap_or(0) + 1;
        let record = AutoEnrollmentConfigRecord {
            sequence_id: sequence_id.clone(),
            config,
            version,
            updated_at: Utc::now(),
        };
        guard.insert(sequence_id.clone(), record.clone());
        Ok(record)
    }

    fn enabled(&self) -> Result<Vec<AutoEnrollmentConfigRecord>, StoreError> {
        let guard = self.records.lock().expect("config store mutex poisoned");
        let mut records: Vec<AutoEnrollmentConfigRecord> = guard
            .values()
            .filter(|record| record.config.auto_enroll_enabled)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.sequence_id.cmp(&b.sequence_id));
        Ok(records)
    }
}

#[derive(Default, Clone)]
pub struct InMemorySequenceDirectory {
    sequences: Arc<Mutex<HashMap<SequenceId, SequenceDefinition>>>,
}

impl InMemorySequenceDirectory {
    pub fn insert(&self, definition: SequenceDefinition) {
        let mut guard = self.sequences.lock().expect("sequence directory mutex poisoned");
        guard.insert(definition.id.clone(), definition);
    }
}

impl SequenceDirectory for InMemorySequenceDirectory {
    fn sequence(&self, id: &SequenceId) -> Result<Option<SequenceDefinition>, DirectoryError> {
        let guard = self.sequences.lock().expect("sequence directory mutex poisoned");
        Ok(guard.get(id).cloned())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryPipelineDirectory {
    applications: Arc<Mutex<HashMap<JobApplicationId, JobApplicationSnapshot>>>,
}

impl InMemoryPipelineDirectory {
    pub fn upsert_application(&self, snapshot: JobApplicationSnapshot) {
        let mut guard = self
            .applications
            .lock()
            .expect("pipeline directory mutex poisoned");
        guard.insert(snapshot.id.clone(), snapshot);
    }

    /// Move an application to a new stage and hand back the stage-change
    /// event the pipeline feed would emit for it.
    pub fn move_to_stage(
        &self,
        id: &JobApplicationId,
        stage: StageId,
    ) -> Option<StageChangeEvent> {
        let mut guard = self
            .applications
            .lock()
            .expect("pipeline directory mutex poisoned");
        let snapshot = guard.get_mut(id)?;
        let previous = snapshot.current_stage_id.clone();
        snapshot.current_stage_id = stage.clone();
        Some(StageChangeEvent {
            job_application_id: id.clone(),
            new_stage_id: stage,
            previous_stage_id: Some(previous),
            occurred_at: Utc::now(),
        })
    }
}

impl PipelineDirectory for InMemoryPipelineDirectory {
    fn application(
        &self,
        id: &JobApplicationId,
    ) -> Result<Option<JobApplicationSnapshot>, DirectoryError> {
        let guard = self
            .applications
            .lock()
            .expect("pipeline directory mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn applications_in_stages(
        &self,
        job_id: &JobId,
        stages: &BTreeSet<StageId>,
    ) -> Result<Vec<JobApplicationId>, DirectoryError> {
        let guard = self
            .applications
            .lock()
            .expect("pipeline directory mutex poisoned");
        let mut ids: Vec<JobApplicationId> = guard
            .values()
            .filter(|snapshot| {
                snapshot.job_id == *job_id && stages.contains(&snapshot.current_stage_id)
            })
            .map(|snapshot| snapshot.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
