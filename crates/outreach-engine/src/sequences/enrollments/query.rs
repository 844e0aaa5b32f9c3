//! Read-side types: filters, sorting, and page metadata for the
//! presentation layer.

use serde::{Deserialize, Serialize};

use super::domain::{Enrollment, EnrollmentStatus, EnrollmentTrigger, JobId, SequenceId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    EnrolledAt,
    UpdatedAt,
    NextExecutionAt,
    Status,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Raw listing parameters as they arrive on the HTTP surface. Normalized into
/// an [`EnrollmentQuery`] by the engine before hitting the store.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentListParams {
    pub sequence_id: Option<SequenceId>,
    pub job_id: Option<JobId>,
    pub status: Option<EnrollmentStatus>,
    #[serde(alias = "enrollmentTrigger")]
    pub trigger: Option<EnrollmentTrigger>,
    #[serde(default)]
    pub include_removed: bool,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<SortBy>,
    pub sort_order: Option<SortOrder>,
}

/// Normalized query executed by the enrollment store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentQuery {
    pub sequence_id: Option<SequenceId>,
    pub job_id: Option<JobId>,
    pub status: Option<EnrollmentStatus>,
    pub trigger: Option<EnrollmentTrigger>,
    pub include_removed: bool,
    /// 1-based.
    pub page: u32,
    pub limit: u32,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
}

/// One page of enrollments plus the metadata the UI needs to paginate without
/// a second round trip.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentPage {
    pub items: Vec<Enrollment>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}
