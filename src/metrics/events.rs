//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the extraction
//! engine. Events implement the `InternalEvent` trait which emits the
//! corresponding Prometheus metric.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Success or failure of a single outbound request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    pub fn from_result<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Source API operation kinds.
#[derive(Debug, Clone, Copy)]
pub enum SourceOperation {
    Count,
    Query,
}

impl SourceOperation {
    fn as_str(&self) -> &'static str {
        match self {
            SourceOperation::Count => "count",
            SourceOperation::Query => "query",
        }
    }
}

/// Event emitted for every source API request.
pub struct SourceRequest {
    pub operation: SourceOperation,
    pub status: RequestStatus,
}

impl InternalEvent for SourceRequest {
    fn emit(self) {
        counter!(
            "glacier_source_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Duration of a source API request.
pub struct SourceRequestDuration {
    pub operation: SourceOperation,
    pub duration: Duration,
}

impl InternalEvent for SourceRequestDuration {
    fn emit(self) {
        histogram!(
            "glacier_source_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

/// Storage operation kinds.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Put,
    Head,
    Get,
}

impl StorageOperation {
    fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Put => "put",
            StorageOperation::Head => "head",
            StorageOperation::Get => "get",
        }
    }
}

/// Event emitted for every storage request.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        counter!(
            "glacier_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Duration of a storage request.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        histogram!(
            "glacier_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when the planner finishes expanding configuration.
pub struct UnitsPlanned {
    pub count: u64,
}

impl InternalEvent for UnitsPlanned {
    fn emit(self) {
        trace!(count = self.count, "Units planned");
        counter!("glacier_units_planned_total").increment(self.count);
    }
}

/// Terminal status of a work unit.
#[derive(Debug, Clone, Copy)]
pub enum UnitStatus {
    Materialized,
    Empty,
    Failed,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Materialized => "materialized",
            UnitStatus::Empty => "empty",
            UnitStatus::Failed => "failed",
        }
    }
}

/// Event emitted when a work unit reaches a terminal state.
pub struct UnitCompleted {
    pub status: UnitStatus,
}

impl InternalEvent for UnitCompleted {
    fn emit(self) {
        trace!(status = self.status.as_str(), "Unit completed");
        counter!("glacier_units_completed_total", "status" => self.status.as_str()).increment(1);
    }
}

/// Event emitted when a work unit attempt fails and will be retried.
pub struct UnitRetried;

impl InternalEvent for UnitRetried {
    fn emit(self) {
        counter!("glacier_unit_retries_total").increment(1);
    }
}

/// Event emitted when a page of records is fetched.
pub struct PagesFetched {
    pub count: u64,
}

impl InternalEvent for PagesFetched {
    fn emit(self) {
        counter!("glacier_pages_fetched_total").increment(self.count);
    }
}

/// Event emitted when resync pages are skipped because their artifacts
/// already exist.
pub struct PagesSkipped {
    pub count: u64,
}

impl InternalEvent for PagesSkipped {
    fn emit(self) {
        trace!(count = self.count, "Pages skipped (already materialized)");
        counter!("glacier_pages_skipped_total").increment(self.count);
    }
}

/// Event emitted when records are extracted from the source.
pub struct RecordsExtracted {
    pub count: u64,
}

impl InternalEvent for RecordsExtracted {
    fn emit(self) {
        trace!(count = self.count, "Records extracted");
        counter!("glacier_records_extracted_total").increment(self.count);
    }
}

/// Event emitted when artifacts are uploaded.
pub struct ArtifactsUploaded {
    pub count: u64,
}

impl InternalEvent for ArtifactsUploaded {
    fn emit(self) {
        counter!("glacier_artifacts_uploaded_total").increment(self.count);
    }
}

/// Event emitted when compressed artifact bytes are written.
pub struct ArtifactBytesWritten {
    pub bytes: u64,
}

impl InternalEvent for ArtifactBytesWritten {
    fn emit(self) {
        trace!(bytes = self.bytes, "Artifact bytes written");
        counter!("glacier_artifact_bytes_written_total").increment(self.bytes);
    }
}
