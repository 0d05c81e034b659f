//! Source API abstraction.
//!
//! The extraction engine talks to the student-information system through
//! the [`SourceClient`] trait: a server-side count, a paginated
//! query-by-filter, and an advertised maximum page size. The REST
//! adapter lives in [`client`]; tests script the trait directly.

pub mod client;

pub use client::RestSourceClient;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SourceError;

/// Client for a paginated query-by-filter source with server-side count.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Count records matching `filter` (all records when `None`).
    async fn count(&self, table: &str, filter: Option<&str>) -> Result<u64, SourceError>;

    /// Retrieve one page (1-based) of records matching `filter`.
    async fn query(
        &self,
        table: &str,
        filter: Option<&str>,
        projection: Option<&str>,
        page: u32,
    ) -> Result<Vec<Value>, SourceError>;

    /// The source's published maximum page size.
    fn max_page_size(&self) -> u32;
}
