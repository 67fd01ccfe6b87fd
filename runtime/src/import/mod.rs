//! Bulk import of scraped regulation records.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

pub mod loader;
pub mod processor;
pub mod records;

pub use loader::{ImportSelection, load_rules};
pub use processor::BulkImporter;
pub use records::{RawRule, RecordValidationErrors, Regulation, ValidationError};

/// Persistent store for imported records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn exists(&self, identifier: &str) -> Result<bool>;

    async fn begin(&self) -> Result<Box<dyn RecordTransaction>>;
}

/// Staged writes that become visible only on commit. Dropping discards them.
#[async_trait]
pub trait RecordTransaction: Send {
    fn bulk_create(&mut self, records: Vec<Regulation>);

    async fn commit(self: Box<Self>) -> Result<usize>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRecord {
    pub identifier: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub identifier: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportResults {
    pub successful: Vec<String>,
    pub failed: Vec<FailedRecord>,
    pub skipped: Vec<SkippedRecord>,
}

impl ImportResults {
    pub fn total_processed(&self) -> usize {
        self.successful.len() + self.failed.len() + self.skipped.len()
    }

    pub fn merge(&mut self, other: ImportResults) {
        self.successful.extend(other.successful);
        self.failed.extend(other.failed);
        self.skipped.extend(other.skipped);
    }

    fn fail(&mut self, identifier: String, reason: &str, details: Option<String>) {
        self.failed.push(FailedRecord {
            identifier,
            reason: reason.to_string(),
            details,
        });
    }

    fn skip(&mut self, identifier: String, reason: &str) {
        self.skipped.push(SkippedRecord {
            identifier,
            reason: reason.to_string(),
        });
    }
}
