use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use tally_core::{AccountId, CategoryId, ColumnMapping, JobId, MerchantId, RuleId, UserId};
use thiserror::Error;

use crate::insights::ImportInsights;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn database<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        StoreError::Database(Box::new(e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewImportJob {
    pub user_id: UserId,
    pub account_id: AccountId,
    pub fingerprint: String,
    pub file_name: Option<String>,
    pub currency: String,
}

/// Running counters written to the job record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub processed_rows: usize,
    pub imported: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duplicates: usize,
}

/// A categorised row ready to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub user_id: UserId,
    pub account_id: AccountId,
    pub job_id: JobId,
    pub row: usize,
    pub date: NaiveDate,
    pub occurred_at: Option<DateTime<FixedOffset>>,
    pub description: String,
    pub merchant_name: String,
    pub amount_minor: i64,
    pub currency: String,
    pub category_id: Option<CategoryId>,
    pub merchant_id: Option<MerchantId>,
    pub rule_id: Option<RuleId>,
    pub is_recurring: bool,
    /// Category text as it appeared in the file.
    pub source_category: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedMapping {
    /// `None` for a global mapping shared by every user.
    pub user_id: Option<UserId>,
    pub fingerprint: String,
    pub mapping: ColumnMapping,
}

/// Persistence used by the importer.
#[async_trait]
pub trait ImportStore: Send + Sync {
    async fn create_import_job(&self, job: &NewImportJob) -> Result<JobId, StoreError>;

    async fn update_import_job_progress(
        &self,
        job: JobId,
        progress: &JobProgress,
    ) -> Result<(), StoreError>;

    /// Persists a batch atomically. Rows already stored for the account are
    /// counted as duplicates, not errors.
    async fn bulk_insert_transactions(
        &self,
        batch: &[TransactionRecord],
    ) -> Result<InsertOutcome, StoreError>;

    async fn finish_import_job(
        &self,
        job: JobId,
        status: JobStatus,
        progress: &JobProgress,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// The user's mapping for `fingerprint`, else a global one.
    async fn get_mapping_by_fingerprint(
        &self,
        user: UserId,
        fingerprint: &str,
    ) -> Result<Option<SavedMapping>, StoreError>;

    async fn create_mapping(
        &self,
        user: Option<UserId>,
        fingerprint: &str,
        mapping: &ColumnMapping,
    ) -> Result<(), StoreError>;

    async fn get_account_currency(&self, account: AccountId) -> Result<Option<String>, StoreError>;
}

/// Best-effort post-import reporting.
#[async_trait]
pub trait InsightsSink: Send + Sync {
    async fn upsert_import_insights(
        &self,
        job: JobId,
        insights: &ImportInsights,
    ) -> Result<(), StoreError>;

    async fn refresh_data_source_health(
        &self,
        user: UserId,
        account: AccountId,
    ) -> Result<(), StoreError>;
}
