use async_trait::async_trait;
use tally_categorize::{CategorizeError, RuleSource};
use tally_core::{AccountId, CategoryRule, ColumnMapping, JobId, Merchant, UserId};
use tally_pipeline::{
    ImportInsights, ImportStore, InsertOutcome, InsightsSink, JobProgress, JobStatus,
    NewImportJob, SavedMapping, StoreError, TransactionRecord,
};

use crate::catalog;
use crate::db::DbPool;
use crate::imports;

/// SQLite-backed persistence, insights and rule source for the importer.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl ImportStore for SqliteStore {
    async fn create_import_job(&self, job: &NewImportJob) -> Result<JobId, StoreError> {
        Ok(imports::create_import_job(&self.pool, job).await?)
    }

    async fn update_import_job_progress(
        &self,
        job: JobId,
        progress: &JobProgress,
    ) -> Result<(), StoreError> {
        Ok(imports::update_import_job_progress(&self.pool, job, progress).await?)
    }

    async fn bulk_insert_transactions(
        &self,
        batch: &[TransactionRecord],
    ) -> Result<InsertOutcome, StoreError> {
        Ok(imports::bulk_insert_transactions(&self.pool, batch).await?)
    }

    async fn finish_import_job(
        &self,
        job: JobId,
        status: JobStatus,
        progress: &JobProgress,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        Ok(imports::finish_import_job(&self.pool, job, status, progress, error).await?)
    }

    async fn get_mapping_by_fingerprint(
        &self,
        user: UserId,
        fingerprint: &str,
    ) -> Result<Option<SavedMapping>, StoreError> {
        Ok(imports::get_mapping_by_fingerprint(&self.pool, user, fingerprint).await?)
    }

    async fn create_mapping(
        &self,
        user: Option<UserId>,
        fingerprint: &str,
        mapping: &ColumnMapping,
    ) -> Result<(), StoreError> {
        Ok(imports::create_mapping(&self.pool, user, fingerprint, mapping).await?)
    }

    async fn get_account_currency(&self, account: AccountId) -> Result<Option<String>, StoreError> {
        Ok(catalog::get_account_currency(&self.pool, account).await?)
    }
}

#[async_trait]
impl InsightsSink for SqliteStore {
    async fn upsert_import_insights(
        &self,
        job: JobId,
        insights: &ImportInsights,
    ) -> Result<(), StoreError> {
        Ok(imports::upsert_import_insights(&self.pool, job, insights).await?)
    }

    async fn refresh_data_source_health(
        &self,
        user: UserId,
        account: AccountId,
    ) -> Result<(), StoreError> {
        Ok(imports::refresh_data_source_health(&self.pool, user, account).await?)
    }
}

#[async_trait]
impl RuleSource for SqliteStore {
    async fn load_rules(&self, user: UserId) -> Result<Vec<CategoryRule>, CategorizeError> {
        Ok(catalog::get_rules(&self.pool, user).await?)
    }

    async fn load_merchants(&self, user: UserId) -> Result<Vec<Merchant>, CategorizeError> {
        Ok(catalog::get_merchants(&self.pool, user).await?)
    }
}
