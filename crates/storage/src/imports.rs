use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tally_core::{AccountId, CategoryId, ColumnMapping, JobId, UserId};
use tally_pipeline::{
    ImportInsights, InsertOutcome, JobProgress, JobStatus, NewImportJob, SavedMapping,
    TransactionRecord,
};
use tracing::debug;

use crate::db::{DbPool, StorageError};

// ── Jobs ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: JobId,
    pub user_id: UserId,
    pub account_id: AccountId,
    pub fingerprint: String,
    pub file_name: Option<String>,
    pub currency: String,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

pub async fn create_import_job(pool: &DbPool, job: &NewImportJob) -> Result<JobId, StorageError> {
    let result = sqlx::query(
        "INSERT INTO import_jobs (user_id, account_id, fingerprint, file_name, currency, status) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(job.user_id.0)
    .bind(job.account_id.0)
    .bind(&job.fingerprint)
    .bind(&job.file_name)
    .bind(&job.currency)
    .bind(JobStatus::Running.as_str())
    .execute(pool)
    .await?;
    Ok(JobId(result.last_insert_rowid()))
}

pub async fn update_import_job_progress(
    pool: &DbPool,
    job: JobId,
    progress: &JobProgress,
) -> Result<(), StorageError> {
    let result = sqlx::query(
        "UPDATE import_jobs SET processed_rows = ?, imported = ?, failed = ?, skipped = ?, duplicates = ? WHERE id = ?",
    )
    .bind(progress.processed_rows as i64)
    .bind(progress.imported as i64)
    .bind(progress.failed as i64)
    .bind(progress.skipped as i64)
    .bind(progress.duplicates as i64)
    .bind(job.0)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound(format!("import job {job}")));
    }
    Ok(())
}

pub async fn finish_import_job(
    pool: &DbPool,
    job: JobId,
    status: JobStatus,
    progress: &JobProgress,
    error: Option<&str>,
) -> Result<(), StorageError> {
    update_import_job_progress(pool, job, progress).await?;
    sqlx::query(
        "UPDATE import_jobs SET status = ?, error = ?, finished_at = datetime('now') WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(error)
    .bind(job.0)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_import_job(pool: &DbPool, id: JobId) -> Result<Option<ImportJob>, StorageError> {
    let row = sqlx::query_as::<_, (i64, i64, i64, String, Option<String>, String, String, i64, i64, i64, i64, i64, Option<String>, String, Option<String>)>(
        "SELECT id, user_id, account_id, fingerprint, file_name, currency, status, processed_rows, imported, failed, skipped, duplicates, error, started_at, finished_at FROM import_jobs WHERE id = ?",
    )
    .bind(id.0)
    .fetch_optional(pool)
    .await?;

    let Some(r) = row else {
        return Ok(None);
    };
    let status = JobStatus::parse(&r.6).ok_or_else(|| StorageError::InvalidStatus(r.6.clone()))?;
    Ok(Some(ImportJob {
        id: JobId(r.0),
        user_id: UserId(r.1),
        account_id: AccountId(r.2),
        fingerprint: r.3,
        file_name: r.4,
        currency: r.5,
        status,
        progress: JobProgress {
            processed_rows: r.7 as usize,
            imported: r.8 as usize,
            failed: r.9 as usize,
            skipped: r.10 as usize,
            duplicates: r.11 as usize,
        },
        error: r.12,
        started_at: r.13,
        finished_at: r.14,
    }))
}

// ── Mappings ──────────────────────────────────────────────────────────────────

/// The user's mapping for `fingerprint`, falling back to a global one.
pub async fn get_mapping_by_fingerprint(
    pool: &DbPool,
    user: UserId,
    fingerprint: &str,
) -> Result<Option<SavedMapping>, StorageError> {
    let row = sqlx::query_as::<_, (Option<i64>, String, String)>(
        "SELECT user_id, fingerprint, mapping FROM column_mappings WHERE fingerprint = ? AND (user_id = ? OR user_id IS NULL) ORDER BY user_id IS NULL, id DESC LIMIT 1",
    )
    .bind(fingerprint)
    .bind(user.0)
    .fetch_optional(pool)
    .await?;

    row.map(|(user_id, fingerprint, mapping)| {
        Ok(SavedMapping {
            user_id: user_id.map(UserId),
            fingerprint,
            mapping: serde_json::from_str(&mapping)?,
        })
    })
    .transpose()
}

/// Stores `mapping`, replacing any previous one for the same owner and
/// fingerprint.
pub async fn create_mapping(
    pool: &DbPool,
    user: Option<UserId>,
    fingerprint: &str,
    mapping: &ColumnMapping,
) -> Result<(), StorageError> {
    let json = serde_json::to_string(mapping)?;
    let user_id = user.map(|u| u.0);

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM column_mappings WHERE user_id IS ? AND fingerprint = ?")
        .bind(user_id)
        .bind(fingerprint)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO column_mappings (user_id, fingerprint, mapping) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(fingerprint)
        .bind(json)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

// ── Transactions ──────────────────────────────────────────────────────────────

/// Inserts the batch in one transaction. Rows colliding with an existing
/// `(account, date, amount, description)` are skipped and counted.
pub async fn bulk_insert_transactions(
    pool: &DbPool,
    batch: &[TransactionRecord],
) -> Result<InsertOutcome, StorageError> {
    let mut outcome = InsertOutcome::default();
    let mut tx = pool.begin().await?;

    for record in batch {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO transactions (
                account_id, user_id, job_id, row_number, date, occurred_at, description,
                merchant_name, amount_minor, currency, category_id, merchant_id, rule_id,
                is_recurring, source_category, tag
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.account_id.0)
        .bind(record.user_id.0)
        .bind(record.job_id.0)
        .bind(record.row as i64)
        .bind(record.date)
        .bind(record.occurred_at.map(|t| t.to_rfc3339()))
        .bind(&record.description)
        .bind(&record.merchant_name)
        .bind(record.amount_minor)
        .bind(&record.currency)
        .bind(record.category_id.map(|c| c.0))
        .bind(record.merchant_id.map(|m| m.0))
        .bind(record.rule_id.map(|r| r.0))
        .bind(record.is_recurring)
        .bind(&record.source_category)
        .bind(&record.tag)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            outcome.duplicates += 1;
        } else {
            outcome.inserted += 1;
        }
    }

    tx.commit().await?;
    debug!(inserted = outcome.inserted, duplicates = outcome.duplicates, "batch committed");
    Ok(outcome)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTransaction {
    pub id: i64,
    pub job_id: JobId,
    pub row: usize,
    pub date: NaiveDate,
    pub description: String,
    pub merchant_name: String,
    pub amount_minor: i64,
    pub currency: String,
    pub category_id: Option<CategoryId>,
    pub is_recurring: bool,
    pub tag: Option<String>,
}

pub async fn get_transactions(
    pool: &DbPool,
    account: AccountId,
) -> Result<Vec<StoredTransaction>, StorageError> {
    let rows = sqlx::query_as::<_, (i64, i64, i64, NaiveDate, String, String, i64, String, Option<i64>, i64, Option<String>)>(
        "SELECT id, job_id, row_number, date, description, merchant_name, amount_minor, currency, category_id, is_recurring, tag FROM transactions WHERE account_id = ? ORDER BY date, id",
    )
    .bind(account.0)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| StoredTransaction {
            id: r.0,
            job_id: JobId(r.1),
            row: r.2 as usize,
            date: r.3,
            description: r.4,
            merchant_name: r.5,
            amount_minor: r.6,
            currency: r.7,
            category_id: r.8.map(CategoryId),
            is_recurring: r.9 != 0,
            tag: r.10,
        })
        .collect())
}

// ── Insights ──────────────────────────────────────────────────────────────────

pub async fn upsert_import_insights(
    pool: &DbPool,
    job: JobId,
    insights: &ImportInsights,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO import_insights (job_id, categorization_rate, date_quality, amount_quality, duplicates_skipped, rows_total)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (job_id) DO UPDATE SET
            categorization_rate = excluded.categorization_rate,
            date_quality = excluded.date_quality,
            amount_quality = excluded.amount_quality,
            duplicates_skipped = excluded.duplicates_skipped,
            rows_total = excluded.rows_total,
            updated_at = datetime('now')
        "#,
    )
    .bind(job.0)
    .bind(insights.categorization_rate)
    .bind(insights.date_quality)
    .bind(insights.amount_quality)
    .bind(insights.duplicates_skipped as i64)
    .bind(insights.rows_total as i64)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_import_insights(
    pool: &DbPool,
    job: JobId,
) -> Result<Option<ImportInsights>, StorageError> {
    let row = sqlx::query_as::<_, (f64, f64, f64, i64, i64)>(
        "SELECT categorization_rate, date_quality, amount_quality, duplicates_skipped, rows_total FROM import_insights WHERE job_id = ?",
    )
    .bind(job.0)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| ImportInsights {
        categorization_rate: r.0,
        date_quality: r.1,
        amount_quality: r.2,
        duplicates_skipped: r.3 as usize,
        rows_total: r.4 as usize,
    }))
}

/// Rolled-up import history for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceHealth {
    pub account_id: AccountId,
    pub imports: usize,
    pub last_status: Option<JobStatus>,
    pub last_import_at: Option<String>,
    pub avg_categorization_rate: Option<f64>,
}

pub async fn refresh_data_source_health(
    pool: &DbPool,
    user: UserId,
    account: AccountId,
) -> Result<(), StorageError> {
    let (imports, last_import_at) = sqlx::query_as::<_, (i64, Option<String>)>(
        "SELECT COUNT(*), MAX(started_at) FROM import_jobs WHERE account_id = ?",
    )
    .bind(account.0)
    .fetch_one(pool)
    .await?;

    let last_status = sqlx::query_as::<_, (String,)>(
        "SELECT status FROM import_jobs WHERE account_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(account.0)
    .fetch_optional(pool)
    .await?
    .map(|r| r.0);

    let (avg_rate,) = sqlx::query_as::<_, (Option<f64>,)>(
        "SELECT AVG(i.categorization_rate) FROM import_insights i JOIN import_jobs j ON j.id = i.job_id WHERE j.account_id = ?",
    )
    .bind(account.0)
    .fetch_one(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO data_source_health (account_id, user_id, imports, last_status, last_import_at, avg_categorization_rate)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (account_id) DO UPDATE SET
            imports = excluded.imports,
            last_status = excluded.last_status,
            last_import_at = excluded.last_import_at,
            avg_categorization_rate = excluded.avg_categorization_rate,
            updated_at = datetime('now')
        "#,
    )
    .bind(account.0)
    .bind(user.0)
    .bind(imports)
    .bind(last_status)
    .bind(last_import_at)
    .bind(avg_rate)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_data_source_health(
    pool: &DbPool,
    account: AccountId,
) -> Result<Option<DataSourceHealth>, StorageError> {
    let row = sqlx::query_as::<_, (i64, i64, Option<String>, Option<String>, Option<f64>)>(
        "SELECT account_id, imports, last_status, last_import_at, avg_categorization_rate FROM data_source_health WHERE account_id = ?",
    )
    .bind(account.0)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| DataSourceHealth {
        account_id: AccountId(r.0),
        imports: r.1 as usize,
        last_status: r.2.as_deref().and_then(JobStatus::parse),
        last_import_at: r.3,
        avg_categorization_rate: r.4,
    }))
}
