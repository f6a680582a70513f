//! SQLite persistence for accounts, rules, merchants, saved column mappings,
//! import jobs and imported transactions.

pub mod catalog;
pub mod db;
pub mod imports;
pub mod store;

pub use catalog::{
    create_account, create_merchant, create_rule, get_account, get_account_currency,
    get_merchants, get_rules, Account, NewMerchant, NewRule,
};
pub use db::{create_db, create_memory_db, DbPool, StorageError};
pub use imports::{
    bulk_insert_transactions, create_import_job, create_mapping, finish_import_job,
    get_data_source_health, get_import_insights, get_import_job, get_mapping_by_fingerprint,
    get_transactions, refresh_data_source_health, update_import_job_progress,
    upsert_import_insights, DataSourceHealth, ImportJob, StoredTransaction,
};
pub use store::SqliteStore;
