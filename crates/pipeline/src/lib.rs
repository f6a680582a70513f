//! Import orchestration: turns a raw statement into persisted, categorised
//! transactions through pluggable persistence and insight collaborators.

pub mod error;
pub mod insights;
pub mod orchestrator;
pub mod settings;
pub mod store;

pub use error::{CurrencyResolutionError, ImportError, InsightError};
pub use insights::{publish, ImportInsights, QualityCounters};
pub use orchestrator::{Analysis, ImportReport, ImportRequest, Importer, MONTH_FIRST_FORMAT};
pub use settings::{ImportSettings, SettingsError};
pub use store::{
    ImportStore, InsertOutcome, InsightsSink, JobProgress, JobStatus, NewImportJob, SavedMapping,
    StoreError, TransactionRecord,
};
