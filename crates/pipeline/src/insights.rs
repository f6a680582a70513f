use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_core::{AccountId, JobId, ParseErrorKind, UserId};

use crate::error::InsightError;
use crate::store::InsightsSink;

/// Raw counts gathered while an import runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QualityCounters {
    pub rows_total: usize,
    pub parsed: usize,
    pub categorized: usize,
    pub date_errors: usize,
    pub amount_errors: usize,
    pub duplicates: usize,
}

impl QualityCounters {
    pub fn record_error(&mut self, kind: ParseErrorKind) {
        match kind {
            ParseErrorKind::Date => self.date_errors += 1,
            ParseErrorKind::Amount => self.amount_errors += 1,
            ParseErrorKind::MissingField | ParseErrorKind::Malformed => {}
        }
    }
}

/// Post-import quality metrics. Rates are in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportInsights {
    pub categorization_rate: f64,
    pub date_quality: f64,
    pub amount_quality: f64,
    pub duplicates_skipped: usize,
    pub rows_total: usize,
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

impl ImportInsights {
    pub fn from_counters(c: &QualityCounters) -> Self {
        Self {
            categorization_rate: ratio(c.categorized, c.parsed),
            date_quality: ratio(c.parsed, c.parsed + c.date_errors),
            amount_quality: ratio(c.parsed, c.parsed + c.amount_errors),
            duplicates_skipped: c.duplicates,
            rows_total: c.rows_total,
        }
    }
}

/// Stores `insights` and refreshes the account's health summary, giving up
/// after `timeout`.
pub async fn publish<N: InsightsSink + ?Sized>(
    sink: &N,
    job: JobId,
    user: UserId,
    account: AccountId,
    insights: &ImportInsights,
    timeout: Duration,
) -> Result<(), InsightError> {
    let work = async {
        sink.upsert_import_insights(job, insights).await?;
        sink.refresh_data_source_health(user, account).await?;
        Ok::<_, InsightError>(())
    };
    tokio::time::timeout(timeout, work)
        .await
        .map_err(|_| InsightError::Timeout(timeout))?
}
