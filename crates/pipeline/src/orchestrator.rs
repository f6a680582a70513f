use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tally_categorize::Categorizer;
use tally_core::{
    convention_for, AccountId, AmountColumns, ColumnMapping, ColumnSuggestion, DateOrder,
    DetectOptions, FileConfig, JobId, NumberConvention, ParseError, ParsedTransaction,
    RegionalDialect, ResolvedMapping, RowOutcome, UserId,
};
use tally_import::{
    load, probe_columns, sniff_currency, suggest_columns, LoadedSource, StreamOptions,
    TagClassifier, TransactionStream,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::{CurrencyResolutionError, ImportError};
use crate::insights::{publish, ImportInsights, QualityCounters};
use crate::settings::ImportSettings;
use crate::store::{
    ImportStore, InsightsSink, JobProgress, JobStatus, NewImportJob, SavedMapping, StoreError,
    TransactionRecord,
};

pub const MONTH_FIRST_FORMAT: &str = "%m/%d/%Y";

/// What `analyze` learned about a file without importing it.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub config: FileConfig,
    pub suggestion: ColumnSuggestion,
    pub dialect: RegionalDialect,
    pub saved_mapping: Option<SavedMapping>,
    pub detected_currency: Option<String>,
    /// A saved mapping applies, or the suggestion is complete and the
    /// dialect probe is confident enough.
    pub can_auto_import: bool,
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub user_id: UserId,
    pub account_id: AccountId,
    /// Explicit fields; anything unset comes from a saved mapping, then from
    /// the header suggestion.
    pub mapping: ColumnMapping,
    pub detect: DetectOptions,
    /// Overrides the account's currency.
    pub currency: Option<String>,
    /// Permit `ImportSettings::default_currency` as the last resort.
    pub use_default_currency: bool,
    pub file_name: Option<String>,
    /// Store the resolved mapping under the file's fingerprint on success.
    pub save_mapping: bool,
    pub cancel: CancellationToken,
}

impl ImportRequest {
    pub fn new(user_id: UserId, account_id: AccountId) -> Self {
        Self {
            user_id,
            account_id,
            mapping: ColumnMapping::default(),
            detect: DetectOptions::default(),
            currency: None,
            use_default_currency: false,
            file_name: None,
            save_mapping: false,
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub currency: String,
    pub total_rows: usize,
    pub imported: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub categorized: usize,
    /// `"row N: column: message"`, sorted by row.
    pub errors: Vec<String>,
}

struct JobContext {
    job_id: JobId,
    user_id: UserId,
    account_id: AccountId,
    currency: String,
}

#[derive(Default)]
struct ImportTally {
    progress: JobProgress,
    quality: QualityCounters,
    errors: Vec<ParseError>,
}

impl ImportTally {
    fn sorted_errors(&mut self) -> Vec<String> {
        self.errors.sort_by_key(|e| e.row);
        self.errors.iter().map(ToString::to_string).collect()
    }
}

/// Drives a file from raw bytes to persisted, categorised transactions.
pub struct Importer<S, N> {
    store: Arc<S>,
    insights: Arc<N>,
    categorizer: Arc<Categorizer>,
    classifier: Option<Arc<TagClassifier>>,
    settings: ImportSettings,
}

impl<S, N> Importer<S, N>
where
    S: ImportStore + 'static,
    N: InsightsSink + 'static,
{
    pub fn new(
        store: Arc<S>,
        insights: Arc<N>,
        categorizer: Arc<Categorizer>,
        settings: ImportSettings,
    ) -> Self {
        Self {
            store,
            insights,
            categorizer,
            classifier: None,
            settings,
        }
    }

    /// Tags every parsed row with `classifier`'s prediction.
    pub fn with_classifier(mut self, classifier: Arc<TagClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    pub fn categorizer(&self) -> &Arc<Categorizer> {
        &self.categorizer
    }

    /// Sniffs the layout and reports whether the file can be imported
    /// without asking the user for a mapping.
    pub async fn analyze(
        &self,
        user: UserId,
        bytes: &[u8],
        detect: &DetectOptions,
    ) -> Result<Analysis, ImportError> {
        // 1. Detect layout.
        let config = load(bytes, detect, &self.settings.sniffer())?.config;

        // 2. Suggest columns from header names.
        let suggestion = suggest_columns(&config.headers);

        // 3. Probe number and date conventions.
        let amount_cols = suggested_amount_columns(&suggestion, config.width());
        let dialect = probe_columns(&config.sample_rows, &amount_cols, suggestion.date_col);

        // 4. Look for a saved mapping.
        let saved_mapping = self
            .store
            .get_mapping_by_fingerprint(user, &config.fingerprint)
            .await?;

        let saved_applies = saved_mapping.as_ref().is_some_and(|saved| {
            saved
                .mapping
                .clone()
                .overlay(&ColumnMapping::from_suggestion(&suggestion))
                .resolve(config.width())
                .is_ok()
        });
        let can_auto_import = saved_applies
            || (suggestion.is_complete()
                && dialect.confidence >= self.settings.auto_import_confidence);
        let detected_currency = sniff_currency(&config, suggestion.currency_col);

        info!(
            %user,
            fingerprint = %config.fingerprint,
            saved = saved_mapping.is_some(),
            can_auto_import,
            "analyzed file"
        );
        Ok(Analysis {
            config,
            suggestion,
            dialect,
            saved_mapping,
            detected_currency,
            can_auto_import,
        })
    }

    /// Imports a file from disk.
    pub async fn import_file(
        &self,
        path: &Path,
        mut request: ImportRequest,
    ) -> Result<ImportReport, ImportError> {
        let bytes = tokio::fs::read(path).await?;
        if request.file_name.is_none() {
            request.file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string);
        }
        self.import(&bytes, request).await
    }

    /// Imports `bytes`. Insight computation continues in the background
    /// after this returns.
    pub async fn import(
        &self,
        bytes: &[u8],
        request: ImportRequest,
    ) -> Result<ImportReport, ImportError> {
        let (report, _insights) = self.run(bytes, request).await?;
        Ok(report)
    }

    /// Like [`import`](Self::import) but also waits for the insights task.
    pub async fn import_and_wait_insights(
        &self,
        bytes: &[u8],
        request: ImportRequest,
    ) -> Result<(ImportReport, Option<ImportInsights>), ImportError> {
        let (report, handle) = self.run(bytes, request).await?;
        let insights = match handle.await {
            Ok(insights) => insights,
            Err(e) => {
                warn!(error = %e, "insights task panicked");
                None
            }
        };
        Ok((report, insights))
    }

    async fn run(
        &self,
        bytes: &[u8],
        request: ImportRequest,
    ) -> Result<(ImportReport, JoinHandle<Option<ImportInsights>>), ImportError> {
        // 1. Detect layout.
        let source = load(bytes, &request.detect, &self.settings.sniffer())?;
        let width = source.config.width();
        let suggestion = suggest_columns(&source.config.headers);

        // 2. Resolve the mapping: explicit, then saved, then suggested.
        let saved = self
            .store
            .get_mapping_by_fingerprint(request.user_id, &source.config.fingerprint)
            .await?;
        let mut merged = request.mapping.clone();
        if let Some(saved) = &saved {
            debug!(fingerprint = %saved.fingerprint, global = saved.user_id.is_none(), "using saved mapping");
            merged = merged.overlay(&saved.mapping);
        }
        let merged = merged.overlay(&ColumnMapping::from_suggestion(&suggestion));
        let mut mapping = merged.resolve(width)?;

        // 3. Resolve the currency.
        let currency = self
            .resolve_currency(&request, &source.config, mapping.currency_col)
            .await?;

        // 4. Infer number and date conventions the mapping leaves open.
        let dialect = probe_columns(
            &source.config.sample_rows,
            &resolved_amount_columns(mapping.amount),
            Some(mapping.date_col),
        );
        if merged.is_european_format.is_none() {
            mapping.european = infer_european(&dialect, &currency);
        }
        if mapping.date_format.is_none() && dialect.date_order == DateOrder::MonthFirst {
            mapping.date_format = Some(MONTH_FIRST_FORMAT.to_string());
        }

        // 5. Open the job.
        let fingerprint = source.config.fingerprint.clone();
        let job_id = self
            .store
            .create_import_job(&NewImportJob {
                user_id: request.user_id,
                account_id: request.account_id,
                fingerprint: fingerprint.clone(),
                file_name: request.file_name.clone(),
                currency: currency.clone(),
            })
            .await?;
        let ctx = JobContext {
            job_id,
            user_id: request.user_id,
            account_id: request.account_id,
            currency,
        };
        let span = info_span!("import", job_id = %job_id, user_id = %request.user_id);

        async {
            info!(
                european = mapping.european,
                currency = %ctx.currency,
                date_format = ?mapping.date_format,
                "import started"
            );
            let saved_form = mapping.to_column_mapping();

            // 6. Stream, categorise and persist.
            let (report, quality) = self.process(source, mapping, &ctx, &request.cancel).await?;

            // 7. Remember the mapping for next time.
            if request.save_mapping && report.status == JobStatus::Succeeded {
                if let Err(e) = self
                    .store
                    .create_mapping(Some(ctx.user_id), &fingerprint, &saved_form)
                    .await
                {
                    warn!(error = %e, "failed to save column mapping");
                }
            }

            // 8. Quality metrics, off the caller's path.
            let insights = self.spawn_insights(&ctx, ImportInsights::from_counters(&quality));

            info!(
                status = report.status.as_str(),
                imported = report.imported,
                failed = report.failed,
                duplicates = report.duplicates,
                "import finished"
            );
            Ok::<_, ImportError>((report, insights))
        }
        .instrument(span)
        .await
    }

    async fn resolve_currency(
        &self,
        request: &ImportRequest,
        config: &FileConfig,
        currency_col: Option<usize>,
    ) -> Result<String, ImportError> {
        if let Some(code) = request.currency.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            return Ok(code.to_uppercase());
        }
        if let Some(code) = self.store.get_account_currency(request.account_id).await? {
            return Ok(code);
        }
        if let Some(code) = sniff_currency(config, currency_col) {
            debug!(%code, "currency sniffed from file");
            return Ok(code);
        }
        if request.use_default_currency {
            if let Some(code) = &self.settings.default_currency {
                return Ok(code.clone());
            }
        }
        Err(CurrencyResolutionError {
            account_id: request.account_id,
        }
        .into())
    }

    async fn process(
        &self,
        source: LoadedSource,
        mapping: ResolvedMapping,
        ctx: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<(ImportReport, QualityCounters), ImportError> {
        let cancel = cancel.child_token();
        let mut stream = source.stream(
            mapping,
            StreamOptions {
                workers: self.settings.workers,
                channel_capacity: self.settings.channel_capacity,
                cancel: cancel.clone(),
                classifier: self.classifier.clone(),
            },
        );

        let mut tally = ImportTally::default();
        let drained = self.drain(&mut stream, ctx, &mut tally).await;
        if drained.is_err() {
            cancel.cancel();
        }
        let stats = stream.finish().await;
        tally.quality.rows_total = stats.total_rows;

        if let Err(e) = drained {
            let message = e.to_string();
            warn!(error = %message, "import aborted");
            if let Err(finish_err) = self
                .store
                .finish_import_job(ctx.job_id, JobStatus::Failed, &tally.progress, Some(&message))
                .await
            {
                warn!(error = %finish_err, "failed to mark job as failed");
            }
            return Err(e.into());
        }

        let status = if stats.cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Succeeded
        };
        self.store
            .finish_import_job(ctx.job_id, status, &tally.progress, None)
            .await?;

        let report = ImportReport {
            job_id: ctx.job_id,
            status,
            currency: ctx.currency.clone(),
            total_rows: stats.total_rows,
            imported: tally.progress.imported,
            failed: tally.progress.failed,
            skipped: tally.progress.skipped,
            duplicates: tally.progress.duplicates,
            categorized: tally.quality.categorized,
            errors: tally.sorted_errors(),
        };
        Ok((report, tally.quality))
    }

    async fn drain(
        &self,
        stream: &mut TransactionStream,
        ctx: &JobContext,
        tally: &mut ImportTally,
    ) -> Result<(), StoreError> {
        let batch_size = self.settings.batch_size.max(1);
        let error_interval = self.settings.progress_error_interval.max(1);
        let mut batch = Vec::with_capacity(batch_size);

        while let Some(outcome) = stream.next().await {
            tally.progress.processed_rows += 1;
            match outcome {
                RowOutcome::Parsed(tx) => {
                    batch.push(tx);
                    if batch.len() >= batch_size {
                        self.flush(&mut batch, ctx, tally).await?;
                    }
                }
                RowOutcome::Failed(err) => {
                    tally.quality.record_error(err.kind);
                    tally.errors.push(err);
                    tally.progress.failed += 1;
                    if tally.progress.failed % error_interval == 0 {
                        self.store
                            .update_import_job_progress(ctx.job_id, &tally.progress)
                            .await?;
                    }
                }
                RowOutcome::Skipped { .. } => tally.progress.skipped += 1,
            }
        }
        self.flush(&mut batch, ctx, tally).await
    }

    /// Categorises and persists one batch, then records progress.
    async fn flush(
        &self,
        batch: &mut Vec<ParsedTransaction>,
        ctx: &JobContext,
        tally: &mut ImportTally,
    ) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let rows: Vec<ParsedTransaction> = batch.drain(..).collect();
        let descriptions: Vec<&str> = rows.iter().map(|tx| tx.description.as_str()).collect();
        let results = self.categorizer.categorize(ctx.user_id, &descriptions).await;

        let records: Vec<TransactionRecord> = rows
            .into_iter()
            .zip(results)
            .map(|(tx, cat)| {
                if cat.is_categorized() {
                    tally.quality.categorized += 1;
                }
                TransactionRecord {
                    user_id: ctx.user_id,
                    account_id: ctx.account_id,
                    job_id: ctx.job_id,
                    row: tx.row,
                    date: tx.date,
                    occurred_at: tx.occurred_at,
                    description: tx.description,
                    merchant_name: cat.clean_merchant_name,
                    amount_minor: tx.amount_minor,
                    currency: tx.currency_hint.unwrap_or_else(|| ctx.currency.clone()),
                    category_id: cat.category_id,
                    merchant_id: cat.merchant_id,
                    rule_id: cat.rule_id,
                    is_recurring: cat.is_recurring,
                    source_category: tx.category,
                    tag: tx.tag,
                }
            })
            .collect();
        tally.quality.parsed += records.len();

        let outcome = self.store.bulk_insert_transactions(&records).await?;
        tally.progress.imported += outcome.inserted;
        tally.progress.duplicates += outcome.duplicates;
        tally.quality.duplicates += outcome.duplicates;
        debug!(
            rows = records.len(),
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            "batch persisted"
        );

        self.store
            .update_import_job_progress(ctx.job_id, &tally.progress)
            .await
    }

    fn spawn_insights(
        &self,
        ctx: &JobContext,
        insights: ImportInsights,
    ) -> JoinHandle<Option<ImportInsights>> {
        let sink = Arc::clone(&self.insights);
        let timeout = self.settings.insights_timeout();
        let (job, user, account) = (ctx.job_id, ctx.user_id, ctx.account_id);
        let span = info_span!("insights", job_id = %job);
        tokio::spawn(
            async move {
                match publish(sink.as_ref(), job, user, account, &insights, timeout).await {
                    Ok(()) => {
                        debug!("import insights stored");
                        Some(insights)
                    }
                    Err(e) => {
                        warn!(error = %e, "import insights failed");
                        None
                    }
                }
            }
            .instrument(span),
        )
    }
}

fn suggested_amount_columns(s: &ColumnSuggestion, width: usize) -> Vec<usize> {
    let cols: Vec<usize> = if s.is_double_entry {
        [s.debit_col, s.credit_col].into_iter().flatten().collect()
    } else {
        s.amount_col.into_iter().collect()
    };
    if cols.is_empty() {
        (0..width).collect()
    } else {
        cols
    }
}

fn resolved_amount_columns(amount: AmountColumns) -> Vec<usize> {
    match amount {
        AmountColumns::Single(col) => vec![col],
        AmountColumns::Split { debit, credit } => vec![debit, credit],
    }
}

/// A conclusive probe decides; otherwise the currency's convention does,
/// defaulting to US format.
fn infer_european(dialect: &RegionalDialect, currency: &str) -> bool {
    if dialect.is_conclusive() {
        return dialect.is_european();
    }
    convention_for(currency) == Some(NumberConvention::European)
}
