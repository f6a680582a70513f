use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tally_core::{ParseError, ParseErrorKind, ParseStats, ResolvedMapping, RowOutcome};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::classifier::TagClassifier;
use crate::excel::SheetRows;
use crate::normalize::parse_row;
use crate::text::{content_lines, line_offset, record_line};

#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub workers: usize,
    pub channel_capacity: usize,
    pub cancel: CancellationToken,
    pub classifier: Option<Arc<TagClassifier>>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            channel_capacity: 1024,
            cancel: CancellationToken::new(),
            classifier: None,
        }
    }
}

/// Row as it comes off the reader, before normalisation.
#[derive(Debug)]
enum RawRow {
    Fields { row: usize, fields: Vec<String> },
    Malformed { row: usize, message: String },
}

#[derive(Default)]
struct Counters {
    total: AtomicUsize,
    parsed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

#[derive(Debug, Clone, Copy)]
enum Tally {
    Parsed,
    Failed,
    Skipped,
}

impl From<&RowOutcome> for Tally {
    fn from(outcome: &RowOutcome) -> Self {
        match outcome {
            RowOutcome::Parsed(_) => Tally::Parsed,
            RowOutcome::Failed(_) => Tally::Failed,
            RowOutcome::Skipped { .. } => Tally::Skipped,
        }
    }
}

impl Counters {
    fn record(&self, tally: Tally) {
        let counter = match tally {
            Tally::Parsed => &self.parsed,
            Tally::Failed => &self.failed,
            Tally::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, cancelled: bool) -> ParseStats {
        ParseStats {
            total_rows: self.total.load(Ordering::Relaxed),
            parsed: self.parsed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            cancelled,
        }
    }
}

/// Row outcomes as they are produced, plus final counts once drained.
///
/// Outcomes arrive in completion order, not file order.
pub struct TransactionStream {
    rx: mpsc::Receiver<RowOutcome>,
    handle: JoinHandle<ParseStats>,
}

impl TransactionStream {
    pub async fn next(&mut self) -> Option<RowOutcome> {
        self.rx.recv().await
    }

    /// Stops consuming and waits for the reader and workers to wind down.
    pub async fn finish(self) -> ParseStats {
        drop(self.rx);
        match self.handle.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("parse supervisor failed: {e}");
                ParseStats {
                    cancelled: true,
                    ..ParseStats::default()
                }
            }
        }
    }

    pub async fn collect_all(mut self) -> (Vec<RowOutcome>, ParseStats) {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.next().await {
            outcomes.push(outcome);
        }
        let stats = self.finish().await;
        (outcomes, stats)
    }
}

/// Streams the data rows of delimited text that follow the header at
/// `header_line`.
pub fn stream_delimited(
    text: String,
    header_line: usize,
    delimiter: u8,
    mapping: ResolvedMapping,
    options: StreamOptions,
) -> TransactionStream {
    let start = line_offset(&text, header_line + 1);
    let mut bytes = text.into_bytes();
    let body = bytes.split_off(start);
    let lines = content_lines(&body);
    let records = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(Cursor::new(body))
        .into_records();

    // csv's line counter does not see skipped blank lines; rows are 1-based
    // file lines found from the record's byte offset.
    let first = header_line + 2;
    let row_at = move |pos: Option<&csv::Position>| {
        first + pos.map_or(0, |p| record_line(&lines, p.byte() as usize))
    };
    let rows = records.map(move |result| match result {
        Ok(record) => RawRow::Fields {
            row: row_at(record.position()),
            fields: record.iter().map(|f| f.trim().to_string()).collect(),
        },
        Err(e) => RawRow::Malformed {
            row: row_at(e.position()),
            message: e.to_string(),
        },
    });
    spawn_pipeline(rows, mapping, options)
}

/// Streams the rows of a worksheet after the header row at `header_index`.
pub fn stream_sheet(
    sheet: SheetRows,
    header_index: usize,
    mapping: ResolvedMapping,
    options: StreamOptions,
) -> TransactionStream {
    let first_row = sheet.first_row;
    let rows = sheet
        .rows
        .into_iter()
        .enumerate()
        .skip(header_index + 1)
        .map(move |(i, fields)| RawRow::Fields {
            row: first_row + i,
            fields,
        });
    spawn_pipeline(rows, mapping, options)
}

fn spawn_pipeline<I>(rows: I, mapping: ResolvedMapping, options: StreamOptions) -> TransactionStream
where
    I: Iterator<Item = RawRow> + Send + 'static,
{
    let capacity = options.channel_capacity.max(1);
    let (raw_tx, raw_rx) = mpsc::channel::<RawRow>(capacity);
    let (out_tx, out_rx) = mpsc::channel::<RowOutcome>(capacity);
    let counters = Arc::new(Counters::default());

    let reader = {
        let cancel = options.cancel.clone();
        let counters = Arc::clone(&counters);
        tokio::task::spawn_blocking(move || {
            for raw in rows {
                if cancel.is_cancelled() {
                    break;
                }
                counters.total.fetch_add(1, Ordering::Relaxed);
                if raw_tx.blocking_send(raw).is_err() {
                    break;
                }
            }
        })
    };

    let raw_rx = Arc::new(Mutex::new(raw_rx));
    let mapping = Arc::new(mapping);
    let workers: Vec<JoinHandle<()>> = (0..options.workers.max(1))
        .map(|_| {
            let raw_rx = Arc::clone(&raw_rx);
            let out_tx = out_tx.clone();
            let mapping = Arc::clone(&mapping);
            let counters = Arc::clone(&counters);
            let cancel = options.cancel.clone();
            let classifier = options.classifier.clone();
            tokio::spawn(async move {
                loop {
                    let next = raw_rx.lock().await.recv().await;
                    let Some(raw) = next else {
                        break;
                    };
                    if cancel.is_cancelled() {
                        break;
                    }
                    let outcome = match raw {
                        RawRow::Fields { row, fields } => {
                            parse_row(row, &fields, &mapping, classifier.as_deref())
                        }
                        RawRow::Malformed { row, message } => RowOutcome::Failed(ParseError {
                            row,
                            column: None,
                            kind: ParseErrorKind::Malformed,
                            message,
                            raw_data: String::new(),
                        }),
                    };
                    // Only rows the consumer actually received are counted.
                    let tally = Tally::from(&outcome);
                    if out_tx.send(outcome).await.is_err() {
                        break;
                    }
                    counters.record(tally);
                }
            })
        })
        .collect();
    drop(out_tx);

    let cancel = options.cancel;
    let handle = tokio::spawn(async move {
        if let Err(e) = reader.await {
            error!("row reader failed: {e}");
        }
        for worker in workers {
            if let Err(e) = worker.await {
                error!("parse worker failed: {e}");
            }
        }
        let stats = counters.snapshot(cancel.is_cancelled());
        debug!(
            total = stats.total_rows,
            parsed = stats.parsed,
            failed = stats.failed,
            skipped = stats.skipped,
            cancelled = stats.cancelled,
            "parse finished"
        );
        stats
    });

    TransactionStream { rx: out_rx, handle }
}
