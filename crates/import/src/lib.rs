//! Bank statement ingestion: layout detection, regional dialect probing and
//! concurrent row normalisation for delimited text and spreadsheets.

pub mod classifier;
pub mod columns;
pub mod dialect;
pub mod excel;
pub mod normalize;
pub mod sniff;
pub mod source;
pub mod stream;
pub mod text;

pub use classifier::{TagClassifier, TagPrediction};
pub use columns::{classify_header, suggest_columns};
pub use dialect::{probe_columns, probe_dialect};
pub use excel::{read_workbook, SheetRows};
pub use normalize::{parse_amount, parse_date, parse_row, AmountError, DateError, ParsedAmount};
pub use sniff::{detect, fingerprint, sniff_currency, FormatError, Sniffer};
pub use source::{load, LoadedSource};
pub use stream::{stream_delimited, stream_sheet, StreamOptions, TransactionStream};
