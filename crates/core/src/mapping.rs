use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Container format of an uploaded statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Delimited,
    Xlsx,
    Xls,
}

impl SourceFormat {
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(b"PK\x03\x04") {
            SourceFormat::Xlsx
        } else if bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]) {
            SourceFormat::Xls
        } else {
            SourceFormat::Delimited
        }
    }

    pub fn is_spreadsheet(self) -> bool {
        !matches!(self, SourceFormat::Delimited)
    }
}

/// Caller overrides for header detection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DetectOptions {
    /// Zero-based line (or sheet row) holding the header.
    pub header_row: Option<usize>,
    pub delimiter: Option<u8>,
}

/// Detected shape of an uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub format: SourceFormat,
    pub delimiter: u8,
    /// Lines above the header row.
    pub skip_lines: usize,
    pub headers: Vec<String>,
    /// SHA-256 hex of the normalised headers.
    pub fingerprint: String,
    pub sample_rows: Vec<Vec<String>>,
    /// Non-empty lines above the header (bank name, account, currency...).
    pub preamble: Vec<String>,
}

impl FileConfig {
    pub fn width(&self) -> usize {
        self.headers.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Date,
    Description,
    Amount,
    Debit,
    Credit,
    Category,
    Currency,
    Balance,
}

impl fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnRole::Date => "date",
            ColumnRole::Description => "description",
            ColumnRole::Amount => "amount",
            ColumnRole::Debit => "debit",
            ColumnRole::Credit => "credit",
            ColumnRole::Category => "category",
            ColumnRole::Currency => "currency",
            ColumnRole::Balance => "balance",
        };
        f.write_str(name)
    }
}

/// Heuristic column assignment derived from header names alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnSuggestion {
    pub date_col: Option<usize>,
    pub description_col: Option<usize>,
    pub amount_col: Option<usize>,
    pub debit_col: Option<usize>,
    pub credit_col: Option<usize>,
    pub category_col: Option<usize>,
    pub currency_col: Option<usize>,
    pub balance_col: Option<usize>,
    pub is_double_entry: bool,
}

impl ColumnSuggestion {
    pub fn is_complete(&self) -> bool {
        self.date_col.is_some()
            && self.description_col.is_some()
            && (self.amount_col.is_some() || self.is_double_entry)
    }
}

/// Partial column mapping as supplied by a caller or loaded from a saved
/// profile. Unset fields are filled from other sources before resolving.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub date_col: Option<usize>,
    pub description_col: Option<usize>,
    pub amount_col: Option<usize>,
    pub debit_col: Option<usize>,
    pub credit_col: Option<usize>,
    pub category_col: Option<usize>,
    pub currency_col: Option<usize>,
    pub is_european_format: Option<bool>,
    pub date_format: Option<String>,
    pub timezone: Option<String>,
}

impl ColumnMapping {
    pub fn from_suggestion(s: &ColumnSuggestion) -> Self {
        let (amount_col, debit_col, credit_col) = if s.is_double_entry {
            (None, s.debit_col, s.credit_col)
        } else {
            (s.amount_col, None, None)
        };
        ColumnMapping {
            date_col: s.date_col,
            description_col: s.description_col,
            amount_col,
            debit_col,
            credit_col,
            category_col: s.category_col,
            currency_col: s.currency_col,
            ..ColumnMapping::default()
        }
    }

    fn has_amount_shape(&self) -> bool {
        self.amount_col.is_some() || self.debit_col.is_some() || self.credit_col.is_some()
    }

    /// Fills every unset field from `other`. The amount shape (single column
    /// vs. debit/credit pair) is taken as a unit so the two never mix.
    pub fn overlay(mut self, other: &ColumnMapping) -> Self {
        self.date_col = self.date_col.or(other.date_col);
        self.description_col = self.description_col.or(other.description_col);
        if !self.has_amount_shape() {
            self.amount_col = other.amount_col;
            self.debit_col = other.debit_col;
            self.credit_col = other.credit_col;
        }
        self.category_col = self.category_col.or(other.category_col);
        self.currency_col = self.currency_col.or(other.currency_col);
        self.is_european_format = self.is_european_format.or(other.is_european_format);
        if self.date_format.is_none() {
            self.date_format = other.date_format.clone();
        }
        if self.timezone.is_none() {
            self.timezone = other.timezone.clone();
        }
        self
    }

    /// Validates against a header row of `width` columns.
    pub fn resolve(&self, width: usize) -> Result<ResolvedMapping, MappingError> {
        let check = |role: ColumnRole, idx: Option<usize>| -> Result<Option<usize>, MappingError> {
            match idx {
                Some(index) if index >= width => Err(MappingError::ColumnOutOfBounds {
                    role,
                    index,
                    width,
                }),
                other => Ok(other),
            }
        };

        let date_col = check(ColumnRole::Date, self.date_col)?
            .ok_or(MappingError::MissingColumn(ColumnRole::Date))?;
        let description_col = check(ColumnRole::Description, self.description_col)?
            .ok_or(MappingError::MissingColumn(ColumnRole::Description))?;
        let amount_col = check(ColumnRole::Amount, self.amount_col)?;
        let debit_col = check(ColumnRole::Debit, self.debit_col)?;
        let credit_col = check(ColumnRole::Credit, self.credit_col)?;

        let amount = match (amount_col, debit_col, credit_col) {
            (_, Some(debit), Some(credit)) => AmountColumns::Split { debit, credit },
            (Some(_), Some(_), None) | (Some(_), None, Some(_)) => {
                return Err(MappingError::AmbiguousAmount)
            }
            (Some(col), None, None) => AmountColumns::Single(col),
            (None, Some(_), None) => return Err(MappingError::MissingColumn(ColumnRole::Credit)),
            (None, None, Some(_)) => return Err(MappingError::MissingColumn(ColumnRole::Debit)),
            (None, None, None) => return Err(MappingError::MissingColumn(ColumnRole::Amount)),
        };

        let timezone = self
            .timezone
            .as_deref()
            .map(|tz| parse_offset(tz).ok_or_else(|| MappingError::InvalidTimezone(tz.to_string())))
            .transpose()?;

        Ok(ResolvedMapping {
            date_col,
            description_col,
            amount,
            category_col: check(ColumnRole::Category, self.category_col)?,
            currency_col: check(ColumnRole::Currency, self.currency_col)?,
            european: self.is_european_format.unwrap_or(false),
            date_format: self.date_format.clone(),
            timezone,
        })
    }
}

/// Parses `UTC`, `Z`, `+03:00`, `-0500` into a fixed offset.
fn parse_offset(tz: &str) -> Option<FixedOffset> {
    let tz = tz.trim();
    if tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("z") || tz.eq_ignore_ascii_case("gmt") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match tz.as_bytes().first().copied()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountColumns {
    Single(usize),
    Split { debit: usize, credit: usize },
}

/// A mapping whose required columns are known to exist.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMapping {
    pub date_col: usize,
    pub description_col: usize,
    pub amount: AmountColumns,
    pub category_col: Option<usize>,
    pub currency_col: Option<usize>,
    pub european: bool,
    pub date_format: Option<String>,
    pub timezone: Option<FixedOffset>,
}

impl ResolvedMapping {
    /// Back to the partial, serialisable form for saving.
    pub fn to_column_mapping(&self) -> ColumnMapping {
        let (amount_col, debit_col, credit_col) = match self.amount {
            AmountColumns::Single(col) => (Some(col), None, None),
            AmountColumns::Split { debit, credit } => (None, Some(debit), Some(credit)),
        };
        ColumnMapping {
            date_col: Some(self.date_col),
            description_col: Some(self.description_col),
            amount_col,
            debit_col,
            credit_col,
            category_col: self.category_col,
            currency_col: self.currency_col,
            is_european_format: Some(self.european),
            date_format: self.date_format.clone(),
            timezone: self.timezone.map(|tz| tz.to_string()),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MappingError {
    #[error("Missing required column: {0}")]
    MissingColumn(ColumnRole),
    #[error("Column {index} for {role} is out of bounds (file has {width} columns)")]
    ColumnOutOfBounds {
        role: ColumnRole,
        index: usize,
        width: usize,
    },
    #[error("Amount column given together with only one of debit/credit")]
    AmbiguousAmount,
    #[error("Unrecognised timezone: {0}")]
    InvalidTimezone(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOrder {
    DayFirst,
    MonthFirst,
    YearFirst,
    Unknown,
}

impl DateOrder {
    pub fn chrono_format(self) -> Option<&'static str> {
        match self {
            DateOrder::DayFirst => Some("%d/%m/%Y"),
            DateOrder::MonthFirst => Some("%m/%d/%Y"),
            DateOrder::YearFirst => Some("%Y-%m-%d"),
            DateOrder::Unknown => None,
        }
    }
}

/// Inferred regional number/date convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionalDialect {
    pub decimal_sep: char,
    pub thousands_sep: char,
    pub date_order: DateOrder,
    pub currency_hint: Option<String>,
    /// Winning hint share in [0, 1]; 0 means no conclusion.
    pub confidence: f64,
}

impl RegionalDialect {
    pub fn is_european(&self) -> bool {
        self.decimal_sep == ','
    }

    pub fn is_conclusive(&self) -> bool {
        self.confidence > 0.0
    }
}
