use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use rust_decimal::Decimal;
use std::str::FromStr;
use tally_core::currency::strip_currency;
use tally_core::{
    decimal_to_minor, AmountColumns, ParseError, ParseErrorKind, ParsedTransaction,
    ResolvedMapping, RowOutcome,
};
use thiserror::Error;

use crate::classifier::TagClassifier;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AmountError {
    #[error("empty amount")]
    Empty,
    #[error("invalid amount '{0}'")]
    Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DateError {
    #[error("unrecognised date '{0}'")]
    Unrecognised(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedAmount {
    pub minor: i64,
    /// ISO code of a symbol or code found next to the number.
    pub currency: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedDate {
    pub date: NaiveDate,
    pub time: Option<NaiveDateTime>,
}

// ── Amounts ───────────────────────────────────────────────────────────────────

/// Parses a statement amount into minor units.
///
/// Handles currency symbols and ISO codes (reported back as a hint), a leading
/// or trailing `-`, accounting parentheses, and both `1.234,56` (`european`)
/// and `1,234.56` digit grouping.
pub fn parse_amount(raw: &str, european: bool) -> Result<ParsedAmount, AmountError> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\'')
        .collect();
    if compact.is_empty() {
        return Err(AmountError::Empty);
    }

    let mut negative = false;
    let mut currency = None;
    let mut s = compact.as_str();
    loop {
        let before = s.len();
        if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
            negative = true;
            s = inner;
        }
        if let Some(rest) = s.strip_prefix('-') {
            negative = true;
            s = rest;
        } else if let Some(rest) = s.strip_suffix('-') {
            negative = true;
            s = rest;
        }
        if let Some(rest) = s.strip_prefix('+') {
            s = rest;
        }
        let (rest, code) = strip_currency(s);
        if code.is_some() {
            currency = currency.or(code);
            s = rest;
        }
        if s.len() == before {
            break;
        }
    }

    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return Err(AmountError::Invalid(raw.trim().to_string()));
    }

    let normalized = normalize_separators(s, european);
    let value =
        Decimal::from_str(&normalized).map_err(|_| AmountError::Invalid(raw.trim().to_string()))?;
    let minor = decimal_to_minor(value).ok_or_else(|| AmountError::Invalid(raw.trim().to_string()))?;

    Ok(ParsedAmount {
        minor: if negative { -minor } else { minor },
        currency,
    })
}

/// Rewrites digit grouping to a plain `1234.56`. A lone separator followed by
/// one or two digits is always a decimal point, whatever the convention says.
fn normalize_separators(s: &str, european: bool) -> String {
    let (decimal, group) = if european { (',', '.') } else { ('.', ',') };

    let seps: Vec<(usize, char)> = s.char_indices().filter(|(_, c)| *c == '.' || *c == ',').collect();
    if let [(pos, sep)] = seps.as_slice() {
        let digits_after = s.len() - pos - 1;
        if *sep == group && (1..=2).contains(&digits_after) {
            return s.replace(*sep, ".");
        }
    }

    s.chars()
        .filter(|c| *c != group)
        .map(|c| if c == decimal { '.' } else { c })
        .collect()
}

// ── Dates ─────────────────────────────────────────────────────────────────────

// First match wins. Day-first precedes month-first.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%d-%m-%Y",
    "%Y/%m/%d",
    "%d/%m/%y",
    "%m/%d/%y",
    "%d.%m.%y",
    "%d-%m-%y",
];

fn plausible(date: NaiveDate) -> bool {
    (1900..=2200).contains(&date.year())
}

fn try_format(s: &str, fmt: &str) -> Option<ParsedDate> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
        return plausible(dt.date()).then_some(ParsedDate {
            date: dt.date(),
            time: Some(dt),
        });
    }
    NaiveDate::parse_from_str(s, fmt)
        .ok()
        .filter(|d| plausible(*d))
        .map(|date| ParsedDate { date, time: None })
}

/// Parses a date cell, trying `preferred` (chrono syntax) first.
pub fn parse_date(raw: &str, preferred: Option<&str>) -> Result<ParsedDate, DateError> {
    let s = raw.trim();

    if let Some(found) = preferred.and_then(|fmt| try_format(s, fmt)) {
        return Ok(found);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        let local = dt.naive_local();
        return Ok(ParsedDate {
            date: local.date(),
            time: Some(local),
        });
    }
    DATETIME_FORMATS
        .iter()
        .chain(DATE_FORMATS)
        .find_map(|fmt| try_format(s, fmt))
        .ok_or_else(|| DateError::Unrecognised(s.to_string()))
}

// ── Rows ──────────────────────────────────────────────────────────────────────

fn cell(fields: &[String], idx: usize) -> &str {
    fields.get(idx).map(|s| s.trim()).unwrap_or_default()
}

fn row_error(
    row: usize,
    fields: &[String],
    column: &str,
    kind: ParseErrorKind,
    message: String,
) -> RowOutcome {
    RowOutcome::Failed(ParseError {
        row,
        column: Some(column.to_string()),
        kind,
        message,
        raw_data: fields.join(","),
    })
}

/// Turns one mapped row into a transaction, a row error, or a skip (empty date).
pub fn parse_row(
    row: usize,
    fields: &[String],
    mapping: &ResolvedMapping,
    classifier: Option<&TagClassifier>,
) -> RowOutcome {
    let raw_date = cell(fields, mapping.date_col);
    if raw_date.is_empty() {
        return RowOutcome::Skipped { row };
    }
    let parsed_date = match parse_date(raw_date, mapping.date_format.as_deref()) {
        Ok(d) => d,
        Err(e) => return row_error(row, fields, "date", ParseErrorKind::Date, e.to_string()),
    };

    let description = cell(fields, mapping.description_col);
    if description.is_empty() {
        return row_error(
            row,
            fields,
            "description",
            ParseErrorKind::MissingField,
            "missing description".to_string(),
        );
    }

    let amount = match mapping.amount {
        AmountColumns::Single(col) => match parse_amount(cell(fields, col), mapping.european) {
            Ok(a) => a,
            Err(AmountError::Empty) => {
                return row_error(
                    row,
                    fields,
                    "amount",
                    ParseErrorKind::MissingField,
                    "missing amount".to_string(),
                )
            }
            Err(e) => return row_error(row, fields, "amount", ParseErrorKind::Amount, e.to_string()),
        },
        AmountColumns::Split { debit, credit } => {
            match split_amount(cell(fields, debit), cell(fields, credit), mapping.european) {
                Ok(a) => a,
                Err((column, AmountError::Empty)) => {
                    return row_error(
                        row,
                        fields,
                        column,
                        ParseErrorKind::MissingField,
                        "missing debit and credit".to_string(),
                    )
                }
                Err((column, e)) => {
                    return row_error(row, fields, column, ParseErrorKind::Amount, e.to_string())
                }
            }
        }
    };

    let currency_hint = amount.currency.map(str::to_string).or_else(|| {
        mapping
            .currency_col
            .map(|col| cell(fields, col).to_uppercase())
            .filter(|c| !c.is_empty())
    });

    let occurred_at = parsed_date.time.and_then(|naive| {
        let offset = mapping
            .timezone
            .or_else(|| FixedOffset::east_opt(0))?;
        offset.from_local_datetime(&naive).single()
    });

    RowOutcome::Parsed(ParsedTransaction {
        row,
        date: parsed_date.date,
        occurred_at,
        description: description.to_string(),
        amount_minor: amount.minor,
        category: mapping
            .category_col
            .map(|col| cell(fields, col).to_string())
            .filter(|c| !c.is_empty()),
        currency_hint,
        tag: classifier
            .and_then(|c| c.classify(description))
            .map(|p| p.label),
        raw_row: fields.to_vec(),
    })
}

/// A non-zero debit becomes a negative amount; otherwise the credit becomes a
/// positive one. A debit cell that does not parse (a `-` placeholder, say)
/// defers to the credit. Errors carry the offending column name and are
/// reported only when neither side yields an amount.
fn split_amount(
    debit: &str,
    credit: &str,
    european: bool,
) -> Result<ParsedAmount, (&'static str, AmountError)> {
    let debit = (!debit.is_empty()).then(|| parse_amount(debit, european));
    if let Some(Ok(d)) = &debit {
        if d.minor != 0 {
            return Ok(ParsedAmount {
                minor: -d.minor.abs(),
                ..*d
            });
        }
    }
    let credit = (!credit.is_empty()).then(|| parse_amount(credit, european));
    match (debit, credit) {
        (_, Some(Ok(c))) => Ok(ParsedAmount {
            minor: c.minor.abs(),
            ..c
        }),
        (Some(Ok(zero)), _) => Ok(zero),
        (_, Some(Err(e))) => Err(("credit", e)),
        (Some(Err(e)), None) => Err(("debit", e)),
        (None, None) => Err(("amount", AmountError::Empty)),
    }
}
