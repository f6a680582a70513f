use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalised statement row. `amount_minor` is negative for expenses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTransaction {
    /// 1-based row number in the source file.
    pub row: usize,
    pub date: NaiveDate,
    /// Set when the source cell carried a time of day.
    pub occurred_at: Option<DateTime<FixedOffset>>,
    pub description: String,
    pub amount_minor: i64,
    pub category: Option<String>,
    pub currency_hint: Option<String>,
    /// Label from the row tag classifier, if one was supplied.
    pub tag: Option<String>,
    pub raw_row: Vec<String>,
}

impl ParsedTransaction {
    pub fn is_expense(&self) -> bool {
        self.amount_minor < 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    Date,
    Amount,
    MissingField,
    Malformed,
}

/// A row that could not be turned into a transaction. Never fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseError {
    pub row: usize,
    pub column: Option<String>,
    pub kind: ParseErrorKind,
    pub message: String,
    pub raw_data: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(column) => write!(f, "row {}: {}: {}", self.row, column, self.message),
            None => write!(f, "row {}: {}", self.row, self.message),
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Parsed(ParsedTransaction),
    Failed(ParseError),
    /// Row with an empty date cell (totals, blank separators).
    Skipped { row: usize },
}

impl RowOutcome {
    pub fn row(&self) -> usize {
        match self {
            RowOutcome::Parsed(tx) => tx.row,
            RowOutcome::Failed(err) => err.row,
            RowOutcome::Skipped { row } => *row,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    pub total_rows: usize,
    pub parsed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display_with_column() {
        let err = ParseError {
            row: 7,
            column: Some("amount".to_string()),
            kind: ParseErrorKind::Amount,
            message: "invalid amount 'abc'".to_string(),
            raw_data: "2024-01-01;X;abc".to_string(),
        };
        assert_eq!(err.to_string(), "row 7: amount: invalid amount 'abc'");
    }

    #[test]
    fn parse_error_display_without_column() {
        let err = ParseError {
            row: 3,
            column: None,
            kind: ParseErrorKind::Malformed,
            message: "unterminated quote".to_string(),
            raw_data: String::new(),
        };
        assert_eq!(err.to_string(), "row 3: unterminated quote");
    }
}
