use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::sniff::FormatError;

// Sheet names that usually hold the statement, checked before falling back to
// the first sheet.
const STATEMENT_SHEET_HINTS: &[&str] = &[
    "extrato",
    "transac",
    "moviment",
    "lancament",
    "statement",
    "transaction",
    "activity",
    "extracto",
    "historico",
];

/// Cells of one worksheet, stringified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetRows {
    pub sheet: String,
    /// 1-based row number of `rows[0]` in the worksheet.
    pub first_row: usize,
    pub rows: Vec<Vec<String>>,
}

impl SheetRows {
    pub fn row_number(&self, index: usize) -> usize {
        self.first_row + index
    }
}

/// Reads the statement sheet of an `.xlsx` / `.xls` workbook held in memory.
pub fn read_workbook(bytes: &[u8]) -> Result<SheetRows, FormatError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| FormatError::Spreadsheet(e.to_string()))?;

    let names = workbook.sheet_names();
    let sheet = pick_sheet(&names).ok_or(FormatError::EmptyFile)?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| FormatError::Spreadsheet(e.to_string()))?;

    let (start_row, start_col) = range.start().unwrap_or((0, 0));
    let rows: Vec<Vec<String>> = range
        .rows()
        .map(|row| {
            // Keep absolute column positions when the used range starts late.
            std::iter::repeat(String::new())
                .take(start_col as usize)
                .chain(row.iter().map(cell_to_string))
                .collect()
        })
        .collect();

    debug!(sheet = %sheet, rows = rows.len(), "read worksheet");

    Ok(SheetRows {
        sheet,
        first_row: start_row as usize + 1,
        rows,
    })
}

fn pick_sheet(names: &[String]) -> Option<String> {
    names
        .iter()
        .find(|name| {
            let lower = name.to_lowercase();
            STATEMENT_SHEET_HINTS.iter().any(|hint| lower.contains(hint))
        })
        .or_else(|| names.first())
        .cloned()
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => format_float(*f),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => serial_to_string(dt.as_f64()),
        Data::DateTimeIso(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{f:.2}")
    }
}

/// Converts an Excel serial date (days since 1899-12-30) to `YYYY-MM-DD`,
/// with a time part when the serial has a fraction.
pub fn serial_to_string(serial: f64) -> String {
    let Some(epoch) = NaiveDate::from_ymd_opt(1899, 12, 30).and_then(|d| d.and_hms_opt(0, 0, 0))
    else {
        return String::new();
    };
    let seconds = (serial * 86_400.0).round() as i64;
    let dt: NaiveDateTime = epoch + Duration::seconds(seconds);
    if seconds % 86_400 == 0 {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_dates() {
        assert_eq!(serial_to_string(45292.0), "2024-01-01");
        assert_eq!(serial_to_string(45292.5), "2024-01-01 12:00:00");
        assert_eq!(serial_to_string(1.0), "1899-12-31");
    }

    #[test]
    fn floats_keep_two_decimals() {
        assert_eq!(cell_to_string(&Data::Float(-39.9)), "-39.90");
        assert_eq!(cell_to_string(&Data::Float(1500.0)), "1500");
        assert_eq!(cell_to_string(&Data::Int(7)), "7");
        assert_eq!(cell_to_string(&Data::String(" NETFLIX ".into())), "NETFLIX");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }

    #[test]
    fn sheet_choice_prefers_statement_names() {
        let names = vec!["Resumo".to_string(), "Extrato Janeiro".to_string()];
        assert_eq!(pick_sheet(&names).as_deref(), Some("Extrato Janeiro"));
        let names = vec!["Sheet1".to_string(), "Sheet2".to_string()];
        assert_eq!(pick_sheet(&names).as_deref(), Some("Sheet1"));
        assert_eq!(pick_sheet(&[]), None);
    }

    #[test]
    fn garbage_bytes_are_a_spreadsheet_error() {
        let err = read_workbook(b"PK\x03\x04not really a zip").unwrap_err();
        assert!(matches!(err, FormatError::Spreadsheet(_)));
    }

    #[test]
    fn row_numbers_are_offset_by_range_start() {
        let sheet = SheetRows {
            sheet: "S".into(),
            first_row: 3,
            rows: vec![vec![], vec![]],
        };
        assert_eq!(sheet.row_number(0), 3);
        assert_eq!(sheet.row_number(1), 4);
    }
}
