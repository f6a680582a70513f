use sha2::{Digest, Sha256};
use tally_core::{find_currency, DetectOptions, FileConfig, SourceFormat};
use thiserror::Error;
use tracing::debug;

use crate::columns::is_header_keyword;
use crate::text::{count_unquoted, line_offset, split_fields};

pub const CANDIDATE_DELIMITERS: [u8; 4] = [b';', b',', b'\t', b'|'];

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("File is empty")]
    EmptyFile,
    #[error("No header row found")]
    NoHeadersFound,
    #[error("Header row {row} is out of range ({lines} lines)")]
    HeaderRowOutOfRange { row: usize, lines: usize },
    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Header detection knobs.
#[derive(Debug, Clone, Copy)]
pub struct Sniffer {
    pub max_lines: usize,
    pub sample_rows: usize,
}

impl Default for Sniffer {
    fn default() -> Self {
        Self {
            max_lines: 20,
            sample_rows: 10,
        }
    }
}

/// One inspected line, already split into fields.
struct Candidate {
    index: usize,
    delimiter: u8,
    columns: usize,
    keywords: usize,
}

impl Sniffer {
    pub fn new(max_lines: usize, sample_rows: usize) -> Self {
        Self {
            max_lines,
            sample_rows,
        }
    }

    /// Detects delimiter, header offset and headers of delimited text.
    pub fn detect(&self, text: &str, options: &DetectOptions) -> Result<FileConfig, FormatError> {
        if text.trim().is_empty() {
            return Err(FormatError::EmptyFile);
        }
        let lines: Vec<&str> = text.lines().collect();

        let header = match options.header_row {
            Some(row) => {
                let line = lines.get(row).ok_or(FormatError::HeaderRowOutOfRange {
                    row,
                    lines: lines.len(),
                })?;
                score_line(row, line, options.delimiter)
            }
            None => {
                let candidates: Vec<Candidate> = lines
                    .iter()
                    .take(self.max_lines)
                    .enumerate()
                    .filter(|(_, line)| !line.trim().is_empty())
                    .map(|(i, line)| score_line(i, line, options.delimiter))
                    .collect();
                pick_header(candidates).ok_or(FormatError::NoHeadersFound)?
            }
        };

        let headers = split_fields(lines[header.index], header.delimiter);
        let preamble = lines[..header.index]
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        let body = &text[line_offset(text, header.index + 1)..];
        let sample_rows = read_sample(body, header.delimiter, self.sample_rows)?;

        debug!(
            delimiter = %(header.delimiter as char).escape_default(),
            header_row = header.index,
            columns = headers.len(),
            "detected delimited layout"
        );

        Ok(FileConfig {
            format: SourceFormat::Delimited,
            delimiter: header.delimiter,
            skip_lines: header.index,
            fingerprint: fingerprint(&headers),
            headers,
            sample_rows,
            preamble,
        })
    }

    /// Same scoring over spreadsheet rows that are already split into cells.
    pub fn detect_rows(
        &self,
        format: SourceFormat,
        rows: &[Vec<String>],
        options: &DetectOptions,
    ) -> Result<FileConfig, FormatError> {
        if rows.iter().all(|r| r.iter().all(|c| c.trim().is_empty())) {
            return Err(FormatError::EmptyFile);
        }

        let header_index = match options.header_row {
            Some(row) if row < rows.len() => row,
            Some(row) => {
                return Err(FormatError::HeaderRowOutOfRange {
                    row,
                    lines: rows.len(),
                })
            }
            None => {
                let candidates = rows
                    .iter()
                    .take(self.max_lines)
                    .enumerate()
                    .map(|(index, row)| {
                        let filled: Vec<&String> =
                            row.iter().filter(|c| !c.trim().is_empty()).collect();
                        Candidate {
                            index,
                            delimiter: b',',
                            columns: filled.len(),
                            keywords: filled.iter().filter(|c| is_header_keyword(c)).count(),
                        }
                    })
                    .collect();
                pick_header(candidates).ok_or(FormatError::NoHeadersFound)?.index
            }
        };

        let headers: Vec<String> = trim_trailing_empty(&rows[header_index])
            .iter()
            .map(|c| c.trim().to_string())
            .collect();
        let preamble = rows[..header_index]
            .iter()
            .map(|r| {
                r.iter()
                    .map(|c| c.trim())
                    .filter(|c| !c.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .filter(|l| !l.is_empty())
            .collect();
        let sample_rows = rows[header_index + 1..]
            .iter()
            .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
            .take(self.sample_rows)
            .cloned()
            .collect();

        Ok(FileConfig {
            format,
            delimiter: b',',
            skip_lines: header_index,
            fingerprint: fingerprint(&headers),
            headers,
            sample_rows,
            preamble,
        })
    }
}

/// Detects the layout of delimited text with default limits.
pub fn detect(text: &str, options: &DetectOptions) -> Result<FileConfig, FormatError> {
    Sniffer::default().detect(text, options)
}

fn score_line(index: usize, line: &str, forced: Option<u8>) -> Candidate {
    let delimiter = forced.unwrap_or_else(|| {
        CANDIDATE_DELIMITERS
            .iter()
            .copied()
            .fold((b',', 0), |best, d| {
                let n = count_unquoted(line, d);
                if n > best.1 {
                    (d, n)
                } else {
                    best
                }
            })
            .0
    });
    let fields = split_fields(line, delimiter);
    let keywords = fields.iter().filter(|f| is_header_keyword(f)).count();
    Candidate {
        index,
        delimiter,
        columns: fields.len(),
        keywords,
    }
}

/// Keyword-bearing lines (>= 2 matches) win on `columns * 10 + keywords`;
/// otherwise the widest line with at least two fields. Earlier lines win ties.
fn pick_header(candidates: Vec<Candidate>) -> Option<Candidate> {
    let mut keyword_best: Option<(usize, &Candidate)> = None;
    let mut widest: Option<&Candidate> = None;

    for c in &candidates {
        if c.keywords >= 2 {
            let score = c.columns * 10 + c.keywords;
            if keyword_best.map_or(true, |(best, _)| score > best) {
                keyword_best = Some((score, c));
            }
        }
        if c.columns >= 2 && widest.map_or(true, |w| c.columns > w.columns) {
            widest = Some(c);
        }
    }

    let index = keyword_best.map(|(_, c)| c.index).or(widest.map(|c| c.index))?;
    candidates.into_iter().find(|c| c.index == index)
}

fn read_sample(body: &str, delimiter: u8, limit: usize) -> Result<Vec<Vec<String>>, FormatError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(body.as_bytes());

    let mut rows = Vec::new();
    for result in reader.records() {
        if rows.len() >= limit {
            break;
        }
        let record = result?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        rows.push(record.iter().map(|f| f.trim().to_string()).collect());
    }
    Ok(rows)
}

fn trim_trailing_empty(row: &[String]) -> &[String] {
    let end = row
        .iter()
        .rposition(|c| !c.trim().is_empty())
        .map_or(0, |i| i + 1);
    &row[..end]
}

/// SHA-256 hex of the `|`-joined, lower-cased, alphanumeric-only headers.
pub fn fingerprint(headers: &[String]) -> String {
    let normalized: Vec<String> = headers
        .iter()
        .map(|h| {
            h.chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect()
        })
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(normalized.join("|").as_bytes());
    hex::encode(hasher.finalize())
}

/// Looks for a currency in the statement preamble, then in an explicit
/// currency column, then anywhere in the sample rows.
pub fn sniff_currency(config: &FileConfig, currency_col: Option<usize>) -> Option<String> {
    if let Some(code) = find_currency(&config.preamble.join("\n")) {
        return Some(code.to_string());
    }
    if let Some(col) = currency_col {
        let from_column = config
            .sample_rows
            .iter()
            .filter_map(|row| row.get(col))
            .find_map(|cell| find_currency(&cell.to_uppercase()));
        if let Some(code) = from_column {
            return Some(code.to_string());
        }
    }
    config
        .sample_rows
        .iter()
        .flatten()
        .find_map(|cell| find_currency(cell))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> DetectOptions {
        DetectOptions::default()
    }

    // ── detect ────────────────────────────────────────────────────────────────

    #[test]
    fn detect_empty_file() {
        assert!(matches!(detect("", &opts()), Err(FormatError::EmptyFile)));
        assert!(matches!(detect(" \n\n", &opts()), Err(FormatError::EmptyFile)));
    }

    #[test]
    fn detect_simple_semicolon_file() {
        let text = "Data;Descrição;Valor\n01/02/2024;PADARIA;-10,50\n";
        let cfg = detect(text, &opts()).unwrap();
        assert_eq!(cfg.delimiter, b';');
        assert_eq!(cfg.skip_lines, 0);
        assert_eq!(cfg.headers, vec!["Data", "Descrição", "Valor"]);
        assert_eq!(cfg.sample_rows, vec![vec!["01/02/2024", "PADARIA", "-10,50"]]);
        assert!(cfg.preamble.is_empty());
    }

    #[test]
    fn detect_skips_preamble_with_more_delimiters() {
        let text = "\
Banco Exemplo S.A.;;;;;;;
Conta: 12345-6;Agencia: 0001;;;;;;
Periodo: 01/01/2024 a 31/01/2024;Moeda: BRL;;;;;;
Data;Descricao;Valor;Saldo
02/01/2024;NETFLIX.COM;-39,90;1.000,00
03/01/2024;SALARIO;5.000,00;6.000,00
";
        let cfg = detect(text, &opts()).unwrap();
        assert_eq!(cfg.skip_lines, 3);
        assert_eq!(cfg.headers, vec!["Data", "Descricao", "Valor", "Saldo"]);
        assert_eq!(cfg.sample_rows.len(), 2);
        assert_eq!(cfg.preamble.len(), 3);
    }

    #[test]
    fn detect_falls_back_to_widest_line() {
        let text = "col_a,col_b,col_c\n1,2,3\n";
        let cfg = detect(text, &opts()).unwrap();
        assert_eq!(cfg.skip_lines, 0);
        assert_eq!(cfg.delimiter, b',');
        assert_eq!(cfg.headers.len(), 3);
    }

    #[test]
    fn detect_no_headers_found() {
        let text = "just one field\nanother line\n";
        assert!(matches!(detect(text, &opts()), Err(FormatError::NoHeadersFound)));
    }

    #[test]
    fn detect_only_scans_first_lines() {
        let mut text = String::new();
        for _ in 0..25 {
            text.push_str("noise\n");
        }
        text.push_str("Date,Description,Amount\n");
        let sniffer = Sniffer::default();
        assert!(matches!(
            sniffer.detect(&text, &opts()),
            Err(FormatError::NoHeadersFound)
        ));
    }

    #[test]
    fn detect_tab_separated() {
        let text = "Date\tDescription\tAmount\n2024-01-02\tCOFFEE\t-3.50\n";
        let cfg = detect(text, &opts()).unwrap();
        assert_eq!(cfg.delimiter, b'\t');
    }

    #[test]
    fn header_row_override() {
        let text = "x;y\nfoo;bar;baz\n1;2;3\n";
        let options = DetectOptions {
            header_row: Some(1),
            delimiter: None,
        };
        let cfg = detect(text, &options).unwrap();
        assert_eq!(cfg.headers, vec!["foo", "bar", "baz"]);
        assert_eq!(cfg.skip_lines, 1);
    }

    #[test]
    fn header_row_out_of_range() {
        let options = DetectOptions {
            header_row: Some(9),
            delimiter: None,
        };
        assert!(matches!(
            detect("a;b\n", &options),
            Err(FormatError::HeaderRowOutOfRange { row: 9, lines: 1 })
        ));
    }

    #[test]
    fn delimiter_override() {
        let text = "Date|Description;x|Amount\n2024-01-01|A;B|1.00\n";
        let options = DetectOptions {
            header_row: None,
            delimiter: Some(b'|'),
        };
        let cfg = detect(text, &options).unwrap();
        assert_eq!(cfg.headers, vec!["Date", "Description;x", "Amount"]);
    }

    // ── detect_rows ───────────────────────────────────────────────────────────

    #[test]
    fn detect_rows_finds_sheet_header() {
        let rows: Vec<Vec<String>> = vec![
            vec!["Extrato".into(), "".into(), "".into()],
            vec!["Data".into(), "Histórico".into(), "Valor".into()],
            vec!["2024-01-02".into(), "MERCADO".into(), "-12.5".into()],
        ];
        let cfg = Sniffer::default()
            .detect_rows(SourceFormat::Xlsx, &rows, &opts())
            .unwrap();
        assert_eq!(cfg.skip_lines, 1);
        assert_eq!(cfg.headers, vec!["Data", "Histórico", "Valor"]);
        assert_eq!(cfg.preamble, vec!["Extrato"]);
        assert_eq!(cfg.sample_rows.len(), 1);
    }

    // ── fingerprint ───────────────────────────────────────────────────────────

    #[test]
    fn fingerprint_ignores_case_and_punctuation() {
        let a = fingerprint(&["Data".into(), "Valor (R$)".into()]);
        let b = fingerprint(&["DATA".into(), "valor r$".into()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_known_vector() {
        // sha256("date|amount")
        let fp = fingerprint(&["Date".into(), "Amount".into()]);
        let mut hasher = Sha256::new();
        hasher.update(b"date|amount");
        assert_eq!(fp, hex::encode(hasher.finalize()));
    }

    #[test]
    fn fingerprint_depends_on_column_order() {
        let a = fingerprint(&["Date".into(), "Amount".into()]);
        let b = fingerprint(&["Amount".into(), "Date".into()]);
        assert_ne!(a, b);
    }

    // ── sniff_currency ────────────────────────────────────────────────────────

    #[test]
    fn currency_from_preamble() {
        let text = "Moeda: BRL\nData;Descricao;Valor\n01/01/2024;X;1,00\n";
        let cfg = detect(text, &opts()).unwrap();
        assert_eq!(sniff_currency(&cfg, None).as_deref(), Some("BRL"));
    }

    #[test]
    fn currency_from_column() {
        let text = "Date,Description,Amount,Currency\n2024-01-01,X,1.00,eur\n";
        let cfg = detect(text, &opts()).unwrap();
        assert_eq!(sniff_currency(&cfg, Some(3)).as_deref(), Some("EUR"));
    }

    #[test]
    fn currency_unknown() {
        let text = "Date,Description,Amount\n2024-01-01,X,1.00\n";
        let cfg = detect(text, &opts()).unwrap();
        assert_eq!(sniff_currency(&cfg, None), None);
    }
}
