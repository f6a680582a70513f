use tally_core::{DetectOptions, FileConfig, ResolvedMapping, SourceFormat};
use tracing::info;

use crate::excel::{read_workbook, SheetRows};
use crate::sniff::{FormatError, Sniffer};
use crate::stream::{stream_delimited, stream_sheet, StreamOptions, TransactionStream};
use crate::text::{decode_text, line_offset};

#[derive(Debug, Clone)]
enum SourceData {
    Delimited(String),
    Sheet(SheetRows),
}

/// A decoded file with its detected layout, ready to stream.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub config: FileConfig,
    data: SourceData,
}

/// Decodes `bytes` (delimited text or a workbook) and detects its layout.
pub fn load(
    bytes: &[u8],
    options: &DetectOptions,
    sniffer: &Sniffer,
) -> Result<LoadedSource, FormatError> {
    if bytes.is_empty() {
        return Err(FormatError::EmptyFile);
    }
    let format = SourceFormat::sniff(bytes);
    let source = if format.is_spreadsheet() {
        let sheet = read_workbook(bytes)?;
        let config = sniffer.detect_rows(format, &sheet.rows, options)?;
        LoadedSource {
            config,
            data: SourceData::Sheet(sheet),
        }
    } else {
        let text = decode_text(bytes).into_owned();
        let config = sniffer.detect(&text, options)?;
        LoadedSource {
            config,
            data: SourceData::Delimited(text),
        }
    };
    info!(
        format = ?source.config.format,
        header_row = source.config.skip_lines,
        columns = source.config.headers.len(),
        "loaded source"
    );
    Ok(source)
}

impl LoadedSource {
    /// Every non-empty value of column `col` below the header, in file order.
    pub fn column_values(&self, col: usize) -> Result<Vec<String>, FormatError> {
        let values = match &self.data {
            SourceData::Delimited(text) => {
                let body = &text[line_offset(text, self.config.skip_lines + 1)..];
                let mut reader = csv::ReaderBuilder::new()
                    .has_headers(false)
                    .flexible(true)
                    .delimiter(self.config.delimiter)
                    .from_reader(body.as_bytes());
                let mut values = Vec::new();
                for record in reader.records() {
                    if let Some(value) = record?.get(col) {
                        values.push(value.trim().to_string());
                    }
                }
                values
            }
            SourceData::Sheet(sheet) => sheet
                .rows
                .iter()
                .skip(self.config.skip_lines + 1)
                .filter_map(|row| row.get(col))
                .map(|value| value.trim().to_string())
                .collect(),
        };
        Ok(values.into_iter().filter(|v| !v.is_empty()).collect())
    }

    pub fn stream(self, mapping: ResolvedMapping, options: StreamOptions) -> TransactionStream {
        match self.data {
            SourceData::Delimited(text) => stream_delimited(
                text,
                self.config.skip_lines,
                self.config.delimiter,
                mapping,
                options,
            ),
            SourceData::Sheet(sheet) => {
                stream_sheet(sheet, self.config.skip_lines, mapping, options)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{ColumnMapping, RowOutcome};

    #[tokio::test]
    async fn load_and_stream_latin1_csv() {
        // "Descrição" in Latin-1
        let mut bytes = b"Data;Descri\xe7\xe3o;Valor\n".to_vec();
        bytes.extend_from_slice(b"05/01/2024;PADARIA S\xc3O JO\xc3O;-12,50\n");
        let source = load(&bytes, &DetectOptions::default(), &Sniffer::default()).unwrap();
        assert_eq!(source.config.headers[1], "Descrição");
        assert_eq!(source.config.delimiter, b';');

        let mapping = ColumnMapping {
            date_col: Some(0),
            description_col: Some(1),
            amount_col: Some(2),
            is_european_format: Some(true),
            ..ColumnMapping::default()
        }
        .resolve(source.config.width())
        .unwrap();
        let (outcomes, stats) = source
            .stream(mapping, StreamOptions::default())
            .collect_all()
            .await;
        assert_eq!(stats.parsed, 1);
        let RowOutcome::Parsed(tx) = &outcomes[0] else {
            panic!("expected parsed row");
        };
        assert_eq!(tx.description, "PADARIA SÃO JOÃO");
        assert_eq!(tx.amount_minor, -1250);
    }

    #[test]
    fn column_values_below_header() {
        let text = "Extrato\nData,Descricao,Valor\n01/02/2024,UBER TRIP,-10.00\n,,\n02/02/2024,\"UBER, TRIP\",-5.00\n";
        let source = load(text.as_bytes(), &DetectOptions::default(), &Sniffer::default()).unwrap();
        assert_eq!(source.config.skip_lines, 1);
        assert_eq!(
            source.column_values(1).unwrap(),
            vec!["UBER TRIP".to_string(), "UBER, TRIP".to_string()]
        );
        assert!(source.column_values(9).unwrap().is_empty());
    }

    #[test]
    fn empty_input_is_rejected() {
        let err = load(b"", &DetectOptions::default(), &Sniffer::default()).unwrap_err();
        assert!(matches!(err, FormatError::EmptyFile));
    }
}
