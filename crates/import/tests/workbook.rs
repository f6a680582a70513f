use chrono::NaiveDate;
use tally_core::{ColumnMapping, DetectOptions, RowOutcome, SourceFormat};
use tally_import::{load, read_workbook, suggest_columns, Sniffer, StreamOptions};

// Two sheets: "Resumo" first, then "Extrato" whose used range starts at B2
// with a bank name above the header on row 4 and dated rows 5-7.
const WORKBOOK: &[u8] = include_bytes!("fixtures/extrato.xlsx");

// ── read_workbook ─────────────────────────────────────────────────────────────

#[test]
fn picks_statement_sheet_and_keeps_column_positions() {
    let sheet = read_workbook(WORKBOOK).unwrap();
    assert_eq!(sheet.sheet, "Extrato");
    assert_eq!(sheet.first_row, 2);
    // Every row spans the used range B:D, padded on the left for column A.
    assert_eq!(sheet.rows[0], vec!["", "Banco Exemplo S.A.", "", ""]);
    assert_eq!(sheet.rows[2], vec!["", "Data", "Descrição", "Valor"]);
    assert_eq!(sheet.row_number(3), 5);
}

#[test]
fn date_cells_become_iso_dates() {
    let sheet = read_workbook(WORKBOOK).unwrap();
    assert_eq!(sheet.rows[3][1], "2024-01-01");
    assert_eq!(sheet.rows[3][3], "-39.90");
    assert_eq!(sheet.rows[5][1], "2024-01-03");
}

// ── load + stream ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn workbook_streams_like_a_statement() {
    let source = load(WORKBOOK, &DetectOptions::default(), &Sniffer::default()).unwrap();
    assert_eq!(source.config.format, SourceFormat::Xlsx);
    assert_eq!(source.config.skip_lines, 2);
    assert_eq!(source.config.headers, vec!["", "Data", "Descrição", "Valor"]);

    let suggestion = suggest_columns(&source.config.headers);
    assert_eq!(suggestion.date_col, Some(1));
    assert_eq!(suggestion.description_col, Some(2));
    assert_eq!(suggestion.amount_col, Some(3));
    assert_eq!(
        source.column_values(2).unwrap(),
        vec!["NETFLIX.COM ASSINATURA", "PIX RECEBIDO MARIA", "PADARIA REAL"]
    );

    let mapping = ColumnMapping::from_suggestion(&suggestion)
        .resolve(source.config.width())
        .unwrap();
    let (mut outcomes, stats) = source
        .stream(mapping, StreamOptions::default())
        .collect_all()
        .await;
    outcomes.sort_by_key(RowOutcome::row);

    assert_eq!(stats.total_rows, 3);
    assert_eq!(stats.parsed, 3);
    let parsed: Vec<_> = outcomes
        .into_iter()
        .map(|o| match o {
            RowOutcome::Parsed(tx) => tx,
            other => panic!("unexpected {other:?}"),
        })
        .collect();

    assert_eq!(
        parsed.iter().map(|tx| tx.row).collect::<Vec<_>>(),
        vec![5, 6, 7]
    );
    assert_eq!(parsed[0].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    assert_eq!(parsed[0].amount_minor, -3990);
    assert_eq!(parsed[1].description, "PIX RECEBIDO MARIA");
    assert_eq!(parsed[1].amount_minor, 150000);
    assert_eq!(parsed[2].date, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
    assert_eq!(parsed[2].amount_minor, -1250);
}
