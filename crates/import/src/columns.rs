use tally_core::{ColumnRole, ColumnSuggestion};

use crate::text::normalize_label;

// Checked in order: the first role whose keyword matches wins, so
// "Data Valor" is a date and "Valor Débito" a debit, not an amount.
const ROLE_KEYWORDS: &[(ColumnRole, &[&str])] = &[
    (ColumnRole::Balance, &["saldo", "balance"]),
    (
        ColumnRole::Date,
        &["data", "date", "fecha", "dt", "dia", "posted", "valuta"],
    ),
    (
        ColumnRole::Debit,
        &[
            "debito", "debit", "saida", "withdrawal", "cargo", "paid out", "money out", "retiro",
            "egreso",
        ],
    ),
    (
        ColumnRole::Credit,
        &[
            "credito", "credit", "entrada", "deposit", "abono", "paid in", "money in", "ingreso",
        ],
    ),
    (ColumnRole::Currency, &["moeda", "currency", "divisa", "moneda"]),
    (ColumnRole::Category, &["categoria", "category", "rubro"]),
    (
        ColumnRole::Amount,
        &["valor", "amount", "importe", "monto", "value", "quantia", "montante", "total"],
    ),
    (
        ColumnRole::Description,
        &[
            "descricao", "description", "descripcion", "desc", "historico", "concepto", "memo",
            "lancamento", "detalhe", "detail", "merchant", "payee", "estabelecimento", "narrative",
            "movimiento", "movimento", "transaction", "referencia", "name",
        ],
    ),
];

/// True when `keyword` appears in `label` starting at a word boundary, so
/// "withdrawals" matches "withdrawal" but "update" does not match "date".
fn contains_word_prefix(label: &str, keyword: &str) -> bool {
    label
        .match_indices(keyword)
        .any(|(i, _)| i == 0 || label.as_bytes()[i - 1] == b' ')
}

/// Assigns a semantic role to a single header cell.
pub fn classify_header(header: &str) -> Option<ColumnRole> {
    let label = normalize_label(header);
    if label.is_empty() {
        return None;
    }
    ROLE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| contains_word_prefix(&label, kw)))
        .map(|(role, _)| *role)
}

pub fn is_header_keyword(cell: &str) -> bool {
    classify_header(cell).is_some()
}

/// Maps header names to roles; the first column claiming a role keeps it.
pub fn suggest_columns(headers: &[String]) -> ColumnSuggestion {
    let mut s = ColumnSuggestion::default();
    for (idx, header) in headers.iter().enumerate() {
        let Some(role) = classify_header(header) else {
            continue;
        };
        let slot = match role {
            ColumnRole::Date => &mut s.date_col,
            ColumnRole::Description => &mut s.description_col,
            ColumnRole::Amount => &mut s.amount_col,
            ColumnRole::Debit => &mut s.debit_col,
            ColumnRole::Credit => &mut s.credit_col,
            ColumnRole::Category => &mut s.category_col,
            ColumnRole::Currency => &mut s.currency_col,
            ColumnRole::Balance => &mut s.balance_col,
        };
        if slot.is_none() {
            *slot = Some(idx);
        }
    }
    s.is_double_entry = s.debit_col.is_some() && s.credit_col.is_some();
    s
}
