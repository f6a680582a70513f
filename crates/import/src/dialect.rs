use std::collections::HashMap;

use tally_core::currency::strip_currency;
use tally_core::{convention_for, find_currency, DateOrder, NumberConvention, RegionalDialect};

/// Guesses number and date conventions from sample rows.
///
/// `amount_idx` and `date_idx` point at the columns to inspect; without an
/// amount column every cell is probed.
pub fn probe_dialect(
    rows: &[Vec<String>],
    amount_idx: Option<usize>,
    date_idx: Option<usize>,
) -> RegionalDialect {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let columns: Vec<usize> = match amount_idx {
        Some(idx) => vec![idx],
        None => (0..width).collect(),
    };
    probe_columns(rows, &columns, date_idx)
}

/// Same as [`probe_dialect`] over several amount columns (debit and credit).
pub fn probe_columns(
    rows: &[Vec<String>],
    amount_cols: &[usize],
    date_idx: Option<usize>,
) -> RegionalDialect {
    let mut european = 0usize;
    let mut anglo = 0usize;
    let mut currencies: HashMap<&'static str, usize> = HashMap::new();

    for row in rows {
        // Currency symbols and codes vote from any cell: a separate currency
        // column counts as much as a symbol next to the number.
        for cell in row {
            let Some(code) = find_currency(cell) else {
                continue;
            };
            *currencies.entry(code).or_default() += 1;
            match convention_for(code) {
                Some(NumberConvention::European) => european += 1,
                Some(NumberConvention::Anglo) => anglo += 1,
                None => {}
            }
        }
        for &col in amount_cols {
            let Some(cell) = row.get(col) else {
                continue;
            };
            let (number, _) = strip_currency(cell);
            match separator_hint(number) {
                Some(NumberConvention::European) => european += 1,
                Some(NumberConvention::Anglo) => anglo += 1,
                None => {}
            }
        }
    }

    let total = european + anglo;
    let (is_european, confidence) = if total == 0 || european == anglo {
        (false, 0.0)
    } else if european > anglo {
        (true, european as f64 / total as f64)
    } else {
        (false, anglo as f64 / total as f64)
    };

    let currency_hint = currencies
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(code, _)| code.to_string());

    let date_order = date_idx.map_or(DateOrder::Unknown, |idx| {
        probe_date_order(rows.iter().filter_map(|r| r.get(idx)).map(String::as_str))
    });

    RegionalDialect {
        decimal_sep: if is_european { ',' } else { '.' },
        thousands_sep: if is_european { '.' } else { ',' },
        date_order,
        currency_hint,
        confidence,
    }
}

/// Reads the last separator in a number: followed by one or two digits it is
/// the decimal point, followed by exactly three it is a thousands separator.
fn separator_hint(cell: &str) -> Option<NumberConvention> {
    let digits: String = cell
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let pos = digits.rfind(['.', ','])?;
    let sep = digits[pos..].chars().next()?;
    let after = digits.len() - pos - 1;
    match (sep, after) {
        (',', 1 | 2) | ('.', 3) => Some(NumberConvention::European),
        ('.', 1 | 2) | (',', 3) => Some(NumberConvention::Anglo),
        _ => None,
    }
}

/// A first token above 12 settles day-first; a second token above 12 votes
/// month-first; a four-digit first token means year-first.
fn probe_date_order<'a>(cells: impl Iterator<Item = &'a str>) -> DateOrder {
    let mut month_first = false;
    let mut year_first = false;
    for cell in cells {
        let parts: Vec<&str> = cell
            .trim()
            .split(['/', '.', '-', ' '])
            .filter(|p| !p.is_empty())
            .take(2)
            .collect();
        let [first, second] = parts.as_slice() else {
            continue;
        };
        if first.len() == 4 {
            year_first = true;
            continue;
        }
        let (Ok(a), Ok(b)) = (first.parse::<u32>(), second.parse::<u32>()) else {
            continue;
        };
        if a > 12 {
            return DateOrder::DayFirst;
        }
        if b > 12 {
            month_first = true;
        }
    }
    if month_first {
        DateOrder::MonthFirst
    } else if year_first {
        DateOrder::YearFirst
    } else {
        DateOrder::Unknown
    }
}
