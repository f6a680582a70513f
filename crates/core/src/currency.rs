use serde::{Deserialize, Serialize};

/// How a locale writes `1234.56`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberConvention {
    /// `1.234,56`
    European,
    /// `1,234.56`
    Anglo,
}

// Longest symbols first so `R$` wins over `$`.
const SYMBOLS: &[(&str, &str)] = &[
    ("US$", "USD"),
    ("R$", "BRL"),
    ("A$", "AUD"),
    ("C$", "CAD"),
    ("S/", "PEN"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("$", "USD"),
];

const ISO_CODES: &[(&str, NumberConvention)] = &[
    ("BRL", NumberConvention::European),
    ("EUR", NumberConvention::European),
    ("ARS", NumberConvention::European),
    ("CLP", NumberConvention::European),
    ("COP", NumberConvention::European),
    ("UYU", NumberConvention::European),
    ("USD", NumberConvention::Anglo),
    ("GBP", NumberConvention::Anglo),
    ("CAD", NumberConvention::Anglo),
    ("AUD", NumberConvention::Anglo),
    ("MXN", NumberConvention::Anglo),
    ("JPY", NumberConvention::Anglo),
    ("CHF", NumberConvention::Anglo),
    ("PEN", NumberConvention::Anglo),
];

pub fn symbol_to_code(symbol: &str) -> Option<&'static str> {
    SYMBOLS
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, code)| *code)
}

pub fn is_iso_code(token: &str) -> bool {
    ISO_CODES.iter().any(|(code, _)| *code == token)
}

pub fn convention_for(code: &str) -> Option<NumberConvention> {
    let code = code.trim().to_ascii_uppercase();
    ISO_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, conv)| *conv)
}

/// Removes a leading or trailing currency symbol / ISO code from `s`.
/// Returns the remainder and the code it stood for.
pub fn strip_currency(s: &str) -> (&str, Option<&'static str>) {
    let s = s.trim();
    for (code, _) in ISO_CODES {
        if let Some(rest) = s.strip_prefix(code) {
            return (rest.trim(), Some(code));
        }
        if let Some(rest) = s.strip_suffix(code) {
            return (rest.trim(), Some(code));
        }
    }
    for (symbol, code) in SYMBOLS {
        if let Some(rest) = s.strip_prefix(symbol) {
            return (rest.trim(), Some(code));
        }
        if let Some(rest) = s.strip_suffix(symbol) {
            return (rest.trim(), Some(code));
        }
    }
    (s, None)
}

/// Finds the first currency mention in free text: an upper-case ISO code as a
/// whole word, else a symbol.
pub fn find_currency(text: &str) -> Option<&'static str> {
    let by_code = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find_map(|token| {
            ISO_CODES
                .iter()
                .find(|(code, _)| *code == token)
                .map(|(code, _)| *code)
        });
    if by_code.is_some() {
        return by_code;
    }
    SYMBOLS
        .iter()
        .find(|(symbol, _)| text.contains(symbol))
        .map(|(_, code)| *code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_currency_prefers_longest_symbol() {
        assert_eq!(strip_currency("R$ 10,00"), ("10,00", Some("BRL")));
        assert_eq!(strip_currency("US$5.00"), ("5.00", Some("USD")));
        assert_eq!(strip_currency("$5.00"), ("5.00", Some("USD")));
    }

    #[test]
    fn strip_currency_iso_suffix() {
        assert_eq!(strip_currency("10.00 EUR"), ("10.00", Some("EUR")));
        assert_eq!(strip_currency("10.00"), ("10.00", None));
    }

    #[test]
    fn find_currency_whole_word_codes() {
        assert_eq!(find_currency("Moeda: BRL"), Some("BRL"));
        assert_eq!(find_currency("Saldo em R$"), Some("BRL"));
        assert_eq!(find_currency("Extrato conta corrente"), None);
    }

    #[test]
    fn find_currency_ignores_lowercase_words() {
        assert_eq!(find_currency("the cars were here"), None);
    }

    #[test]
    fn convention_lookup() {
        assert_eq!(convention_for("brl"), Some(NumberConvention::European));
        assert_eq!(convention_for("USD"), Some(NumberConvention::Anglo));
        assert_eq!(convention_for("XYZ"), None);
    }
}
