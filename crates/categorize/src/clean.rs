use regex::Regex;
use std::sync::OnceLock;

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_acquirer_prefix,
    r"(?i)^\s*(?:pix\s+(?:enviado|recebido|transf\w*)?|compra\s+(?:cartao|cartão)(?:\s+(?:debito|débito|credito|crédito))?|compra\s+no\s+debito|sq\s*\*|paypal\s*\*|pp\s*\*|ifd\s*\*|mp\s*\*|pos\s+|tst\s*\*)\s*");
re!(re_card_mask,
    r"(?i)(?:\*{2,}|x{2,})\s*\d{2,4}\b|\b\d{4}[\s*x]{1,8}\d{4}\b");
re!(re_date,
    r"\b\d{1,2}[/.-]\d{1,2}(?:[/.-]\d{2,4})?\b");
re!(re_time,
    r"\b\d{1,2}:\d{2}(?::\d{2})?\b");
re!(re_long_digits,
    r"\b\d{5,}\b");
re!(re_noise_chars,
    r"[*#_]+");

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Strips acquirer prefixes, card masks, dates and reference numbers from a
/// raw statement description and title-cases what remains. Falls back to the
/// trimmed input when nothing would be left.
pub fn clean_description(raw: &str) -> String {
    let s = re_acquirer_prefix().replace(raw, "");
    let s = re_card_mask().replace_all(&s, " ");
    let s = re_date().replace_all(&s, " ");
    let s = re_time().replace_all(&s, " ");
    let s = re_long_digits().replace_all(&s, " ");
    let s = re_noise_chars().replace_all(&s, " ");

    let cleaned = s
        .split_whitespace()
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ");
    if cleaned.is_empty() {
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        cleaned
    }
}
