//! Merchant pattern extraction
//!
//! Turns a transaction's vendor or description into a short, stable key that
//! groups feedback and becomes the pattern of auto-created rules.

use std::sync::OnceLock;

use regex::Regex;

/// Payment-processor and card-network prefixes that precede the merchant name
const PROCESSOR_PREFIXES: &[&str] = &[
    "SQ *", "SQ*", "TST* ", "TST*", "PP*", "PAYPAL *", "SP * ", "SP *", "POS ", "DEBIT CARD ",
    "CHECKCARD ", "PURCHASE ",
];

/// Tokens that carry no merchant identity
const STOPWORDS: &[&str] = &[
    "THE", "AND", "OF", "INC", "LLC", "LTD", "CO", "CORP", "PAYMENT", "PURCHASE", "ONLINE", "WWW",
    "COM",
];

const MAX_TOKENS: usize = 2;

fn ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("ws regex"))
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Z0-9&'+]+").expect("token regex"))
}

/// Uppercase, trim and collapse internal whitespace
pub fn normalize_text(s: &str) -> String {
    ws_re().replace_all(s.trim(), " ").to_uppercase()
}

fn strip_prefixes(mut s: &str) -> &str {
    loop {
        let before = s.len();
        for prefix in PROCESSOR_PREFIXES {
            if let Some(rest) = s.strip_prefix(prefix) {
                s = rest.trim_start();
            }
        }
        if s.len() == before {
            return s;
        }
    }
}

fn is_significant(token: &str) -> bool {
    token.len() > 1
        && !token.chars().any(|c| c.is_ascii_digit())
        && !STOPWORDS.contains(&token)
}

/// Up to two adjacent significant tokens of a description
///
/// Processor prefixes are stripped, tokens containing digits and stopwords
/// are skipped. The first significant token is extended only by tokens that
/// follow it after a single space, so the result is always a substring of
/// the normalized description. Returns `None` when nothing significant
/// remains.
pub fn significant_tokens(description: &str) -> Option<String> {
    let normalized = normalize_text(description);
    let stripped = strip_prefixes(&normalized);

    // (start, end) byte offsets of each token, quote and plus trimmed
    let tokens: Vec<(usize, usize)> = token_re()
        .find_iter(stripped)
        .filter_map(|m| {
            let raw = m.as_str();
            let leading = raw.len() - raw.trim_start_matches(['\'', '+']).len();
            let trimmed = raw.trim_matches(['\'', '+']);
            (!trimmed.is_empty()).then(|| {
                let start = m.start() + leading;
                (start, start + trimmed.len())
            })
        })
        .collect();

    let first = tokens
        .iter()
        .position(|&(start, end)| is_significant(&stripped[start..end]))?;
    let (start, mut end) = tokens[first];

    for (taken, &(next_start, next_end)) in tokens[first + 1..].iter().enumerate() {
        if taken + 1 >= MAX_TOKENS
            || stripped.get(end..next_start) != Some(" ")
            || !is_significant(&stripped[next_start..next_end])
        {
            break;
        }
        end = next_end;
    }

    Some(stripped[start..end].to_string())
}

/// The grouping key for a transaction: the normalized vendor if present,
/// otherwise the significant tokens of the description
pub fn derive_pattern(description: &str, vendor: Option<&str>) -> Option<String> {
    if let Some(vendor) = vendor.map(normalize_text).filter(|v| !v.is_empty()) {
        return Some(vendor);
    }
    significant_tokens(description)
}
