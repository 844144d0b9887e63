//! Small text helpers shared by flagging, classification, and linking.
//! Grounded on the kind of manual header/address scanning a mail pipeline
//! ends up needing in more than one place.

use std::collections::HashSet;

/// Extract bare email addresses from a raw header value such as
/// `"Jane Doe" <jane@example.com>, ops@example.com`. Bracketed addresses
/// are preferred; anything left over is split on common delimiters.
pub fn extract_emails(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut rest = raw;

    while let Some(start) = rest.find('<') {
        if let Some(end) = rest[start..].find('>') {
            let candidate = rest[start + 1..start + end].trim();
            if candidate.contains('@') && seen.insert(candidate.to_lowercase()) {
                out.push(candidate.to_string());
            }
            rest = &rest[start + end + 1..];
        } else {
            break;
        }
    }

    for piece in raw.split([',', ';']) {
        let piece = piece.trim();
        if piece.contains('<') {
            continue;
        }
        let candidate = piece.split_whitespace().find(|p| p.contains('@'));
        if let Some(candidate) = candidate {
            let candidate = candidate.trim_matches(|c| c == '<' || c == '>');
            if seen.insert(candidate.to_lowercase()) {
                out.push(candidate.to_string());
            }
        }
    }

    out
}

pub fn domain_of(email: &str) -> Option<&str> {
    email.split('@').nth(1).map(str::trim)
}

/// UTF-8-char-boundary-safe snippet extraction around a match span.
/// Grounded on the context-snippet helper every regex-table extractor in
/// this codebase ends up needing once matches must be human-reviewable.
pub fn extract_context(text: &str, start: usize, end: usize, context_len: usize) -> String {
    let lower = start.saturating_sub(context_len);
    let upper = (end + context_len).min(text.len());

    let lower = floor_char_boundary(text, lower);
    let upper = ceil_char_boundary(text, upper);

    text[lower..upper].trim().to_string()
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Does `haystack` contain any of the company's own aliases as a
/// case-insensitive substring? Used by extraction's party filter (I5) to
/// reject the forwarder's own company name as a shipper/consignee value.
pub fn contains_company_name(haystack: &str, company_name: &str) -> bool {
    if company_name.trim().is_empty() {
        return false;
    }
    haystack.to_lowercase().contains(&company_name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bracketed_and_bare_addresses() {
        let raw = "\"Jane Doe\" <jane@example.com>, ops@example.com";
        let addrs = extract_emails(raw);
        assert_eq!(addrs, vec!["jane@example.com", "ops@example.com"]);
    }

    #[test]
    fn context_extraction_respects_char_boundaries() {
        let text = "booking número 26123456 confirmed";
        let start = text.find("26123456").unwrap();
        let end = start + "26123456".len();
        let snippet = extract_context(text, start, end, 6);
        assert!(snippet.contains("26123456"));
    }

    #[test]
    fn company_name_match_is_case_insensitive() {
        assert!(contains_company_name("INTOGLO LOGISTICS PVT LTD", "intoglo"));
        assert!(!contains_company_name("Acme Traders", "intoglo"));
    }
}
