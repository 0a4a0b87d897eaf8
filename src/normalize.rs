// src/normalize.rs

//! Identifier normalization: turns arbitrary column and folder names into
//! safe, deterministic SQL identifiers.
//!
//! This module is pure: no I/O, no database, no global state. It is
//! fully covered by unit tests and is the one place in the engine where
//! `normalize(normalize(x)) == normalize(x)` can be checked directly.

use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;

const MAX_IDENTIFIER_LEN: usize = 63;

/// Normalize a single string into a SQL-safe identifier.
///
/// Unicode is decomposed (NFKD) and stripped to ASCII letters, digits, and
/// underscore; runs of whitespace/punctuation collapse to a single
/// underscore; the result is lowercased and truncated to 63 characters.
/// A leading digit gets an underscore prefix so the identifier never looks
/// like a numeric literal. An empty result becomes `col`.
pub fn normalize_identifier(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_sep = false;

    for ch in input.nfkd() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if ch == '_' {
            out.push('_');
            last_was_sep = false;
        } else if !ch.is_ascii() && ch.is_alphanumeric() {
            // Unicode letter/digit that didn't decompose to ASCII (e.g. CJK):
            // it carries no safe ASCII rendering, so treat it as a separator
            // rather than silently dropping meaning.
            if !last_was_sep && !out.is_empty() {
                out.push('_');
                last_was_sep = true;
            }
        } else {
            if !last_was_sep && !out.is_empty() {
                out.push('_');
                last_was_sep = true;
            }
        }
    }

    while out.ends_with('_') {
        out.pop();
    }
    while out.starts_with('_') && out.len() > 1 && out.as_bytes()[1] == b'_' {
        out.remove(0);
    }

    if out.is_empty() {
        return "col".to_string();
    }

    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }

    out.truncate(MAX_IDENTIFIER_LEN);
    while out.ends_with('_') && out.len() > 1 {
        out.pop();
    }

    out
}

/// Normalize a sequence of identifiers and deterministically disambiguate
/// collisions in input order: `name`, `name_2`, `name_3`, ...
///
/// This suffixing is the *only* source of non-collision names: two inputs
/// that normalize to the same base never produce the same output.
pub fn normalize_and_dedup<I, S>(inputs: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut result = Vec::new();

    for input in inputs {
        let base = normalize_identifier(input.as_ref());
        let count = seen.entry(base.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            result.push(base);
        } else {
            let candidate = format!("{base}_{count}");
            let candidate = if candidate.len() > MAX_IDENTIFIER_LEN {
                truncate_with_suffix(&base, *count)
            } else {
                candidate
            };
            result.push(candidate);
        }
    }

    result
}

fn truncate_with_suffix(base: &str, count: usize) -> String {
    let suffix = format!("_{count}");
    let keep = MAX_IDENTIFIER_LEN.saturating_sub(suffix.len());
    let mut truncated: String = base.chars().take(keep).collect();
    truncated.push_str(&suffix);
    truncated
}

/// Build the target table name from a leaf folder's path-parts tuple:
/// each part normalized, joined by underscore.
pub fn table_name_from_path_parts(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| normalize_identifier(p))
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_lowercases() {
        assert_eq!(normalize_identifier("  My Col (%)"), "my_col");
    }

    #[test]
    fn leading_digit_gets_prefixed() {
        assert_eq!(normalize_identifier("2024_revenue"), "_2024_revenue");
    }

    #[test]
    fn empty_becomes_col() {
        assert_eq!(normalize_identifier(""), "col");
        assert_eq!(normalize_identifier("   "), "col");
        assert_eq!(normalize_identifier("%%%"), "col");
    }

    #[test]
    fn is_idempotent() {
        let inputs = ["  My Col (%)", "2024_revenue", "日本語", "already_fine", ""];
        for i in inputs {
            let once = normalize_identifier(i);
            let twice = normalize_identifier(&once);
            assert_eq!(once, twice, "normalize should be idempotent for {i:?}");
        }
    }

    #[test]
    fn dedup_is_order_stable() {
        let result = normalize_and_dedup(["x", "x", "x"]);
        assert_eq!(result, vec!["x", "x_2", "x_3"]);
    }

    #[test]
    fn dedup_across_different_inputs_normalizing_same() {
        let result = normalize_and_dedup(["My Col", "my_col", "MY COL"]);
        assert_eq!(result, vec!["my_col", "my_col_2", "my_col_3"]);
    }

    #[test]
    fn table_name_joins_parts() {
        let parts = vec!["Sales".to_string(), "2024".to_string()];
        assert_eq!(table_name_from_path_parts(&parts), "sales__2024");
    }
}
