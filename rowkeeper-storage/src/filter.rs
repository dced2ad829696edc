//! Filter text helpers
//!
//! Clauses are passed to the engine as text. These helpers build the few
//! clauses the DAO layer writes itself and escape caller-supplied literals.
//! Escaping is advisory: it keeps a literal inside its quotes but is no
//! substitute for parameter binding.

use rowkeeper_core::Column;

/// Escape `text` for embedding in a single-quoted filter literal.
///
/// Backslashes are doubled first, then single quotes are backslash-escaped.
pub fn sanitize(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\'', "\\'")
}

/// `text` sanitized and wrapped in single quotes.
pub fn quote(text: &str) -> String {
    format!("'{}'", sanitize(text))
}

/// `column=id`, matching exactly one row by id.
pub fn id_filter(id_column: &Column, id: i64) -> String {
    format!("{}={}", id_column.name(), id)
}

/// Conjunction of the non-empty filters, each parenthesized.
pub fn and_filter<'a>(filters: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let parts: Vec<String> = filters
        .into_iter()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|f| format!("({})", f))
        .collect();

    match parts.len() {
        0 => None,
        _ => Some(parts.join(" AND ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowkeeper_core::{LongProperty, Property};

    const ID: LongProperty = Property::new("tasks", "_id");

    #[test]
    fn test_sanitize_escapes_backslash_then_quote() {
        assert_eq!(sanitize("a\\b'c"), "a\\\\b\\'c");
    }

    #[test]
    fn test_sanitize_plain_text_unchanged() {
        let plain = "buy milk 42";
        assert_eq!(sanitize(plain), plain);
        assert_eq!(sanitize(&sanitize(plain)), plain);
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("it's"), "'it\\'s'");
    }

    #[test]
    fn test_id_filter() {
        assert_eq!(id_filter(&ID, 7), "_id=7");
    }

    #[test]
    fn test_and_filter() {
        assert_eq!(and_filter(["_id=1", " ", "title = 'x'"]).as_deref(), Some("(_id=1) AND (title = 'x')"));
        assert_eq!(and_filter(Vec::<&str>::new()), None);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_sanitize_idempotent_without_specials(text in "[a-zA-Z0-9 _%.,-]{0,40}") {
            prop_assert_eq!(sanitize(&text), text.clone());
            prop_assert_eq!(sanitize(&sanitize(&text)), text);
        }

        #[test]
        fn prop_sanitized_literal_never_closes_early(text in ".{0,40}") {
            // Every quote in the output is escaped by an odd run of backslashes.
            let escaped = sanitize(&text);
            let chars: Vec<char> = escaped.chars().collect();
            for (i, c) in chars.iter().enumerate() {
                if *c == '\'' {
                    let run = chars[..i].iter().rev().take_while(|c| **c == '\\').count();
                    prop_assert!(run % 2 == 1);
                }
            }
        }
    }
}
