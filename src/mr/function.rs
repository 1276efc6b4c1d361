//! User-supplied map and reduce functions.
//!
//! These are the out-of-scope "opaque callables" the core depends on
//! only by signature. `wc` is the reference word-count application the
//! two binaries wire in by default; any function matching
//! `MapFn`/`ReduceFn` can be substituted without touching
//! `mr::coordinator` or `mr::worker`.

use std::sync::OnceLock;

use regex::Regex;

use crate::mr::rpc::KeyValue;

/// `mapf(filename, contents) -> [(key, value), ...]`
pub type MapFn = fn(&str, &str) -> Vec<KeyValue>;

/// `reducef(key, values) -> string`
pub type ReduceFn = fn(&str, &[String]) -> String;

/// Word count. Splits the input on runs of non-alphabetic characters
/// and emits one `(word, "1")` pair per occurrence, case-folded.
pub mod wc {
    use super::*;

    fn word_pattern() -> &'static Regex {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        PATTERN.get_or_init(|| Regex::new(r"[A-Za-z]+").expect("static regex is valid"))
    }

    pub fn map(_filename: &str, contents: &str) -> Vec<KeyValue> {
        word_pattern()
            .find_iter(contents)
            .map(|m| KeyValue::new(m.as_str().to_ascii_lowercase(), "1"))
            .collect()
    }

    pub fn reduce(_key: &str, values: &[String]) -> String {
        values.len().to_string()
    }
}

// TODO: a second reference application (e.g. an inverted index) would
// exercise reducef returning something other than a count, but word
// count alone already covers the shuffle pipeline end to end.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wc_map_splits_on_non_letters_and_lowercases() {
        let pairs = wc::map("ignored", "The Quick, quick fox-jumped!");
        let words: Vec<&str> = pairs.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(words, vec!["the", "quick", "quick", "fox", "jumped"]);
        assert!(pairs.iter().all(|kv| kv.value == "1"));
    }

    #[test]
    fn wc_map_on_empty_input_yields_nothing() {
        assert!(wc::map("ignored", "").is_empty());
    }

    #[test]
    fn wc_reduce_counts_values() {
        let values = vec!["1".to_string(), "1".to_string(), "1".to_string()];
        assert_eq!(wc::reduce("a", &values), "3");
    }
}
