//! Tokenizers - split text and datums into searchable tokens
//!
//! Two splitting policies are provided: runs of whitespace, and runs of
//! non-word characters. Both keep the empty segments produced by leading or
//! trailing separators; [`normalize`] discards them later.

use std::sync::Arc;

use crate::Datum;

/// Turns a datum into the tokens it should be found by
pub type DatumTokenizer = Arc<dyn Fn(&Datum) -> Vec<String> + Send + Sync>;

/// Turns a user query into tokens
pub type QueryTokenizer = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// Split on runs of whitespace
pub fn whitespace(input: &str) -> Vec<String> {
    split_runs(input, char::is_whitespace)
}

/// Split on runs of characters that are neither alphanumeric nor `_`
pub fn nonword(input: &str) -> Vec<String> {
    split_runs(input, |c| !is_word_char(c))
}

/// Drop empty tokens and lower-case the rest
pub fn normalize<I>(tokens: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    tokens
        .into_iter()
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

/// Text a datum contributes when tokenized as a whole
///
/// Strings are used verbatim, `null` is empty, anything else is rendered as JSON.
pub fn datum_text(datum: &Datum) -> String {
    match datum {
        Datum::String(s) => s.clone(),
        Datum::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn split_runs(input: &str, is_separator: impl Fn(char) -> bool) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_separator = false;

    for c in input.chars() {
        if is_separator(c) {
            if !in_separator {
                tokens.push(std::mem::take(&mut current));
                in_separator = true;
            }
        } else {
            in_separator = false;
            current.push(c);
        }
    }
    tokens.push(current);

    tokens
}

/// Query tokenizers
pub mod query {
    use std::sync::Arc;

    use super::QueryTokenizer;

    pub fn whitespace() -> QueryTokenizer {
        Arc::new(super::whitespace)
    }

    pub fn nonword() -> QueryTokenizer {
        Arc::new(super::nonword)
    }
}

/// Tokenizers for datums that are plain strings (or are searched by their whole text)
pub mod datum {
    use std::sync::Arc;

    use super::{datum_text, DatumTokenizer};
    use crate::Datum;

    pub fn whitespace() -> DatumTokenizer {
        Arc::new(|datum: &Datum| super::whitespace(&datum_text(datum)))
    }

    pub fn nonword() -> DatumTokenizer {
        Arc::new(|datum: &Datum| super::nonword(&datum_text(datum)))
    }
}

/// Tokenizers that project one or more fields out of an object datum
///
/// Missing fields contribute nothing; the tokens of every listed field are
/// concatenated in key order.
pub mod obj {
    use std::sync::Arc;

    use super::{datum_text, DatumTokenizer};
    use crate::Datum;

    pub fn whitespace<I, S>(keys: I) -> DatumTokenizer
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        fields(keys, super::whitespace)
    }

    pub fn nonword<I, S>(keys: I) -> DatumTokenizer
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        fields(keys, super::nonword)
    }

    fn fields<I, S>(keys: I, split: fn(&str) -> Vec<String>) -> DatumTokenizer
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        Arc::new(move |datum: &Datum| {
            keys.iter()
                .filter_map(|key| datum.get(key))
                .flat_map(|value| split(&datum_text(value)))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_whitespace_splits_runs() {
        assert_eq!(whitespace("red  green\tblue"), vec!["red", "green", "blue"]);
    }

    #[test]
    fn test_whitespace_keeps_edge_segments() {
        assert_eq!(whitespace("  a b "), vec!["", "a", "b", ""]);
        assert_eq!(whitespace(""), vec![""]);
    }

    #[test]
    fn test_nonword_splits_punctuation() {
        assert_eq!(nonword("new-york, ny"), vec!["new", "york", "ny"]);
        assert_eq!(nonword("snake_case"), vec!["snake_case"]);
        assert_eq!(nonword("zürich/genève"), vec!["zürich", "genève"]);
    }

    #[test]
    fn test_normalize_drops_empty_and_lowercases() {
        let tokens = normalize(whitespace("  New York "));
        assert_eq!(tokens, vec!["new", "york"]);
        assert!(normalize(whitespace("   ")).is_empty());
    }

    #[test]
    fn test_datum_tokenizer_on_strings() {
        let tokenizer = datum::whitespace();
        assert_eq!(tokenizer(&json!("Costa Rica")), vec!["Costa", "Rica"]);
        assert_eq!(tokenizer(&json!(42)), vec!["42"]);
    }

    #[test]
    fn test_obj_tokenizer_projects_fields() {
        let tokenizer = obj::whitespace(["name", "code"]);
        let datum = json!({ "name": "United Kingdom", "code": "GB", "pop": 67 });
        assert_eq!(tokenizer(&datum), vec!["United", "Kingdom", "GB"]);
    }

    #[test]
    fn test_obj_tokenizer_missing_field() {
        let tokenizer = obj::nonword(["name"]);
        assert!(tokenizer(&json!({ "title": "x" })).is_empty());
        assert!(tokenizer(&json!("not an object")).is_empty());
    }
}
