//! Callback subject query strings.
//!
//! A callback subject is `<path>[?<query>]`. The portion before the first
//! `?` is matched against route patterns; the portion after parses into the
//! query-parameter table as `&`-separated, `=`-split, percent-decoded
//! key/value pairs. This format is a wire contract with whatever generates
//! callback payloads (inline buttons) and must not drift.

use std::collections::HashMap;

use percent_encoding::percent_decode_str;

/// Splits a subject into its path and optional query portion at the first `?`.
pub fn split_subject(subject: &str) -> (&str, Option<&str>) {
    match subject.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (subject, None),
    }
}

/// Parses a query string into a parameter table.
///
/// Pairs without a `=` are skipped; duplicate keys keep the last value;
/// a malformed percent-escape keeps the raw text of that segment rather
/// than failing the whole parse.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if query.is_empty() {
        return params;
    }
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        params.insert(decode(key), decode(value));
    }
    params
}

fn decode(raw: &str) -> String {
    // '+' is the query-string spelling of a space; an encoded plus arrives
    // as %2B and is untouched by the replacement.
    let spaced = raw.replace('+', " ");
    match percent_decode_str(&spaced).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_at_first_question_mark() {
        assert_eq!(split_subject("a/b?x=1"), ("a/b", Some("x=1")));
        assert_eq!(split_subject("a/b?x=1?y=2"), ("a/b", Some("x=1?y=2")));
        assert_eq!(split_subject("a/b"), ("a/b", None));
    }

    #[test]
    fn parses_pairs_with_percent_decoding() {
        let params = parse_query("name=J%C3%BCrgen&tab=settings");
        assert_eq!(params.get("name").map(String::as_str), Some("Jürgen"));
        assert_eq!(params.get("tab").map(String::as_str), Some("settings"));
    }

    #[test]
    fn plus_decodes_to_space_but_encoded_plus_survives() {
        let params = parse_query("q=a+b&sum=1%2B2");
        assert_eq!(params.get("q").map(String::as_str), Some("a b"));
        assert_eq!(params.get("sum").map(String::as_str), Some("1+2"));
    }

    #[test]
    fn duplicate_keys_keep_the_last_value() {
        let params = parse_query("k=first&k=last");
        assert_eq!(params.get("k").map(String::as_str), Some("last"));
    }

    #[test]
    fn malformed_escape_keeps_the_raw_segment() {
        let params = parse_query("bad=%FF%FE");
        assert_eq!(params.get("bad").map(String::as_str), Some("%FF%FE"));
    }

    #[test]
    fn pairs_without_equals_are_skipped() {
        let params = parse_query("lonely&k=v");
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn empty_query_yields_empty_table() {
        assert!(parse_query("").is_empty());
    }
}
