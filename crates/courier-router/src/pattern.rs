//! Callback route patterns.
//!
//! A pattern is a `/`-separated list of segments:
//!
//! - a bare segment matches itself literally
//! - `:name` captures any non-empty run of characters up to the next `/`
//! - a final `*` swallows the remainder of the subject, `/` included
//!
//! Matching is anchored at both ends; there are no partial matches. On a
//! match, captured values bind positionally to the declared parameter names.
//!
//! ```
//! use courier_router::Pattern;
//!
//! let pattern = Pattern::compile("user/:id/profile").unwrap();
//! let bound = pattern.matches("user/42/profile").unwrap();
//! assert_eq!(bound, vec![("id".to_string(), "42".to_string())]);
//! ```

use crate::error::{RouterError, RouterResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
    Wildcard,
}

/// A compiled route pattern: the segment matcher plus the ordered list of
/// parameter names. Immutable once compiled.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
    params: Vec<String>,
}

impl Pattern {
    /// Compiles a pattern string.
    ///
    /// Fails on an empty `:` parameter name and on a `*` that is not the
    /// final segment — both are programmer errors surfaced at registration.
    pub fn compile(pattern: &str) -> RouterResult<Self> {
        let parts: Vec<&str> = pattern.split('/').collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut params = Vec::new();

        for (index, part) in parts.iter().enumerate() {
            if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(RouterError::InvalidRoutePattern {
                        pattern: pattern.to_string(),
                        reason: "empty parameter name",
                    });
                }
                params.push(name.to_string());
                segments.push(Segment::Param(name.to_string()));
            } else if *part == "*" {
                if index + 1 != parts.len() {
                    return Err(RouterError::InvalidRoutePattern {
                        pattern: pattern.to_string(),
                        reason: "wildcard must be the final segment",
                    });
                }
                segments.push(Segment::Wildcard);
            } else {
                segments.push(Segment::Static((*part).to_string()));
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
            params,
        })
    }

    /// The pattern string as registered.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Parameter names in declaration order.
    pub fn param_names(&self) -> &[String] {
        &self.params
    }

    /// Tests `subject` for an anchored full match.
    ///
    /// Returns the captured values bound to the parameter names in
    /// declaration order, or `None` without side effects.
    pub fn matches(&self, subject: &str) -> Option<Vec<(String, String)>> {
        let mut values: Vec<&str> = Vec::with_capacity(self.params.len());
        let mut rest = subject;

        for (index, segment) in self.segments.iter().enumerate() {
            if let Segment::Wildcard = segment {
                // Compilation guarantees this is the final segment; it
                // consumes whatever is left, including nothing.
                rest = "";
                break;
            }

            let last = index + 1 == self.segments.len();
            let (part, tail) = if last {
                if rest.contains('/') {
                    return None;
                }
                (rest, "")
            } else {
                rest.split_once('/')?
            };

            match segment {
                Segment::Static(expected) => {
                    if part != expected {
                        return None;
                    }
                }
                Segment::Param(_) => {
                    if part.is_empty() {
                        return None;
                    }
                    values.push(part);
                }
                Segment::Wildcard => unreachable!("wildcard handled above"),
            }
            rest = tail;
        }

        debug_assert!(rest.is_empty());
        Some(
            self.params
                .iter()
                .cloned()
                .zip(values.iter().map(|v| (*v).to_string()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(pattern: &str, subject: &str) -> Option<Vec<(String, String)>> {
        Pattern::compile(pattern).unwrap().matches(subject)
    }

    #[test]
    fn static_pattern_matches_exactly() {
        assert_eq!(bound("menu/main", "menu/main"), Some(vec![]));
        assert_eq!(bound("menu/main", "menu/other"), None);
        assert_eq!(bound("menu/main", "menu"), None);
    }

    #[test]
    fn no_partial_matches() {
        assert_eq!(bound("menu", "menu/main"), None);
        assert_eq!(bound("menu/main", "prefix/menu/main"), None);
        assert_eq!(bound("menu/main", "menu/main/extra"), None);
    }

    #[test]
    fn params_bind_in_declaration_order() {
        let values = bound("user/:id/item/:slot", "user/42/item/left").unwrap();
        assert_eq!(
            values,
            vec![
                ("id".to_string(), "42".to_string()),
                ("slot".to_string(), "left".to_string()),
            ]
        );
    }

    #[test]
    fn params_accept_arbitrary_non_slash_runs() {
        for (id, slot) in [("a-b.c", "x y"), ("%41", "::"), ("0", "*")] {
            let subject = format!("user/{id}/item/{slot}");
            let values = bound("user/:id/item/:slot", &subject).unwrap();
            assert_eq!(
                values,
                vec![
                    ("id".to_string(), id.to_string()),
                    ("slot".to_string(), slot.to_string()),
                ]
            );
        }
    }

    #[test]
    fn param_requires_at_least_one_character() {
        assert_eq!(bound("user/:id", "user/"), None);
    }

    #[test]
    fn wildcard_swallows_the_remainder() {
        assert_eq!(bound("action/*", "action/a/b/c"), Some(vec![]));
        assert_eq!(bound("action/*", "action/"), Some(vec![]));
        assert_eq!(bound("action/*", "action"), None);
    }

    #[test]
    fn wildcard_must_be_final() {
        assert!(matches!(
            Pattern::compile("a/*/b"),
            Err(RouterError::InvalidRoutePattern { .. })
        ));
    }

    #[test]
    fn empty_param_name_is_rejected() {
        assert!(matches!(
            Pattern::compile("user/:"),
            Err(RouterError::InvalidRoutePattern { .. })
        ));
    }

    #[test]
    fn empty_pattern_matches_only_empty_subject() {
        assert_eq!(bound("", ""), Some(vec![]));
        assert_eq!(bound("", "x"), None);
    }
}
