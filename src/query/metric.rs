// Copyright 2026 The graphite-mux Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Metric patterns: prefix splitting, brace expansion, glob matching.

use std::collections::HashSet;
use std::fmt;

use regex::Regex;

/// Hard cap on the number of variants one pattern may expand into.
const MAX_EXPANSIONS: usize = 100;

/// A dot-separated metric path, possibly containing `*`, `?`, `[abc]`,
/// `[a-z]`, and `{a,b,c}` patterns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metric(String);

impl Metric {
    pub fn new(path: impl Into<String>) -> Self {
        Metric(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Splits off the first dot component, the routing prefix. Dots inside
    /// braces or brackets, or behind a backslash, do not count. A metric
    /// without a dot splits into `(whole, "")`.
    pub fn split(&self) -> (Metric, Metric) {
        match first_dot(&self.0) {
            Some(idx) => (
                Metric::new(&self.0[..idx]),
                Metric::new(&self.0[idx + 1..]),
            ),
            None => (self.clone(), Metric::new("")),
        }
    }

    /// Expands every brace alternative, left to right. Nested braces make
    /// the pattern malformed and yield an empty list. The result is capped
    /// at [`MAX_EXPANSIONS`] variants (truncated, not an error) and
    /// deduplicated preserving order.
    pub fn expand(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !expand_into(&self.0, String::new(), &mut out) {
            return Vec::new();
        }
        let mut seen = HashSet::new();
        out.retain(|item| seen.insert(item.clone()));
        out
    }

    /// True when any brace expansion of this pattern glob-matches `name`.
    /// Malformed patterns match nothing.
    pub fn matches(&self, name: &str) -> bool {
        self.expand()
            .iter()
            .any(|pattern| glob_match(pattern, name))
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn first_dot(path: &str) -> Option<usize> {
    let mut escaped = false;
    let mut group: Option<char> = None;
    for (idx, ch) in path.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            c if Some(c) == group => group = None,
            '{' if group.is_none() => group = Some('}'),
            '[' if group.is_none() => group = Some(']'),
            '.' if group.is_none() => return Some(idx),
            _ => {}
        }
    }
    None
}

/// Returns false when the pattern is malformed (unterminated or nested
/// braces); truncation at the cap is not an error.
fn expand_into(rest: &str, acc: String, out: &mut Vec<String>) -> bool {
    if out.len() >= MAX_EXPANSIONS {
        return true;
    }
    let Some(open) = find_unescaped(rest, '{') else {
        out.push(format!("{acc}{rest}"));
        return true;
    };
    let body_start = open + 1;
    let Some(close) = brace_close(&rest[body_start..]) else {
        return false;
    };
    let close = body_start + close;
    let head = &rest[..open];
    let body = &rest[body_start..close];
    let tail = &rest[close + 1..];
    for alternative in split_alternatives(body) {
        let mut prefix = String::with_capacity(acc.len() + head.len() + alternative.len());
        prefix.push_str(&acc);
        prefix.push_str(head);
        prefix.push_str(alternative);
        if !expand_into(tail, prefix, out) {
            return false;
        }
        if out.len() >= MAX_EXPANSIONS {
            return true;
        }
    }
    true
}

fn find_unescaped(text: &str, target: char) -> Option<usize> {
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
        } else if ch == target {
            return Some(idx);
        }
    }
    None
}

/// Position of the matching `}`, or None when unterminated or nested.
fn brace_close(text: &str) -> Option<usize> {
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '{' => return None,
            '}' => return Some(idx),
            _ => {}
        }
    }
    None
}

fn split_alternatives(body: &str) -> Vec<&str> {
    let mut alternatives = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (idx, ch) in body.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            ',' => {
                alternatives.push(&body[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    alternatives.push(&body[start..]);
    alternatives
}

/// Graphite-dialect globbing: `*` matches any run, `?` one character,
/// `[abc]`/`[a-z]` a character set.
fn glob_match(pattern: &str, name: &str) -> bool {
    match glob_regex(pattern) {
        Some(re) => re.is_match(name),
        None => false,
    }
}

/// Compiles a glob to an anchored regex; None for malformed patterns.
fn glob_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '\\' => {
                let escaped = chars.next()?;
                re.push_str(&regex::escape(&escaped.to_string()));
            }
            '[' => {
                re.push('[');
                let mut closed = false;
                for inner in chars.by_ref() {
                    match inner {
                        ']' => {
                            closed = true;
                            re.push(']');
                            break;
                        }
                        c if c.is_alphanumeric() || c == '-' || c == '_' => re.push(c),
                        _ => return None,
                    }
                }
                if !closed {
                    return None;
                }
            }
            // braces must have been expanded away before matching
            '{' | '}' => return None,
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(path: &str) -> Metric {
        Metric::new(path)
    }

    #[test]
    fn split_first_component() {
        let (first, rest) = metric("west.servers.host1").split();
        assert_eq!(first.as_str(), "west");
        assert_eq!(rest.as_str(), "servers.host1");
    }

    #[test]
    fn split_without_dot() {
        let (first, rest) = metric("entries").split();
        assert_eq!(first.as_str(), "entries");
        assert!(rest.is_empty());
    }

    #[test]
    fn split_skips_dots_inside_groups() {
        let (first, rest) = metric("{a.b,c}.tail").split();
        assert_eq!(first.as_str(), "{a.b,c}");
        assert_eq!(rest.as_str(), "tail");

        let (first, rest) = metric("cpu-[0.7].value").split();
        assert_eq!(first.as_str(), "cpu-[0.7]");
        assert_eq!(rest.as_str(), "value");
    }

    #[test]
    fn expand_single_brace() {
        assert_eq!(
            metric("servers.{prod,stage}-mysql[1-3].mysql.connections").expand(),
            vec![
                "servers.prod-mysql[1-3].mysql.connections".to_string(),
                "servers.stage-mysql[1-3].mysql.connections".to_string(),
            ]
        );
    }

    #[test]
    fn expand_is_identity_without_braces() {
        assert_eq!(metric("a.b.c").expand(), vec!["a.b.c".to_string()]);
    }

    #[test]
    fn expand_keeps_empty_alternatives() {
        assert_eq!(
            metric("totals.{queues,exchanges,}").expand(),
            vec![
                "totals.queues".to_string(),
                "totals.exchanges".to_string(),
                "totals.".to_string(),
            ]
        );
    }

    #[test]
    fn expand_multiple_braces() {
        assert_eq!(
            metric("{a,b}.{1,2}").expand(),
            vec!["a.1", "a.2", "b.1", "b.2"]
        );
    }

    #[test]
    fn expand_deduplicates_preserving_order() {
        assert_eq!(metric("{a,b,a}").expand(), vec!["a", "b"]);
    }

    #[test]
    fn expand_rejects_nested_braces() {
        assert!(metric("a.{b,{c,d}}").expand().is_empty());
        assert!(metric("a.{b,c").expand().is_empty());
    }

    #[test]
    fn expand_truncates_at_cap() {
        let pattern = "{0,1,2,3,4,5,6,7,8,9}.{0,1,2,3,4,5,6,7,8,9}.{0,1,2,3,4,5,6,7,8,9}";
        let expanded = metric(pattern).expand();
        assert_eq!(expanded.len(), 100);
        assert_eq!(expanded[0], "0.0.0");
    }

    #[test]
    fn glob_star_and_question() {
        assert!(metric("*").matches("dev"));
        assert!(metric("d?v").matches("dev"));
        assert!(metric("de*").matches("dev"));
        assert!(!metric("d?v").matches("dove"));
        assert!(!metric("prod").matches("dev"));
        assert!(metric("dev").matches("dev"));
    }

    #[test]
    fn glob_character_sets() {
        assert!(metric("cpu-[0-7]").matches("cpu-3"));
        assert!(!metric("cpu-[0-7]").matches("cpu-9"));
        assert!(metric("[a-z]ev").matches("dev"));
    }

    #[test]
    fn glob_braces_match_any_alternative() {
        assert!(metric("{dev,prod}").matches("prod"));
        assert!(!metric("{dev,prod}").matches("stage"));
    }

    #[test]
    fn malformed_patterns_match_nothing() {
        assert!(!metric("cpu-[0-7").matches("cpu-3"));
        assert!(!metric("{dev,prod").matches("dev"));
        assert!(!metric("a{b,{c}}").matches("abc"));
    }
}
