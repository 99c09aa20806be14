#![forbid(unsafe_code)]

//! Wildcard string matching and the per-archive cache of compiled string
//! queries.
//!
//! Patterns use `*` for any run of characters, `?` for one character, and
//! `\` to escape either; they compile to an anchored `regex`. A compiled
//! query is the set of dictionary ids whose entries match, so per-record
//! evaluation of a dictionary-encoded column is a set lookup.

use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::archive::Dictionary;

/// A wildcard pattern compiled to an anchored regular expression.
///
/// Case-sensitive patterns without wildcards skip the regex and compare the
/// unescaped text directly.
#[derive(Clone, Debug)]
pub struct WildcardPattern {
    exact: Option<String>,
    regex: Option<Regex>,
}

impl WildcardPattern {
    /// Compiles `pattern`. A pattern the regex engine rejects (it can only
    /// exceed the size limit) never matches.
    pub fn new(pattern: &str, case_sensitive: bool) -> Self {
        if case_sensitive && !has_wildcards(pattern) {
            return WildcardPattern {
                exact: Some(unescape_pattern(pattern)),
                regex: None,
            };
        }
        let regex = match RegexBuilder::new(&wildcard_to_regex(pattern))
            .case_insensitive(!case_sensitive)
            .dot_matches_new_line(true)
            .build()
        {
            Ok(regex) => Some(regex),
            Err(err) => {
                debug!(pattern, error = %err, "search.string_query.invalid_pattern");
                None
            }
        };
        WildcardPattern { exact: None, regex }
    }

    /// Unescaped text when the pattern is an exact, case-sensitive match.
    pub fn exact(&self) -> Option<&str> {
        self.exact.as_deref()
    }

    /// True if all of `text` matches the pattern.
    pub fn is_match(&self, text: &str) -> bool {
        match (&self.exact, &self.regex) {
            (Some(exact), _) => exact == text,
            (None, Some(regex)) => regex.is_match(text),
            (None, None) => false,
        }
    }
}

/// Translates `*`, `?` and `\` escapes into an anchored regex.
fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('^');
    let mut buf = [0u8; 4];
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                let next = chars.next().unwrap_or('\\');
                out.push_str(&regex::escape(next.encode_utf8(&mut buf)));
            }
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            _ => out.push_str(&regex::escape(ch.encode_utf8(&mut buf))),
        }
    }
    out.push('$');
    out
}

/// True if `pattern` contains an unescaped `*` or `?`.
pub fn has_wildcards(pattern: &str) -> bool {
    crate::query::literal::has_unescaped_wildcards(pattern)
}

/// Drops escape characters from a wildcard-free pattern.
pub fn unescape_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            out.push(chars.next().unwrap_or('\\'));
        } else {
            out.push(ch);
        }
    }
    out
}

/// Which dictionary a string query was compiled against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DictionaryKind {
    /// Log-type dictionary backing `ClpString` columns.
    Log,
    /// Variable dictionary backing `VarString` columns.
    Variable,
}

/// Dictionary ids matching one pattern, plus the compiled pattern for
/// values that do not come from the dictionary.
#[derive(Clone, Debug)]
pub struct StringQuery {
    pattern: WildcardPattern,
    matching_ids: FxHashSet<u64>,
}

impl StringQuery {
    /// The compiled pattern.
    pub fn pattern(&self) -> &WildcardPattern {
        &self.pattern
    }

    /// True if dictionary entry `id` matches the pattern.
    pub fn matches(&self, id: u64) -> bool {
        self.matching_ids.contains(&id)
    }

    /// True if no dictionary entry matches.
    pub fn is_empty(&self) -> bool {
        self.matching_ids.is_empty()
    }
}

/// Compiled string queries for one archive, shared by every schema scan.
#[derive(Debug)]
pub struct StringQueryCache {
    case_sensitive: bool,
    entries: FxHashMap<(DictionaryKind, String), Arc<StringQuery>>,
}

impl StringQueryCache {
    /// Empty cache matching with the given case sensitivity.
    pub fn new(case_sensitive: bool) -> Self {
        StringQueryCache {
            case_sensitive,
            entries: FxHashMap::default(),
        }
    }

    /// Returns the compiled query for `pattern`, scanning `dictionary` the
    /// first time the pattern is seen.
    pub fn get_or_compile(&mut self, kind: DictionaryKind, pattern: &str, dictionary: &Dictionary) -> Arc<StringQuery> {
        let key = (kind, pattern.to_owned());
        if let Some(existing) = self.entries.get(&key) {
            return Arc::clone(existing);
        }
        let compiled_pattern = WildcardPattern::new(pattern, self.case_sensitive);
        let matching_ids = dictionary.find_matching(&compiled_pattern);
        trace!(?kind, pattern, matches = matching_ids.len(), "search.string_query.compile");
        let compiled = Arc::new(StringQuery {
            pattern: compiled_pattern,
            matching_ids,
        });
        self.entries.insert(key, Arc::clone(&compiled));
        compiled
    }

    /// Number of compiled patterns.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was compiled yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
