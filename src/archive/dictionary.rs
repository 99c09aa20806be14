#![forbid(unsafe_code)]

//! String dictionaries. Log messages with whitespace go to the log
//! dictionary, single tokens to the variable dictionary; columns store ids.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::search::string_query::WildcardPattern;

/// Bidirectional map between strings and dense ids.
#[derive(Clone, Debug, Default)]
pub struct Dictionary {
    entries: Vec<String>,
    index: FxHashMap<String, u64>,
}

impl Dictionary {
    /// Empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `value`, inserting it if absent.
    pub fn intern(&mut self, value: &str) -> u64 {
        if let Some(id) = self.index.get(value) {
            return *id;
        }
        let id = self.entries.len() as u64;
        self.entries.push(value.to_owned());
        self.index.insert(value.to_owned(), id);
        id
    }

    /// Entry stored under `id`.
    pub fn get(&self, id: u64) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.entries.get(idx))
            .map(String::as_str)
    }

    /// Id of an already interned `value`.
    pub fn id_of(&self, value: &str) -> Option<u64> {
        self.index.get(value).copied()
    }

    /// Number of interned entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was interned.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of every entry matching `pattern`. Exact case-sensitive patterns
    /// are a single lookup.
    pub fn find_matching(&self, pattern: &WildcardPattern) -> FxHashSet<u64> {
        if let Some(exact) = pattern.exact() {
            return self.id_of(exact).into_iter().collect();
        }
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| pattern.is_match(entry))
            .map(|(idx, _)| idx as u64)
            .collect()
    }
}
