#![forbid(unsafe_code)]

//! Read-side view of a columnar, schema-partitioned archive.
//!
//! Records sharing the same set of leaf columns form a schema table. The
//! archive exposes its merged schema tree, the schema map, string
//! dictionaries, a timestamp dictionary for the authoritative timestamp
//! column, and range-index entries carrying metadata for contiguous spans of
//! records. Query compilation only touches this metadata; record data is
//! read through [`SchemaReader`]s.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value as JsonValue};

use crate::error::Result;
use crate::query::column::Namespace;

/// Column storage and decoded values.
pub mod column;
/// String dictionaries.
pub mod dictionary;
/// Archive built and held in memory.
pub mod memory;
/// Merged schema tree.
pub mod schema_tree;

pub use column::{ColumnReader, Value};
pub use dictionary::Dictionary;
pub use memory::{ArchiveBuilder, InMemoryArchive};
pub use schema_tree::{NodeType, SchemaNode, SchemaTree};

/// Identifier of a schema-tree node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Identifier of a schema table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(pub u32);

/// Leaf columns shared by every record of one schema table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    id: SchemaId,
    nodes: Vec<NodeId>,
}

impl Schema {
    /// Builds a schema; node ids are sorted and deduplicated.
    pub fn new(id: SchemaId, mut nodes: Vec<NodeId>) -> Self {
        nodes.sort_unstable();
        nodes.dedup();
        Schema { id, nodes }
    }

    /// Schema id.
    pub fn id(&self) -> SchemaId {
        self.id
    }

    /// Sorted leaf node ids.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// True if the schema stores leaf `node`.
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.binary_search(&node).is_ok()
    }
}

/// All schemas of an archive, keyed by id.
pub type SchemaMap = BTreeMap<SchemaId, Schema>;

/// Metadata attached to records `[start_row, end_row)`.
#[derive(Clone, Debug, PartialEq)]
pub struct RangeIndexEntry {
    /// First log event index covered.
    pub start_row: u64,
    /// One past the last log event index covered.
    pub end_row: u64,
    /// Arbitrary JSON fields, queried through the `$` namespace.
    pub fields: Map<String, JsonValue>,
}

/// Observed value range of a timestamp column.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimestampRange {
    /// Every observed value was an integer (or millisecond timestamp).
    Integer {
        /// Smallest observed value.
        min: i64,
        /// Largest observed value.
        max: i64,
    },
    /// At least one observed value was a float.
    Float {
        /// Smallest observed value.
        min: f64,
        /// Largest observed value.
        max: f64,
    },
}

impl TimestampRange {
    /// Widens the range to include integer `value`.
    pub fn include_int(&mut self, value: i64) {
        match self {
            TimestampRange::Integer { min, max } => {
                *min = (*min).min(value);
                *max = (*max).max(value);
            }
            TimestampRange::Float { min, max } => {
                *min = min.min(value as f64);
                *max = max.max(value as f64);
            }
        }
    }

    /// Widens the range to include float `value`, switching to a float range.
    pub fn include_float(&mut self, value: f64) {
        let (lo, hi) = match *self {
            TimestampRange::Integer { min, max } => (min as f64, max as f64),
            TimestampRange::Float { min, max } => (min, max),
        };
        *self = TimestampRange::Float {
            min: lo.min(value),
            max: hi.max(value),
        };
    }
}

/// Range entry for one timestamp column path.
#[derive(Clone, Debug, PartialEq)]
pub struct TimestampEntry {
    /// Namespace of the column path.
    pub namespace: Namespace,
    /// Exact keys of the column path.
    pub keys: Vec<String>,
    /// Observed value range.
    pub range: TimestampRange,
    /// Schema-tree nodes the range was collected from.
    pub columns: BTreeSet<NodeId>,
}

/// Per-archive timestamp ranges. At most one entry is authoritative: the
/// column records were ordered and split by at ingestion time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimestampDictionary {
    entries: Vec<TimestampEntry>,
    authoritative: Option<usize>,
}

impl TimestampDictionary {
    /// Empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry; `authoritative` marks it as the archive's timestamp
    /// column.
    pub fn insert(&mut self, entry: TimestampEntry, authoritative: bool) {
        if authoritative {
            self.authoritative = Some(self.entries.len());
        }
        self.entries.push(entry);
    }

    /// Every timestamp column seen, in insertion order.
    pub fn entries(&self) -> &[TimestampEntry] {
        &self.entries
    }

    /// Range of the archive's timestamp column, if one was designated.
    pub fn authoritative(&self) -> Option<&TimestampEntry> {
        self.authoritative.and_then(|idx| self.entries.get(idx))
    }
}

/// Access to one schema table.
pub trait SchemaReader {
    /// Schema this table stores.
    fn schema_id(&self) -> SchemaId;

    /// Number of records in the table.
    fn num_records(&self) -> usize;

    /// Column storing `node`, if the schema has it.
    fn column(&self, node: NodeId) -> Option<&dyn ColumnReader>;

    /// Original record text at `row`.
    fn message(&self, row: usize) -> Result<String>;

    /// Authoritative timestamp of `row`, if the record carried one.
    fn timestamp(&self, row: usize) -> Option<i64>;

    /// Archive-wide ordinal of the record at `row`.
    fn log_event_index(&self, row: usize) -> u64;
}

/// Metadata and table access for one archive.
pub trait ArchiveReader {
    /// Stable archive name used in search output.
    fn archive_id(&self) -> &str;

    /// Merged schema tree of every record.
    fn schema_tree(&self) -> &SchemaTree;

    /// Every schema of the archive.
    fn schema_map(&self) -> &SchemaMap;

    /// Per-column timestamp ranges.
    fn timestamp_dictionary(&self) -> &TimestampDictionary;

    /// Range-index entries ordered by `start_row`.
    fn range_index(&self) -> &[RangeIndexEntry];

    /// Dictionary backing `ClpString` columns.
    fn log_dictionary(&self) -> &Dictionary;

    /// Dictionary backing `VarString` columns.
    fn variable_dictionary(&self) -> &Dictionary;

    /// Opens the table for `schema`.
    fn read_schema(&self, schema: SchemaId) -> Result<Box<dyn SchemaReader + '_>>;
}
