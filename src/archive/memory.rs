#![forbid(unsafe_code)]

//! In-memory archive: ingests JSON records into schema tables and serves
//! them through the [`ArchiveReader`] traits. Used by the CLI for NDJSON
//! input and throughout the tests.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, trace};

use crate::archive::column::{ColumnReader, Value};
use crate::archive::dictionary::Dictionary;
use crate::archive::schema_tree::{NodeType, SchemaTree};
use crate::archive::{
    ArchiveReader, NodeId, RangeIndexEntry, Schema, SchemaId, SchemaMap, SchemaReader, TimestampDictionary,
    TimestampEntry, TimestampRange,
};
use crate::error::{Result, SiftError};
use crate::query::column::{ColumnDescriptor, DescriptorToken, Namespace, SubtreeType};
use crate::query::literal::parse_rfc3339_millis;

/// Name of the per-record ordinal column in the metadata subtree.
pub const LOG_EVENT_IDX: &str = "log_event_idx";

#[derive(Clone, Debug)]
enum Cell {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(u64),
    Array(String),
    Timestamp(i64),
    Null,
}

#[derive(Clone, Debug)]
enum ColumnData {
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Bools(Vec<bool>),
    Strings(Vec<u64>),
    Arrays(Vec<String>),
    Timestamps(Vec<i64>),
    Nulls,
}

impl ColumnData {
    fn for_type(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Integer => ColumnData::Ints(Vec::new()),
            NodeType::Float => ColumnData::Floats(Vec::new()),
            NodeType::Boolean => ColumnData::Bools(Vec::new()),
            NodeType::ClpString | NodeType::VarString => ColumnData::Strings(Vec::new()),
            NodeType::UnstructuredArray => ColumnData::Arrays(Vec::new()),
            NodeType::Timestamp => ColumnData::Timestamps(Vec::new()),
            NodeType::NullValue | NodeType::Object | NodeType::Metadata => ColumnData::Nulls,
        }
    }
}

#[derive(Clone, Debug)]
struct MemoryColumn {
    node: NodeId,
    node_type: NodeType,
    data: ColumnData,
}

impl MemoryColumn {
    fn push(&mut self, cell: Cell) -> Result<()> {
        let (node, node_type) = (self.node, self.node_type);
        match (&mut self.data, cell) {
            (ColumnData::Ints(values), Cell::Int(v)) => values.push(v),
            (ColumnData::Floats(values), Cell::Float(v)) => values.push(v),
            (ColumnData::Bools(values), Cell::Bool(v)) => values.push(v),
            (ColumnData::Strings(values), Cell::Str(id)) => values.push(id),
            (ColumnData::Arrays(values), Cell::Array(raw)) => values.push(raw),
            (ColumnData::Timestamps(values), Cell::Timestamp(v)) => values.push(v),
            (ColumnData::Nulls, Cell::Null) => {}
            (_, cell) => {
                return Err(SiftError::Corruption(format!(
                    "cell {cell:?} does not fit column {} of type {node_type:?}",
                    node.0
                )))
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct MemoryTable {
    columns: Vec<MemoryColumn>,
    positions: FxHashMap<NodeId, usize>,
    messages: Vec<String>,
    timestamps: Vec<Option<i64>>,
    event_indices: Vec<u64>,
}

impl MemoryTable {
    fn new(nodes: &[NodeId], tree: &SchemaTree) -> Self {
        let columns: Vec<MemoryColumn> = nodes
            .iter()
            .map(|node| {
                let node_type = tree.node_type(*node).unwrap_or(NodeType::NullValue);
                MemoryColumn {
                    node: *node,
                    node_type,
                    data: ColumnData::for_type(node_type),
                }
            })
            .collect();
        let positions = columns
            .iter()
            .enumerate()
            .map(|(idx, column)| (column.node, idx))
            .collect();
        MemoryTable {
            columns,
            positions,
            messages: Vec::new(),
            timestamps: Vec::new(),
            event_indices: Vec::new(),
        }
    }

    fn push_row(&mut self, cells: Vec<(NodeId, Cell)>, message: String, timestamp: Option<i64>, event: u64) -> Result<()> {
        for (node, cell) in cells {
            let position = self
                .positions
                .get(&node)
                .copied()
                .ok_or_else(|| SiftError::Corruption(format!("node {} missing from schema table", node.0)))?;
            self.columns[position].push(cell)?;
        }
        self.messages.push(message);
        self.timestamps.push(timestamp);
        self.event_indices.push(event);
        Ok(())
    }
}

/// Builds an [`InMemoryArchive`] from JSON records.
///
/// # Examples
///
/// ```
/// use sift::archive::{ArchiveBuilder, ArchiveReader};
///
/// let mut builder = ArchiveBuilder::new("demo").with_timestamp_key("ts")?;
/// builder.add_json_line(r#"{"ts": 1000, "level": "INFO"}"#)?;
/// builder.add_json_line(r#"{"ts": 1010, "msg": "disk full"}"#)?;
/// let archive = builder.finish();
/// assert_eq!(archive.schema_map().len(), 2);
/// # Ok::<(), sift::SiftError>(())
/// ```
pub struct ArchiveBuilder {
    archive_id: String,
    tree: SchemaTree,
    log_dictionary: Dictionary,
    variable_dictionary: Dictionary,
    timestamp_key: Option<Vec<String>>,
    timestamp: Option<(TimestampRange, BTreeSet<NodeId>)>,
    schema_ids: BTreeMap<Vec<NodeId>, SchemaId>,
    tables: BTreeMap<SchemaId, MemoryTable>,
    ranges: Vec<RangeIndexEntry>,
    open_range: Option<(u64, Map<String, JsonValue>)>,
    next_event: u64,
    event_index_node: NodeId,
}

impl ArchiveBuilder {
    /// Starts an empty archive named `archive_id`.
    pub fn new(archive_id: impl Into<String>) -> Self {
        let mut tree = SchemaTree::new();
        tree.ensure_object_subtree(Namespace::Default);
        let metadata = tree.ensure_metadata_subtree();
        let event_index_node = tree.add_node(Some(metadata), LOG_EVENT_IDX, NodeType::Integer);
        ArchiveBuilder {
            archive_id: archive_id.into(),
            tree,
            log_dictionary: Dictionary::new(),
            variable_dictionary: Dictionary::new(),
            timestamp_key: None,
            timestamp: None,
            schema_ids: BTreeMap::new(),
            tables: BTreeMap::new(),
            ranges: Vec::new(),
            open_range: None,
            next_event: 0,
            event_index_node,
        }
    }

    /// Declares the authoritative timestamp column. String values at this
    /// path are parsed as RFC 3339 and stored as millisecond timestamps.
    pub fn with_timestamp_key(mut self, path: &str) -> Result<Self> {
        let column = ColumnDescriptor::parse(path)?;
        let keys = column.exact_keys().filter(|_| column.namespace() == Namespace::Default);
        let Some(keys) = keys else {
            return Err(SiftError::InvalidArgument(format!(
                "timestamp key '{path}' must be a concrete default-namespace path"
            )));
        };
        self.timestamp_key = Some(keys.into_iter().map(str::to_owned).collect());
        Ok(self)
    }

    /// Starts a new range-index entry; records added from now on are covered
    /// by `fields` until the next call or [`ArchiveBuilder::finish`].
    pub fn begin_range(&mut self, fields: Map<String, JsonValue>) {
        self.close_range();
        self.open_range = Some((self.next_event, fields));
    }

    fn close_range(&mut self) {
        if let Some((start_row, fields)) = self.open_range.take() {
            if start_row < self.next_event {
                self.ranges.push(RangeIndexEntry {
                    start_row,
                    end_row: self.next_event,
                    fields,
                });
            }
        }
    }

    /// Parses one NDJSON line and ingests it.
    pub fn add_json_line(&mut self, line: &str) -> Result<()> {
        let record: JsonValue = serde_json::from_str(line)?;
        self.add_record(&record)
    }

    /// Ingests a JSON object.
    pub fn add_record(&mut self, record: &JsonValue) -> Result<()> {
        let JsonValue::Object(fields) = record else {
            return Err(SiftError::InvalidArgument("record must be a JSON object".into()));
        };
        let root = self.tree.ensure_object_subtree(Namespace::Default);
        let mut cells = Vec::new();
        let mut path = Vec::new();
        let mut timestamp = None;
        self.flatten(root, fields, &mut path, &mut cells, &mut timestamp);

        let event = self.next_event;
        let event_cell = i64::try_from(event)
            .map_err(|_| SiftError::InvalidArgument("archive holds too many records".into()))?;
        cells.push((self.event_index_node, Cell::Int(event_cell)));
        cells.sort_by_key(|(node, _)| *node);

        let nodes: Vec<NodeId> = cells.iter().map(|(node, _)| *node).collect();
        let next_id = SchemaId(self.schema_ids.len() as u32);
        let schema_id = *self.schema_ids.entry(nodes.clone()).or_insert(next_id);
        let tree = &self.tree;
        let table = self
            .tables
            .entry(schema_id)
            .or_insert_with(|| MemoryTable::new(&nodes, tree));
        table.push_row(cells, record.to_string(), timestamp, event)?;
        trace!(event, schema = schema_id.0, "archive.memory.add_record");
        self.next_event += 1;
        Ok(())
    }

    fn flatten(
        &mut self,
        parent: NodeId,
        fields: &Map<String, JsonValue>,
        path: &mut Vec<String>,
        cells: &mut Vec<(NodeId, Cell)>,
        timestamp: &mut Option<i64>,
    ) {
        for (key, value) in fields {
            path.push(key.clone());
            let is_timestamp = self.timestamp_key.as_deref() == Some(path.as_slice());
            match value {
                JsonValue::Object(children) => {
                    let node = self.tree.add_node(Some(parent), key, NodeType::Object);
                    self.flatten(node, children, path, cells, timestamp);
                }
                JsonValue::Array(_) => {
                    let node = self.tree.add_node(Some(parent), key, NodeType::UnstructuredArray);
                    cells.push((node, Cell::Array(value.to_string())));
                }
                JsonValue::String(text) => {
                    let parsed = if is_timestamp { parse_rfc3339_millis(text) } else { None };
                    if let Some(millis) = parsed {
                        let node = self.tree.add_node(Some(parent), key, NodeType::Timestamp);
                        cells.push((node, Cell::Timestamp(millis)));
                        self.observe_timestamp(node, TimestampRange::Integer { min: millis, max: millis });
                        *timestamp = Some(millis);
                    } else if text.contains(' ') {
                        let node = self.tree.add_node(Some(parent), key, NodeType::ClpString);
                        cells.push((node, Cell::Str(self.log_dictionary.intern(text))));
                    } else {
                        let node = self.tree.add_node(Some(parent), key, NodeType::VarString);
                        cells.push((node, Cell::Str(self.variable_dictionary.intern(text))));
                    }
                }
                JsonValue::Number(number) => {
                    if let Some(v) = number.as_i64() {
                        let node = self.tree.add_node(Some(parent), key, NodeType::Integer);
                        cells.push((node, Cell::Int(v)));
                        if is_timestamp {
                            self.observe_timestamp(node, TimestampRange::Integer { min: v, max: v });
                            *timestamp = Some(v);
                        }
                    } else if let Some(v) = number.as_f64() {
                        let node = self.tree.add_node(Some(parent), key, NodeType::Float);
                        cells.push((node, Cell::Float(v)));
                        if is_timestamp {
                            self.observe_timestamp(node, TimestampRange::Float { min: v, max: v });
                            *timestamp = Some(v as i64);
                        }
                    }
                }
                JsonValue::Bool(v) => {
                    let node = self.tree.add_node(Some(parent), key, NodeType::Boolean);
                    cells.push((node, Cell::Bool(*v)));
                }
                JsonValue::Null => {
                    let node = self.tree.add_node(Some(parent), key, NodeType::NullValue);
                    cells.push((node, Cell::Null));
                }
            }
            path.pop();
        }
    }

    fn observe_timestamp(&mut self, node: NodeId, observed: TimestampRange) {
        match &mut self.timestamp {
            None => {
                self.timestamp = Some((observed, BTreeSet::from([node])));
            }
            Some((range, columns)) => {
                match observed {
                    TimestampRange::Integer { min, .. } => range.include_int(min),
                    TimestampRange::Float { min, .. } => range.include_float(min),
                }
                columns.insert(node);
            }
        }
    }

    /// Seals the archive.
    pub fn finish(mut self) -> InMemoryArchive {
        self.close_range();
        let schemas: SchemaMap = self
            .schema_ids
            .into_iter()
            .map(|(nodes, id)| (id, Schema::new(id, nodes)))
            .collect();
        let mut timestamps = TimestampDictionary::new();
        if let (Some(keys), Some((range, columns))) = (self.timestamp_key, self.timestamp) {
            timestamps.insert(
                TimestampEntry {
                    namespace: Namespace::Default,
                    keys,
                    range,
                    columns,
                },
                true,
            );
        }
        debug!(
            archive = %self.archive_id,
            records = self.next_event,
            schemas = schemas.len(),
            ranges = self.ranges.len(),
            "archive.memory.finish"
        );
        InMemoryArchive {
            archive_id: self.archive_id,
            tree: self.tree,
            schemas,
            tables: self.tables,
            timestamps,
            ranges: self.ranges,
            log_dictionary: self.log_dictionary,
            variable_dictionary: self.variable_dictionary,
        }
    }
}

/// Descriptor of the per-record ordinal column.
pub fn log_event_idx_column() -> ColumnDescriptor {
    ColumnDescriptor::from_tokens([DescriptorToken::Key(LOG_EVENT_IDX.to_owned())], Namespace::Autogen)
        .with_subtree(SubtreeType::Metadata)
}

/// Archive held entirely in memory.
#[derive(Clone, Debug)]
pub struct InMemoryArchive {
    archive_id: String,
    tree: SchemaTree,
    schemas: SchemaMap,
    tables: BTreeMap<SchemaId, MemoryTable>,
    timestamps: TimestampDictionary,
    ranges: Vec<RangeIndexEntry>,
    log_dictionary: Dictionary,
    variable_dictionary: Dictionary,
}

impl InMemoryArchive {
    /// Total records across all schema tables.
    pub fn num_records(&self) -> usize {
        self.tables.values().map(|table| table.messages.len()).sum()
    }
}

impl ArchiveReader for InMemoryArchive {
    fn archive_id(&self) -> &str {
        &self.archive_id
    }

    fn schema_tree(&self) -> &SchemaTree {
        &self.tree
    }

    fn schema_map(&self) -> &SchemaMap {
        &self.schemas
    }

    fn timestamp_dictionary(&self) -> &TimestampDictionary {
        &self.timestamps
    }

    fn range_index(&self) -> &[RangeIndexEntry] {
        &self.ranges
    }

    fn log_dictionary(&self) -> &Dictionary {
        &self.log_dictionary
    }

    fn variable_dictionary(&self) -> &Dictionary {
        &self.variable_dictionary
    }

    fn read_schema(&self, schema: SchemaId) -> Result<Box<dyn SchemaReader + '_>> {
        let table = self.tables.get(&schema).ok_or(SiftError::NotFound("schema table"))?;
        let columns = table
            .columns
            .iter()
            .map(|column| MemoryColumnReader {
                column,
                dictionary: match column.node_type {
                    NodeType::ClpString => &self.log_dictionary,
                    _ => &self.variable_dictionary,
                },
            })
            .collect();
        Ok(Box::new(MemorySchemaReader {
            schema,
            table,
            columns,
        }))
    }
}

struct MemoryColumnReader<'a> {
    column: &'a MemoryColumn,
    dictionary: &'a Dictionary,
}

impl ColumnReader for MemoryColumnReader<'_> {
    fn node_id(&self) -> NodeId {
        self.column.node
    }

    fn node_type(&self) -> NodeType {
        self.column.node_type
    }

    fn extract_value(&self, row: usize) -> Value<'_> {
        let value = match &self.column.data {
            ColumnData::Ints(values) => values.get(row).map(|v| Value::Int(*v)),
            ColumnData::Floats(values) => values.get(row).map(|v| Value::Float(*v)),
            ColumnData::Bools(values) => values.get(row).map(|v| Value::Bool(*v)),
            ColumnData::Strings(ids) => ids
                .get(row)
                .and_then(|id| self.dictionary.get(*id))
                .map(Value::String),
            ColumnData::Arrays(values) => values.get(row).map(|raw| Value::Array(raw)),
            ColumnData::Timestamps(values) => values.get(row).map(|v| Value::Timestamp(*v)),
            ColumnData::Nulls => None,
        };
        value.unwrap_or(Value::Null)
    }

    fn encoded_id(&self, row: usize) -> Option<u64> {
        match (&self.column.data, self.column.node_type) {
            (ColumnData::Strings(ids), NodeType::ClpString) => ids.get(row).copied(),
            _ => None,
        }
    }

    fn variable_id(&self, row: usize) -> Option<u64> {
        match (&self.column.data, self.column.node_type) {
            (ColumnData::Strings(ids), NodeType::VarString) => ids.get(row).copied(),
            _ => None,
        }
    }
}

struct MemorySchemaReader<'a> {
    schema: SchemaId,
    table: &'a MemoryTable,
    columns: Vec<MemoryColumnReader<'a>>,
}

impl SchemaReader for MemorySchemaReader<'_> {
    fn schema_id(&self) -> SchemaId {
        self.schema
    }

    fn num_records(&self) -> usize {
        self.table.messages.len()
    }

    fn column(&self, node: NodeId) -> Option<&dyn ColumnReader> {
        let position = self.table.positions.get(&node)?;
        self.columns
            .get(*position)
            .map(|column| column as &dyn ColumnReader)
    }

    fn message(&self, row: usize) -> Result<String> {
        self.table
            .messages
            .get(row)
            .cloned()
            .ok_or(SiftError::NotFound("record"))
    }

    fn timestamp(&self, row: usize) -> Option<i64> {
        self.table.timestamps.get(row).copied().flatten()
    }

    fn log_event_index(&self, row: usize) -> u64 {
        self.table.event_indices.get(row).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn build(records: &[JsonValue]) -> Result<InMemoryArchive> {
        let mut builder = ArchiveBuilder::new("test").with_timestamp_key("ts")?;
        for record in records {
            builder.add_record(record)?;
        }
        Ok(builder.finish())
    }

    #[test]
    fn records_with_same_columns_share_a_schema() -> Result<()> {
        let archive = build(&[
            json!({"a": 1, "b": "x"}),
            json!({"a": 2, "b": "y"}),
            json!({"a": "text value"}),
        ])?;
        assert_eq!(archive.schema_map().len(), 2);
        assert_eq!(archive.num_records(), 3);
        let reader = archive.read_schema(SchemaId(0))?;
        assert_eq!(reader.num_records(), 2);
        assert_eq!(reader.log_event_index(1), 1);
        Ok(())
    }

    #[test]
    fn strings_are_dictionary_encoded_by_shape() -> Result<()> {
        let archive = build(&[json!({"msg": "disk full", "level": "WARN"})])?;
        let tree = archive.schema_tree();
        let root = tree.object_subtree(Namespace::Default).ok_or(SiftError::NotFound("root"))?;
        let msg = tree.resolve_exact(root, &["msg"]);
        let level = tree.resolve_exact(root, &["level"]);
        assert_eq!(tree.node_type(msg[0]), Some(NodeType::ClpString));
        assert_eq!(tree.node_type(level[0]), Some(NodeType::VarString));

        let reader = archive.read_schema(SchemaId(0))?;
        let column = reader.column(msg[0]).ok_or(SiftError::NotFound("column"))?;
        assert_eq!(column.extract_value(0), Value::String("disk full"));
        assert_eq!(column.encoded_id(0), archive.log_dictionary().id_of("disk full"));
        assert_eq!(column.variable_id(0), None);
        Ok(())
    }

    #[test]
    fn timestamp_column_tracks_range() -> Result<()> {
        let archive = build(&[
            json!({"ts": 1000}),
            json!({"ts": 1200}),
            json!({"ts": "1970-01-01T00:00:00.900Z"}),
        ])?;
        let entry = archive
            .timestamp_dictionary()
            .authoritative()
            .ok_or(SiftError::NotFound("timestamp entry"))?;
        assert_eq!(entry.range, TimestampRange::Integer { min: 900, max: 1200 });
        assert_eq!(entry.columns.len(), 2);
        Ok(())
    }

    #[test]
    fn range_entries_cover_record_spans() -> Result<()> {
        let mut builder = ArchiveBuilder::new("ranges");
        let mut first = Map::new();
        first.insert("file".into(), json!("a.log"));
        builder.begin_range(first);
        builder.add_record(&json!({"x": 1}))?;
        builder.add_record(&json!({"x": 2}))?;
        let mut second = Map::new();
        second.insert("file".into(), json!("b.log"));
        builder.begin_range(second);
        builder.add_record(&json!({"x": 3}))?;
        let archive = builder.finish();
        let ranges = archive.range_index();
        assert_eq!(ranges.len(), 2);
        assert_eq!((ranges[0].start_row, ranges[0].end_row), (0, 2));
        assert_eq!((ranges[1].start_row, ranges[1].end_row), (2, 3));
        Ok(())
    }

    #[test]
    fn non_object_records_are_rejected() {
        let mut builder = ArchiveBuilder::new("bad");
        assert!(matches!(
            builder.add_record(&json!([1, 2])),
            Err(SiftError::InvalidArgument(_))
        ));
        assert!(builder.add_json_line("{not json").is_err());
    }
}
