#![forbid(unsafe_code)]

//! Column readers and the decoded cell values they produce.

use serde_json::Value as JsonValue;

use crate::archive::schema_tree::NodeType;
use crate::archive::NodeId;

/// Decoded cell. Strings and arrays borrow from the reader.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value<'a> {
    /// Integer cell.
    Int(i64),
    /// Float cell.
    Float(f64),
    /// Boolean cell.
    Bool(bool),
    /// Dictionary-decoded string.
    String(&'a str),
    /// Raw JSON text of an unstructured array.
    Array(&'a str),
    /// Millisecond timestamp.
    Timestamp(i64),
    /// Explicit null.
    Null,
}

impl Value<'_> {
    /// JSON rendering used when reconstructing projected records. Arrays that
    /// fail to parse are kept as their raw text.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Int(v) | Value::Timestamp(v) => JsonValue::from(*v),
            Value::Float(v) => JsonValue::from(*v),
            Value::Bool(v) => JsonValue::from(*v),
            Value::String(v) => JsonValue::from(*v),
            Value::Array(raw) => {
                serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::from(*raw))
            }
            Value::Null => JsonValue::Null,
        }
    }
}

/// Read access to one column of a schema table.
pub trait ColumnReader {
    /// Schema-tree node the column stores.
    fn node_id(&self) -> NodeId;

    /// Storage type of the column.
    fn node_type(&self) -> NodeType;

    /// Decoded value at `row`.
    fn extract_value(&self, row: usize) -> Value<'_>;

    /// Log-dictionary id at `row` for `ClpString` columns.
    fn encoded_id(&self, _row: usize) -> Option<u64> {
        None
    }

    /// Variable-dictionary id at `row` for `VarString` columns.
    fn variable_id(&self, _row: usize) -> Option<u64> {
        None
    }
}
