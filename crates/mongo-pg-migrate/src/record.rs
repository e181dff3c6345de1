//! Source documents and destination rows.
//!
//! Documents arrive schemaless, so every field is decoded into a
//! [`SourceValue`]. Rows leave with a fixed vocabulary of [`BookField`]s, each
//! holding a typed [`ColumnValue`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A dynamically typed field value from a source document.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    /// String value.
    Text(String),
    /// Integral number.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Boolean value.
    Bool(bool),
    /// Array of values.
    List(Vec<SourceValue>),
    /// Embedded document or any other shape we do not interpret.
    Document(Value),
    /// Explicit null.
    Null,
}

impl SourceValue {
    /// Decodes a relaxed Extended JSON value.
    ///
    /// Type wrappers (`$oid`, `$numberInt`, `$numberLong`, `$numberDouble`,
    /// `$date`) collapse into the matching scalar. Anything else that is an
    /// object is kept as an opaque [`SourceValue::Document`].
    #[must_use]
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::String(s) => Self::Text(s),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::Array(items) => Self::List(items.into_iter().map(Self::from_json).collect()),
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some((key, inner)) = map.iter().next() {
                        if let Some(decoded) = decode_wrapper(key, inner) {
                            return decoded;
                        }
                    }
                }
                Self::Document(Value::Object(map))
            }
        }
    }

    /// Short name of the value's kind, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "string",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Bool(_) => "boolean",
            Self::List(_) => "list",
            Self::Document(_) => "document",
            Self::Null => "null",
        }
    }
}

fn decode_wrapper(key: &str, inner: &Value) -> Option<SourceValue> {
    match (key, inner) {
        ("$oid", Value::String(s)) => Some(SourceValue::Text(s.clone())),
        ("$numberInt" | "$numberLong", Value::String(s)) => {
            s.parse().ok().map(SourceValue::Integer)
        }
        ("$numberDouble", Value::String(s)) => s.parse().ok().map(SourceValue::Float),
        ("$date", Value::String(s)) => Some(SourceValue::Text(s.clone())),
        ("$date", Value::Object(_)) => match SourceValue::from_json(inner.clone()) {
            SourceValue::Document(_) => None,
            decoded => Some(decoded),
        },
        _ => None,
    }
}

impl fmt::Display for SourceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Document(v) => write!(f, "{v}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A document fetched from the source collection.
///
/// Field order follows the document. The identifier is kept apart from the
/// fields and already stringified (`ObjectId` hex, plain string, or number).
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// Source-assigned identifier, if the document carried one.
    pub id: Option<String>,
    fields: Vec<(String, SourceValue)>,
}

impl SourceRecord {
    /// Creates a record from an identifier and ordered fields.
    #[must_use]
    pub fn new(id: Option<String>, fields: Vec<(String, SourceValue)>) -> Self {
        Self { id, fields }
    }

    /// Builds a record from a JSON document, lifting `id_field` out of the
    /// field list.
    ///
    /// Returns `None` when the value is not a JSON object.
    #[must_use]
    pub fn from_document(doc: Value, id_field: &str) -> Option<Self> {
        let Value::Object(map) = doc else {
            return None;
        };

        let mut id = None;
        let mut fields = Vec::with_capacity(map.len());
        for (key, val) in map {
            let decoded = SourceValue::from_json(val);
            if key == id_field {
                id = match decoded {
                    SourceValue::Null => None,
                    other => Some(other.to_string()),
                };
            } else {
                fields.push((key, decoded));
            }
        }

        Some(Self { id, fields })
    }

    /// Looks up a field by name. Explicit nulls read as absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SourceValue> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, val)| val)
            .filter(|val| !matches!(val, SourceValue::Null))
    }

    /// Returns true if the document has a non-null field named `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over the fields in document order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &SourceValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Identifier for log lines.
    #[must_use]
    pub fn display_id(&self) -> &str {
        self.id.as_deref().unwrap_or("<no id>")
    }
}

/// The fixed set of fields a destination row can carry.
///
/// Declaration order is the column order used for inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookField {
    /// Book identifier; the duplicate-skip key by default.
    BookId,
    /// Title.
    BookName,
    /// Authors, joined with ", ".
    BookAuthors,
    /// ISBN.
    IsbnNumber,
    /// Category.
    BookCategory,
    /// Edition number.
    EditionNumber,
    /// Publication year.
    YearOfPublication,
}

impl BookField {
    /// All fields in column order.
    pub const ALL: [BookField; 7] = [
        Self::BookId,
        Self::BookName,
        Self::BookAuthors,
        Self::IsbnNumber,
        Self::BookCategory,
        Self::EditionNumber,
        Self::YearOfPublication,
    ];

    /// Destination column name.
    #[must_use]
    pub const fn column_name(self) -> &'static str {
        match self {
            Self::BookId => "book_id",
            Self::BookName => "book_name",
            Self::BookAuthors => "book_authors",
            Self::IsbnNumber => "isbn_number",
            Self::BookCategory => "book_category",
            Self::EditionNumber => "edition_number",
            Self::YearOfPublication => "year_of_publication",
        }
    }

    /// Looks up a field by its column name.
    #[must_use]
    pub fn from_column_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.column_name() == name)
    }

    /// Whether the column holds an integer rather than text.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::EditionNumber | Self::YearOfPublication)
    }

    /// Value used when the document does not provide the field.
    #[must_use]
    pub fn default_value(self) -> ColumnValue {
        match self {
            Self::EditionNumber => ColumnValue::Integer(1),
            Self::YearOfPublication => ColumnValue::Integer(0),
            _ => ColumnValue::Text(String::new()),
        }
    }
}

impl fmt::Display for BookField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// A typed value bound into an insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnValue {
    /// Text column value.
    Text(String),
    /// Integer column value.
    Integer(i64),
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Integer(i) => write!(f, "{i}"),
        }
    }
}

/// A row ready for the destination table.
///
/// Fields iterate in column order, so two rows with the same field set always
/// produce the same column list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationRecord {
    values: BTreeMap<BookField, ColumnValue>,
}

impl DestinationRecord {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, replacing any previous value.
    pub fn set(&mut self, field: BookField, value: ColumnValue) {
        self.values.insert(field, value);
    }

    /// Reads a field.
    #[must_use]
    pub fn get(&self, field: BookField) -> Option<&ColumnValue> {
        self.values.get(&field)
    }

    /// Keeps only the fields for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(BookField) -> bool) {
        self.values.retain(|field, _| keep(*field));
    }

    /// Field names present, in column order.
    #[must_use]
    pub fn fields(&self) -> Vec<BookField> {
        self.values.keys().copied().collect()
    }

    /// Iterates over `(field, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (BookField, &ColumnValue)> {
        self.values.iter().map(|(f, v)| (*f, v))
    }

    /// Number of fields present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no field survived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consumes the row into its values, in column order.
    #[must_use]
    pub fn into_values(self) -> Vec<ColumnValue> {
        self.values.into_values().collect()
    }
}

impl fmt::Display for DestinationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (field, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}: {value}")?;
        }
        write!(f, "}}")
    }
}
