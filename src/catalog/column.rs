//! Column catalog entries.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{NativeType, QueryType, SerializedFieldType};

/// Structured description of one column.
///
/// This is the persisted form: `{"clickhouse": ..., "hogql": ..., "valid": ...}`
/// with an optional `fields` map for named nested elements. Absent keys stay
/// absent on save and keys this crate does not know are carried in `extra`,
/// so stored catalogs round-trip unchanged. An explicit `null` for one of the
/// optional keys reads as absent and is dropped on save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Native storage type string.
    pub clickhouse: String,
    /// Query type derived from `clickhouse`; absent when it has no mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hogql: Option<QueryType>,
    /// Whether the query engine can read this column for the table's format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    /// Named nested elements (tuple / nested types).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, ColumnDescriptor>>,
    /// Unrecognized keys, written back as they were read.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ColumnDescriptor {
    /// Describe a native type, deriving the query type and nested elements.
    ///
    /// `clickhouse` keeps the string it was given; `valid` starts out as
    /// whether a query type exists.
    pub fn describe(clickhouse: impl Into<String>, native: &NativeType) -> Self {
        let hogql = QueryType::from_native(native).ok();
        let elements = native.named_elements();
        let fields = if elements.is_empty() {
            None
        } else {
            Some(
                elements
                    .into_iter()
                    .map(|(name, ty)| (name.to_string(), ColumnDescriptor::describe(ty.to_string(), ty)))
                    .collect(),
            )
        };

        Self {
            clickhouse: clickhouse.into(),
            hogql,
            valid: Some(hogql.is_some()),
            fields,
            extra: BTreeMap::new(),
        }
    }

    /// Upgrade a legacy bare native type string.
    ///
    /// The query type and nested elements come from the parsed type. A
    /// representable type keeps `valid` unset for the next validation pass;
    /// an unreadable or unmapped one is flagged invalid.
    pub fn from_legacy(clickhouse: &str) -> Self {
        let Ok(native) = NativeType::parse(clickhouse) else {
            return Self {
                clickhouse: clickhouse.to_string(),
                hogql: None,
                valid: Some(false),
                fields: None,
                extra: BTreeMap::new(),
            };
        };

        let mut descriptor = Self::describe(clickhouse, &native);
        if descriptor.hogql.is_some() {
            descriptor.valid = None;
        }
        descriptor
    }

    /// Validity, treating an unset flag as valid.
    pub fn is_valid(&self) -> bool {
        self.valid.unwrap_or(true)
    }

    /// Nested element by name.
    pub fn field(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.fields.as_ref().and_then(|f| f.get(name))
    }
}

/// A catalog entry: either a legacy bare type string or a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnEntry {
    /// Old catalogs stored only the native type string.
    Legacy(String),
    Descriptor(ColumnDescriptor),
}

impl ColumnEntry {
    /// The native storage type string.
    pub fn clickhouse(&self) -> &str {
        match self {
            ColumnEntry::Legacy(native) => native,
            ColumnEntry::Descriptor(d) => &d.clickhouse,
        }
    }

    /// The stored query type, if any. Legacy entries derive it on the fly.
    pub fn hogql(&self) -> Option<QueryType> {
        match self {
            ColumnEntry::Legacy(native) => QueryType::from_native_str(native).ok(),
            ColumnEntry::Descriptor(d) => d.hogql,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            ColumnEntry::Legacy(native) => QueryType::from_native_str(native).is_ok(),
            ColumnEntry::Descriptor(d) => d.is_valid(),
        }
    }

    pub fn as_descriptor(&self) -> Cow<'_, ColumnDescriptor> {
        match self {
            ColumnEntry::Legacy(native) => Cow::Owned(ColumnDescriptor::from_legacy(native)),
            ColumnEntry::Descriptor(d) => Cow::Borrowed(d),
        }
    }

    /// Rewrite a legacy entry into the structured form, then hand out the
    /// descriptor for mutation. The upgraded entry carries no `valid` flag.
    pub fn normalize(&mut self) -> &mut ColumnDescriptor {
        if let ColumnEntry::Legacy(native) = self {
            let mut descriptor = ColumnDescriptor::from_legacy(native);
            descriptor.valid = None;
            *self = ColumnEntry::Descriptor(descriptor);
        }
        match self {
            ColumnEntry::Descriptor(d) => d,
            ColumnEntry::Legacy(_) => unreachable!("legacy entry was just normalized"),
        }
    }
}

impl From<ColumnDescriptor> for ColumnEntry {
    fn from(d: ColumnDescriptor) -> Self {
        ColumnEntry::Descriptor(d)
    }
}

/// The per-table column map, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnCatalog(BTreeMap<String, ColumnEntry>);

impl ColumnCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&ColumnEntry> {
        self.0.get(column)
    }

    pub fn get_mut(&mut self, column: &str) -> Option<&mut ColumnEntry> {
        self.0.get_mut(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, entry: impl Into<ColumnEntry>) -> Option<ColumnEntry> {
        self.0.insert(column.into(), entry.into())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnEntry)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Columns currently flagged invalid.
    pub fn invalid_columns(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, entry)| !entry.is_valid())
            .map(|(name, _)| name)
            .collect()
    }
}

impl FromIterator<(String, ColumnEntry)> for ColumnCatalog {
    fn from_iter<I: IntoIterator<Item = (String, ColumnEntry)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A field as the query engine knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub query_type: QueryType,
    pub fields: Vec<Field>,
}

impl Field {
    pub fn new(name: impl Into<String>, query_type: QueryType) -> Self {
        Self {
            name: name.into(),
            query_type,
            fields: Vec::new(),
        }
    }

    pub fn with_fields(mut self, fields: Vec<Field>) -> Self {
        self.fields = fields;
        self
    }

    /// Build the field tree of a catalog descriptor. Unmapped columns show
    /// up as unknown.
    pub fn from_descriptor(name: &str, descriptor: &ColumnDescriptor) -> Self {
        let fields = descriptor
            .fields
            .iter()
            .flatten()
            .map(|(child, d)| Field::from_descriptor(child, d))
            .collect();

        Self {
            name: name.to_string(),
            query_type: descriptor.hogql.unwrap_or(QueryType::Unknown),
            fields,
        }
    }
}

/// Column description handed to API consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedField {
    pub key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: SerializedFieldType,
    pub schema_valid: bool,
    pub fields: Vec<SerializedField>,
    /// Name of the owning table.
    pub table: String,
    /// Access path: the table's name chain then the nested field path.
    pub chain: Vec<String>,
}
