//! Mapping tables between the three type systems.
//!
//! - [`SerializedFieldType`]: the coarse kind shown to users and accepted in
//!   schema updates (`string`, `integer`, ...).
//! - native storage type strings ([`NativeType`]), e.g. `Nullable(Int64)`.
//! - [`QueryType`]: the query engine's field type identifier, stored in the
//!   catalog as `hogql`.
//!
//! The two directions are separate tables. Native types found by schema
//! inference (`UInt16`, `IPv4`, ...) map to a query type but have no
//! serialized type of their own.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::native::NativeType;

/// Lookup failed in one of the mapping tables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnknownTypeError {
    /// The value is not a serialized field type at all.
    #[error("type '{0}' does not exist")]
    Serialized(String),

    /// The serialized type exists but cannot be stored as a column.
    #[error("type '{0}' cannot be stored as a column")]
    NotStorable(SerializedFieldType),

    /// The native type has no query engine counterpart.
    #[error("native type '{0}' has no query type")]
    Native(String),
}

/// Coarse field kinds exposed to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializedFieldType {
    Integer,
    Float,
    Decimal,
    String,
    Datetime,
    Date,
    Boolean,
    Array,
    Json,
    LazyTable,
    VirtualTable,
    FieldTraverser,
    Expression,
    View,
    MaterializedView,
    Unknown,
}

impl SerializedFieldType {
    /// Every variant, in declaration order.
    pub const ALL: &'static [SerializedFieldType] = &[
        SerializedFieldType::Integer,
        SerializedFieldType::Float,
        SerializedFieldType::Decimal,
        SerializedFieldType::String,
        SerializedFieldType::Datetime,
        SerializedFieldType::Date,
        SerializedFieldType::Boolean,
        SerializedFieldType::Array,
        SerializedFieldType::Json,
        SerializedFieldType::LazyTable,
        SerializedFieldType::VirtualTable,
        SerializedFieldType::FieldTraverser,
        SerializedFieldType::Expression,
        SerializedFieldType::View,
        SerializedFieldType::MaterializedView,
        SerializedFieldType::Unknown,
    ];

    /// The wire name (`"string"`, `"lazy_table"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            SerializedFieldType::Integer => "integer",
            SerializedFieldType::Float => "float",
            SerializedFieldType::Decimal => "decimal",
            SerializedFieldType::String => "string",
            SerializedFieldType::Datetime => "datetime",
            SerializedFieldType::Date => "date",
            SerializedFieldType::Boolean => "boolean",
            SerializedFieldType::Array => "array",
            SerializedFieldType::Json => "json",
            SerializedFieldType::LazyTable => "lazy_table",
            SerializedFieldType::VirtualTable => "virtual_table",
            SerializedFieldType::FieldTraverser => "field_traverser",
            SerializedFieldType::Expression => "expression",
            SerializedFieldType::View => "view",
            SerializedFieldType::MaterializedView => "materialized_view",
            SerializedFieldType::Unknown => "unknown",
        }
    }

    /// The storage type a column of this kind is written as.
    pub fn native_type(&self) -> Result<NativeType, UnknownTypeError> {
        let native = STORAGE_TYPES
            .iter()
            .find(|(kind, _)| kind == self)
            .map(|(_, native)| *native)
            .ok_or(UnknownTypeError::NotStorable(*self))?;

        // the table holds literals, a failure here means a broken entry
        NativeType::parse(native).map_err(|_| UnknownTypeError::NotStorable(*self))
    }

    /// The serialized kind a native type is displayed as.
    pub fn from_native(native: &NativeType) -> Result<Self, UnknownTypeError> {
        QueryType::from_native(native).map(|q| q.serialized())
    }
}

impl fmt::Display for SerializedFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SerializedFieldType {
    type Err = UnknownTypeError;

    /// Case-insensitive: `"STRING"` and `"string"` both resolve.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| UnknownTypeError::Serialized(s.to_string()))
    }
}

/// Field type identifiers of the query engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryType {
    #[serde(rename = "StringDatabaseField")]
    String,
    #[serde(rename = "IntegerDatabaseField")]
    Integer,
    #[serde(rename = "FloatDatabaseField")]
    Float,
    #[serde(rename = "DecimalDatabaseField")]
    Decimal,
    #[serde(rename = "BooleanDatabaseField")]
    Boolean,
    #[serde(rename = "DateDatabaseField")]
    Date,
    #[serde(rename = "DateTimeDatabaseField")]
    DateTime,
    #[serde(rename = "StringArrayDatabaseField")]
    StringArray,
    #[serde(rename = "StringJSONDatabaseField")]
    StringJson,
    #[serde(rename = "UnknownDatabaseField")]
    Unknown,
}

impl QueryType {
    /// The identifier as stored in the catalog.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::String => "StringDatabaseField",
            QueryType::Integer => "IntegerDatabaseField",
            QueryType::Float => "FloatDatabaseField",
            QueryType::Decimal => "DecimalDatabaseField",
            QueryType::Boolean => "BooleanDatabaseField",
            QueryType::Date => "DateDatabaseField",
            QueryType::DateTime => "DateTimeDatabaseField",
            QueryType::StringArray => "StringArrayDatabaseField",
            QueryType::StringJson => "StringJSONDatabaseField",
            QueryType::Unknown => "UnknownDatabaseField",
        }
    }

    /// Map a native type to its query type, looking through `Nullable` and
    /// `LowCardinality`.
    pub fn from_native(native: &NativeType) -> Result<Self, UnknownTypeError> {
        let base = native.base_name();
        QUERY_TYPES
            .iter()
            .find(|(name, _)| *name == base)
            .map(|(_, query)| *query)
            .ok_or_else(|| UnknownTypeError::Native(native.to_string()))
    }

    /// Parse a native type string and map it.
    pub fn from_native_str(native: &str) -> Result<Self, UnknownTypeError> {
        let parsed = NativeType::parse(native).map_err(|_| UnknownTypeError::Native(native.to_string()))?;
        Self::from_native(&parsed)
    }

    /// The serialized kind used when displaying a field of this type.
    pub fn serialized(&self) -> SerializedFieldType {
        match self {
            QueryType::String => SerializedFieldType::String,
            QueryType::Integer => SerializedFieldType::Integer,
            QueryType::Float => SerializedFieldType::Float,
            QueryType::Decimal => SerializedFieldType::Decimal,
            QueryType::Boolean => SerializedFieldType::Boolean,
            QueryType::Date => SerializedFieldType::Date,
            QueryType::DateTime => SerializedFieldType::Datetime,
            QueryType::StringArray => SerializedFieldType::Array,
            QueryType::StringJson => SerializedFieldType::Json,
            QueryType::Unknown => SerializedFieldType::Unknown,
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Serialized kind -> storage type written by schema updates.
pub static STORAGE_TYPES: &[(SerializedFieldType, &str)] = &[
    (SerializedFieldType::Integer, "Int64"),
    (SerializedFieldType::Float, "Float64"),
    (SerializedFieldType::Decimal, "Decimal(38, 9)"),
    (SerializedFieldType::String, "String"),
    (SerializedFieldType::Datetime, "DateTime64(6)"),
    (SerializedFieldType::Date, "Date"),
    (SerializedFieldType::Boolean, "Bool"),
    (SerializedFieldType::Array, "Array(String)"),
    (SerializedFieldType::Json, "Map(String, String)"),
];

/// Native base type name -> query type.
pub static QUERY_TYPES: &[(&str, QueryType)] = &[
    ("String", QueryType::String),
    ("FixedString", QueryType::String),
    ("UUID", QueryType::String),
    ("IPv4", QueryType::String),
    ("IPv6", QueryType::String),
    ("Enum8", QueryType::String),
    ("Enum16", QueryType::String),
    ("Int8", QueryType::Integer),
    ("Int16", QueryType::Integer),
    ("Int32", QueryType::Integer),
    ("Int64", QueryType::Integer),
    ("Int128", QueryType::Integer),
    ("Int256", QueryType::Integer),
    ("UInt8", QueryType::Integer),
    ("UInt16", QueryType::Integer),
    ("UInt32", QueryType::Integer),
    ("UInt64", QueryType::Integer),
    ("UInt128", QueryType::Integer),
    ("UInt256", QueryType::Integer),
    ("Float32", QueryType::Float),
    ("Float64", QueryType::Float),
    ("Decimal", QueryType::Decimal),
    ("Decimal32", QueryType::Decimal),
    ("Decimal64", QueryType::Decimal),
    ("Decimal128", QueryType::Decimal),
    ("Decimal256", QueryType::Decimal),
    ("Bool", QueryType::Boolean),
    ("Boolean", QueryType::Boolean),
    ("Date", QueryType::Date),
    ("Date32", QueryType::Date),
    ("DateTime", QueryType::DateTime),
    ("DateTime32", QueryType::DateTime),
    ("DateTime64", QueryType::DateTime),
    ("Array", QueryType::StringArray),
    ("Map", QueryType::StringJson),
    ("Tuple", QueryType::StringJson),
    ("Nested", QueryType::StringJson),
    ("JSON", QueryType::StringJson),
    ("Object", QueryType::StringJson),
    ("Nothing", QueryType::Unknown),
];
