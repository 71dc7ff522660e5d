use std::borrow::Cow;
use std::fmt;
use std::io::{self, Cursor, Read};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::NodeId;

/// Declared type of a property value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    String,
    Boolean,
    Integer,
    Long,
    Double,
    Date,
    Binary,
    Reference,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Double => "double",
            Self::Date => "date",
            Self::Binary => "binary",
            Self::Reference => "reference",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ValueType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "string" => Ok(Self::String),
            "boolean" | "bool" => Ok(Self::Boolean),
            "integer" | "int" => Ok(Self::Integer),
            "long" => Ok(Self::Long),
            "double" => Ok(Self::Double),
            "date" => Ok(Self::Date),
            "binary" => Ok(Self::Binary),
            "reference" | "ref" => Ok(Self::Reference),
            other => Err(TypeError::UnknownValueType(other.to_string())),
        }
    }
}

/// A single typed property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
    /// Arbitrary byte content; round-trips exactly.
    Binary(Vec<u8>),
    /// Reference to another node by identifier.
    Reference(NodeId),
}

impl Value {
    /// The declared type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::Boolean(_) => ValueType::Boolean,
            Self::Integer(_) => ValueType::Integer,
            Self::Long(_) => ValueType::Long,
            Self::Double(_) => ValueType::Double,
            Self::Date(_) => ValueType::Date,
            Self::Binary(_) => ValueType::Binary,
            Self::Reference(_) => ValueType::Reference,
        }
    }

    /// Read an entire stream into a binary value.
    pub fn binary_from_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(Self::Binary(buf))
    }

    /// Parse a textual representation into a value of the given type.
    pub fn parse(value_type: ValueType, input: &str) -> Result<Self, TypeError> {
        let invalid = || TypeError::InvalidValue {
            expected: value_type.to_string(),
            input: input.to_string(),
        };
        match value_type {
            ValueType::String => Ok(Self::String(input.to_string())),
            ValueType::Boolean => input.parse().map(Self::Boolean).map_err(|_| invalid()),
            ValueType::Integer => input.parse().map(Self::Integer).map_err(|_| invalid()),
            ValueType::Long => input.parse().map(Self::Long).map_err(|_| invalid()),
            ValueType::Double => input.parse().map(Self::Double).map_err(|_| invalid()),
            ValueType::Date => DateTime::parse_from_rfc3339(input)
                .map(|d| Self::Date(d.with_timezone(&Utc)))
                .map_err(|_| invalid()),
            ValueType::Binary => Ok(Self::Binary(input.as_bytes().to_vec())),
            ValueType::Reference => input.parse().map(Self::Reference).map_err(|_| invalid()),
        }
    }

    /// Textual content of the value, if it has any.
    ///
    /// Strings are returned as-is; binary values are returned when they hold
    /// valid UTF-8. Other types have no textual content.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::String(s) => Some(Cow::Borrowed(s.as_str())),
            Self::Binary(bytes) => std::str::from_utf8(bytes).ok().map(Cow::Borrowed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<NodeId> {
        match self {
            Self::Reference(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Self::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Self::Reference(id) => write!(f, "ref:{id}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Date(d)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(b)
    }
}

impl From<NodeId> for Value {
    fn from(id: NodeId) -> Self {
        Self::Reference(id)
    }
}

/// Single or multiple values held by a property.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValues {
    Single(Value),
    Multiple(Vec<Value>),
}

/// A named, typed property attached to a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value_type: ValueType,
    pub values: PropertyValues,
}

impl Property {
    /// Create a single-valued property.
    pub fn single(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        Self {
            name: name.into(),
            value_type: value.value_type(),
            values: PropertyValues::Single(value),
        }
    }

    /// Create a multi-valued property. All values must share one type.
    pub fn multiple(name: impl Into<String>, values: Vec<Value>) -> Result<Self, TypeError> {
        let name = name.into();
        let first = values
            .first()
            .map(Value::value_type)
            .ok_or_else(|| TypeError::EmptyValues(name.clone()))?;
        if let Some(other) = values.iter().map(Value::value_type).find(|t| *t != first) {
            return Err(TypeError::MixedValueTypes {
                name,
                first: first.to_string(),
                other: other.to_string(),
            });
        }
        Ok(Self {
            name,
            value_type: first,
            values: PropertyValues::Multiple(values),
        })
    }

    /// Create a binary property by draining a reader.
    pub fn binary_from_reader<R: Read>(name: impl Into<String>, reader: R) -> io::Result<Self> {
        Ok(Self::single(name, Value::binary_from_reader(reader)?))
    }

    pub fn is_multiple(&self) -> bool {
        matches!(self.values, PropertyValues::Multiple(_))
    }

    /// The single value, or the first value of a multi-valued property.
    pub fn value(&self) -> Option<&Value> {
        match &self.values {
            PropertyValues::Single(v) => Some(v),
            PropertyValues::Multiple(vs) => vs.first(),
        }
    }

    /// All values as a slice.
    pub fn values(&self) -> &[Value] {
        match &self.values {
            PropertyValues::Single(v) => std::slice::from_ref(v),
            PropertyValues::Multiple(vs) => vs,
        }
    }

    /// String value of a single-valued string property.
    pub fn string_value(&self) -> Option<&str> {
        self.value().and_then(Value::as_str)
    }

    /// Textual content of every value, newline-joined.
    pub fn text(&self) -> Option<String> {
        let parts: Vec<Cow<'_, str>> = self.values().iter().filter_map(Value::as_text).collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// Stream the binary content of a single-valued binary property.
    pub fn binary_reader(&self) -> Option<Cursor<&[u8]>> {
        self.value().and_then(Value::as_bytes).map(Cursor::new)
    }
}
