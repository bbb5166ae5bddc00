//! Result rows and the row-mapping traits.
//!
//! Drivers hand back [`Row`]s made of [`Value`]s. Mapping a row onto a caller
//! type is done through [`FromRow`], implemented here for scalars (first
//! column), tuples, [`Row`] itself and `serde_json::Value`. Record types
//! implement it by hand:
//!
//! ```rust
//! use sqlpro_core::{FromRow, FromRowError, Row, Value};
//!
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl FromRow for User {
//!     fn from_row(row: &Row) -> Result<Self, FromRowError> {
//!         Ok(Self {
//!             id: row.get_by_name("id")?,
//!             name: row.get_by_name("name")?,
//!         })
//!     }
//! }
//!
//! let row = Row::new(
//!     vec!["id".into(), "name".into()],
//!     vec![Value::Text("7".into()), Value::Text("ada".into())],
//! );
//! let user = User::from_row(&row).unwrap();
//! assert_eq!(user.id, 7);
//! assert_eq!(user.name, "ada");
//! ```

use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

/// A single cell of a result row.
///
/// Text-protocol drivers report every cell as [`Value::Bytes`]; the
/// [`FromValue`] conversions parse those as needed.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl Value {
    /// Check if the value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// View the value as text, if it is text or UTF-8 bytes.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// A result row: column names plus one value per column.
///
/// Column names are shared between all rows of one result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row from column names and values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self {
            columns: columns.into(),
            values,
        }
    }

    /// Create a row that shares its column names with other rows.
    pub fn with_shared_columns(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Number of values in the row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Raw values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Raw value at `index`.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Convert the value at `index`.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T, FromRowError> {
        let value = self
            .values
            .get(index)
            .ok_or_else(|| FromRowError::new(format!("no column at index {}", index)))?;
        T::from_value(value).map_err(|e| match self.columns.get(index) {
            Some(name) => FromRowError::with_column(e.message, name.clone()),
            None => e,
        })
    }

    /// Convert the value of the column called `name`.
    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T, FromRowError> {
        let index = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| FromRowError::with_column("no such column", name))?;
        self.get(index)
    }
}

/// Error type for row mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromRowError {
    /// The error message.
    pub message: String,
    /// The column that caused the error, if known.
    pub column: Option<String>,
}

impl FromRowError {
    /// Create a new error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            column: None,
        }
    }

    /// Create a new error with a column name.
    pub fn with_column(message: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            column: Some(column.into()),
        }
    }
}

impl std::fmt::Display for FromRowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref column) = self.column {
            write!(f, "column '{}': {}", column, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for FromRowError {}

/// Conversion of a single [`Value`] into a Rust type.
pub trait FromValue: Sized {
    /// Convert the value.
    fn from_value(value: &Value) -> Result<Self, FromRowError>;
}

fn mismatch(expected: &str, value: &Value) -> FromRowError {
    FromRowError::new(format!("expected {}, found {}", expected, value.kind()))
}

fn parse_text<T: std::str::FromStr>(expected: &str, value: &Value) -> Result<T, FromRowError> {
    value
        .as_str()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| mismatch(expected, value))
}

macro_rules! impl_from_value_int {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self, FromRowError> {
                    match value {
                        Value::Int(i) => <$ty>::try_from(*i)
                            .map_err(|_| mismatch(stringify!($ty), value)),
                        Value::UInt(u) => <$ty>::try_from(*u)
                            .map_err(|_| mismatch(stringify!($ty), value)),
                        Value::Text(_) | Value::Bytes(_) => parse_text(stringify!($ty), value),
                        _ => Err(mismatch(stringify!($ty), value)),
                    }
                }
            }
        )*
    };
}

impl_from_value_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, FromRowError> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            Value::UInt(u) => Ok(*u as f64),
            Value::Text(_) | Value::Bytes(_) => parse_text("f64", value),
            Value::Null => Err(mismatch("f64", value)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self, FromRowError> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, FromRowError> {
        match value {
            Value::Int(i) => Ok(*i != 0),
            Value::UInt(u) => Ok(*u != 0),
            Value::Text(_) | Value::Bytes(_) => match value.as_str().map(str::trim) {
                Some("1") | Some("true") | Some("TRUE") => Ok(true),
                Some("0") | Some("false") | Some("FALSE") => Ok(false),
                _ => Err(mismatch("bool", value)),
            },
            _ => Err(mismatch("bool", value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, FromRowError> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            Value::Bytes(b) => String::from_utf8(b.clone())
                .map_err(|_| FromRowError::new("invalid UTF-8 in text column")),
            Value::Int(i) => Ok(i.to_string()),
            Value::UInt(u) => Ok(u.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Null => Err(mismatch("String", value)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self, FromRowError> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Text(s) => Ok(s.clone().into_bytes()),
            _ => Err(mismatch("bytes", value)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, FromRowError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, FromRowError> {
        Ok(value.clone())
    }
}

/// Mapping of a whole result row onto a Rust type.
pub trait FromRow: Sized {
    /// Convert a row to this type.
    fn from_row(row: &Row) -> Result<Self, FromRowError>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self, FromRowError> {
        Ok(row.clone())
    }
}

macro_rules! impl_from_row_scalar {
    ($($ty:ty),*) => {
        $(
            impl FromRow for $ty {
                fn from_row(row: &Row) -> Result<Self, FromRowError> {
                    row.get(0)
                }
            }
        )*
    };
}

impl_from_row_scalar!(
    i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64, bool, String, Vec<u8>
);

impl<T: FromValue> FromRow for Option<T> {
    fn from_row(row: &Row) -> Result<Self, FromRowError> {
        row.get(0)
    }
}

macro_rules! impl_from_row_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: FromValue),+> FromRow for ($($name,)+) {
            fn from_row(row: &Row) -> Result<Self, FromRowError> {
                Ok(($(row.get::<$name>($idx)?,)+))
            }
        }
    };
}

impl_from_row_tuple!(A: 0);
impl_from_row_tuple!(A: 0, B: 1);
impl_from_row_tuple!(A: 0, B: 1, C: 2);
impl_from_row_tuple!(A: 0, B: 1, C: 2, D: 3);
impl_from_row_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_from_row_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

/// Map a row to a JSON object keyed by column name.
impl FromRow for JsonValue {
    fn from_row(row: &Row) -> Result<Self, FromRowError> {
        let mut map = Map::new();

        for (name, value) in row.columns().iter().zip(row.values()) {
            let json_value = match value {
                Value::Null => JsonValue::Null,
                Value::Int(i) => JsonValue::Number((*i).into()),
                Value::UInt(u) => JsonValue::Number((*u).into()),
                Value::Float(f) => serde_json::Number::from_f64(*f)
                    .map(JsonValue::Number)
                    .unwrap_or(JsonValue::Null),
                Value::Text(s) => JsonValue::String(s.clone()),
                Value::Bytes(bytes) => match std::str::from_utf8(bytes) {
                    Ok(s) => JsonValue::String(s.to_string()),
                    Err(_) => JsonValue::String(format!("<binary {} bytes>", bytes.len())),
                },
            };
            map.insert(name.clone(), json_value);
        }

        Ok(JsonValue::Object(map))
    }
}
