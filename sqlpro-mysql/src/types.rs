//! Conversion from MySQL values and rows.

use std::sync::Arc;

use mysql_async::Value as MysqlValue;
use sqlpro_core::{Row, Value};

/// Convert a MySQL value.
///
/// Text columns arrive as bytes and are kept as text when they are valid
/// UTF-8. Dates and times are rendered the way MySQL prints them.
pub fn from_mysql_value(value: MysqlValue) -> Value {
    match value {
        MysqlValue::NULL => Value::Null,
        MysqlValue::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Value::Text(text),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        MysqlValue::Int(i) => Value::Int(i),
        MysqlValue::UInt(u) => Value::UInt(u),
        MysqlValue::Float(f) => Value::Float(f64::from(f)),
        MysqlValue::Double(d) => Value::Float(d),
        MysqlValue::Date(year, month, day, hour, minute, second, micros) => {
            let mut text = format!("{year:04}-{month:02}-{day:02}");
            if (hour, minute, second, micros) != (0, 0, 0, 0) {
                text.push_str(&format!(" {hour:02}:{minute:02}:{second:02}"));
                push_micros(&mut text, micros);
            }
            Value::Text(text)
        }
        MysqlValue::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if negative { "-" } else { "" };
            let hours = days * 24 + u32::from(hours);
            let mut text = format!("{sign}{hours:02}:{minutes:02}:{seconds:02}");
            push_micros(&mut text, micros);
            Value::Text(text)
        }
    }
}

fn push_micros(text: &mut String, micros: u32) {
    if micros > 0 {
        text.push_str(&format!(".{micros:06}"));
    }
}

/// Column names of a MySQL row, shareable between the rows of a result set.
pub fn column_names(row: &mysql_async::Row) -> Arc<[String]> {
    row.columns_ref()
        .iter()
        .map(|column| column.name_str().into_owned())
        .collect()
}

/// Convert a MySQL result set.
pub fn from_mysql_rows(rows: Vec<mysql_async::Row>) -> Vec<Row> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let columns = column_names(first);

    rows.into_iter()
        .map(|row| {
            let values = row.unwrap().into_iter().map(from_mysql_value).collect();
            Row::with_shared_columns(columns.clone(), values)
        })
        .collect()
}
