use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::warn;

use crate::services::store::document::{CREATED_AT, Fields, UPDATED_AT};
use crate::{Error, Result};

/// Top-level fields holding epoch milliseconds that travel as native timestamps.
const TIMESTAMP_FIELDS: &[&str] = &[CREATED_AT, UPDATED_AT];

/// Wire shape of a single value, `{"integerValue": "5"}` and friends.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) enum TypedValue {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String),
    // may be "NaN" or "Infinity"
    DoubleValue(Value),
    TimestampValue(String),
    StringValue(String),
    BytesValue(String),
    ReferenceValue(String),
    GeoPointValue(GeoPoint),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct GeoPoint {
    #[serde(default)]
    latitude: f64,
    #[serde(default)]
    longitude: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub(crate) struct ArrayValue {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    values: Vec<TypedValue>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub(crate) struct MapValue {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, TypedValue>,
}

impl From<&Value> for TypedValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::NullValue(()),
            Value::Bool(b) => Self::BooleanValue(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::IntegerValue(i.to_string()),
                None => Self::DoubleValue(Value::Number(n.clone())),
            },
            Value::String(s) => Self::StringValue(s.clone()),
            Value::Array(items) => Self::ArrayValue(ArrayValue {
                values: items.iter().map(Self::from).collect(),
            }),
            Value::Object(fields) => Self::MapValue(MapValue {
                fields: fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            }),
        }
    }
}

impl TypedValue {
    fn timestamp(millis: i64) -> Result<Self> {
        let at = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or(Error::Other("TimestampOutOfRange"))?;

        Ok(Self::TimestampValue(
            at.to_rfc3339_opts(SecondsFormat::Millis, true),
        ))
    }

    /// Encodes the value stored under a top-level field path.
    pub fn at(path: &str, value: &Value) -> Result<Self> {
        match value.as_i64() {
            Some(millis) if TIMESTAMP_FIELDS.contains(&path) => Self::timestamp(millis),
            _ => Ok(Self::from(value)),
        }
    }

    pub fn into_json(self) -> Result<Value> {
        Ok(match self {
            Self::NullValue(()) => Value::Null,
            Self::BooleanValue(b) => Value::Bool(b),
            Self::IntegerValue(i) => Value::from(
                i.parse::<i64>()
                    .map_err(|_| Error::Other("MalformedIntegerValue"))?,
            ),
            Self::DoubleValue(Value::Number(n)) => Value::Number(n),
            Self::DoubleValue(other) => {
                warn!(value = %other, "Non finite double read as null");
                Value::Null
            }
            Self::TimestampValue(ts) => Value::from(
                DateTime::parse_from_rfc3339(&ts)
                    .map_err(|_| Error::Other("MalformedTimestampValue"))?
                    .timestamp_millis(),
            ),
            Self::StringValue(s) | Self::BytesValue(s) | Self::ReferenceValue(s) => {
                Value::String(s)
            }
            Self::GeoPointValue(GeoPoint {
                latitude,
                longitude,
            }) => {
                let mut point = Map::new();
                point.insert("latitude".into(), number(latitude));
                point.insert("longitude".into(), number(longitude));
                Value::Object(point)
            }
            Self::ArrayValue(ArrayValue { values }) => Value::Array(
                values
                    .into_iter()
                    .map(Self::into_json)
                    .collect::<Result<_>>()?,
            ),
            Self::MapValue(MapValue { fields }) => Value::Object(decode_fields(fields)?),
        })
    }
}

fn number(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

pub(crate) fn encode_fields(fields: &Fields) -> Result<BTreeMap<String, TypedValue>> {
    fields
        .iter()
        .map(|(k, v)| Ok((k.clone(), TypedValue::at(k, v)?)))
        .collect()
}

pub(crate) fn decode_fields(fields: BTreeMap<String, TypedValue>) -> Result<Fields> {
    fields
        .into_iter()
        .map(|(k, v)| Ok((k, v.into_json()?)))
        .collect()
}
