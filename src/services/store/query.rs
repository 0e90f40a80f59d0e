use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde_json::Value;

use super::document::{Cursor, Fields};
use crate::{Error, Result};

/// Pseudo field addressing the document id in orderings and cursors.
pub const DOCUMENT_ID: &str = "__name__";

macro_rules! operators {
    ($($Variant:ident: $symbol:literal, $wire:literal),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Operator { $($Variant),+ }

        impl Operator {
            pub const fn symbol(self) -> &'static str {
                match self {
                    $( Self::$Variant => $symbol ),+
                }
            }

            pub const fn wire(self) -> &'static str {
                match self {
                    $( Self::$Variant => $wire ),+
                }
            }
        }

        impl FromStr for Operator {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $( $symbol => Ok(Self::$Variant), )+
                    other => Err(Error::InvalidQuery(format!("unknown operator {other:?}"))),
                }
            }
        }
    };
}

operators!(
    Lt: "<", "LESS_THAN",
    Le: "<=", "LESS_THAN_OR_EQUAL",
    Eq: "==", "EQUAL",
    Ne: "!=", "NOT_EQUAL",
    Ge: ">=", "GREATER_THAN_OR_EQUAL",
    Gt: ">", "GREATER_THAN",
    ArrayContains: "array-contains", "ARRAY_CONTAINS",
    ArrayContainsAny: "array-contains-any", "ARRAY_CONTAINS_ANY",
    In: "in", "IN",
    NotIn: "not-in", "NOT_IN",
);

impl Operator {
    /// Operators that force an ordering on their field.
    pub const fn is_inequality(self) -> bool {
        matches!(
            self,
            Self::Lt | Self::Le | Self::Ne | Self::Ge | Self::Gt | Self::NotIn
        )
    }

    const fn takes_array(self) -> bool {
        matches!(self, Self::ArrayContainsAny | Self::In | Self::NotIn)
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub const fn wire(self) -> &'static str {
        match self {
            Self::Asc => "ASCENDING",
            Self::Desc => "DESCENDING",
        }
    }

    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Asc => ordering,
            Self::Desc => ordering.reverse(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Where {
        field: String,
        op: Operator,
        value: Value,
    },
    OrderBy {
        field: String,
        direction: Direction,
    },
    Limit(u32),
}

pub fn filter(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Constraint {
    Constraint::Where {
        field: field.into(),
        op,
        value: value.into(),
    }
}

pub fn order_by(field: impl Into<String>, direction: Direction) -> Constraint {
    Constraint::OrderBy {
        field: field.into(),
        direction,
    }
}

pub fn limit(limit: u32) -> Constraint {
    Constraint::Limit(limit)
}

/// Ordered list of constraints applied against one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    constraints: Vec<Constraint>,
}

impl From<Vec<Constraint>> for Query {
    fn from(constraints: Vec<Constraint>) -> Self {
        Self { constraints }
    }
}

impl From<&[Constraint]> for Query {
    fn from(constraints: &[Constraint]) -> Self {
        Self {
            constraints: constraints.to_vec(),
        }
    }
}

impl Query {
    pub fn push(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn filters(&self) -> impl Iterator<Item = (&str, Operator, &Value)> {
        self.constraints.iter().filter_map(|c| match c {
            Constraint::Where { field, op, value } => Some((field.as_str(), *op, value)),
            _ => None,
        })
    }

    /// The last limit given wins.
    pub fn limit(&self) -> Option<u32> {
        self.constraints.iter().rev().find_map(|c| match c {
            Constraint::Limit(limit) => Some(*limit),
            _ => None,
        })
    }

    /// Effective ordering: explicit entries, else the first inequality field,
    /// always closed by the document id in the direction of the last entry.
    pub fn ordering(&self) -> Vec<(String, Direction)> {
        let mut ordering = self
            .constraints
            .iter()
            .filter_map(|c| match c {
                Constraint::OrderBy { field, direction } => Some((field.clone(), *direction)),
                _ => None,
            })
            .collect::<Vec<_>>();

        if ordering.is_empty() {
            if let Some((field, _, _)) = self.filters().find(|(_, op, _)| op.is_inequality()) {
                ordering.push((field.to_owned(), Direction::Asc));
            }
        }

        if !ordering.iter().any(|(field, _)| field == DOCUMENT_ID) {
            let direction = ordering.last().map(|(_, d)| *d).unwrap_or_default();
            ordering.push((DOCUMENT_ID.to_owned(), direction));
        }

        ordering
    }

    pub fn validate(&self) -> Result<()> {
        for (field, op, value) in self.filters() {
            if field.is_empty() {
                return Err(Error::InvalidQuery(String::from("empty field path")));
            }

            if op.takes_array() && !value.is_array() {
                return Err(Error::InvalidQuery(format!(
                    "'{op}' on {field} needs an array value"
                )));
            }
        }

        if self.limit() == Some(0) {
            return Err(Error::InvalidQuery(String::from("limit must be positive")));
        }

        Ok(())
    }

    /// Whether a document passes every filter.
    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters()
            .all(|(field, op, value)| matches_filter(lookup(fields, field), op, value))
    }

    /// Sort key under [`Query::ordering`]; `None` when an ordered field is missing.
    pub(crate) fn sort_key(
        ordering: &[(String, Direction)],
        id: &str,
        fields: &Fields,
    ) -> Option<Vec<Value>> {
        ordering
            .iter()
            .map(|(field, _)| {
                if field == DOCUMENT_ID {
                    Some(Value::String(id.to_owned()))
                } else {
                    lookup(fields, field).cloned()
                }
            })
            .collect()
    }

    pub(crate) fn cursor_key(ordering: &[(String, Direction)], cursor: &Cursor) -> Result<Vec<Value>> {
        Self::sort_key(ordering, &cursor.id, &cursor.fields).ok_or_else(|| {
            Error::InvalidQuery(format!(
                "cursor document {} lacks an ordered field",
                cursor.id
            ))
        })
    }

    pub(crate) fn compare_keys(ordering: &[(String, Direction)], a: &[Value], b: &[Value]) -> Ordering {
        ordering
            .iter()
            .zip(a.iter().zip(b))
            .map(|((_, direction), (a, b))| direction.apply(compare(a, b)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

/// Resolves a dotted field path.
pub fn lookup<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut value = fields.get(segments.next()?)?;

    for segment in segments {
        value = value.as_object()?.get(segment)?;
    }

    Some(value)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order across value types: null < bool < number < string < array < map.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),

        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => {
                let a = a.as_f64().unwrap_or(f64::NAN);
                let b = b.as_f64().unwrap_or(f64::NAN);
                a.total_cmp(&b)
            }
        },

        (Value::String(a), Value::String(b)) => a.cmp(b),

        (Value::Array(a), Value::Array(b)) => a
            .iter()
            .zip(b)
            .map(|(a, b)| compare(a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.len().cmp(&b.len())),

        (Value::Object(a), Value::Object(b)) => {
            let mut a = a.iter().collect::<Vec<_>>();
            let mut b = b.iter().collect::<Vec<_>>();
            a.sort_by(|x, y| x.0.cmp(y.0));
            b.sort_by(|x, y| x.0.cmp(y.0));

            a.iter()
                .zip(&b)
                .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| compare(va, vb)))
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len()))
        }

        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn equals(a: &Value, b: &Value) -> bool {
    compare(a, b).is_eq()
}

fn matches_filter(field: Option<&Value>, op: Operator, value: &Value) -> bool {
    let Some(field) = field else {
        return false;
    };

    let same_type = type_rank(field) == type_rank(value);
    let candidates = value.as_array().map(Vec::as_slice).unwrap_or_default();

    match op {
        Operator::Eq => equals(field, value),
        // null never satisfies `!=`, so `!= null` reads as "is not null"
        Operator::Ne => !field.is_null() && !equals(field, value),
        Operator::Lt => same_type && compare(field, value).is_lt(),
        Operator::Le => same_type && compare(field, value).is_le(),
        Operator::Gt => same_type && compare(field, value).is_gt(),
        Operator::Ge => same_type && compare(field, value).is_ge(),
        Operator::ArrayContains => field
            .as_array()
            .is_some_and(|items| items.iter().any(|item| equals(item, value))),
        Operator::ArrayContainsAny => field.as_array().is_some_and(|items| {
            items
                .iter()
                .any(|item| candidates.iter().any(|candidate| equals(item, candidate)))
        }),
        Operator::In => candidates.iter().any(|candidate| equals(field, candidate)),
        Operator::NotIn => {
            !field.is_null() && !candidates.iter().any(|candidate| equals(field, candidate))
        }
    }
}
