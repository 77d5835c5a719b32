//! Multi-key child ordering.
//!
//! Models declare how their children are ordered with a comma-separated list
//! of field names, each optionally prefixed with `-` for descending order:
//!
//! ```toml
//! [children]
//! order_by = "-pub_date, title"
//! ```
//!
//! Sorting coerces each value according to the field's declared type before
//! comparing: dates compare as calendar dates, integers and floats as numbers,
//! booleans as booleans, everything else as case-sensitive strings. Keys apply
//! left to right and the sort is stable, so records whose keys all compare
//! equal keep their incoming (id) order.
//!
//! A missing value sorts before every present value regardless of direction.
//! Children that only carry content in some alts therefore still order
//! deterministically in every alt.

use crate::model::FieldType;
use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ascending,
    Descending,
}

/// One `(field, direction)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

/// Parsed ordering declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderSpec {
    keys: Vec<SortKey>,
}

impl OrderSpec {
    /// Parse an `order_by` declaration. Empty entries are ignored.
    pub fn parse(spec: &str) -> Self {
        let keys = spec
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|item| {
                let (field, direction) = match item.strip_prefix('-') {
                    Some(rest) => (rest.trim(), Direction::Descending),
                    None => (item, Direction::Ascending),
                };
                (!field.is_empty()).then(|| SortKey {
                    field: field.to_string(),
                    direction,
                })
            })
            .collect();
        Self { keys }
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Stable sort of `items`.
    ///
    /// `field_type` maps a field name to its declared type; `value` fetches a
    /// field's raw value from an item.
    pub fn sort<T>(
        &self,
        items: Vec<T>,
        field_type: impl Fn(&str) -> FieldType,
        value: impl Fn(&T, &str) -> Option<String>,
    ) -> Vec<T> {
        if self.keys.is_empty() {
            return items;
        }
        let types: Vec<FieldType> = self.keys.iter().map(|k| field_type(&k.field)).collect();
        let mut keyed: Vec<(Vec<SortValue>, T)> = items
            .into_iter()
            .map(|item| {
                let values = self
                    .keys
                    .iter()
                    .zip(&types)
                    .map(|(key, ty)| SortValue::coerce(value(&item, &key.field).as_deref(), *ty))
                    .collect();
                (values, item)
            })
            .collect();
        keyed.sort_by(|(a, _), (b, _)| self.compare(a, b));
        keyed.into_iter().map(|(_, item)| item).collect()
    }

    fn compare(&self, a: &[SortValue], b: &[SortValue]) -> Ordering {
        for ((key, va), vb) in self.keys.iter().zip(a).zip(b) {
            let ord = match (va, vb) {
                (SortValue::Missing, SortValue::Missing) => Ordering::Equal,
                (SortValue::Missing, _) => Ordering::Less,
                (_, SortValue::Missing) => Ordering::Greater,
                _ => match key.direction {
                    Direction::Ascending => va.cmp(vb),
                    Direction::Descending => vb.cmp(va),
                },
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for OrderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .keys
            .iter()
            .map(|k| match k.direction {
                Direction::Ascending => k.field.clone(),
                Direction::Descending => format!("-{}", k.field),
            })
            .collect();
        f.write_str(&parts.join(", "))
    }
}

impl Serialize for OrderSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A field value coerced for comparison.
///
/// Variants are ranked in declaration order, so values that failed to coerce
/// (falling back to text) still compare deterministically against coerced
/// ones.
#[derive(Debug, Clone, PartialEq)]
enum SortValue {
    Missing,
    Bool(bool),
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl SortValue {
    fn coerce(raw: Option<&str>, ty: FieldType) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::Missing;
        };
        match ty {
            FieldType::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(Self::Date)
                .unwrap_or_else(|_| Self::Text(raw.to_string())),
            FieldType::Integer | FieldType::Float => raw
                .parse::<f64>()
                .map(Self::Number)
                .unwrap_or_else(|_| Self::Text(raw.to_string())),
            FieldType::Boolean => match parse_bool(raw) {
                Some(b) => Self::Bool(b),
                None => Self::Text(raw.to_string()),
            },
            _ => Self::Text(raw.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Missing => 0,
            Self::Bool(_) => 1,
            Self::Number(_) => 2,
            Self::Date(_) => 3,
            Self::Text(_) => 4,
        }
    }

    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Interpret the usual spellings of a boolean field value.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Some(true),
        "no" | "false" | "0" | "off" => Some(false),
        _ => None,
    }
}
