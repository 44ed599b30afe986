//! In-memory evaluation of filters.
//!
//! Evaluation follows SQL three-valued logic: a comparison involving a
//! missing or null value is unknown, and unknown records don't match.
//! Bounding boxes are compared against the record geometry's envelope in
//! the record's own CRS; no reprojection happens here.

use crate::ast::{CompareOp, Filter, Literal};
use regex::RegexBuilder;
use serde_json::Value;
use std::cmp::Ordering;
use tessera_core::{BoundingBox, Record};

impl Filter {
    /// Whether `record` satisfies the filter.
    pub fn matches(&self, record: &Record) -> bool {
        self.evaluate(record) == Some(true)
    }

    /// Three-valued result, `None` meaning unknown.
    pub fn evaluate(&self, record: &Record) -> Option<bool> {
        match self {
            Filter::Include => Some(true),
            Filter::Exclude => Some(false),
            Filter::And(items) => {
                let mut result = Some(true);
                for item in items {
                    match item.evaluate(record) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Filter::Or(items) => {
                let mut result = Some(false);
                for item in items {
                    match item.evaluate(record) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            Filter::Not(inner) => inner.evaluate(record).map(|b| !b),
            Filter::Compare {
                property,
                op,
                value,
            } => {
                let ordering = compare(lookup(record, property), value)?;
                Some(match op {
                    CompareOp::Eq => ordering == Ordering::Equal,
                    CompareOp::NotEq => ordering != Ordering::Equal,
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::LtEq => ordering != Ordering::Greater,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    CompareOp::GtEq => ordering != Ordering::Less,
                })
            }
            Filter::Like {
                property,
                pattern,
                case_insensitive,
                negated,
            } => {
                let text = lookup(record, property).as_str()?;
                let regex = RegexBuilder::new(&like_to_regex(pattern))
                    .case_insensitive(*case_insensitive)
                    .dot_matches_new_line(true)
                    .build()
                    .ok()?;
                Some(regex.is_match(text) != *negated)
            }
            Filter::In {
                property,
                values,
                negated,
            } => {
                let value = lookup(record, property);
                let mut result = Some(false);
                for candidate in values {
                    match compare(value, candidate) {
                        Some(Ordering::Equal) => {
                            result = Some(true);
                            break;
                        }
                        None => result = None,
                        Some(_) => {}
                    }
                }
                result.map(|found| found != *negated)
            }
            Filter::Between {
                property,
                low,
                high,
                negated,
            } => {
                let value = lookup(record, property);
                let inside = compare(value, low)? != Ordering::Less
                    && compare(value, high)? != Ordering::Greater;
                Some(inside != *negated)
            }
            Filter::IsNull { property, negated } => {
                Some(lookup(record, property).is_null() != *negated)
            }
            Filter::Ids(ids) => Some(ids.iter().any(|id| *id == record.id)),
            Filter::Bbox { bbox, .. } => {
                let envelope = BoundingBox::of_geojson(record.geometry.as_ref()?)?;
                Some(envelope.intersects(bbox))
            }
        }
    }
}

fn lookup<'a>(record: &'a Record, property: &str) -> &'a Value {
    record.properties.get(property).unwrap_or(&Value::Null)
}

fn compare(value: &Value, literal: &Literal) -> Option<Ordering> {
    match (value, literal) {
        (Value::Null, _) | (_, Literal::Null) => None,
        (Value::Bool(a), Literal::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(n), Literal::Integer(i)) => match n.as_i64() {
            Some(a) => Some(a.cmp(i)),
            None => n.as_f64()?.partial_cmp(&(*i as f64)),
        },
        (Value::Number(n), Literal::Float(x)) => n.as_f64()?.partial_cmp(x),
        (Value::String(s), Literal::Text(t)) => Some(s.as_str().cmp(t.as_str())),
        _ => None,
    }
}

/// Translate a SQL LIKE pattern (`%`, `_`, `\` escape) into an anchored regex.
fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    regex.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    regex
}
