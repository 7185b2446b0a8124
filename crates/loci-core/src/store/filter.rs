//! Payload filter expressions.
//!
//! A filter is a conjunction of per-field predicates, evaluated against the
//! JSON payload of a point. Field names may use dotted paths to reach into
//! nested objects (`metadata.embedding_is_fallback`).

use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};
use crate::memory::Payload;

/// A single field predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Scalar equality, including booleans.
    Eq(Value),
    /// Membership in a list of values.
    In(Vec<Value>),
    /// Range over numbers or (lexicographically) strings.
    Range {
        gte: Option<Value>,
        lte: Option<Value>,
        gt: Option<Value>,
        lt: Option<Value>,
    },
    /// Substring match on string fields.
    Contains(String),
    /// Negated equality.
    Not(Value),
}

/// Conjunction of field predicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: BTreeMap<String, Predicate>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Add an equality condition; builder-style.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(field.into(), Predicate::Eq(value.into()));
        self
    }

    pub fn with(mut self, field: impl Into<String>, predicate: Predicate) -> Self {
        self.conditions.insert(field.into(), predicate);
        self
    }

    /// Merge another filter in; its conditions win on key collision.
    pub fn merge(mut self, other: Filter) -> Self {
        self.conditions.extend(other.conditions);
        self
    }

    /// Parse the wire form: a mapping of field to predicate, where a
    /// predicate is a scalar, a list, or one of the `{in}`, `{gte/lte/gt/lt}`,
    /// `{contains}`, `{not}` objects.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| CoreError::validation("filters", "must be an object"))?;

        let mut filter = Filter::new();
        for (field, spec) in object {
            let predicate = match spec {
                Value::Object(map) => {
                    if let Some(list) = map.get("in") {
                        let items = list.as_array().ok_or_else(|| {
                            CoreError::validation(field.clone(), "'in' takes a list")
                        })?;
                        Predicate::In(items.clone())
                    } else if let Some(needle) = map.get("contains") {
                        let text = needle.as_str().ok_or_else(|| {
                            CoreError::validation(field.clone(), "'contains' takes a string")
                        })?;
                        Predicate::Contains(text.to_string())
                    } else if let Some(v) = map.get("not") {
                        Predicate::Not(v.clone())
                    } else if ["gte", "lte", "gt", "lt"].iter().any(|k| map.contains_key(*k)) {
                        Predicate::Range {
                            gte: map.get("gte").cloned(),
                            lte: map.get("lte").cloned(),
                            gt: map.get("gt").cloned(),
                            lt: map.get("lt").cloned(),
                        }
                    } else {
                        return Err(CoreError::validation(
                            field.clone(),
                            "unknown predicate object",
                        ));
                    }
                }
                Value::Array(items) => Predicate::In(items.clone()),
                scalar => Predicate::Eq(scalar.clone()),
            };
            filter.conditions.insert(field.clone(), predicate);
        }
        Ok(filter)
    }

    /// Evaluate against a payload. All conditions must hold.
    pub fn matches(&self, payload: &Payload) -> bool {
        self.conditions.iter().all(|(field, predicate)| {
            let value = lookup_path(payload, field);
            predicate_matches(predicate, value)
        })
    }
}

/// Resolve a dotted path against a payload; absent segments yield `None`.
fn lookup_path<'a>(payload: &'a Payload, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = payload.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn predicate_matches(predicate: &Predicate, value: Option<&Value>) -> bool {
    match predicate {
        Predicate::Eq(expected) => value.map(|v| values_equal(v, expected)).unwrap_or(false),
        Predicate::In(items) => value
            .map(|v| items.iter().any(|item| values_equal(v, item)))
            .unwrap_or(false),
        Predicate::Not(excluded) => value.map(|v| !values_equal(v, excluded)).unwrap_or(true),
        Predicate::Contains(needle) => value
            .and_then(Value::as_str)
            .map(|haystack| haystack.contains(needle.as_str()))
            .unwrap_or(false),
        Predicate::Range { gte, lte, gt, lt } => {
            use std::cmp::Ordering;
            let Some(actual) = value else { return false };
            let check = |bound: &Option<Value>, ok: fn(Ordering) -> bool| match bound {
                None => true,
                Some(bound) => compare_values(actual, bound).map(ok).unwrap_or(false),
            };
            check(gte, |o| o != Ordering::Less)
                && check(lte, |o| o != Ordering::Greater)
                && check(gt, |o| o == Ordering::Greater)
                && check(lt, |o| o == Ordering::Less)
        }
    }
}

/// Equality with numeric coercion (1 == 1.0).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering for range checks: numbers numerically, strings lexically
/// (covers RFC 3339 timestamps).
fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_equality_and_bool() {
        let filter = Filter::new().eq("deleted", false).eq("language", "python");
        assert!(filter.matches(&payload(json!({"deleted": false, "language": "python"}))));
        assert!(!filter.matches(&payload(json!({"deleted": true, "language": "python"}))));
        assert!(!filter.matches(&payload(json!({"language": "python"}))));
    }

    #[test]
    fn test_in_membership() {
        let filter =
            Filter::from_json(&json!({"status": {"in": ["Draft", "Approved"]}})).unwrap();
        assert!(filter.matches(&payload(json!({"status": "Draft"}))));
        assert!(!filter.matches(&payload(json!({"status": "Deprecated"}))));
    }

    #[test]
    fn test_range_on_timestamps() {
        let filter = Filter::from_json(&json!({
            "created_at": {"gte": "2026-01-01T00:00:00Z", "lte": "2026-12-31T23:59:59Z"}
        }))
        .unwrap();
        assert!(filter.matches(&payload(json!({"created_at": "2026-06-15T12:00:00Z"}))));
        assert!(!filter.matches(&payload(json!({"created_at": "2025-06-15T12:00:00Z"}))));
    }

    #[test]
    fn test_range_numeric() {
        let filter = Filter::from_json(&json!({"importance_score": {"gt": 0.5}})).unwrap();
        assert!(filter.matches(&payload(json!({"importance_score": 0.8}))));
        assert!(!filter.matches(&payload(json!({"importance_score": 0.5}))));
    }

    #[test]
    fn test_contains() {
        let filter = Filter::from_json(&json!({"content": {"contains": "auth"}})).unwrap();
        assert!(filter.matches(&payload(json!({"content": "authenticate requests"}))));
        assert!(!filter.matches(&payload(json!({"content": "parse users"}))));
        assert!(!filter.matches(&payload(json!({"content": 42}))));
    }

    #[test]
    fn test_not() {
        let filter = Filter::from_json(&json!({"source": {"not": "indexer"}})).unwrap();
        assert!(filter.matches(&payload(json!({"source": "manual"}))));
        // Absent field is not equal to the excluded value.
        assert!(filter.matches(&payload(json!({}))));
        assert!(!filter.matches(&payload(json!({"source": "indexer"}))));
    }

    #[test]
    fn test_dotted_path() {
        let filter = Filter::new().eq("metadata.embedding_is_fallback", true);
        assert!(filter.matches(&payload(json!({"metadata": {"embedding_is_fallback": true}}))));
        assert!(!filter.matches(&payload(json!({"metadata": {}}))));
    }

    #[test]
    fn test_numeric_coercion() {
        let filter = Filter::new().eq("access_count", 3);
        assert!(filter.matches(&payload(json!({"access_count": 3.0}))));
    }

    #[test]
    fn test_merge_conjunction() {
        let base = Filter::new().eq("deleted", false);
        let merged = base.merge(Filter::new().eq("language", "rust"));
        assert!(merged.matches(&payload(json!({"deleted": false, "language": "rust"}))));
        assert!(!merged.matches(&payload(json!({"deleted": false, "language": "go"}))));
    }
}
