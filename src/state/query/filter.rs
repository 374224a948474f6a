use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Predicate over an entity's serialized fields. Field names may be dotted paths
/// (`user.name`) reaching into nested objects.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    #[default]
    All,
    Equal { field: String, value: Value },
    NotEqual { field: String, value: Value },
    Greater { field: String, value: Value },
    GreaterOrEqual { field: String, value: Value },
    Less { field: String, value: Value },
    LessOrEqual { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    NotIn { field: String, values: Vec<Value> },
    /// Array membership, or substring for string fields.
    Contains { field: String, value: Value },
    /// Case-insensitive prefix match against any word of a string field.
    Autocomplete { field: String, prefix: String },
    Exists { field: String, exists: bool },
    And { filters: Vec<Filter> },
    Or { filters: Vec<Filter> },
    Nor { filters: Vec<Filter> },
}

impl Filter {
    pub fn equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Equal {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn not_equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::NotEqual {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn greater(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Greater {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn greater_or_equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::GreaterOrEqual {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn less(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Less {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn less_or_equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::LessOrEqual {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn not_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::NotIn {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn autocomplete(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Filter::Autocomplete {
            field: field.into(),
            prefix: prefix.into(),
        }
    }

    pub fn exists(field: impl Into<String>, exists: bool) -> Self {
        Filter::Exists {
            field: field.into(),
            exists,
        }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And { filters }
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or { filters }
    }

    pub fn nor(filters: Vec<Filter>) -> Self {
        Filter::Nor { filters }
    }

    /// Evaluates the filter against a serialized entity.
    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Equal { field, value } => {
                lookup(record, field).is_some_and(|found| equals_or_contains(found, value))
            }
            Filter::NotEqual { field, value } => {
                !lookup(record, field).is_some_and(|found| equals_or_contains(found, value))
            }
            Filter::Greater { field, value } => compares(record, field, value, |o| o.is_gt()),
            Filter::GreaterOrEqual { field, value } => {
                compares(record, field, value, |o| o.is_ge())
            }
            Filter::Less { field, value } => compares(record, field, value, |o| o.is_lt()),
            Filter::LessOrEqual { field, value } => compares(record, field, value, |o| o.is_le()),
            Filter::In { field, values } => lookup(record, field)
                .is_some_and(|found| values.iter().any(|value| equals_or_contains(found, value))),
            Filter::NotIn { field, values } => !lookup(record, field)
                .is_some_and(|found| values.iter().any(|value| equals_or_contains(found, value))),
            Filter::Contains { field, value } => match (lookup(record, field), value) {
                (Some(Value::Array(items)), _) => items.iter().any(|item| values_equal(item, value)),
                (Some(Value::String(text)), Value::String(needle)) => text.contains(needle.as_str()),
                _ => false,
            },
            Filter::Autocomplete { field, prefix } => match lookup(record, field) {
                Some(Value::String(text)) => autocompletes(text, prefix),
                _ => false,
            },
            Filter::Exists { field, exists } => {
                let present = lookup(record, field).is_some_and(|found| !found.is_null());
                present == *exists
            }
            Filter::And { filters } => filters.iter().all(|filter| filter.matches(record)),
            Filter::Or { filters } => filters.iter().any(|filter| filter.matches(record)),
            Filter::Nor { filters } => !filters.iter().any(|filter| filter.matches(record)),
        }
    }

    /// Serializes `entity` and evaluates the filter; unserializable values never match.
    pub fn matches_entity<T: Serialize>(&self, entity: &T) -> bool {
        match self {
            Filter::All => true,
            _ => serde_json::to_value(entity).is_ok_and(|record| self.matches(&record)),
        }
    }
}

fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |current, segment| current.as_object()?.get(segment))
}

fn compares(record: &Value, field: &str, value: &Value, accept: fn(Ordering) -> bool) -> bool {
    lookup(record, field)
        .and_then(|found| compare_values(found, value))
        .is_some_and(accept)
}

fn compare_values(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(_), Value::Number(_)) => compare_values(lhs, rhs) == Some(Ordering::Equal),
        _ => lhs == rhs,
    }
}

fn equals_or_contains(found: &Value, value: &Value) -> bool {
    match found {
        Value::Array(items) if !value.is_array() => {
            items.iter().any(|item| values_equal(item, value))
        }
        _ => values_equal(found, value),
    }
}

fn autocompletes(text: &str, prefix: &str) -> bool {
    let prefix = prefix.to_lowercase();
    if prefix.is_empty() {
        return true;
    }
    let text = text.to_lowercase();
    text.starts_with(&prefix) || text.split_whitespace().any(|word| word.starts_with(&prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Value {
        json!({
            "cid": "messaging:general",
            "name": "General Chat",
            "member_count": 12,
            "member_ids": ["u1", "u2"],
            "is_hidden": false,
            "team": null,
            "user": { "name": "Ada Lovelace" }
        })
    }

    #[test]
    fn comparison_operators() {
        let record = record();
        assert!(Filter::equal("cid", "messaging:general").matches(&record));
        assert!(Filter::greater("member_count", 10).matches(&record));
        assert!(Filter::less_or_equal("member_count", 12.0).matches(&record));
        assert!(!Filter::less("member_count", 12).matches(&record));
        assert!(Filter::not_equal("missing", 1).matches(&record));
        assert!(!Filter::greater("missing", 1).matches(&record));
    }

    #[test]
    fn array_fields_match_any_element() {
        let record = record();
        assert!(Filter::is_in("member_ids", ["u2", "u9"]).matches(&record));
        assert!(Filter::equal("member_ids", "u1").matches(&record));
        assert!(Filter::contains("member_ids", "u1").matches(&record));
        assert!(Filter::not_in("member_ids", ["u7"]).matches(&record));
        assert!(!Filter::contains("member_ids", "u3").matches(&record));
    }

    #[test]
    fn string_operators_and_dotted_paths() {
        let record = record();
        assert!(Filter::contains("name", "Chat").matches(&record));
        assert!(Filter::autocomplete("name", "cha").matches(&record));
        assert!(Filter::autocomplete("user.name", "LOVE").matches(&record));
        assert!(!Filter::autocomplete("name", "xyz").matches(&record));
        assert!(!Filter::exists("team", true).matches(&record));
        assert!(Filter::exists("user.name", true).matches(&record));
    }

    #[test]
    fn logical_operators() {
        let record = record();
        let hidden = Filter::equal("is_hidden", true);
        let big = Filter::greater_or_equal("member_count", 12);
        assert!(Filter::and(vec![big.clone(), Filter::All]).matches(&record));
        assert!(Filter::or(vec![hidden.clone(), big.clone()]).matches(&record));
        assert!(Filter::nor(vec![hidden.clone()]).matches(&record));
        assert!(!Filter::and(vec![hidden, big]).matches(&record));
    }

    #[test]
    fn filters_are_serializable() {
        let filter = Filter::and(vec![
            Filter::equal("type", "messaging"),
            Filter::is_in("members", ["u1"]),
        ]);
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["op"], "and");
        let decoded: Filter = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, filter);
    }
}
