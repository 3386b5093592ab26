use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Reduce `items` to one entry per key.
///
/// The last occurrence of a key wins but keeps the position of the first one.
/// Keyed items are then stably sorted with `compare` in `order`, and items
/// without a key follow in input order.
pub fn dedupe<T, K, C>(items: Vec<T>, key: K, compare: C, order: SortOrder) -> Vec<T>
where
    K: Fn(&T) -> Option<String>,
    C: Fn(&T, &T) -> Ordering,
{
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut keyed: Vec<T> = Vec::new();
    let mut unkeyed: Vec<T> = Vec::new();

    for item in items {
        let Some(item_key) = key(&item) else {
            unkeyed.push(item);
            continue;
        };
        match slots.entry(item_key) {
            Entry::Occupied(slot) => keyed[*slot.get()] = item,
            Entry::Vacant(slot) => {
                slot.insert(keyed.len());
                keyed.push(item);
            }
        }
    }

    keyed.sort_by(|a, b| match order {
        SortOrder::Ascending => compare(a, b),
        SortOrder::Descending => compare(b, a),
    });
    keyed.extend(unkeyed);
    keyed
}

/// Dedupe rule over JSON items, addressed by JSON pointers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupeRule {
    pub key: String,
    pub sort_by: String,
    pub order: SortOrder,
}

impl DedupeRule {
    pub fn new(key: impl Into<String>, sort_by: impl Into<String>, order: SortOrder) -> Self {
        Self {
            key: key.into(),
            sort_by: sort_by.into(),
            order,
        }
    }

    pub fn apply(&self, items: Vec<Value>) -> Vec<Value> {
        dedupe(
            items,
            |item| json_key(item, &self.key),
            |a, b| compare_json(a.pointer(&self.sort_by), b.pointer(&self.sort_by)),
            self.order,
        )
    }
}

/// String form of the value at `pointer`. Missing and null values have no key.
pub fn json_key(item: &Value, pointer: &str) -> Option<String> {
    match item.pointer(pointer)? {
        Value::Null => None,
        Value::String(value) => Some(value.clone()),
        other => Some(other.to_string()),
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Total order on optional JSON values: null < bool < number < string.
/// Arrays and objects sort after strings and compare equal among themselves.
pub fn compare_json(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            let a = a.as_f64().unwrap_or_default();
            let b = b.as_f64().unwrap_or_default();
            a.total_cmp(&b)
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
