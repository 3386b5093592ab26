use serde_json::Value;

/// Per-item reshaping applied before dedupe and persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemTransform {
    project: Option<String>,
    strip: Vec<String>,
}

impl ItemTransform {
    pub fn identity() -> Self {
        Self::default()
    }

    /// Replace each item with the value at `pointer` (null when missing).
    pub fn project(pointer: impl Into<String>) -> Self {
        Self {
            project: Some(pointer.into()),
            strip: Vec::new(),
        }
    }

    /// Remove `field` from every object at any depth.
    pub fn strip(mut self, field: impl Into<String>) -> Self {
        self.strip.push(field.into());
        self
    }

    pub fn apply(&self, mut item: Value) -> Value {
        let mut value = match &self.project {
            Some(pointer) => item.pointer_mut(pointer).map(Value::take).unwrap_or_default(),
            None => item,
        };
        for field in &self.strip {
            strip_field(&mut value, field);
        }
        value
    }
}

fn strip_field(value: &mut Value, field: &str) {
    match value {
        Value::Object(map) => {
            map.remove(field);
            for child in map.values_mut() {
                strip_field(child, field);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_field(item, field);
            }
        }
        _ => {}
    }
}
