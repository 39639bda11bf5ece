//! JSON object wrapper used for node payloads and node outputs.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Vars {
    inner: Map<String, Value>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed lookup; `None` when the key is absent or has another shape.
    pub fn get<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Option<T> {
        self.inner.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_value(
        &self,
        key: &str,
    ) -> Option<&Value> {
        self.inner.get(key)
    }

    /// Stores `value` under `key`. A value that cannot be represented as
    /// JSON is logged and leaves the key untouched.
    pub fn set<T: Serialize>(
        &mut self,
        key: &str,
        value: T,
    ) {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.inner.insert(key.to_string(), value);
            }
            Err(err) => tracing::warn!(key, error = %err, "value is not representable as json, not stored"),
        }
    }

    pub fn with<T: Serialize>(
        mut self,
        key: &str,
        value: T,
    ) -> Self {
        self.set(key, value);
        self
    }

    pub fn contains_key(
        &self,
        key: &str,
    ) -> bool {
        self.inner.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.inner.iter()
    }
}

impl From<Value> for Vars {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(inner) => Self {
                inner,
            },
            Value::Null => Self::new(),
            other => Self::new().with("value", other),
        }
    }
}

impl From<Vars> for Value {
    fn from(vars: Vars) -> Self {
        Value::Object(vars.inner)
    }
}
