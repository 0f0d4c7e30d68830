//! Execution context carried with a case through its whole lifecycle.
//!
//! The context is an ordered key/value map. Merging follows two rules:
//! later writes win, and keys are never removed automatically. The
//! coordinator stamps the dispatching worker into it; the worker adds
//! whatever it learns while executing.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection identifier of the worker the case was last dispatched to.
pub const CTX_WORKER_CONNECTION_ID: &str = "worker.connection_id";

/// Network address of the worker the case was last dispatched to.
pub const CTX_WORKER_ADDRESS: &str = "worker.address";

/// Port of the worker the case was last dispatched to.
pub const CTX_WORKER_PORT: &str = "worker.port";

/// Dispatch attempt number (0 for the first dispatch).
pub const CTX_ATTEMPT: &str = "dispatch.attempt";

/// Last failure captured by the repair path, if any.
pub const CTX_LAST_FAILURE: &str = "repair.last_failure";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext(IndexMap<String, Value>);

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Insert or overwrite a key. An existing key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Merge `other` into `self`; values from `other` win on conflict.
    pub fn merge(&mut self, other: ExecutionContext) {
        for (key, value) in other.0 {
            self.0.insert(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ExecutionContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_later_writes_win() {
        let mut base: ExecutionContext = [("browser", "firefox"), ("locale", "en")]
            .into_iter()
            .collect();
        let update: ExecutionContext = [("browser", "chrome")].into_iter().collect();

        base.merge(update);

        assert_eq!(base.get("browser"), Some(&json!("chrome")));
        assert_eq!(base.get("locale"), Some(&json!("en")));
    }

    #[test]
    fn merge_never_removes_keys() {
        let mut base: ExecutionContext = [("a", 1), ("b", 2)].into_iter().collect();
        base.merge(ExecutionContext::new());
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn insertion_order_is_preserved_on_overwrite() {
        let mut ctx = ExecutionContext::new();
        ctx.insert("first", 1);
        ctx.insert("second", 2);
        ctx.insert("first", 3);

        let keys: Vec<&str> = ctx.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["first", "second"]);
        assert_eq!(ctx.get("first"), Some(&json!(3)));
    }

    #[test]
    fn serializes_as_plain_object() {
        let ctx: ExecutionContext = [("k", "v")].into_iter().collect();
        assert_eq!(serde_json::to_value(&ctx).unwrap(), json!({"k": "v"}));
    }
}
