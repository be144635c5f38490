//! PropertyMap — the key-value bag on nodes and relationships.

use std::collections::HashMap;

use super::Value;

/// A map of property names to values. Also the parameter map type for
/// query execution.
pub type PropertyMap = HashMap<String, Value>;

/// Build a `Value::Map` from (key, value) pairs.
impl<K, V> From<Vec<(K, V)>> for Value
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from(pairs: Vec<(K, V)>) -> Self {
        Value::Map(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
