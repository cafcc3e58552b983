use serde_json::Value;
use std::collections::BTreeMap;

/// Untyped execution context: a flat map of dotted keys to JSON values,
/// shared by reference within a single run and deep-cloned at parallel
/// branch boundaries (see `handlers::parallel`).
pub type RuntimeContext = BTreeMap<String, Value>;
