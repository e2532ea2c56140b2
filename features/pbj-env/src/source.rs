use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// A snapshot of variables
///
/// Variables are captured once, later changes to the process environment are not seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSource {
    vars: BTreeMap<String, String>,
}

impl EnvSource {
    /// Captures the process environment
    pub fn from_env() -> Self {
        Self::from_pairs(std::env::vars())
    }

    /// Captures variables starting with `prefix`, the prefix is stripped from their names
    pub fn from_env_prefixed(prefix: &str) -> Self {
        Self::from_pairs(std::env::vars()).with_prefix(prefix)
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        EnvSource {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Keeps the variables starting with `prefix` and strips it
    pub fn with_prefix(self, prefix: &str) -> Self {
        EnvSource {
            vars: self
                .vars
                .into_iter()
                .filter_map(|(name, value)| {
                    name.strip_prefix(prefix)
                        .filter(|rest| !rest.is_empty())
                        .map(|rest| (rest.to_string(), value))
                })
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// The variables as a JSON object of strings
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.vars
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect::<Map<String, Value>>(),
        )
    }
}
