use std::{any::type_name, collections::HashMap};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{errors::ConfigError, expression::Expression};

/// A flat registry of configuration values.
///
/// Values are addressed by string keys and may be anything `serde_json` can
/// represent, including structured objects which can be read back into typed
/// structs with [`ConfigStore::get_as`].
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    values: HashMap<String, Value>,
}

impl ConfigStore {
    /// Initializes an empty Config Store
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Builds a store from the entries of a JSON object
    ///
    /// Returns `None` if the given value is not an object.
    pub fn from_json_object(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self::from(map)),
            _ => None,
        }
    }

    /// Add a config value to the registry.
    ///
    /// If the key is already registered, it will return a [`ConfigError::AlreadyRegistered`]
    pub fn add_config(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<&mut Self, ConfigError> {
        let key = key.into();
        if self.values.contains_key(&key) {
            return Err(ConfigError::AlreadyRegistered(key));
        }

        tracing::trace!("Registered config key '{key}'");
        self.values.insert(key, value.into());
        Ok(self)
    }

    /// Can optionally add a config value to the registry.
    ///
    /// If the value provided is `Some(T)`, it will be the same as calling [`ConfigStore::add_config`]
    /// If the value provided is `None`, then the function just returns `Ok(self)` for chaining
    pub fn maybe_add_config(
        &mut self,
        key: impl Into<String>,
        value: Option<impl Into<Value>>,
    ) -> Result<&mut Self, ConfigError> {
        match value {
            Some(v) => self.add_config(key, v),
            None => Ok(self),
        }
    }

    /// Retrieve the raw value stored under `key`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Retrieve the value stored under `key`, deserialized into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))?;

        T::deserialize(value).map_err(|e| ConfigError::Deserialize {
            key: key.to_string(),
            target: type_name::<T>(),
            message: e.to_string(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parses `template` and replaces every `${key}` placeholder with the stringified value
    pub fn interpolate(&self, template: &str) -> Result<String, ConfigError> {
        Expression::parse(template)?.render(self)
    }
}

impl From<Map<String, Value>> for ConfigStore {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            values: map.into_iter().collect(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ConfigStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Database {
        host: String,
        port: u16,
    }

    #[rstest]
    fn add_config_rejects_duplicate_keys() {
        let mut store = ConfigStore::new();
        store.add_config("port", 8080).unwrap();

        let err = store.add_config("port", 9090).unwrap_err();

        assert_eq!(err, ConfigError::AlreadyRegistered("port".to_string()));
        assert_eq!(store.get("port"), Some(&json!(8080)));
    }

    #[rstest]
    fn maybe_add_config_skips_none() {
        let mut store = ConfigStore::new();
        store
            .maybe_add_config("a", Some("x"))
            .unwrap()
            .maybe_add_config("b", None::<String>)
            .unwrap();

        assert!(store.contains("a"));
        assert!(!store.contains("b"));
        assert_eq!(store.len(), 1);
    }

    #[rstest]
    fn get_as_reads_structured_values() {
        let store = ConfigStore::from_json_object(json!({
            "db": { "host": "localhost", "port": 5432 }
        }))
        .unwrap();

        let db: Database = store.get_as("db").unwrap();

        assert_eq!(
            db,
            Database {
                host: "localhost".to_string(),
                port: 5432
            }
        );
    }

    #[rstest]
    fn get_as_reports_missing_and_mismatched_keys() {
        let store: ConfigStore = [("port", "not a number")].into_iter().collect();

        assert_eq!(
            store.get_as::<u16>("missing").unwrap_err(),
            ConfigError::Missing("missing".to_string())
        );
        assert!(matches!(
            store.get_as::<u16>("port").unwrap_err(),
            ConfigError::Deserialize { .. }
        ));
    }

    #[rstest]
    fn from_json_object_requires_an_object() {
        assert!(ConfigStore::from_json_object(json!([1, 2])).is_none());
    }
}
