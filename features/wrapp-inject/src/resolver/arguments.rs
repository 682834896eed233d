use std::{any::type_name, sync::Arc};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    errors::ArgumentError,
    types::{Injectable, Instance, TypeInfo},
};

/// A single resolved parameter
#[derive(Debug, Clone)]
pub enum Argument {
    /// A resolved service
    Service(Instance),
    /// An optional service which has no declaration
    Absent,
    /// A raw config value
    Config(Value),
    /// An interpolated expression
    Text(String),
}

impl Argument {
    fn kind(&self) -> &'static str {
        match self {
            Argument::Service(_) => "service",
            Argument::Absent => "absent service",
            Argument::Config(_) => "config value",
            Argument::Text(_) => "expression",
        }
    }
}

/// Resolved parameters, in the order they were declared
///
/// Handed to factories on construction.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: Vec<Argument>,
}

impl Arguments {
    pub(crate) fn new(values: Vec<Argument>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Argument, ArgumentError> {
        self.values
            .get(index)
            .ok_or(ArgumentError::OutOfRange(index))
    }

    /// A required service parameter
    pub fn service<T: ?Sized + Injectable>(&self, index: usize) -> Result<Arc<T>, ArgumentError> {
        match self.get(index)? {
            Argument::Service(instance) => downcast(index, instance),
            other => Err(wrong_kind(index, "service", other)),
        }
    }

    /// An optional service parameter, `None` if nothing provides the type
    pub fn optional<T: ?Sized + Injectable>(
        &self,
        index: usize,
    ) -> Result<Option<Arc<T>>, ArgumentError> {
        match self.get(index)? {
            Argument::Service(instance) => downcast(index, instance).map(Some),
            Argument::Absent => Ok(None),
            other => Err(wrong_kind(index, "service", other)),
        }
    }

    /// A config parameter deserialized into `T`
    ///
    /// Expression parameters can be read this way as well, as a JSON string.
    pub fn config<T: DeserializeOwned>(&self, index: usize) -> Result<T, ArgumentError> {
        let deserialize_error = |e: serde_json::Error| ArgumentError::Deserialize {
            index,
            target: type_name::<T>(),
            message: e.to_string(),
        };

        match self.get(index)? {
            Argument::Config(value) => T::deserialize(value).map_err(deserialize_error),
            Argument::Text(text) => {
                T::deserialize(Value::String(text.clone())).map_err(deserialize_error)
            }
            other => Err(wrong_kind(index, "config value", other)),
        }
    }

    /// The raw value of a config parameter
    pub fn value(&self, index: usize) -> Result<&Value, ArgumentError> {
        match self.get(index)? {
            Argument::Config(value) => Ok(value),
            other => Err(wrong_kind(index, "config value", other)),
        }
    }

    /// The text of an expression parameter
    pub fn text(&self, index: usize) -> Result<&str, ArgumentError> {
        match self.get(index)? {
            Argument::Text(text) => Ok(text),
            other => Err(wrong_kind(index, "expression", other)),
        }
    }
}

fn downcast<T: ?Sized + Injectable>(
    index: usize,
    instance: &Instance,
) -> Result<Arc<T>, ArgumentError> {
    instance
        .downcast::<T>()
        .map_err(|actual_type| ArgumentError::DowncastFailed {
            index,
            required_type: TypeInfo::of::<T>().type_name,
            actual_type,
        })
}

fn wrong_kind(index: usize, expected: &'static str, actual: &Argument) -> ArgumentError {
    ArgumentError::WrongKind {
        index,
        expected,
        actual: actual.kind(),
    }
}
