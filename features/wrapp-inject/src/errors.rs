use std::{fmt, sync::Arc};

use thiserror::Error;
use wrapp_config::ConfigError;

use crate::{
    dependency_graph::GraphErrors,
    types::{DynError, Failure, InjectionKey, Lifetime},
};

/// Errors while building the container
#[derive(Error, Debug, Clone)]
pub enum BuildError {
    /// There are issues with the dependency graph
    #[error(transparent)]
    Graph(#[from] GraphErrors),
}

/// Errors when trying to resolve an instance
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    /// The requested key has no declaration, override or binding
    #[error("'{0}' is not known to the container")]
    UnknownInjectable(InjectionKey),
    /// The requested abstract type has several implementations and no qualifier was given
    #[error("'{key}' has {candidates} implementations, a qualifier is required")]
    Ambiguous {
        key: InjectionKey,
        candidates: usize,
    },
    /// Scoped and transient instances can only be created inside a scope
    #[error("'{key}' is {lifetime} and can only be resolved inside a scope")]
    ScopeRequired {
        key: InjectionKey,
        lifetime: Lifetime,
    },
    /// The scope was already closed
    #[error("Scope {0} is closed")]
    ScopeClosed(u64),
    /// The container was already closed
    #[error("The container is closed")]
    ContainerClosed,
    #[error("Failed to downcast, required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        required_type: &'static str,
        actual_type: &'static str,
    },
    /// A config or expression parameter could not be read
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A factory failed
    #[error(transparent)]
    Factory(#[from] FactoryError),
}

/// A factory failed to construct or tear down an instance
#[derive(Error, Debug, Clone)]
#[error("Factory for '{key}' failed: {kind}")]
pub struct FactoryError {
    pub key: InjectionKey,
    #[source]
    pub kind: FactoryFailure,
}

impl FactoryError {
    pub(crate) fn new(key: &InjectionKey, kind: FactoryFailure) -> Self {
        Self {
            key: key.clone(),
            kind,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum FactoryFailure {
    /// The factory returned an error during construction
    #[error("construction failed - error: {0}")]
    Failed(Failure),
    /// A generator completed without yielding a value
    #[error("generator completed without yielding a value")]
    DidNotYield,
    /// A generator yielded again instead of completing its teardown
    #[error("generator yielded more than once")]
    YieldedTwice,
    /// The teardown of a generator returned an error
    #[error("teardown failed - error: {0}")]
    TeardownFailed(Failure),
    /// An async factory was reached from a synchronous call
    #[error("async factory used from a synchronous context")]
    AsyncInSyncContext,
}

impl FactoryFailure {
    pub(crate) fn failed(error: DynError) -> Self {
        Self::Failed(Arc::from(error))
    }

    pub(crate) fn teardown(error: DynError) -> Self {
        Self::TeardownFailed(Arc::from(error))
    }
}

/// Closing a scope or container failed
///
/// If the unit of work had failed, `original` holds that failure. It stays the
/// primary error, teardown failures are only attached to it.
#[derive(Error, Debug, Clone)]
pub struct CloseError {
    #[source]
    pub original: Option<Failure>,
    pub teardown_errors: Vec<FactoryError>,
}

impl CloseError {
    pub(crate) fn check(
        original: Option<Failure>,
        teardown_errors: Vec<FactoryError>,
    ) -> Result<(), Self> {
        if original.is_none() && teardown_errors.is_empty() {
            return Ok(());
        }
        Err(Self {
            original,
            teardown_errors,
        })
    }
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut display = Vec::new();
        match &self.original {
            Some(original) => display.push(format!("Unit of work failed: {original}")),
            None => display.push("Teardown failed:".to_string()),
        }
        for error in &self.teardown_errors {
            display.push(format!("- {error}"));
        }
        f.write_str(&display.join("\n"))
    }
}

/// A factory read one of its arguments as the wrong kind of value
#[derive(Error, Debug, Clone)]
pub enum ArgumentError {
    #[error("No argument at position {0}")]
    OutOfRange(usize),
    #[error("Argument {index} is a {actual}, not a {expected}")]
    WrongKind {
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("Argument {index} could not be downcast to '{required_type}', it is '{actual_type}'")]
    DowncastFailed {
        index: usize,
        required_type: &'static str,
        actual_type: &'static str,
    },
    #[error("Argument {index} could not be read as '{target}': {message}")]
    Deserialize {
        index: usize,
        target: &'static str,
        message: String,
    },
}
