//! Runtime dependency injection
//!
//! Declarations describe how each injectable is constructed, with which
//! lifetime and from which parameters. [`ContainerBuilder::build`] validates the
//! whole graph up front, so a container that builds can resolve every
//! declaration: unknown dependencies, missing config keys, cycles and
//! lifetime violations are all reported before anything is constructed.
//!
//! ```rust
//! use wrapp_config::ConfigStore;
//! use wrapp_inject::{ArgumentError, ContainerBuilder, InjectableDeclaration};
//!
//! struct Settings(String);
//! struct Session(std::sync::Arc<Settings>);
//!
//! let config: ConfigStore = [("x", 1), ("y", 2)].into_iter().collect();
//! let container = ContainerBuilder::new()
//!     .with_config(config)
//!     .register(
//!         InjectableDeclaration::singleton::<Settings>()
//!             .expression("${x}-${y}")
//!             .constructor(|args| {
//!                 Ok::<_, ArgumentError>(Settings(args.text(0)?.to_string()))
//!             }),
//!     )
//!     .register(
//!         InjectableDeclaration::scoped::<Session>()
//!             .depends_on::<Settings>()
//!             .constructor(|args| Ok::<_, ArgumentError>(Session(args.service(0)?))),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let scope = container.enter_scope();
//! let session = scope.get::<Session>().unwrap();
//! assert_eq!(session.0.0, "1-2");
//! scope.close().unwrap();
//! container.close().unwrap();
//! ```

pub mod builder;
pub mod container;
pub mod declaration;
pub mod dependency_graph;
pub mod errors;
pub mod factories;
pub mod generator;
mod lifecycle;
mod overrides;
pub mod registry;
pub mod resolver;
pub mod scope;
pub mod types;

pub use builder::ContainerBuilder;
pub use container::Container;
pub use declaration::{AbstractBinding, DeclarationBuilder, InjectableDeclaration, ParamSpec};
pub use dependency_graph::{DependencyGraph, GraphError, GraphErrors};
pub use errors::{
    ArgumentError, BuildError, CloseError, FactoryError, FactoryFailure, ResolveError,
};
pub use factories::Factory;
pub use generator::{AsyncResource, Resource};
pub use overrides::OverrideGuard;
pub use resolver::arguments::{Argument, Arguments};
pub use scope::{Scope, ScopeOptions};
pub use types::{DynError, Failure, Injectable, InjectionKey, Instance, Lifetime, Qualifier};
