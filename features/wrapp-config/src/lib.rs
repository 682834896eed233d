//! Wrapp Config provides the flat key/value registry consulted while resolving
//! injectables.
//!
//! Wrapp Config is split into two major parts:
//! 1. ConfigStore: Used to register and read configuration values by key
//! 2. Expression: `${key}` templates which are interpolated against a store
//!
//! # Examples
//!
//! ```rust
//! use wrapp_config::store::ConfigStore;
//!
//! let mut store = ConfigStore::new();
//! store
//!     .add_config("host", "localhost")
//!     .unwrap()
//!     .add_config("port", 8080)
//!     .unwrap();
//!
//! assert_eq!(store.get_as::<u16>("port").unwrap(), 8080);
//! assert_eq!(store.interpolate("${host}:${port}").unwrap(), "localhost:8080");
//! ```

pub mod errors;
pub mod expression;
pub mod store;

pub use errors::ConfigError;
pub use expression::Expression;
pub use store::ConfigStore;
