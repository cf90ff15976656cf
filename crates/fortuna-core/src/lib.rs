//! # fortuna-core
//!
//! Platform-agnostic pieces shared by every fortuna crate.
//!
//! ## Modules
//!
//! - `error` - Error taxonomy (IOFailure, ValidationFailure, ProtocolFailure, ...)
//! - `env` - Environment variable helpers used by the configuration layer
//! - `config` - Server configuration with env overrides and builder methods
//! - `log` - `tracing` subscriber installation
//! - `date` - Lock-free cache of the HTTP `Date` header value

pub mod error;
pub mod env;
pub mod config;
pub mod log;
pub mod date;

// Re-exports for convenience
pub use error::{Error, Result};
pub use env::{env_get, env_get_bool, env_get_opt};
pub use config::ServerConfig;
pub use date::{DateCache, DateSnapshot, HTTP_DATE_LEN};
