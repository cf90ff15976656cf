//! Environment variable helpers
//!
//! Every tunable in [`ServerConfig`](crate::config::ServerConfig) can be
//! overridden from the environment. Values that fail to parse fall back to
//! the default instead of aborting startup.
//!
//! ```ignore
//! use fortuna_core::env::{env_get, env_get_bool};
//!
//! let workers: usize = env_get("FORTUNA_WORKERS", 4);
//! let signals = env_get_bool("FORTUNA_SIGNALS", true);
//! ```

use std::str::FromStr;

/// Parse `key` as `T`, or return `default` when unset or malformed.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T`. `None` when unset or malformed.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    let raw = std::env::var(key).ok()?;
    raw.trim().parse().ok()
}

/// Boolean flag: "1", "true", "yes", "on" are true, "0", "false", "no",
/// "off" are false (case-insensitive). Anything else keeps the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    let Ok(raw) = std::env::var(key) else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}
