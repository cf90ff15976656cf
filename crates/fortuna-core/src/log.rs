//! Logging setup
//!
//! All crates log through `tracing`. The binary installs a fmt subscriber
//! whose filter comes from `FORTUNA_LOG` (same syntax as `RUST_LOG`, e.g.
//! `FORTUNA_LOG=fortuna_http=debug,info`).

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "FORTUNA_LOG";

/// Install the global subscriber. `default_directives` applies when
/// `FORTUNA_LOG` is unset or invalid. Calling it twice is harmless.
pub fn init(default_directives: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init("off");
        init("debug");
        tracing::info!(check = 1, "subscriber installed");
    }
}
