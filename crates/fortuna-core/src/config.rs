//! Server configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Command-line flags (applied by the binary through the builder methods)
//! 2. Environment variables
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use fortuna_core::config::ServerConfig;
//!
//! let config = ServerConfig::from_env()
//!     .num_workers(2)
//!     .handle_signals(false);
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::env::{env_get, env_get_bool};

/// Library defaults.
pub mod defaults {
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

    pub const PORT: u16 = 7073;
    pub const BACKLOG: i32 = 128;
    pub const INPUT_BUFFER_SIZE: usize = 1024;
    pub const OUTPUT_LIMIT: usize = 64 * 1024;
    pub const EVENT_CAPACITY: usize = 64;
    pub const BATCH_SIZE: usize = 32;
    pub const TICK_MS: u64 = 1000;
    pub const STORE_PATH: &str = "Fortunes.db";
    pub const LISTING_CAP: usize = 12;
    pub const HANDLE_SIGNALS: bool = true;

    pub fn listen() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, PORT))
    }

    /// Half the available processors, at least one.
    pub fn num_workers() -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        (cpus / 2).max(1)
    }
}

/// Server configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listening address
    pub listen: SocketAddr,
    /// Number of worker event loops
    pub num_workers: usize,
    /// Listen backlog
    pub backlog: i32,
    /// Per-connection input buffer; a request head must fit in it
    pub input_buffer_size: usize,
    /// Pending output above which pipelined parsing pauses
    pub output_limit: usize,
    /// Readiness events fetched per wait
    pub event_capacity: usize,
    /// Requests routed before the output buffer is flushed
    pub batch_size: usize,
    /// Date cache refresh period
    pub tick: Duration,
    /// Record store backing file
    pub store_path: PathBuf,
    /// Maximum stored records rendered by the listing handler
    pub listing_cap: usize,
    /// Route SIGINT/SIGTERM into the acceptor's queue
    pub handle_signals: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConfig {
    /// Library defaults, no environment lookups.
    pub fn new() -> Self {
        Self {
            listen: defaults::listen(),
            num_workers: defaults::num_workers(),
            backlog: defaults::BACKLOG,
            input_buffer_size: defaults::INPUT_BUFFER_SIZE,
            output_limit: defaults::OUTPUT_LIMIT,
            event_capacity: defaults::EVENT_CAPACITY,
            batch_size: defaults::BATCH_SIZE,
            tick: Duration::from_millis(defaults::TICK_MS),
            store_path: PathBuf::from(defaults::STORE_PATH),
            listing_cap: defaults::LISTING_CAP,
            handle_signals: defaults::HANDLE_SIGNALS,
        }
    }

    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `FORTUNA_LISTEN` - listening address, e.g. `127.0.0.1:8080`
    /// - `FORTUNA_WORKERS` - worker event loops
    /// - `FORTUNA_BACKLOG` - listen backlog
    /// - `FORTUNA_INPUT_BUFFER` - per-connection input buffer in bytes
    /// - `FORTUNA_OUTPUT_LIMIT` - pending output before parsing pauses
    /// - `FORTUNA_EVENT_CAPACITY` - events per wait
    /// - `FORTUNA_BATCH_SIZE` - requests routed per flush
    /// - `FORTUNA_TICK_MS` - date cache refresh period
    /// - `FORTUNA_STORE` - record store path
    /// - `FORTUNA_LISTING_CAP` - records rendered by `/fortunes`
    /// - `FORTUNA_SIGNALS` - handle SIGINT/SIGTERM (0/1)
    pub fn from_env() -> Self {
        let base = Self::new();
        Self {
            listen: env_get("FORTUNA_LISTEN", base.listen),
            num_workers: env_get("FORTUNA_WORKERS", base.num_workers),
            backlog: env_get("FORTUNA_BACKLOG", base.backlog),
            input_buffer_size: env_get("FORTUNA_INPUT_BUFFER", base.input_buffer_size),
            output_limit: env_get("FORTUNA_OUTPUT_LIMIT", base.output_limit),
            event_capacity: env_get("FORTUNA_EVENT_CAPACITY", base.event_capacity),
            batch_size: env_get("FORTUNA_BATCH_SIZE", base.batch_size),
            tick: Duration::from_millis(env_get("FORTUNA_TICK_MS", defaults::TICK_MS)),
            store_path: env_get("FORTUNA_STORE", base.store_path),
            listing_cap: env_get("FORTUNA_LISTING_CAP", base.listing_cap),
            handle_signals: env_get_bool("FORTUNA_SIGNALS", base.handle_signals),
        }
        .normalized()
    }

    /// Clamp values that would make the event loops degenerate.
    pub fn normalized(mut self) -> Self {
        self.num_workers = self.num_workers.max(1);
        self.input_buffer_size = self.input_buffer_size.max(64);
        self.event_capacity = self.event_capacity.max(1);
        self.batch_size = self.batch_size.max(1);
        self.listing_cap = self.listing_cap.max(1);
        self.output_limit = self.output_limit.max(self.input_buffer_size);
        if self.tick.is_zero() {
            self.tick = Duration::from_millis(defaults::TICK_MS);
        }
        self
    }

    // Builder methods

    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.listen = addr;
        self
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n.max(1);
        self
    }

    pub fn backlog(mut self, n: i32) -> Self {
        self.backlog = n;
        self
    }

    pub fn input_buffer_size(mut self, size: usize) -> Self {
        self.input_buffer_size = size;
        self
    }

    pub fn output_limit(mut self, size: usize) -> Self {
        self.output_limit = size;
        self
    }

    pub fn event_capacity(mut self, n: usize) -> Self {
        self.event_capacity = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn tick(mut self, d: Duration) -> Self {
        self.tick = d;
        self
    }

    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    pub fn listing_cap(mut self, n: usize) -> Self {
        self.listing_cap = n;
        self
    }

    pub fn handle_signals(mut self, enable: bool) -> Self {
        self.handle_signals = enable;
        self
    }
}
