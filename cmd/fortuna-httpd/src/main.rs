//! fortuna-httpd
//!
//! Serves `/plaintext` and `/fortunes` from a fixed-slot record store that is
//! reseeded with the canonical fortunes at startup.
//!
//! Usage:
//!     fortuna-httpd [--listen 0.0.0.0:7073] [--workers N] [--store Fortunes.db]
//!
//! Every flag can also be set through its `FORTUNA_*` environment variable;
//! flags win. Log filtering follows `FORTUNA_LOG` (e.g. `FORTUNA_LOG=debug`).
//!
//! Benchmark:
//!     wrk -t4 -c256 -d10s http://127.0.0.1:7073/fortunes

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use fortuna_core::{Result, ServerConfig};
use fortuna_http::Server;
use fortuna_store::{seed, Fortune, RecordStore, FORTUNES};

#[derive(Debug, Parser)]
#[command(name = "fortuna-httpd", version, about = "Fortunes HTTP/1.1 server")]
struct Args {
    /// Listening address [env: FORTUNA_LISTEN] [default: 0.0.0.0:7073]
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Worker event loops [env: FORTUNA_WORKERS] [default: half the CPUs]
    #[arg(short, long)]
    workers: Option<usize>,

    /// Listen backlog [env: FORTUNA_BACKLOG]
    #[arg(long)]
    backlog: Option<i32>,

    /// Per-connection input buffer in bytes [env: FORTUNA_INPUT_BUFFER]
    #[arg(long)]
    input_buffer: Option<usize>,

    /// Pending output that pauses pipelined parsing [env: FORTUNA_OUTPUT_LIMIT]
    #[arg(long)]
    output_limit: Option<usize>,

    /// Requests routed per flush [env: FORTUNA_BATCH_SIZE]
    #[arg(long)]
    batch_size: Option<usize>,

    /// Date refresh period in milliseconds [env: FORTUNA_TICK_MS]
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Record store file [env: FORTUNA_STORE] [default: Fortunes.db]
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Stored fortunes rendered per listing [env: FORTUNA_LISTING_CAP]
    #[arg(long)]
    listing_cap: Option<usize>,

    /// Leave SIGINT/SIGTERM to their default action
    #[arg(long)]
    no_signals: bool,

    /// Serve the store as found instead of reseeding it
    #[arg(long)]
    no_seed: bool,
}

impl Args {
    fn apply(&self, mut config: ServerConfig) -> ServerConfig {
        if let Some(addr) = self.listen {
            config = config.listen(addr);
        }
        if let Some(n) = self.workers {
            config = config.num_workers(n);
        }
        if let Some(n) = self.backlog {
            config = config.backlog(n);
        }
        if let Some(n) = self.input_buffer {
            config = config.input_buffer_size(n);
        }
        if let Some(n) = self.output_limit {
            config = config.output_limit(n);
        }
        if let Some(n) = self.batch_size {
            config = config.batch_size(n);
        }
        if let Some(ms) = self.tick_ms {
            config = config.tick(Duration::from_millis(ms));
        }
        if let Some(path) = &self.store {
            config = config.store_path(path.clone());
        }
        if let Some(n) = self.listing_cap {
            config = config.listing_cap(n);
        }
        if self.no_signals {
            config = config.handle_signals(false);
        }
        config.normalized()
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    fortuna_core::log::init("info");

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let config = args.apply(ServerConfig::from_env());
    tracing::debug!(?config, "configuration");

    let store: RecordStore<Fortune> = RecordStore::open(&config.store_path)?;
    if !args.no_seed {
        seed(&store, &FORTUNES)?;
    }
    let store = Arc::new(store);

    let server = Server::bind(config, Arc::clone(&store))?;
    server.run()?;

    match Arc::try_unwrap(store) {
        Ok(store) => store.close()?,
        Err(_) => tracing::warn!("record store still shared at exit"),
    }
    Ok(())
}
