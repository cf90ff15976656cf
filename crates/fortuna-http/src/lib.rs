//! # fortuna-http
//!
//! Event-driven HTTP/1.1 server over [`fortuna_event`] readiness queues.
//!
//! ## Architecture
//!
//! ```text
//!             ┌──────────── acceptor thread ─────────────┐
//!  SIGINT ───►│ ReadinessQueue: listener, tick, signals, │
//!  SIGTERM    │                 shutdown notifier        │
//!             └──┬───────────────────┬───────────────────┘
//!                │ Conn (moved)      │ DateCache::update
//!                ▼                   ▼
//!   ┌─ worker 0 ─────────┐   ┌─ worker N-1 ───────┐
//!   │ inbox + notifier   │...│ inbox + notifier   │  Arc<DateCache>::current
//!   │ ReadinessQueue     │   │ ReadinessQueue     │  Arc<RecordStore>::read_many
//!   │ ConnSlab, Router   │   │ ConnSlab, Router   │
//!   └────────────────────┘   └────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `parser` - Zero-copy, pipelining-aware request parser
//! - `response` - Status codes, response serialization, HTML escaping
//! - `router` - `/plaintext` and `/fortunes` handlers
//! - `server` - `Server` and `ShutdownHandle`

mod acceptor;
mod conn;
mod worker;

pub mod parser;
pub mod response;
pub mod router;
pub mod server;

pub use parser::{parse, parse_request, Request};
pub use response::{Response, Status};
pub use router::Router;
pub use server::{Server, ShutdownHandle};
