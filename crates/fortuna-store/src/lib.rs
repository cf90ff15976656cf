//! # fortuna-store
//!
//! A tiny storage engine for one entity type. Every record occupies an
//! identically sized slot in a single backing file, so the position of a
//! record is `HEADER_SIZE + id * SLOT_SIZE` and a bulk read is one
//! sequential scan.
//!
//! ## Modules
//!
//! - `slot` - In-band `(offset, length)` string encoding inside a slot
//! - `record` - The `Record` trait and the `Fortune` entity
//! - `store` - `RecordStore`: open, drop, ID allocation, write, bulk read
//! - `fixtures` - Canonical fortune messages and store seeding
//!
//! ## File layout
//!
//! ```text
//! ┌──────────── header (64 B) ────────────┐┌── slot 0 ──┐┌── slot 1 ──┐ ...
//! │ magic │ version │ slot size │ next id ││ id │ str │ data[..] │
//! └───────────────────────────────────────┘└────────────┘└────────────┘
//! ```

pub mod slot;
pub mod record;
pub mod store;
pub mod fixtures;

pub use fortuna_core::{Error, Result};
pub use record::{Fortune, Record, MESSAGE_CAPACITY};
pub use slot::InlineStr;
pub use store::{RecordStore, FIRST_ID, HEADER_SIZE};
pub use fixtures::{seed, FORTUNES};
