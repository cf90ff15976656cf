//! Canonical fortune messages and store seeding.

use fortuna_core::Result;

use crate::record::Fortune;
use crate::store::RecordStore;

/// The twelve messages every fresh server starts with. Two of them carry
/// markup or non-ASCII text to exercise escaping and UTF-8 handling.
pub const FORTUNES: [&str; 12] = [
    "fortune: No such file or directory",
    "A computer scientist is someone who fixes things that aren't broken.",
    "After enough decimal places, nobody gives a damn.",
    "A bad random number generator: 1, 1, 1, 1, 1, 4.33e+67, 1, 1, 1",
    "A computer program does what you tell it to do, not what you want it to do.",
    "Emacs is a nice operating system, but I prefer UNIX. — Tom Christaensen",
    "Any program that runs right is obsolete.",
    "A list is only as strong as its weakest link. — Donald Knuth",
    "Feature: A bug with seniority.",
    "Computers make very fast, very accurate mistakes.",
    "<script>alert(\"This should not be displayed in a browser alert box.\");</script>",
    "フレームワークのベンチマーク",
];

/// Replace the store's contents with `messages`, one record each, in order.
/// Returns the number of records written.
pub fn seed(store: &RecordStore<Fortune>, messages: &[&str]) -> Result<usize> {
    store.drop_all()?;
    for (i, &message) in messages.iter().enumerate() {
        let id = store.increment_next_id()?;
        store.write(id, message).map_err(|e| {
            tracing::error!(index = i, error = %e, "failed to seed fortune");
            e
        })?;
    }
    tracing::info!(count = messages.len(), path = %store.path().display(), "store seeded");
    Ok(messages.len())
}
