//! # Date header cache
//!
//! Every response carries a `Date` header. Formatting it per request is
//! wasted work, so the acceptor formats it once per tick and publishes the
//! result as an immutable [`DateSnapshot`]. Workers grab the current
//! snapshot once per event batch.
//!
//! Publication replaces the whole `Arc` ([`ArcSwap::store`]); a snapshot is
//! never mutated after creation, so a reader sees either the previous or the
//! new value and never a mix of both.
//!
//! ```text
//!  acceptor (single writer)          workers (many readers)
//!  ────────────────────────          ──────────────────────
//!  tick → format → Arc::new ──swap──▶ load_full() → &[u8]
//! ```

use std::sync::Arc;

use arc_swap::ArcSwap;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::{Error, Result};

/// Length of an IMF-fixdate such as `Sun, 06 Nov 1994 08:49:37 GMT`.
pub const HTTP_DATE_LEN: usize = 29;

/// One formatted timestamp. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateSnapshot {
    unix: i64,
    text: String,
}

impl DateSnapshot {
    /// Format `unix` (seconds since the epoch, UTC) as an HTTP date.
    pub fn from_unix(unix: i64) -> Result<Self> {
        let dt = OffsetDateTime::from_unix_timestamp(unix)
            .map_err(|e| Error::DateFormat(e.to_string()))?;
        let text = dt
            .format(format_description!(
                "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
            ))
            .map_err(|e| Error::DateFormat(e.to_string()))?;
        Ok(Self { unix, text })
    }

    /// Seconds since the epoch this snapshot was formatted from.
    #[inline]
    pub fn unix(&self) -> i64 {
        self.unix
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }
}

/// Single-writer / multi-reader cache of the current HTTP date.
pub struct DateCache {
    current: ArcSwap<DateSnapshot>,
}

impl DateCache {
    /// Cache primed with `now`.
    pub fn new(now: i64) -> Result<Self> {
        Ok(Self {
            current: ArcSwap::from_pointee(DateSnapshot::from_unix(now)?),
        })
    }

    /// Cache primed with the wall clock.
    pub fn from_system_clock() -> Result<Self> {
        Self::new(unix_now())
    }

    /// Format `now` and publish it. Only the acceptor thread calls this.
    pub fn update(&self, now: i64) -> Result<()> {
        let snapshot = DateSnapshot::from_unix(now)?;
        self.current.store(Arc::new(snapshot));
        Ok(())
    }

    /// Latest published snapshot. Never blocks.
    #[inline]
    pub fn current(&self) -> Arc<DateSnapshot> {
        self.current.load_full()
    }
}

/// Wall clock in whole seconds since the epoch.
pub fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_epoch_format() {
        let s = DateSnapshot::from_unix(0).unwrap();
        assert_eq!(s.as_str(), "Thu, 01 Jan 1970 00:00:00 GMT");
        assert_eq!(s.as_bytes().len(), HTTP_DATE_LEN);
    }

    #[test]
    fn test_known_timestamp() {
        // RFC 9110 example date
        let s = DateSnapshot::from_unix(784_111_777).unwrap();
        assert_eq!(s.as_str(), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(s.unix(), 784_111_777);
    }

    #[test]
    fn test_update_replaces_snapshot() {
        let cache = DateCache::new(0).unwrap();
        let before = cache.current();
        cache.update(86_400).unwrap();
        let after = cache.current();
        assert_eq!(before.as_str(), "Thu, 01 Jan 1970 00:00:00 GMT");
        assert_eq!(after.as_str(), "Fri, 02 Jan 1970 00:00:00 GMT");
    }

    #[test]
    fn test_out_of_range_timestamp_fails() {
        assert!(matches!(
            DateSnapshot::from_unix(i64::MAX),
            Err(Error::DateFormat(_))
        ));
        let cache = DateCache::new(10).unwrap();
        assert!(cache.update(i64::MAX).is_err());
        assert_eq!(cache.current().unix(), 10);
    }

    #[test]
    fn test_concurrent_readers_never_see_partial_values() {
        const START: i64 = 1_700_000_000;
        const TICKS: i64 = 2_000;

        let cache = Arc::new(DateCache::new(START).unwrap());
        let published: Arc<HashSet<String>> = Arc::new(
            (START..=START + TICKS)
                .map(|t| DateSnapshot::from_unix(t).unwrap().as_str().to_owned())
                .collect(),
        );
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let published = Arc::clone(&published);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut samples = 0u64;
                    while !done.load(Ordering::Acquire) {
                        let snap = cache.current();
                        assert!(
                            published.contains(snap.as_str()),
                            "torn value {:?}",
                            snap.as_str()
                        );
                        samples += 1;
                    }
                    samples
                })
            })
            .collect();

        for t in START + 1..=START + TICKS {
            cache.update(t).unwrap();
        }
        done.store(true, Ordering::Release);

        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(cache.current().unix(), START + TICKS);
    }
}
