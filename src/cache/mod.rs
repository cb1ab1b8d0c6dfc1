//! Keyed response cache with stale-while-revalidate semantics.
//!
//! The cache serves three freshness tiers: fresh (age below the stale
//! threshold), stale-but-valid (served immediately while a background
//! refresh runs), and expired (only returned as a fallback when the
//! upstream is slow or failing). Concurrent demand for one key is
//! coalesced onto a single upstream call.
//!
//! Entries are immutable snapshots replaced wholesale; an entry becomes
//! observable only after the response passes validation.

mod engine;
mod entry;
mod validation;

pub use engine::{CacheEngine, CachePolicy, REFRESH_QUEUE_DEPTH};
pub use entry::{CacheEntry, KeyCounters, DURATION_RING_SIZE};
pub use validation::{ResponseValidator, MIN_CSV_COMMAS};
