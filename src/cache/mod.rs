//! # Cache Module
//!
//! Short-lived memoization of extraction results.
//!
//! Resolving a query through yt-dlp costs a process spawn and a network
//! round trip, and users tend to request the same handful of tracks in
//! bursts. [`TtlCache`] keeps the most recent results for a fixed
//! time-to-live so repeated queries skip the extraction pool entirely.
//!
//! ## Behaviour
//!
//! - **Bounded**: at most `CACHE_SIZE` entries; the oldest-inserted entry
//!   is evicted first
//! - **TTL**: entries older than `CACHE_TTL_SECS` are treated as absent
//!   and removed on lookup
//! - **Normalized keys**: `"  Lofi   Beats "` and `"lofi beats"` share an
//!   entry
//!
//! ```env
//! CACHE_SIZE=200
//! CACHE_TTL_SECS=300
//! ```

pub mod ttl_cache;

pub use ttl_cache::{cache_key, CacheMetrics, TtlCache};
