//! Response caching subsystem.
//!
//! # Data Flow
//! ```text
//! before_request:
//!     → key.rs (derive key from method, URL, params, significant headers)
//!     → store.rs lookup → hit: short-circuit with cached response
//! after_response:
//!     → cacheable method + status, no `no-store` → store.rs insert
//!         → purge expired, then evict LRU tenth when full
//! ```
//!
//! # Design Decisions
//! - One mutex per cache; entry count never exceeds `max_size`
//! - Expiry is lazy: entries are checked on access and on full inserts
//! - Eviction is batched to amortize the sort over many inserts

pub mod key;
pub mod store;

pub use key::{cache_key, CacheKey};
pub use store::{CacheEntry, CacheStats, ResponseCache};
