//! Render cache.
//!
//! Three process-wide memo caches back the dispatcher:
//!
//! - **render**: full engine output for a resource, engine, locale and query
//! - **include**: fragments produced when one resource embeds another
//! - **menu**: the "view as" entries offered for a resource
//!
//! Each cache deduplicates concurrent computations of the same key and can
//! additionally memoize values for the lifetime of a single request
//! ([`RequestScope`]).
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! render_limit = 500
//! include_limit = 500
//! menu_limit = 200
//! max_include_depth = 8
//! ```

mod config;
mod keys;
pub(crate) mod lock;
mod store;

pub use config::CacheConfig;
pub use keys::{
    CacheKey, CacheKeyBuilder, KeyKind, RESERVED_QUERY_KEYS, canonical_query, include_key,
    menu_key, parse_query, render_key,
};
pub use store::{CacheControl, CacheFlags, CacheStatus, MemoCache, RequestScope};
