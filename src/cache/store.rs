//! Fetch-or-compute memo cache.
//!
//! Completed values live in an LRU store. Computations in progress are tracked
//! in an in-flight table of `OnceCell`s, so concurrent callers asking for the
//! same key block on a single computation instead of repeating it.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use lru::LruCache;
use metrics::counter;
use once_cell::sync::OnceCell;
use tracing::debug;

use super::keys::CacheKey;
use super::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "cache::store";

const METRIC_HIT: &str = "folio_render_cache_hit_total";
const METRIC_MISS: &str = "folio_render_cache_miss_total";
const METRIC_EVICT: &str = "folio_render_cache_evict_total";
const METRIC_BYPASS: &str = "folio_render_cache_bypass_total";

/// Per-call caching instructions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheFlags {
    /// Recompute and overwrite whatever is stored.
    pub bypass: bool,
    /// Memoize the value in the request scope so repeated lookups within the
    /// same request never recompute.
    pub deferred: bool,
    /// The caller already runs inside a computation of this cache. Nested
    /// lookups skip the in-flight table so a thread never waits on one cell
    /// while holding another.
    pub nested: bool,
}

/// How a value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the process-wide store.
    Hit,
    /// Computed by this call.
    Miss,
    /// Computed by a concurrent caller and shared with this one.
    Shared,
    /// Already materialized earlier in the same request.
    Deferred,
    /// Recomputed because the caller asked to bypass the cache.
    Bypass,
    /// Caching is switched off; computed unconditionally.
    Disabled,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Shared => "shared",
            CacheStatus::Deferred => "deferred",
            CacheStatus::Bypass => "bypass",
            CacheStatus::Disabled => "disabled",
        }
    }
}

/// Side channel handed to a computation.
#[derive(Debug)]
pub struct CacheControl {
    persist: bool,
}

impl CacheControl {
    fn new() -> Self {
        Self { persist: true }
    }

    /// Do not keep the value being computed; the next lookup recomputes.
    pub fn disable(&mut self) {
        self.persist = false;
    }

    pub fn is_disabled(&self) -> bool {
        !self.persist
    }
}

/// Values materialized during one request.
#[derive(Default)]
pub struct RequestScope {
    values: Mutex<HashMap<CacheKey, Arc<dyn Any + Send + Sync>>>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<V: Clone + 'static>(&self, key: &CacheKey) -> Option<V> {
        mutex_lock(&self.values, SOURCE, "scope_get")
            .get(key)
            .and_then(|value| value.downcast_ref::<V>())
            .cloned()
    }

    pub fn put<V: Clone + Send + Sync + 'static>(&self, key: CacheKey, value: V) {
        mutex_lock(&self.values, SOURCE, "scope_put").insert(key, Arc::new(value));
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.values, SOURCE, "scope_len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("values", &self.len())
            .finish()
    }
}

#[derive(Clone)]
struct Computed<V> {
    value: V,
    persist: bool,
}

/// Process-wide memo cache for one kind of value.
pub struct MemoCache<V> {
    name: &'static str,
    enabled: bool,
    entries: RwLock<LruCache<CacheKey, V>>,
    in_flight: DashMap<CacheKey, Arc<OnceCell<Computed<V>>>>,
}

impl<V> MemoCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, capacity: std::num::NonZeroUsize, enabled: bool) -> Self {
        Self {
            name,
            enabled,
            entries: RwLock::new(LruCache::new(capacity)),
            in_flight: DashMap::new(),
        }
    }

    /// Return the value stored under `key`, computing it at most once.
    ///
    /// `compute` runs only on a miss, on bypass, or when caching is disabled.
    /// It may call [`CacheControl::disable`] to keep its result out of both
    /// the process store and the request scope. Errors from `compute` are
    /// returned unchanged and nothing is stored.
    pub fn fetch_or_compute<E, F>(
        &self,
        key: &CacheKey,
        flags: CacheFlags,
        scope: Option<&RequestScope>,
        compute: F,
    ) -> Result<(V, CacheStatus), E>
    where
        F: FnOnce(&mut CacheControl) -> Result<V, E>,
    {
        if !self.enabled {
            let mut control = CacheControl::new();
            return compute(&mut control).map(|value| (value, CacheStatus::Disabled));
        }

        let scope = scope.filter(|_| flags.deferred);
        if let Some(value) = scope.and_then(|scope| scope.get::<V>(key)) {
            debug!(cache = self.name, %key, outcome = "deferred", "reusing request value");
            return Ok((value, CacheStatus::Deferred));
        }

        let (computed, status) = if flags.bypass {
            counter!(METRIC_BYPASS, "cache" => self.name).increment(1);
            let mut control = CacheControl::new();
            let value = compute(&mut control)?;
            if control.persist {
                self.store(key, value.clone());
            } else {
                self.invalidate(key);
            }
            let computed = Computed {
                value,
                persist: control.persist,
            };
            (computed, CacheStatus::Bypass)
        } else if let Some(value) = self.get(key) {
            counter!(METRIC_HIT, "cache" => self.name).increment(1);
            debug!(cache = self.name, %key, outcome = "hit", "cache hit");
            (
                Computed {
                    value,
                    persist: true,
                },
                CacheStatus::Hit,
            )
        } else if flags.nested {
            counter!(METRIC_MISS, "cache" => self.name).increment(1);
            let mut control = CacheControl::new();
            let value = compute(&mut control)?;
            if control.persist {
                self.store(key, value.clone());
            }
            let computed = Computed {
                value,
                persist: control.persist,
            };
            (computed, CacheStatus::Miss)
        } else {
            self.compute_shared(key, compute)?
        };

        if computed.persist {
            if let Some(scope) = scope {
                scope.put(key.clone(), computed.value.clone());
            }
        }

        Ok((computed.value, status))
    }

    fn compute_shared<E, F>(&self, key: &CacheKey, compute: F) -> Result<(Computed<V>, CacheStatus), E>
    where
        F: FnOnce(&mut CacheControl) -> Result<V, E>,
    {
        let cell = Arc::clone(
            self.in_flight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        );

        let mut owner = false;
        let result = cell.get_or_try_init(|| {
            owner = true;
            counter!(METRIC_MISS, "cache" => self.name).increment(1);
            debug!(cache = self.name, %key, outcome = "miss", "computing value");
            let mut control = CacheControl::new();
            let value = compute(&mut control)?;
            Ok(Computed {
                value,
                persist: control.persist,
            })
        });

        let computed = match result {
            Ok(computed) => computed.clone(),
            Err(err) => {
                self.in_flight
                    .remove_if(key, |_, current| Arc::ptr_eq(current, &cell));
                return Err(err);
            }
        };

        if !owner {
            return Ok((computed, CacheStatus::Shared));
        }

        if computed.persist {
            self.store(key, computed.value.clone());
        } else {
            debug!(cache = self.name, %key, "persistence disabled by computation");
        }
        self.in_flight
            .remove_if(key, |_, current| Arc::ptr_eq(current, &cell));

        Ok((computed, CacheStatus::Miss))
    }

    fn store(&self, key: &CacheKey, value: V) {
        let evicted = rw_write(&self.entries, SOURCE, "store").push(key.clone(), value);
        if let Some((evicted_key, _)) = evicted {
            if evicted_key != *key {
                counter!(METRIC_EVICT, "cache" => self.name).increment(1);
            }
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        rw_write(&self.entries, SOURCE, "get").get(key).cloned()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        rw_read(&self.entries, SOURCE, "contains").contains(key)
    }

    pub fn invalidate(&self, key: &CacheKey) {
        rw_write(&self.entries, SOURCE, "invalidate").pop(key);
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
