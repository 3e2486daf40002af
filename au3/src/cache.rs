//! Memoization of function call results
//!
//! Entries are keyed by function identity; per function, an ordered
//! list of (argument vector, result) pairs is scanned linearly with
//! full value equality. There is no eviction: entries persist for the
//! process lifetime, so the cache grows with the number of distinct
//! call signatures seen.

use crate::error::FunctionReturnValue;
use crate::function::Function;
use crate::value::Variant;
use parking_lot::Mutex;
use std::collections::HashMap;

type CacheKey = (String, String);

fn cache_key(function: &Function) -> CacheKey {
    match function {
        Function::Script(f) => (
            f.script_path().display().to_string(),
            f.name().to_uppercase(),
        ),
        Function::Native(f) => ("<native>".to_string(), f.name().to_uppercase()),
    }
}

fn args_equal(a: &[Variant], b: &[Variant]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x.equals_case_sensitive(y))
}

/// Memoized call results for functions marked as cached.
pub struct FunctionCache {
    cache: Mutex<HashMap<CacheKey, Vec<(Vec<Variant>, FunctionReturnValue)>>>,
}

impl FunctionCache {
    pub fn new() -> Self {
        FunctionCache {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Record a result for the given argument vector. An entry with a
    /// fully value-equal argument vector is overwritten; otherwise a
    /// new entry is appended.
    pub fn set_or_update(&self, function: &Function, args: &[Variant], result: FunctionReturnValue) {
        let mut cache = self.cache.lock();
        let entries = cache.entry(cache_key(function)).or_default();
        for entry in entries.iter_mut() {
            if args_equal(&entry.0, args) {
                log::debug!("cache update: {}({} args)", function.name(), args.len());
                entry.1 = result;
                return;
            }
        }
        log::debug!("new cache entry: {}({} args)", function.name(), args.len());
        entries.push((args.to_vec(), result));
    }

    /// Look up a previously recorded result by full sequential value
    /// equality of the argument vector.
    pub fn try_fetch(&self, function: &Function, args: &[Variant]) -> Option<FunctionReturnValue> {
        let cache = self.cache.lock();
        if let Some(entries) = cache.get(&cache_key(function)) {
            for (cached_args, result) in entries {
                if args_equal(cached_args, args) {
                    log::debug!("cache hit: {}({} args)", function.name(), args.len());
                    return Some(result.clone());
                }
            }
        }
        log::debug!("cache miss: {}({} args)", function.name(), args.len());
        None
    }

    /// Total number of cached entries across all functions.
    pub fn entry_count(&self) -> usize {
        self.cache.lock().values().map(Vec::len).sum()
    }
}

impl Default for FunctionCache {
    fn default() -> Self {
        FunctionCache::new()
    }
}
