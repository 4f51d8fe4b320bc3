// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use foldhash::HashMap;
use std::{borrow::Borrow, hash::Hash};

/// A map of objects that are created on first access and then only looked up.
///
/// The values are handles, so they are returned by copy. The cache never destroys anything;
/// whoever fills it is responsible for registering the created objects for destruction.
#[derive(Debug)]
pub(crate) struct KitCache<K, V> {
    inner: HashMap<K, V>,
}

impl<K, V> Default for KitCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> KitCache<K, V> {
    /// Creates a new `KitCache`.
    pub fn new() -> Self {
        Self {
            inner: HashMap::default(),
        }
    }
}

impl<K, V> KitCache<K, V>
where
    K: Eq + Hash,
    V: Copy,
{
    /// Returns the value for the specified `key`, if it exists.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.get(key).copied()
    }

    /// Returns the value for the specified `key`. The entry gets written to with the value
    /// returned by `f` if it doesn't exist. If `f` returns [`Err`], the error is propagated and
    /// the entry isn't written to.
    pub fn get_or_try_insert<E>(&mut self, key: K, f: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = f()?;
        self.inner.insert(key, value);

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_once() {
        let mut cache = KitCache::new();
        let mut calls = 0;

        for _ in 0..3 {
            let value = cache
                .get_or_try_insert((1u32, 2u32), || {
                    calls += 1;
                    Ok::<_, ()>(42u64)
                })
                .unwrap();
            assert_eq!(value, 42);
        }

        assert_eq!(calls, 1);
        assert_eq!(cache.get(&(1, 2)), Some(42));
        assert_eq!(cache.get(&(2, 1)), None);
    }

    #[test]
    fn errors_leave_the_entry_vacant() {
        let mut cache: KitCache<u32, u64> = KitCache::new();

        assert_eq!(cache.get_or_try_insert(7, || Err("nope")), Err("nope"));
        assert!(cache.get(&7).is_none());
        assert_eq!(cache.get_or_try_insert(7, || Ok::<_, &str>(1)), Ok(1));
    }
}
