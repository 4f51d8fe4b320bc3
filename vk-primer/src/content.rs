// Copyright (c) 2024 The vk-primer developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Content-addressed storage for the byte payloads of priming commands.
//!
//! Texel data can be large, and the same payload is frequently uploaded more than once (for
//! example every layer of a cleared array image). Commands therefore never carry bytes directly;
//! they carry a [`HashedData`], a small value that names a blob in a [`ContentStore`].

use crate::DeviceSize;
use foldhash::HashMap;
use parking_lot::Mutex;
use std::{fmt, sync::Arc};
use twox_hash::XxHash3_64;

/// An immutable reference to a blob in a [`ContentStore`].
///
/// Two `HashedData` compare equal when they name the same content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashedData {
    hash: u64,
    size: DeviceSize,
}

impl HashedData {
    /// Computes the identity of `data` without storing it.
    #[inline]
    pub fn of(data: &[u8]) -> Self {
        HashedData {
            hash: XxHash3_64::oneshot(data),
            size: data.len() as DeviceSize,
        }
    }

    /// Returns the content hash.
    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Returns the size of the content in bytes.
    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }
}

impl fmt::Debug for HashedData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashedData({:016x}, {} bytes)", self.hash, self.size)
    }
}

/// A deduplicating, content-addressed blob store.
///
/// The store only grows. It can be shared between several state builders.
#[derive(Debug, Default)]
pub struct ContentStore {
    blobs: Mutex<HashMap<HashedData, Arc<[u8]>>>,
}

impl ContentStore {
    /// Creates an empty store.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a copy of `data` and returns its identity. Storing the same content twice keeps a
    /// single copy.
    pub fn store(&self, data: &[u8]) -> HashedData {
        let id = HashedData::of(data);
        self.blobs
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::from(data));

        id
    }

    /// Like [`store`](Self::store), but takes ownership of the buffer.
    pub fn store_vec(&self, data: Vec<u8>) -> HashedData {
        let id = HashedData::of(&data);
        self.blobs
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::from(data));

        id
    }

    /// Returns the content named by `id`, or `None` if it was never stored here.
    pub fn load(&self, id: &HashedData) -> Option<Arc<[u8]>> {
        self.blobs.lock().get(id).cloned()
    }

    /// Returns whether the content named by `id` is present.
    pub fn contains(&self, id: &HashedData) -> bool {
        self.blobs.lock().contains_key(id)
    }

    /// Returns the number of distinct blobs.
    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    /// Returns the total number of bytes held by the store.
    pub fn total_size(&self) -> DeviceSize {
        self.blobs.lock().keys().map(HashedData::size).sum()
    }
}
