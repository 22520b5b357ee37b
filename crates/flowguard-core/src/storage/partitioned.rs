use core::fmt::Write;

use heapless::String as KeyString;
use log::{debug, error, warn};

use alloc::string::String;

use super::{KvBackend, StoreError};
use crate::config::{MAX_KEY_LEN, PARTITION_LIMIT};

/// Prefix of the record holding a key's partition count.
pub const PARTITION_COUNT_PREFIX: &str = "ps-";

type Key = KeyString<MAX_KEY_LEN>;

/// Key-value store that splits long values across fixed-size records.
///
/// ## Layout
///
/// For a key `k`:
///
/// | Record      | Contents                                      |
/// |-------------|-----------------------------------------------|
/// | `ps-k`      | partition count (short); 0 = stored unsplit  |
/// | `k`         | the value, when the count is 0                |
/// | `k-0`…`k-n` | consecutive partitions, when the count is n+1 |
///
/// Values shorter than the partition limit are stored unsplit. Longer values
/// are cut into partitions of exactly `limit` bytes (the last may be shorter),
/// never splitting a UTF-8 character.
pub struct PartitionedStore<B> {
    backend: B,
    limit: usize,
}

impl<B: KvBackend> PartitionedStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_limit(backend, PARTITION_LIMIT)
    }

    /// Use a partition size other than [`PARTITION_LIMIT`].
    ///
    /// Limits below four bytes are raised to four so any character fits.
    pub fn with_limit(backend: B, limit: usize) -> Self {
        Self {
            backend,
            limit: limit.max(4),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Store `value` under `key`, partitioning it if needed.
    ///
    /// Partitions are written before the count. An interrupted write over
    /// an unsplit value leaves that value readable; over a split value the
    /// old count may cover partitions that were already rewritten.
    pub fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let count_key = Self::count_key(key)?;

        if value.len() < self.limit {
            self.backend.put_raw(key, value)?;
            self.backend.put_short(&count_key, 0)?;
            debug!("Storage: stored '{}' unsplit ({} bytes)", key, value.len());
            return Ok(());
        }

        let mut count: usize = 0;
        let mut rest = value;
        while !rest.is_empty() {
            let (chunk, tail) = rest.split_at(self.chunk_end(rest));
            let chunk_key = Self::partition_key(key, count)?;
            self.backend.put_raw(&chunk_key, chunk).inspect_err(|e| {
                error!("Storage: failed to write partition '{}': {}", chunk_key, e);
            })?;
            count += 1;
            rest = tail;
        }

        let stored = i16::try_from(count).map_err(|_| StoreError::TooManyPartitions { count })?;
        self.backend.put_short(&count_key, stored)?;
        debug!(
            "Storage: stored '{}' in {} partitions ({} bytes)",
            key,
            count,
            value.len()
        );
        Ok(())
    }

    /// Read the value last stored under `key`.
    ///
    /// Missing records read back as empty: an absent key is "never
    /// configured", and an absent partition contributes nothing.
    pub fn get(&self, key: &str) -> String {
        let Ok(count_key) = Self::count_key(key) else {
            warn!("Storage: key '{}' is too long to have been stored", key);
            return String::new();
        };

        let count = self.backend.get_short(&count_key).unwrap_or(0);
        if count <= 0 {
            return self.backend.get_raw(key).unwrap_or_default();
        }

        let mut value = String::with_capacity(count as usize * self.limit);
        for index in 0..count as usize {
            let chunk = Self::partition_key(key, index)
                .ok()
                .and_then(|chunk_key| self.backend.get_raw(&chunk_key));
            match chunk {
                Some(chunk) => value.push_str(&chunk),
                None => warn!("Storage: partition {} of '{}' is missing", index, key),
            }
        }
        value
    }

    /// Byte offset where the next partition of `rest` ends.
    fn chunk_end(&self, rest: &str) -> usize {
        if rest.len() <= self.limit {
            return rest.len();
        }
        let mut end = self.limit;
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        end
    }

    fn count_key(key: &str) -> Result<Key, StoreError> {
        let mut out = Key::new();
        write!(out, "{}{}", PARTITION_COUNT_PREFIX, key).map_err(|_| StoreError::KeyTooLong {
            len: PARTITION_COUNT_PREFIX.len() + key.len(),
            max: MAX_KEY_LEN,
        })?;
        Ok(out)
    }

    fn partition_key(key: &str, index: usize) -> Result<Key, StoreError> {
        let mut out = Key::new();
        write!(out, "{}-{}", key, index).map_err(|_| StoreError::KeyTooLong {
            len: key.len() + 1 + decimal_len(index),
            max: MAX_KEY_LEN,
        })?;
        Ok(out)
    }
}

fn decimal_len(mut n: usize) -> usize {
    let mut len = 1;
    while n >= 10 {
        n /= 10;
        len += 1;
    }
    len
}
