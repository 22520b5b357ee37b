use serde::{Deserialize, Serialize};

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use super::{KvBackend, StoreError};
use crate::config::MAX_KEY_LEN;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
enum StoredValue {
    Text(String),
    Short(i16),
}

/// RAM-backed store with the same record limits as flash.
///
/// Used by host tests and the simulator. The whole namespace can be exported
/// as a postcard image and loaded back, which is how the simulator keeps its
/// provisioned credentials across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryBackend {
    /// Largest string record accepted, in bytes. `None` means unlimited.
    record_limit: Option<usize>,
    entries: BTreeMap<String, StoredValue>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject string records longer than `limit` bytes, like flash does.
    pub fn with_record_limit(limit: usize) -> Self {
        Self {
            record_limit: Some(limit),
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Encode the namespace as a postcard image.
    pub fn to_image(&self) -> Result<Vec<u8>, StoreError> {
        postcard::to_allocvec(self).map_err(|_| StoreError::Image)
    }

    /// Rebuild a namespace from [`to_image`](Self::to_image) output.
    pub fn from_image(bytes: &[u8]) -> Result<Self, StoreError> {
        postcard::from_bytes(bytes).map_err(|_| StoreError::Image)
    }

    fn check_key(key: &str) -> Result<(), StoreError> {
        if key.len() > MAX_KEY_LEN {
            return Err(StoreError::KeyTooLong {
                len: key.len(),
                max: MAX_KEY_LEN,
            });
        }
        Ok(())
    }
}

impl KvBackend for MemoryBackend {
    fn get_raw(&self, key: &str) -> Option<String> {
        match self.entries.get(key) {
            Some(StoredValue::Text(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn put_raw(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        Self::check_key(key)?;
        if let Some(max) = self.record_limit {
            if value.len() > max {
                return Err(StoreError::ValueTooLong {
                    len: value.len(),
                    max,
                });
            }
        }

        self.entries
            .insert(key.to_string(), StoredValue::Text(value.to_string()));
        Ok(())
    }

    fn get_short(&self, key: &str) -> Option<i16> {
        match self.entries.get(key) {
            Some(StoredValue::Short(value)) => Some(*value),
            _ => None,
        }
    }

    fn put_short(&mut self, key: &str, value: i16) -> Result<(), StoreError> {
        Self::check_key(key)?;
        self.entries
            .insert(key.to_string(), StoredValue::Short(value));
        Ok(())
    }
}
