//! Persistent key-value storage
//!
//! The device keeps its settings in a namespaced key-value store (NVS on the
//! ESP32). Records there have a small size ceiling, so anything that might be
//! longer goes through [`PartitionedStore`], which splits values into
//! fixed-size partitions and reassembles them on read.
//!
//! Backends only need to provide the four primitive operations of
//! [`KvBackend`]. Reads never fail: a missing key reads back as `None` and is
//! mapped to a default by the caller, since "never configured" is a normal
//! first-boot state.

mod memory;
mod partitioned;

pub use memory::*;
pub use partitioned::*;

use thiserror_no_std::Error;

use alloc::string::String;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Key is {len} bytes, limit is {max}")]
    KeyTooLong { len: usize, max: usize },
    #[error("Value is {len} bytes, record limit is {max}")]
    ValueTooLong { len: usize, max: usize },
    #[error("Value needs {count} partitions, more than a count record can hold")]
    TooManyPartitions { count: usize },
    #[error("Backend write failed: {0}")]
    Backend(&'static str),
    #[error("Storage image could not be encoded or decoded")]
    Image,
}

/// Primitive operations of a namespaced key-value store.
///
/// String records may be size-limited by the backend; small integers are
/// used for bookkeeping such as partition counts.
pub trait KvBackend {
    fn get_raw(&self, key: &str) -> Option<String>;

    fn put_raw(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    fn get_short(&self, key: &str) -> Option<i16>;

    fn put_short(&mut self, key: &str, value: i16) -> Result<(), StoreError>;
}

impl<B: KvBackend + ?Sized> KvBackend for &mut B {
    fn get_raw(&self, key: &str) -> Option<String> {
        (**self).get_raw(key)
    }

    fn put_raw(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).put_raw(key, value)
    }

    fn get_short(&self, key: &str) -> Option<i16> {
        (**self).get_short(key)
    }

    fn put_short(&mut self, key: &str, value: i16) -> Result<(), StoreError> {
        (**self).put_short(key, value)
    }
}
