mod kv;
mod local;

pub use kv::{FileStore, KeyValueStore};
pub use local::LocalStore;

#[cfg(test)]
pub(crate) use kv::MemoryStore;
#[cfg(test)]
pub(crate) use local::test_helpers;
