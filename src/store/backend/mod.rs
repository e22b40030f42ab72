//! Storage backends behind master stores.
//!
//! Clones always keep their replica in memory; masters pick a backend per
//! store through [`BackendKind`].

mod memory;
mod sled_backend;

pub use memory::*;
pub use sled_backend::*;


use std::path::Path;
use std::path::PathBuf;

#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::Data;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Sled,
}

/// Backend-specific options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendOptions {
    /// Database directory for persistent backends. Defaults to
    /// `<store.backend_root_dir>/<store name>`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[cfg_attr(test, automock)]
pub trait StoreBackend: Send {
    /// Inserts or replaces `key`, returning the previous value.
    fn put(
        &mut self,
        key: Data,
        value: Data,
    ) -> Result<Option<Data>>;

    fn get(
        &self,
        key: &Data,
    ) -> Result<Option<Data>>;

    /// Removes `key`, returning the value it held.
    fn erase(
        &mut self,
        key: &Data,
    ) -> Result<Option<Data>>;

    fn clear(&mut self) -> Result<()>;

    /// Full contents ordered by key.
    fn snapshot(&self) -> Result<Vec<(Data, Data)>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

pub(crate) fn open_backend(
    kind: BackendKind,
    store_name: &str,
    options: &BackendOptions,
    root_dir: &Path,
) -> Result<Box<dyn StoreBackend>> {
    match kind {
        BackendKind::Memory => Ok(Box::new(MemoryBackend::default())),
        BackendKind::Sled => {
            let path = options
                .path
                .clone()
                .unwrap_or_else(|| root_dir.join(store_name));
            debug!(store = store_name, ?path, "opening sled backend");
            Ok(Box::new(SledBackend::open(&path)?))
        }
    }
}
