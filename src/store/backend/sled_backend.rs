//! Persistent master backend on top of sled.
//!
//! Keys and values are `bincode`-encoded [`Data`]. sled orders entries by
//! encoded bytes, so snapshots are re-sorted by `Data` ordering.

use std::fmt::Debug;
use std::path::Path;

use tracing::debug;
use tracing::error;

use super::StoreBackend;
use crate::constants::STORE_DATA_TREE;
use crate::Data;
use crate::Result;

pub struct SledBackend {
    db: sled::Db,
    tree: sled::Tree,
}

impl Debug for SledBackend {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledBackend")
            .field("tree_len", &self.tree.len())
            .finish()
    }
}

impl Drop for SledBackend {
    fn drop(&mut self) {
        match self.db.flush() {
            Ok(bytes) => debug!("SledBackend flushed {} bytes on drop", bytes),
            Err(e) => error!("Failed to flush SledBackend: {}", e),
        }
    }
}

impl SledBackend {
    pub fn open(path: impl AsRef<Path> + Debug) -> Result<Self> {
        debug!("SledBackend::open from path: {:?}", &path);

        let db = sled::Config::default()
            .path(path.as_ref())
            .use_compression(true)
            .compression_factor(1)
            .flush_every_ms(Some(100))
            .mode(sled::Mode::HighThroughput)
            .open()?;
        let tree = db.open_tree(STORE_DATA_TREE)?;

        Ok(Self { db, tree })
    }

    fn decode(bytes: &[u8]) -> Result<Data> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl StoreBackend for SledBackend {
    fn put(
        &mut self,
        key: Data,
        value: Data,
    ) -> Result<Option<Data>> {
        let k = bincode::serialize(&key)?;
        let v = bincode::serialize(&value)?;
        self.tree
            .insert(k, v)?
            .map(|prev| Self::decode(&prev))
            .transpose()
    }

    fn get(
        &self,
        key: &Data,
    ) -> Result<Option<Data>> {
        let k = bincode::serialize(key)?;
        self.tree.get(k)?.map(|v| Self::decode(&v)).transpose()
    }

    fn erase(
        &mut self,
        key: &Data,
    ) -> Result<Option<Data>> {
        let k = bincode::serialize(key)?;
        self.tree.remove(k)?.map(|v| Self::decode(&v)).transpose()
    }

    fn clear(&mut self) -> Result<()> {
        self.tree.clear()?;
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<(Data, Data)>> {
        let mut entries = Vec::with_capacity(self.tree.len());
        for item in self.tree.iter() {
            let (k, v) = item?;
            entries.push((Self::decode(&k)?, Self::decode(&v)?));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.tree.len())
    }
}
