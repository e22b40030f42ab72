use std::collections::BTreeMap;

use super::StoreBackend;
use crate::Data;
use crate::Result;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: BTreeMap<Data, Data>,
}

impl StoreBackend for MemoryBackend {
    fn put(
        &mut self,
        key: Data,
        value: Data,
    ) -> Result<Option<Data>> {
        Ok(self.data.insert(key, value))
    }

    fn get(
        &self,
        key: &Data,
    ) -> Result<Option<Data>> {
        Ok(self.data.get(key).cloned())
    }

    fn erase(
        &mut self,
        key: &Data,
    ) -> Result<Option<Data>> {
        Ok(self.data.remove(key))
    }

    fn clear(&mut self) -> Result<()> {
        self.data.clear();
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<(Data, Data)>> {
        Ok(self.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.data.len())
    }
}
