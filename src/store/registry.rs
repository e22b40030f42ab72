use std::collections::HashMap;

use tracing::debug;

use super::DataStore;
use super::StoreHandle;
use crate::BrokerError;
use crate::Result;

#[derive(Debug)]
struct Slot {
    generation: u32,
    store: Option<DataStore>,
}

/// Name-indexed collection of open stores.
///
/// Each store lives in a slot; closing a store bumps the slot generation so
/// that handles issued for it stop resolving, even after the slot is reused.
#[derive(Debug, Default)]
pub struct StoreRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    names: HashMap<String, u32>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        store: DataStore,
    ) -> Result<StoreHandle> {
        if self.names.contains_key(store.name()) {
            return Err(BrokerError::DuplicateName {
                kind: "store",
                name: store.name().to_string(),
            }
            .into());
        }

        let name = store.name().to_string();
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].store = Some(store);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    store: Some(store),
                });
                (self.slots.len() - 1) as u32
            }
        };
        let handle = StoreHandle::new(index, self.slots[index as usize].generation);
        debug!(store = %name, %handle, "store registered");
        self.names.insert(name, index);
        Ok(handle)
    }

    pub fn lookup(
        &self,
        name: &str,
    ) -> Option<StoreHandle> {
        let index = *self.names.get(name)?;
        let slot = &self.slots[index as usize];
        Some(StoreHandle::new(index, slot.generation))
    }

    pub fn contains(
        &self,
        handle: StoreHandle,
    ) -> bool {
        self.get(handle).is_ok()
    }

    pub fn get(
        &self,
        handle: StoreHandle,
    ) -> Result<&DataStore> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.store.as_ref())
            .ok_or_else(|| BrokerError::InvalidHandle(handle).into())
    }

    pub fn get_mut(
        &mut self,
        handle: StoreHandle,
    ) -> Result<&mut DataStore> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.store.as_mut())
            .ok_or_else(|| BrokerError::InvalidHandle(handle).into())
    }

    pub fn get_by_name_mut(
        &mut self,
        name: &str,
    ) -> Option<(StoreHandle, &mut DataStore)> {
        let handle = self.lookup(name)?;
        self.get_mut(handle).ok().map(|store| (handle, store))
    }

    /// Unregisters `name`, invalidating every handle issued for it.
    pub fn remove(
        &mut self,
        name: &str,
    ) -> Option<(StoreHandle, DataStore)> {
        let index = self.names.remove(name)?;
        let slot = &mut self.slots[index as usize];
        let handle = StoreHandle::new(index, slot.generation);
        let store = slot.store.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        debug!(store = name, %handle, "store unregistered");
        Some((handle, store))
    }

    pub fn handles(&self) -> Vec<StoreHandle> {
        let mut handles: Vec<StoreHandle> = self
            .names
            .values()
            .map(|&index| StoreHandle::new(index, self.slots[index as usize].generation))
            .collect();
        handles.sort();
        handles
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (StoreHandle, &mut DataStore)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.store
                .as_mut()
                .map(|store| (StoreHandle::new(index as u32, generation), store))
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
