//! Mirrors replicated stores into external table-like structures.
//!
//! A store name has at most one associated table. The table is seeded once,
//! after both the store and the association exist, and from then on every
//! committed mutation of the store is projected onto it in commit order.


use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use tracing::debug;
use tracing::info;

use crate::BrokerError;
use crate::Data;
use crate::DataStore;
use crate::Mutation;
use crate::Result;
use crate::StoreEffects;
use crate::StoreRole;

/// External table a store is mirrored into.
///
/// Implementations must be idempotent: applying the mutation that leads to
/// the current end state again leaves the table unchanged.
#[cfg_attr(test, automock)]
pub trait ExternalTable: Send {
    /// Current rows, used to seed an empty master.
    fn entries(&self) -> Vec<(Data, Data)>;

    /// Replaces the whole contents.
    fn seed(
        &mut self,
        entries: Vec<(Data, Data)>,
    );

    fn apply_mutation(
        &mut self,
        mutation: &Mutation,
    );
}

/// Shared in-memory table. Clones observe the same rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    rows: Arc<Mutex<BTreeMap<Data, Data>>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: impl IntoIterator<Item = (Data, Data)>) -> Self {
        let table = Self::default();
        table.rows.lock().extend(rows);
        table
    }

    pub fn get(
        &self,
        key: &Data,
    ) -> Option<Data> {
        self.rows.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    pub fn contents(&self) -> BTreeMap<Data, Data> {
        self.rows.lock().clone()
    }
}

impl ExternalTable for MemoryTable {
    fn entries(&self) -> Vec<(Data, Data)> {
        self.rows.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn seed(
        &mut self,
        entries: Vec<(Data, Data)>,
    ) {
        let mut rows = self.rows.lock();
        rows.clear();
        rows.extend(entries);
    }

    fn apply_mutation(
        &mut self,
        mutation: &Mutation,
    ) {
        let mut rows = self.rows.lock();
        match mutation {
            Mutation::Insert { key, value } | Mutation::Update { key, value } => {
                rows.insert(key.clone(), value.clone());
            }
            Mutation::Erase { key } => {
                rows.remove(key);
            }
            Mutation::Clear => rows.clear(),
        }
    }
}

struct Association {
    table: Box<dyn ExternalTable>,
    seeded: bool,
}

#[derive(Default)]
pub struct ForwardingBridge {
    associations: HashMap<String, Association>,
}

impl std::fmt::Debug for ForwardingBridge {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ForwardingBridge")
            .field("stores", &self.associations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ForwardingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `table` with the store called `name`, which need not exist
    /// yet.
    pub fn add(
        &mut self,
        name: &str,
        table: Box<dyn ExternalTable>,
    ) -> Result<()> {
        if self.associations.contains_key(name) {
            return Err(BrokerError::DuplicateName {
                kind: "forwarded store",
                name: name.to_string(),
            }
            .into());
        }
        debug!(store = name, "forwarding association added");
        self.associations
            .insert(name.to_string(), Association { table, seeded: false });
        Ok(())
    }

    pub fn remove(
        &mut self,
        name: &str,
    ) -> bool {
        self.associations.remove(name).is_some()
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.associations.contains_key(name)
    }

    pub fn is_seeded(
        &self,
        name: &str,
    ) -> bool {
        self.associations.get(name).map(|a| a.seeded).unwrap_or(false)
    }

    /// Performs the one-time seeding between `store` and its table.
    ///
    /// An empty master adopts the rows of a non-empty table; otherwise the
    /// table is replaced with the store snapshot. Returns the store effects
    /// of adopting table rows, or `None` when there is nothing to do.
    pub fn check(
        &mut self,
        store: &mut DataStore,
        now: f64,
    ) -> Result<Option<StoreEffects>> {
        let Some(assoc) = self.associations.get_mut(store.name()) else {
            return Ok(None);
        };
        if assoc.seeded {
            return Ok(None);
        }

        let mut effects = StoreEffects::default();
        let rows = assoc.table.entries();
        if store.role() == StoreRole::Master && store.is_empty()? && !rows.is_empty() {
            info!(store = store.name(), rows = rows.len(), "seeding master from forwarded table");
            for (key, value) in rows {
                effects.merge(store.put(key, value, None, now)?);
            }
        } else {
            let snapshot = store.snapshot()?;
            info!(store = store.name(), rows = snapshot.len(), "seeding forwarded table from store");
            assoc.table.seed(snapshot);
        }
        assoc.seeded = true;
        Ok(Some(effects))
    }

    /// Reflects committed mutations of `name` onto its table, in order.
    pub fn project(
        &mut self,
        name: &str,
        mutations: &[Mutation],
    ) {
        let Some(assoc) = self.associations.get_mut(name) else {
            return;
        };
        if !assoc.seeded {
            return;
        }
        for mutation in mutations {
            assoc.table.apply_mutation(mutation);
        }
    }
}
