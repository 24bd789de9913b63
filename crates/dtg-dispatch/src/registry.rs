//! Concurrent registry of handler records, keyed by resource and operation
//! kind and indexed by owner for update/removal.
//!
//! Ordering invariant per (key, kind) list: provider-scoped records precede
//! catch-all records; among scoped records the most recently inserted comes
//! first; among catch-all records the earliest inserted comes first.
//! Resolution is therefore a head-to-tail first-match scan.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use dtg_twin::ResourceKey;

use crate::handler::{HandlerRecord, OpKind, OwnerId};

#[derive(Default)]
struct Tables {
    act: HashMap<ResourceKey, Vec<HandlerRecord>>,
    get: HashMap<ResourceKey, Vec<HandlerRecord>>,
    set: HashMap<ResourceKey, Vec<HandlerRecord>>,
    /// Keys each owner has records under, for update and removal.
    owners: HashMap<OwnerId, Vec<(OpKind, ResourceKey)>>,
}

impl Tables {
    fn table_mut(&mut self, kind: OpKind) -> &mut HashMap<ResourceKey, Vec<HandlerRecord>> {
        match kind {
            OpKind::Act => &mut self.act,
            OpKind::Get => &mut self.get,
            OpKind::Set => &mut self.set,
        }
    }

    fn table(&self, kind: OpKind) -> &HashMap<ResourceKey, Vec<HandlerRecord>> {
        match kind {
            OpKind::Act => &self.act,
            OpKind::Get => &self.get,
            OpKind::Set => &self.set,
        }
    }
}

/// Registry of handler records. All operations take one lock so conflict
/// detection and mutation are a single atomic step.
#[derive(Default)]
pub struct HandlerRegistry {
    inner: Mutex<Tables>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, preserving the ordering invariant. Overlapping
    /// scopes and duplicate catch-alls are warnings, never rejections: the
    /// system stays available with a deterministic winner.
    pub fn register(&self, kind: OpKind, key: ResourceKey, record: HandlerRecord) {
        let mut tables = self.inner.lock().expect("registry poisoned");
        tables
            .owners
            .entry(record.owner)
            .or_default()
            .push((kind, key.clone()));
        let list = tables.table_mut(kind).entry(key.clone()).or_default();
        insert_record(list, record, kind, &key);
    }

    /// First record in the ordered list that serves `provider`.
    pub fn resolve(&self, kind: OpKind, key: &ResourceKey, provider: &str) -> Option<HandlerRecord> {
        let tables = self.inner.lock().expect("registry poisoned");
        tables
            .table(kind)
            .get(key)?
            .iter()
            .find(|r| r.matches_provider(provider))
            .cloned()
    }

    /// Apply a provider-scope change to every record of `owner`.
    ///
    /// A record whose scope already equals the new one, or where both old
    /// and new scopes are non-empty (the ambiguous case), is left alone.
    /// Otherwise the record is re-inserted with the new scope, which
    /// re-establishes the ordering invariant and can change resolution
    /// priority.
    pub fn update(&self, owner: OwnerId, new_scope: &BTreeSet<String>) {
        let mut tables = self.inner.lock().expect("registry poisoned");
        let owned = match tables.owners.get(&owner) {
            Some(keys) => keys.clone(),
            None => return,
        };
        for (kind, key) in owned {
            let Some(list) = tables.table_mut(kind).get_mut(&key) else {
                tracing::warn!(owner = %owner, %key, %kind, "no record found for owned key");
                continue;
            };
            let Some(pos) = list.iter().position(|r| r.owner == owner) else {
                tracing::warn!(owner = %owner, %key, %kind, "no record found for owned key");
                continue;
            };
            let current = &list[pos];
            if current.providers == *new_scope
                || (!current.providers.is_empty() && !new_scope.is_empty())
            {
                tracing::debug!(owner = %owner, %key, %kind, "scope update changed nothing");
                continue;
            }
            let mut updated = list.remove(pos);
            updated.providers = new_scope.clone();
            tracing::debug!(owner = %owner, %key, %kind, ?new_scope, "re-inserting with new scope");
            insert_record(list, updated, kind, &key);
        }
    }

    /// Drop every record of `owner` across all keys and kinds; lists left
    /// empty are deleted entirely.
    pub fn remove(&self, owner: OwnerId) {
        let mut tables = self.inner.lock().expect("registry poisoned");
        let Some(owned) = tables.owners.remove(&owner) else {
            return;
        };
        for (kind, key) in owned {
            let table = tables.table_mut(kind);
            if let Some(list) = table.get_mut(&key) {
                list.retain(|r| r.owner != owner);
                if list.is_empty() {
                    table.remove(&key);
                }
            }
        }
    }
}

fn insert_record(list: &mut Vec<HandlerRecord>, record: HandlerRecord, kind: OpKind, key: &ResourceKey) {
    if record.is_catch_all() {
        if let Some(last) = list.last() {
            if last.is_catch_all() {
                tracing::warn!(
                    %key, %kind, earlier = %last.owner, later = %record.owner,
                    "two catch-all handlers registered; the earlier one keeps priority"
                );
            }
        }
        list.push(record);
    } else {
        if let Some(existing) = list.iter().find(|r| r.overlaps(&record)) {
            tracing::warn!(
                %key, %kind, earlier = %existing.owner, later = %record.owner,
                "overlapping provider scopes; the later registration takes priority"
            );
        }
        list.insert(0, record);
    }
}
