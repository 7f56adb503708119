//! One kernel routing table: an insertion-ordered index of route entities.
//!
//! The index maps structural keys to shared route handles. Ingestion keeps
//! the index consistent with authority broadcasts, including re-indexing a
//! route whose key gains authority-assigned fields on confirmation.
//!
//! Lock order is index before entity; no entity lock is ever held while
//! taking the index lock.

use crate::error::{Result, RouteDbError};
use crate::key::IndexKey;
use crate::msg::RouteMessage;
use crate::route::RouteEntry;
use crate::state::{Field, FieldMap, RouteScope, RouteState};
use crate::transport::{RouteRequest, RouteTransport};
use crate::ordered::OrderedMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

/// Shared handle to one route entity.
pub type RouteHandle = Arc<Mutex<RouteEntry>>;

/// Address-family flavor of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Ip,
    Mpls,
}

/// Lookup selector for [`RoutingTable::describe`].
pub enum Lookup {
    /// Insertion position in the raw index, stale entries included.
    Position(usize),
    /// Structural key; ordinary-route misses fall back to the
    /// interface-free required-prefix entry.
    Key(IndexKey),
    /// Key derived from a decoded message.
    Message(RouteMessage),
    /// First live route satisfying the filter.
    Filter(Filter),
}

/// Route filter for lookup and iteration. Stale entries never match.
pub enum Filter {
    /// Destination in the stored `"addr/len"` form.
    Dst(String),
    /// Every given field equal in the route's current state.
    Fields(FieldMap),
    /// Arbitrary predicate over the current state.
    Predicate(Box<dyn Fn(&RouteState) -> bool + Send>),
}

impl Filter {
    fn matches(&self, state: &RouteState) -> bool {
        if state.scope == Some(RouteScope::Gc) {
            return false;
        }
        match self {
            Filter::Dst(dst) => state.fields.get_str(Field::Dst) == Some(dst.as_str()),
            Filter::Fields(fields) => fields
                .iter()
                .all(|(field, value)| state.fields.get(*field) == Some(value)),
            Filter::Predicate(pred) => pred(state),
        }
    }
}

pub struct RoutingTable {
    kind: TableKind,
    idx: Mutex<OrderedMap<IndexKey, RouteHandle>>,
}

impl RoutingTable {
    pub fn new(kind: TableKind) -> Self {
        Self {
            kind,
            idx: Mutex::new(OrderedMap::new()),
        }
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Live route count; stale entries excluded.
    pub fn len(&self) -> usize {
        let idx = self.idx.lock();
        idx.values()
            .filter(|h| h.lock().scope() != Some(RouteScope::Gc))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live index keys, in insertion order.
    pub fn keys(&self) -> Vec<IndexKey> {
        let idx = self.idx.lock();
        idx.iter()
            .filter(|(_, h)| h.lock().scope() != Some(RouteScope::Gc))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn has_key(&self, key: &IndexKey) -> bool {
        let idx = self.idx.lock();
        idx.get(key)
            .is_some_and(|h| h.lock().scope() != Some(RouteScope::Gc))
    }

    /// Resolves one route by the given selector.
    pub fn describe(&self, lookup: &Lookup) -> Result<RouteHandle> {
        let idx = self.idx.lock();
        match lookup {
            Lookup::Position(n) => idx
                .nth_key(*n)
                .and_then(|k| idx.get(k))
                .cloned()
                .ok_or(RouteDbError::NotFound),
            Lookup::Key(key) => Self::by_key(&idx, key),
            Lookup::Message(m) => Self::by_key(&idx, &IndexKey::of_message(m)),
            Lookup::Filter(filter) => idx
                .values()
                .find(|h| filter.matches(h.lock().current()))
                .cloned()
                .ok_or(RouteDbError::NotFound),
        }
    }

    /// All live routes satisfying the filter, in insertion order.
    pub fn filter(&self, filter: &Filter) -> Vec<RouteHandle> {
        let idx = self.idx.lock();
        idx.values()
            .filter(|h| filter.matches(h.lock().current()))
            .cloned()
            .collect()
    }

    fn by_key(
        idx: &OrderedMap<IndexKey, RouteHandle>,
        key: &IndexKey,
    ) -> Result<RouteHandle> {
        if let Some(h) = idx.get(key) {
            return Ok(h.clone());
        }
        // fallback: a route not yet fully identified by the authority is
        // indexed under its interface-free required prefix; only that exact
        // entry may answer, never a fully-keyed route
        if let Some(prefix) = key.required_prefix() {
            if let Some(h) = idx.get(&prefix) {
                return Ok(h.clone());
            }
        }
        Err(RouteDbError::NotFound)
    }

    /// Resolves by field filter, querying the authority on a miss. Routes
    /// fetched this way are standalone: they are not entered in the index.
    pub fn describe_or_fetch(
        &self,
        fields: &FieldMap,
        transport: &dyn RouteTransport,
    ) -> Result<RouteHandle> {
        match self.describe(&Lookup::Filter(Filter::Fields(fields.clone()))) {
            Ok(h) => Ok(h),
            Err(RouteDbError::NotFound) => {
                let mut selector = fields.clone();
                // split combined "addr/len" forms for the query
                for (field, len_field) in
                    [(Field::Dst, Field::DstLen), (Field::Src, Field::SrcLen)]
                {
                    if let Some(spec) = fields.get_str(field) {
                        if let Some((addr, len)) = spec.rsplit_once('/') {
                            if let Ok(len) = len.parse::<u32>() {
                                selector.set(field, addr.to_string());
                                selector.set(len_field, len);
                            }
                        }
                    }
                }
                let messages = transport.query(&RouteRequest::from_fields(selector))?;
                let m = messages.first().ok_or(RouteDbError::NotFound)?;
                let mut entry = RouteEntry::new();
                entry.load_message(m);
                Ok(Arc::new(Mutex::new(entry)))
            }
            Err(e) => Err(e),
        }
    }

    /// Absorbs one authority broadcast: locates or creates the entity,
    /// merges, and re-indexes if the structural key changed.
    pub fn load(&self, m: &RouteMessage) {
        let msg_key = IndexKey::of_message(m);
        let mut idx = self.idx.lock();

        let located = match Self::by_key(&idx, &msg_key) {
            Ok(h) => {
                let old_key = idx
                    .iter()
                    .find(|(_, h2)| Arc::ptr_eq(*h2, &h))
                    .map(|(k, _)| k.clone());
                Some((h, old_key))
            }
            Err(_) => None,
        };

        match located {
            Some((handle, old_key)) => {
                let new_key = {
                    let mut entry = handle.lock();
                    entry.load_message(m);
                    IndexKey::of_state(entry.current())
                };
                if old_key.as_ref() != Some(&new_key) {
                    if let Some(old) = old_key {
                        idx.remove(&old);
                    }
                    trace!(key = %new_key, "route re-indexed on confirmation");
                    idx.insert(new_key, handle);
                }
            }
            None => {
                let mut entry = RouteEntry::new();
                entry.load_message(m);
                let key = IndexKey::of_state(entry.current());
                trace!(key = %key, "route learned from broadcast");
                idx.insert(key, Arc::new(Mutex::new(entry)));
            }
        }
    }

    /// Removes the entity a deletion broadcast names. Write-locked and
    /// shadowed routes survive authority deletes.
    pub fn unload(&self, m: &RouteMessage) -> Option<RouteHandle> {
        let key = IndexKey::of_message(m);
        let mut idx = self.idx.lock();
        let handle = Self::by_key(&idx, &key).ok()?;
        {
            let mut entry = handle.lock();
            match entry.scope() {
                Some(RouteScope::Locked) | Some(RouteScope::Shadow) => {
                    trace!(key = %key, "authority delete ignored for retained route");
                    return None;
                }
                _ => {}
            }
            entry.set_scope(RouteScope::Detached);
        }
        let stored = idx
            .iter()
            .find(|(_, h)| Arc::ptr_eq(*h, &handle))
            .map(|(k, _)| k.clone());
        if let Some(k) = stored {
            idx.remove(&k);
        }
        Some(handle)
    }

    /// Enters a locally-created route under its current key.
    pub fn insert(&self, key: IndexKey, handle: RouteHandle) {
        self.idx.lock().insert(key, handle);
    }

    /// Reserves `key` for a commit-time key move. Fails if another route
    /// already holds it.
    pub fn reserve(&self, key: IndexKey, handle: &RouteHandle) -> Result<()> {
        let mut idx = self.idx.lock();
        if let Some(existing) = idx.get(&key) {
            if !Arc::ptr_eq(existing, handle) {
                return Err(RouteDbError::KeyConflict(key));
            }
            return Ok(());
        }
        idx.insert(key, handle.clone());
        Ok(())
    }

    /// Releases a key taken by [`reserve`](Self::reserve), or the old key
    /// after a successful move.
    pub fn release(&self, key: &IndexKey) {
        self.idx.lock().remove(key);
    }

    /// Removes the index entry for a committed deletion snapshot.
    pub fn detach(&self, snapshot: &RouteState) {
        let key = IndexKey::of_state(snapshot);
        self.idx.lock().remove(&key);
    }

    /// Drops every index entry pointing at the handle. Used when a failed
    /// create leaves an entity the index must not resolve anymore.
    pub fn purge(&self, handle: &RouteHandle) {
        let mut idx = self.idx.lock();
        let stale: Vec<IndexKey> = idx
            .iter()
            .filter(|(_, h)| Arc::ptr_eq(*h, handle))
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            idx.remove(&key);
        }
    }

    /// Marks a route unconfirmed-stale without dropping it.
    pub fn mark_gc(&self, key: &IndexKey) -> Result<()> {
        let idx = self.idx.lock();
        let handle = idx.get(key).cloned().ok_or(RouteDbError::NotFound)?;
        drop(idx);
        handle.lock().set_scope(RouteScope::Gc);
        Ok(())
    }

    /// Re-verifies every stale route against the authority: still present
    /// routes return to steady state, absent ones are dropped.
    pub fn gc(&self, transport: &dyn RouteTransport) {
        let stale: Vec<(IndexKey, RouteHandle)> = {
            let idx = self.idx.lock();
            idx.iter()
                .filter(|(_, h)| h.lock().scope() == Some(RouteScope::Gc))
                .map(|(k, h)| (k.clone(), h.clone()))
                .collect()
        };

        for (key, handle) in stale {
            let selector = {
                let entry = handle.lock();
                crate::watchdog::removal_fields(entry.current())
            };
            // a query failure counts as absence
            let found = transport
                .query(&RouteRequest::from_fields(selector))
                .unwrap_or_default();
            match found.first() {
                Some(m) => {
                    debug!(key = %key, "stale route re-confirmed");
                    handle.lock().load_message(m);
                }
                None => {
                    debug!(key = %key, "stale route expired");
                    handle.lock().set_scope(RouteScope::Detached);
                    self.idx.lock().remove(&key);
                }
            }
        }
    }
}
