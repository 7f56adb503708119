//! Table set: ingestion dispatch, route creation and the commit protocol.
//!
//! [`RouteDb`] owns one [`RoutingTable`] per kernel table plus the MPLS
//! table, the authority transport and the confirmation watchdog registry.
//! Ingestion classifies each decoded message to a table, applies it, and
//! then wakes any commits waiting on it.

use crate::error::{Result, RouteDbError};
use crate::key::IndexKey;
use crate::msg::{MetricField, RouteEvent, RouteMessage, AF_INET, AF_MPLS};
use crate::route::RouteEntry;
use crate::state::{
    Encap, Field, FieldMap, LabelInput, Metrics, NextHop, RouteScope, RouteState, StateDiff,
    Via,
};
use crate::table::{Lookup, RouteHandle, RoutingTable, TableKind};
use crate::transport::{RouteOp, RouteRequest, RouteTransport};
use crate::watchdog::{
    confirm_fields, removal_fields, WatchdogRegistry, DEFAULT_CONFIRM_TIMEOUT,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identifier of one routing table in the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableId {
    /// Ordinary kernel table by id.
    Id(u32),
    /// The MPLS label table.
    Mpls,
}

impl TableId {
    fn of_state(state: &RouteState) -> TableId {
        if state.is_mpls() {
            TableId::Mpls
        } else {
            TableId::Id(state.table_id())
        }
    }

    fn of_message(m: &RouteMessage) -> TableId {
        if m.family == AF_MPLS {
            TableId::Mpls
        } else {
            TableId::Id(m.effective_table())
        }
    }

    fn kind(&self) -> TableKind {
        match self {
            TableId::Id(_) => TableKind::Ip,
            TableId::Mpls => TableKind::Mpls,
        }
    }
}

/// Builder for one multipath segment of a route spec.
#[derive(Debug, Clone, Default)]
pub struct NextHopSpec {
    family: Option<u32>,
    gateway: Option<String>,
    oif: Option<u32>,
    weight: Option<u32>,
    encap: Option<Encap>,
    via: Option<Via>,
    newdst: Vec<u32>,
}

impl NextHopSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn family(mut self, family: u32) -> Self {
        self.family = Some(family);
        self
    }

    pub fn gateway(mut self, gateway: &str) -> Self {
        self.gateway = Some(gateway.to_string());
        self
    }

    pub fn oif(mut self, oif: u32) -> Self {
        self.oif = Some(oif);
        self
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn encap(mut self, etype: Option<&str>, labels: impl Into<LabelInput>) -> Self {
        self.encap = Some(Encap::normalize(etype, labels.into()));
        self
    }

    pub fn via(mut self, family: u32, addr: &str) -> Self {
        self.via = Some(Via {
            family: Some(family),
            addr: Some(addr.to_string()),
        });
        self
    }

    pub fn newdst(mut self, labels: Vec<u32>) -> Self {
        self.newdst = labels;
        self
    }

    fn build(self, default_family: u32) -> NextHop {
        let mut hop = NextHop::new();
        hop.fields
            .set(Field::Family, self.family.unwrap_or(default_family));
        if let Some(gw) = self.gateway {
            hop.fields.set(Field::Gateway, gw);
        }
        if let Some(oif) = self.oif {
            hop.fields.set(Field::Oif, oif);
        }
        if let Some(w) = self.weight {
            hop.fields.set(Field::Weight, w);
        }
        if !self.newdst.is_empty() {
            hop.fields
                .set(Field::NewDst, crate::state::Value::Labels(self.newdst));
        }
        if let Some(encap) = self.encap {
            hop.encap = encap;
        }
        if let Some(via) = self.via {
            hop.via = via;
        }
        hop
    }
}

/// Builder for a locally-created route.
#[derive(Debug, Clone, Default)]
pub struct RouteSpec {
    fields: FieldMap,
    metrics: Metrics,
    encap: Option<Encap>,
    via: Option<Via>,
    hops: Vec<NextHopSpec>,
    family: Option<u32>,
    mpls: bool,
}

impl RouteSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Destination in the `"addr/len"` form, or `"default"`.
    pub fn dst(mut self, dst: &str) -> Self {
        self.fields.set(Field::Dst, dst);
        self
    }

    /// MPLS destination label; selects the label table.
    pub fn dst_label(mut self, label: u32) -> Self {
        self.fields.set(Field::Dst, label);
        self.mpls = true;
        self
    }

    pub fn src(mut self, src: &str) -> Self {
        self.fields.set(Field::Src, src);
        self
    }

    pub fn gateway(mut self, gateway: &str) -> Self {
        self.fields.set(Field::Gateway, gateway);
        self
    }

    pub fn pref_src(mut self, addr: &str) -> Self {
        self.fields.set(Field::PrefSrc, addr);
        self
    }

    pub fn table(mut self, table: u32) -> Self {
        self.fields.set(Field::Table, table);
        self
    }

    pub fn oif(mut self, oif: u32) -> Self {
        self.fields.set(Field::Oif, oif);
        self
    }

    pub fn iif(mut self, iif: u32) -> Self {
        self.fields.set(Field::Iif, iif);
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.fields.set(Field::Priority, priority);
        self
    }

    pub fn family(mut self, family: u32) -> Self {
        self.family = Some(family);
        self
    }

    pub fn proto(mut self, proto: u32) -> Self {
        self.fields.set(Field::Proto, proto);
        self
    }

    pub fn rtype(mut self, rtype: u32) -> Self {
        self.fields.set(Field::RType, rtype);
        self
    }

    pub fn newdst(mut self, labels: Vec<u32>) -> Self {
        self.fields
            .set(Field::NewDst, crate::state::Value::Labels(labels));
        self
    }

    pub fn encap(mut self, etype: Option<&str>, labels: impl Into<LabelInput>) -> Self {
        self.encap = Some(Encap::normalize(etype, labels.into()));
        self
    }

    pub fn metric(mut self, field: MetricField, value: u32) -> Self {
        self.metrics.set(field, value);
        self
    }

    pub fn via(mut self, family: u32, addr: &str) -> Self {
        self.via = Some(Via {
            family: Some(family),
            addr: Some(addr.to_string()),
        });
        self
    }

    pub fn nexthop(mut self, hop: NextHopSpec) -> Self {
        self.hops.push(hop);
        self
    }
}

/// The route mirror: one routing table per kernel table, a transport to the
/// authority, and the confirmation machinery.
pub struct RouteDb {
    transport: Arc<dyn RouteTransport>,
    watchdogs: Arc<WatchdogRegistry>,
    tables: Mutex<HashMap<TableId, Arc<RoutingTable>>>,
    ignored: Vec<TableId>,
    confirm_timeout: Duration,
}

impl RouteDb {
    pub fn new(transport: Arc<dyn RouteTransport>) -> Self {
        Self {
            transport,
            watchdogs: Arc::new(WatchdogRegistry::new()),
            tables: Mutex::new(HashMap::new()),
            ignored: Vec::new(),
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
        }
    }

    /// Tables whose broadcasts are dropped at ingestion.
    pub fn with_ignored_tables(mut self, tables: Vec<TableId>) -> Self {
        self.ignored = tables;
        self
    }

    /// Confirmation wait window for commits.
    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    /// The table for `id`, creating it on first use.
    pub fn table(&self, id: TableId) -> Arc<RoutingTable> {
        self.tables
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(RoutingTable::new(id.kind())))
            .clone()
    }

    fn existing_table(&self, id: TableId) -> Option<Arc<RoutingTable>> {
        self.tables.lock().get(&id).cloned()
    }

    /// Table ids with at least one live route, plus the MPLS table if it
    /// was ever touched.
    pub fn table_ids(&self) -> Vec<TableId> {
        self.tables.lock().keys().copied().collect()
    }

    /// Creates a local route in `Create` scope with an open transaction.
    /// The route reaches the authority on [`commit`](Self::commit).
    pub fn add(&self, spec: RouteSpec) -> Result<RouteHandle> {
        if spec.fields.get(Field::Dst).is_none() {
            return Err(RouteDbError::InvalidSpec(
                "destination required".to_string(),
            ));
        }
        let family = spec
            .family
            .unwrap_or(if spec.mpls { AF_MPLS } else { AF_INET });

        let mut state = RouteState::new();
        state.fields = spec.fields;
        state.fields.set(Field::Family, family);
        state.metrics = spec.metrics;
        if let Some(encap) = spec.encap {
            state.encap = encap;
        }
        if let Some(via) = spec.via {
            state.via = via;
        }
        for hop_spec in spec.hops {
            state.multipath.add(hop_spec.build(family));
        }
        state.scope = Some(RouteScope::Create);

        let table_id = TableId::of_state(&state);
        let key = IndexKey::of_state(&state);
        info!(key = %key, ?table_id, "route staged for creation");

        let mut entry = RouteEntry::from_state(state);
        entry.begin();
        let handle = Arc::new(Mutex::new(entry));
        self.table(table_id).insert(key, handle.clone());
        Ok(handle)
    }

    /// Absorbs one decoded authority message: classifies it to a table,
    /// applies it, then wakes matching commit watchdogs. Messages for
    /// ignored tables skip table handling but still wake watchdogs.
    pub fn ingest(&self, m: &RouteMessage) {
        let id = TableId::of_message(m);
        if !self.ignored.contains(&id) {
            match m.event {
                RouteEvent::NewRoute => self.table(id).load(m),
                RouteEvent::DelRoute => match self.existing_table(id) {
                    Some(table) => {
                        if table.unload(m).is_none() {
                            debug!(?id, "deletion broadcast matched no removable route");
                        }
                    }
                    None => debug!(?id, "deletion broadcast for unknown table"),
                },
            }
        }
        self.watchdogs.notify(m);
    }

    /// Commits the route's open transaction: pushes the difference between
    /// the transaction and the live state to the authority and blocks until
    /// the change is confirmed. On failure the snapshot is committed back
    /// (`Set`), or the route is invalidated (`Add`).
    pub fn commit(&self, handle: &RouteHandle) -> Result<()> {
        let (tx, snapshot) = {
            let entry = handle.lock();
            match entry.tx() {
                None => return Ok(()),
                Some(tx) => (tx.clone(), entry.snapshot()),
            }
        };
        let op = if snapshot.scope == Some(RouteScope::System) {
            RouteOp::Set
        } else {
            RouteOp::Add
        };

        match self.commit_pass(handle, &tx, &snapshot, false) {
            Ok(()) => {
                handle.lock().drop_tx();
                Ok(())
            }
            Err(source) => self.recover(handle, op, tx, snapshot, source),
        }
    }

    /// One push of `tx` against `snapshot`: the change phase, then the
    /// removal phase for transactions staged for deletion.
    fn commit_pass(
        &self,
        handle: &RouteHandle,
        tx: &RouteState,
        snapshot: &RouteState,
        rollback: bool,
    ) -> Result<()> {
        let table = self.table(TableId::of_state(tx));
        let op = if snapshot.scope == Some(RouteScope::System) {
            RouteOp::Set
        } else {
            RouteOp::Add
        };
        let staged_remove = matches!(
            tx.scope,
            Some(RouteScope::Remove) | Some(RouteScope::Shadow)
        ) || (rollback && tx.scope == Some(RouteScope::Create));

        if staged_remove {
            return self.remove_pass(&table, handle, tx, snapshot);
        }

        let diff = StateDiff::between(tx, snapshot);
        // dropping every metric or the whole encapsulation needs an explicit
        // request even though the field diff may be empty
        let metrics_cleanup =
            !tx.is_mpls() && snapshot.metrics.any_set() && tx.metrics.is_empty();
        let encap_cleanup =
            !tx.is_mpls() && snapshot.encap.any_set() && !tx.encap.any_set();

        if !diff.changed() && !metrics_cleanup && !encap_cleanup && op != RouteOp::Add {
            debug!("commit is a no-op");
            return Ok(());
        }

        let old_key = IndexKey::of_state(snapshot);
        let new_key = IndexKey::of_state(tx);
        let wd = self
            .watchdogs
            .watch(RouteEvent::NewRoute, confirm_fields(tx, &diff.fields))
            .with_timeout(self.confirm_timeout);
        let request = RouteRequest::from_state(tx);

        if new_key != old_key {
            table.reserve(new_key.clone(), handle)?;
            if let Err(e) = self.transport.request(op, &request) {
                table.release(&new_key);
                return Err(e);
            }
            table.release(&old_key);
        } else {
            self.transport.request(op, &request)?;
        }
        wd.wait()
    }

    fn remove_pass(
        &self,
        table: &RoutingTable,
        handle: &RouteHandle,
        tx: &RouteState,
        snapshot: &RouteState,
    ) -> Result<()> {
        let shadow = tx.scope == Some(RouteScope::Shadow);
        if shadow {
            // write-lock so the deletion broadcast cannot clobber the
            // retained state
            handle.lock().set_scope(RouteScope::Locked);
        }
        let wd = self
            .watchdogs
            .watch(RouteEvent::DelRoute, removal_fields(snapshot))
            .with_timeout(self.confirm_timeout);
        let result = self
            .transport
            .request(RouteOp::Delete, &RouteRequest::from_state(snapshot))
            .and_then(|()| {
                if !shadow {
                    // shadowed routes stay in the index; plain removals
                    // leave it now
                    table.detach(snapshot);
                }
                wd.wait()
            });
        match result {
            Ok(()) => {
                handle.lock().set_scope(if shadow {
                    RouteScope::Shadow
                } else {
                    RouteScope::Detached
                });
                Ok(())
            }
            Err(e) => {
                if shadow {
                    // undo the write-lock, the route is still live
                    if let Some(scope) = snapshot.scope {
                        handle.lock().set_scope(scope);
                    }
                }
                Err(e)
            }
        }
    }

    /// Commit failure handling: an `Add` invalidates the route, a `Set`
    /// commits the snapshot back before reporting the original failure.
    fn recover(
        &self,
        handle: &RouteHandle,
        op: RouteOp,
        tx: RouteState,
        snapshot: RouteState,
        source: RouteDbError,
    ) -> Result<()> {
        warn!(?op, error = %source, "commit failed");
        let failure = RouteDbError::CommitFailed {
            op,
            source: Box::new(source),
            transaction: Box::new(tx),
        };

        if op == RouteOp::Add {
            {
                let mut entry = handle.lock();
                entry.set_scope(RouteScope::Invalid);
                entry.drop_tx();
            }
            self.table(TableId::of_state(&snapshot)).purge(handle);
            return Err(failure);
        }

        let fresh = handle.lock().snapshot();
        let rollback = self.commit_pass(handle, &snapshot, &fresh, true);
        handle.lock().drop_tx();
        match rollback {
            Ok(()) => Err(failure),
            Err(rb) => Err(RouteDbError::Fatal {
                source: Box::new(rb),
            }),
        }
    }

    /// Stages deletion and commits it.
    pub fn remove(&self, handle: &RouteHandle) -> Result<()> {
        handle.lock().remove();
        self.commit(handle)
    }

    /// Resolves one route in the given table.
    pub fn describe(&self, id: TableId, lookup: &Lookup) -> Result<RouteHandle> {
        self.existing_table(id)
            .ok_or(RouteDbError::NotFound)?
            .describe(lookup)
    }

    /// Resolves by field filter, querying the authority on a miss.
    pub fn describe_or_fetch(&self, id: TableId, fields: &FieldMap) -> Result<RouteHandle> {
        self.table(id)
            .describe_or_fetch(fields, self.transport.as_ref())
    }

    pub fn keys(&self, id: TableId) -> Vec<IndexKey> {
        self.existing_table(id)
            .map(|t| t.keys())
            .unwrap_or_default()
    }

    pub fn has_key(&self, id: TableId, key: &IndexKey) -> bool {
        self.existing_table(id)
            .is_some_and(|t| t.has_key(key))
    }

    /// Marks every confirmed route unconfirmed-stale, the first half of a
    /// resynchronization pass.
    pub fn mark_stale(&self) {
        let tables: Vec<Arc<RoutingTable>> =
            self.tables.lock().values().cloned().collect();
        for table in tables {
            for key in table.keys() {
                // only steady-state routes age out
                if let Ok(handle) = table.describe(&Lookup::Key(key.clone())) {
                    let mut entry = handle.lock();
                    if entry.scope() == Some(RouteScope::System) {
                        entry.set_scope(RouteScope::Gc);
                    }
                }
            }
        }
    }

    /// Re-verifies every stale route against the authority. Routes the
    /// authority no longer reports, or cannot report, are dropped.
    pub fn gc(&self) {
        let tables: Vec<Arc<RoutingTable>> =
            self.tables.lock().values().cloned().collect();
        for table in tables {
            table.gc(self.transport.as_ref());
        }
    }
}
