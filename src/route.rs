//! Route entity: current state plus an optional open transaction.
//!
//! The mirror side of one kernel route. `current` tracks what the authority
//! last broadcast; a transaction is a private clone the caller edits and
//! later commits. Authority updates keep flowing into `current` while a
//! transaction is open, so a commit always diffs against fresh state.

use crate::key::NhKey;
use crate::msg::RouteMessage;
use crate::state::{Field, NextHop, RouteScope, RouteState, Value};
use tracing::trace;

#[derive(Debug, Clone, Default)]
pub struct RouteEntry {
    current: RouteState,
    tx: Option<RouteState>,
}

impl RouteEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: RouteState) -> Self {
        Self {
            current: state,
            tx: None,
        }
    }

    pub fn current(&self) -> &RouteState {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut RouteState {
        &mut self.current
    }

    pub fn scope(&self) -> Option<RouteScope> {
        self.current.scope
    }

    pub fn set_scope(&mut self, scope: RouteScope) {
        self.current.scope = Some(scope);
    }

    /// A clone of the current state, used as the rollback snapshot.
    pub fn snapshot(&self) -> RouteState {
        self.current.clone()
    }

    pub fn has_tx(&self) -> bool {
        self.tx.is_some()
    }

    pub fn tx(&self) -> Option<&RouteState> {
        self.tx.as_ref()
    }

    /// Opens a transaction if none is open. The transaction starts as a
    /// clone of the current state.
    pub fn begin(&mut self) -> &mut RouteState {
        self.tx.get_or_insert_with(|| self.current.clone())
    }

    /// The open transaction, opening one on first use.
    pub fn tx_mut(&mut self) -> &mut RouteState {
        self.begin()
    }

    /// Takes the open transaction, leaving none.
    pub fn take_tx(&mut self) -> Option<RouteState> {
        self.tx.take()
    }

    pub fn drop_tx(&mut self) {
        self.tx = None;
    }

    /// Sets a scalar field on the transaction.
    pub fn set_field(&mut self, field: Field, value: impl Into<Value>) {
        self.tx_mut().fields.set(field, value);
    }

    /// Stages deletion: the commit pass will ask the authority to remove
    /// this route.
    pub fn remove(&mut self) {
        self.tx_mut().scope = Some(RouteScope::Remove);
    }

    /// Stages shadowing: deleted from the authority but retained locally
    /// and write-locked until re-announced.
    pub fn shadow(&mut self) {
        self.tx_mut().scope = Some(RouteScope::Shadow);
    }

    /// Adds a multipath segment to the transaction.
    pub fn add_nh(&mut self, hop: NextHop) -> NhKey {
        self.tx_mut().multipath.add(hop)
    }

    /// Removes a multipath segment from the transaction by spec.
    pub fn del_nh(&mut self, spec: &NextHop) -> crate::error::Result<NextHop> {
        self.tx_mut().multipath.remove(spec)
    }

    /// Merges an authority broadcast into the current state. A write-locked
    /// route ignores broadcasts entirely.
    pub fn load_message(&mut self, m: &RouteMessage) {
        if self.current.scope == Some(RouteScope::Locked) {
            trace!(?m.event, "route locked, broadcast ignored");
            return;
        }
        self.current.merge_message(m);
    }
}
