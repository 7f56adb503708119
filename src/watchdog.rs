//! Commit confirmation watchdogs.
//!
//! A commit is only done once the authority broadcasts the change back.
//! Before submitting a request the committer arms a watchdog keyed on the
//! fields the confirmation must carry; the ingestion path feeds every
//! decoded message through [`WatchdogRegistry::notify`], and the committer
//! blocks on [`Watchdog::wait`] with a bounded timeout.

use crate::error::{Result, RouteDbError};
use crate::msg::{RouteEvent, RouteMessage, AF_MPLS};
use crate::state::{Field, FieldDiff, FieldMap, RouteState};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default confirmation wait window.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

struct WatchState {
    event: RouteEvent,
    fields: FieldMap,
    done: Mutex<bool>,
    cond: Condvar,
}

impl WatchState {
    fn matches(&self, event: RouteEvent, event_fields: &FieldMap) -> bool {
        if self.event != event {
            return false;
        }
        self.fields
            .iter()
            .all(|(field, value)| event_fields.get(*field) == Some(value))
    }
}

/// Registry of armed watchdogs, shared between committers and ingestion.
#[derive(Default)]
pub struct WatchdogRegistry {
    pending: Mutex<Vec<Arc<WatchState>>>,
}

impl WatchdogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a watchdog for a message of `event` kind carrying every field
    /// in `fields` with an equal value.
    pub fn watch(self: &Arc<Self>, event: RouteEvent, fields: FieldMap) -> Watchdog {
        let state = Arc::new(WatchState {
            event,
            fields,
            done: Mutex::new(false),
            cond: Condvar::new(),
        });
        self.pending.lock().push(state.clone());
        Watchdog {
            registry: self.clone(),
            state,
            timeout: DEFAULT_CONFIRM_TIMEOUT,
        }
    }

    /// Wakes every armed watchdog the message satisfies. Called by the
    /// ingestion path for every decoded message, after table handling.
    pub fn notify(&self, m: &RouteMessage) {
        let fields = event_fields(m);
        let mut pending = self.pending.lock();
        pending.retain(|watch| {
            if watch.matches(m.event, &fields) {
                *watch.done.lock() = true;
                watch.cond.notify_all();
                false
            } else {
                true
            }
        });
    }

    fn forget(&self, state: &Arc<WatchState>) {
        self.pending.lock().retain(|w| !Arc::ptr_eq(w, state));
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// One armed confirmation watch.
pub struct Watchdog {
    registry: Arc<WatchdogRegistry>,
    state: Arc<WatchState>,
    timeout: Duration,
}

impl Watchdog {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Blocks until the watched confirmation arrives or the window expires.
    pub fn wait(self) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut done = self.state.done.lock();
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return Err(RouteDbError::WaitTimeout(self.timeout));
            }
            self.state.cond.wait_for(&mut done, deadline - now);
        }
        Ok(())
    }
}

impl Drop for Watchdog {
    // an abandoned watch (timeout, failed request) must not linger
    fn drop(&mut self) {
        self.registry.forget(&self.state);
    }
}

/// Matchable fields of a decoded message, rendered the way route state
/// stores them.
pub fn event_fields(m: &RouteMessage) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.set(Field::Family, m.family);
    fields.set(Field::Table, m.effective_table());
    if m.family == AF_MPLS {
        if let Some(first) = m.mpls_dst().and_then(|s| s.first()) {
            fields.set(Field::Dst, first.label);
        }
    } else {
        fields.set(Field::Dst, m.dst_spec());
    }
    if let Some(src) = m.src() {
        fields.set(Field::Src, format!("{}/{}", src, m.src_len));
    }
    if let Some(gw) = m.gateway() {
        fields.set(Field::Gateway, gw);
    }
    if let Some(oif) = m.oif() {
        fields.set(Field::Oif, oif);
    }
    if let Some(iif) = m.iif() {
        fields.set(Field::Iif, iif);
    }
    if let Some(p) = m.priority() {
        fields.set(Field::Priority, p);
    }
    fields.set(Field::Proto, m.proto);
    fields.set(Field::RType, m.rtype);
    fields
}

/// Scalars beyond identity that a confirmation watch may pin to the value
/// the transaction changed them to.
const WATCHABLE: &[Field] = &[
    Field::Gateway,
    Field::Priority,
    Field::Proto,
    Field::RType,
    Field::Oif,
    Field::Iif,
    Field::Table,
];

/// Watch key for a change confirmation: route identity plus any watchable
/// scalar the transaction changed, pinned to its new value.
pub fn confirm_fields(tx: &RouteState, diff: &FieldDiff) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.set(Field::Family, tx.family());
    fields.set(Field::Table, tx.table_id());
    if let Some(dst) = tx.fields.get(Field::Dst) {
        fields.set(Field::Dst, dst.clone());
    }
    for (field, value) in &diff.set {
        if WATCHABLE.contains(field) {
            fields.set(*field, value.clone());
        }
    }
    fields
}

/// Watch key for a deletion confirmation: every identifying scalar the
/// snapshot actually carries.
pub fn removal_fields(snapshot: &RouteState) -> FieldMap {
    let mut fields = FieldMap::new();
    if snapshot.is_mpls() {
        if let Some(dst) = snapshot.fields.get(Field::Dst) {
            fields.set(Field::Dst, dst.clone());
        }
        if let Some(oif) = snapshot.fields.get_u32(Field::Oif) {
            fields.set(Field::Oif, oif);
        }
        return fields;
    }
    for field in [
        Field::Dst,
        Field::Src,
        Field::Gateway,
        Field::Oif,
        Field::Iif,
        Field::Table,
    ] {
        if let Some(value) = snapshot.fields.get(field) {
            if value.is_truthy() {
                fields.set(field, value.clone());
            }
        }
    }
    fields
}
