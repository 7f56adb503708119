//! Route attribute model: fields, values, nested objects and the full
//! per-route state.
//!
//! A route is a mapping from attribute name to value plus three nested
//! objects (metrics, encapsulation, via-address), a multipath set and the
//! lifecycle scope. The same model, minus identity and nesting, is the
//! payload of one multipath segment.

use crate::key::NhKey;
use crate::msg::{self, MetricField, NexthopMessage, RouteMessage, AF_MPLS};
use crate::nexthop::NextHopSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scalar route attribute names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Family,
    DstLen,
    SrcLen,
    Tos,
    Table,
    Proto,
    RType,
    RtScope,
    Flags,
    Dst,
    Src,
    Gateway,
    PrefSrc,
    Priority,
    Oif,
    Iif,
    EncapType,
    NewDst,
    Weight,
}

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    U32(u32),
    Str(String),
    Labels(Vec<u32>),
}

impl Value {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_labels(&self) -> Option<&[u32]> {
        match self {
            Value::Labels(l) => Some(l.as_slice()),
            _ => None,
        }
    }

    /// Zero and empty values count as unset for wildcard matching.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::U32(v) => *v != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Labels(l) => !l.is_empty(),
        }
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// Scalar attribute map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMap {
    inner: HashMap<Field, Value>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: Field) -> Option<&Value> {
        self.inner.get(&field)
    }

    pub fn get_u32(&self, field: Field) -> Option<u32> {
        self.inner.get(&field).and_then(Value::as_u32)
    }

    pub fn get_str(&self, field: Field) -> Option<&str> {
        self.inner.get(&field).and_then(Value::as_str)
    }

    pub fn set(&mut self, field: Field, value: impl Into<Value>) {
        self.inner.insert(field, value.into());
    }

    pub fn clear(&mut self, field: Field) -> Option<Value> {
        self.inner.remove(&field)
    }

    pub fn is_truthy(&self, field: Field) -> bool {
        self.inner.get(&field).is_some_and(Value::is_truthy)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Field, &Value)> {
        self.inner.iter()
    }

    /// Changed fields of `tx` relative to `snapshot`.
    pub fn diff(tx: &FieldMap, snapshot: &FieldMap) -> FieldDiff {
        let mut set = Vec::new();
        let mut cleared = Vec::new();
        for (field, value) in &tx.inner {
            if snapshot.inner.get(field) != Some(value) {
                set.push((*field, value.clone()));
            }
        }
        for field in snapshot.inner.keys() {
            if !tx.inner.contains_key(field) {
                cleared.push(*field);
            }
        }
        FieldDiff { set, cleared }
    }
}

/// Result of diffing two field maps.
#[derive(Debug, Clone, Default)]
pub struct FieldDiff {
    pub set: Vec<(Field, Value)>,
    pub cleared: Vec<Field>,
}

impl FieldDiff {
    pub fn changed(&self) -> bool {
        !self.set.is_empty() || !self.cleared.is_empty()
    }
}

/// Path metrics (RTAX_* values keyed by name).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    inner: HashMap<MetricField, u32>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: MetricField) -> Option<u32> {
        self.inner.get(&field).copied()
    }

    pub fn set(&mut self, field: MetricField, value: u32) {
        self.inner.insert(field, value);
    }

    pub fn any_set(&self) -> bool {
        self.inner.values().any(|v| *v != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Wholesale replacement from a decoded metrics attribute.
    pub fn replace(&mut self, values: &[(MetricField, u32)]) {
        self.inner.clear();
        for (field, value) in values {
            self.inner.insert(*field, *value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetricField, &u32)> {
        self.inner.iter()
    }
}

/// Label input for encapsulation normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelInput {
    /// `"16/17"` text form.
    Text(String),
    /// Numeric label stack.
    Stack(Vec<u32>),
}

impl From<&str> for LabelInput {
    fn from(v: &str) -> Self {
        LabelInput::Text(v.to_string())
    }
}

impl From<Vec<u32>> for LabelInput {
    fn from(v: Vec<u32>) -> Self {
        LabelInput::Stack(v)
    }
}

/// MPLS encapsulation of a route or nexthop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Encap {
    pub etype: Option<String>,
    pub labels: Option<String>,
}

impl Encap {
    pub fn any_set(&self) -> bool {
        self.etype.as_deref().is_some_and(|t| !t.is_empty())
            || self.labels.as_deref().is_some_and(|l| !l.is_empty())
    }

    pub fn clear(&mut self) {
        self.etype = None;
        self.labels = None;
    }

    /// Normalizes a user-provided encap spec: label stacks become the
    /// `/`-joined text form, the type defaults to `"mpls"`.
    pub fn normalize(etype: Option<&str>, labels: LabelInput) -> Encap {
        let labels = match labels {
            LabelInput::Text(s) => s,
            LabelInput::Stack(stack) => stack
                .iter()
                .map(|l| l.to_string())
                .collect::<Vec<_>>()
                .join("/"),
        };
        Encap {
            etype: Some(etype.unwrap_or("mpls").to_string()),
            labels: Some(labels),
        }
    }
}

/// MPLS via-address of a route or nexthop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Via {
    pub family: Option<u32>,
    pub addr: Option<String>,
}

impl Via {
    pub fn any_set(&self) -> bool {
        self.family.is_some_and(|f| f != 0)
            || self.addr.as_deref().is_some_and(|a| !a.is_empty())
    }

    pub fn clear(&mut self) {
        self.family = None;
        self.addr = None;
    }
}

/// Lifecycle state of a mirrored route relative to the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteScope {
    /// Confirmed by the authority; steady state.
    System,
    /// Locally added, not yet confirmed.
    Create,
    /// Staged for deletion.
    Remove,
    /// Removed from the authority but retained locally, write-locked.
    Shadow,
    /// Authority updates are ignored.
    Locked,
    /// Commit failed irrecoverably.
    Invalid,
    /// Removed by an authority-driven delete.
    Detached,
    /// Unconfirmed-stale, pending re-verification.
    Gc,
}

/// Payload of one multipath segment: fields plus encap/via, no nested
/// multipath, metrics or scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NextHop {
    pub fields: FieldMap,
    pub encap: Encap,
    pub via: Via,
}

impl NextHop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn family(&self) -> u32 {
        self.fields.get_u32(Field::Family).unwrap_or(0)
    }

    /// Structural key of this segment; family selects the key model.
    pub fn key(&self) -> NhKey {
        NhKey::of(self)
    }

    /// Builds a segment from one decoded multipath record. `family` is the
    /// parent route's family (segments do not carry their own on the wire).
    pub fn from_message(nh: &NexthopMessage, family: u32) -> Self {
        let mut hop = NextHop::new();
        hop.fields.set(Field::Family, family);
        if nh.oif != 0 {
            hop.fields.set(Field::Oif, nh.oif);
        }
        hop.fields.set(Field::Weight, nh.weight as u32);
        if nh.flags != 0 {
            hop.fields.set(Field::Flags, nh.flags);
        }
        let mut encap_type = None;
        let mut encap_labels = None;
        for attr in &nh.attrs {
            match attr {
                msg::RouteAttr::Gateway(g) => hop.fields.set(Field::Gateway, g.as_str()),
                msg::RouteAttr::Oif(v) => hop.fields.set(Field::Oif, *v),
                msg::RouteAttr::EncapType(t) => encap_type = Some(*t),
                msg::RouteAttr::Encap(stack) => encap_labels = Some(msg::join_labels(stack)),
                msg::RouteAttr::Via { family, addr } => {
                    hop.via.family = Some(*family);
                    hop.via.addr = Some(addr.clone());
                }
                msg::RouteAttr::NewDst(stack) => {
                    let labels: Vec<u32> = stack.iter().map(|l| l.label).collect();
                    hop.fields.set(Field::NewDst, Value::Labels(labels));
                }
                _ => {}
            }
        }
        if let Some(labels) = encap_labels {
            hop.encap.labels = Some(labels);
            hop.encap.etype = Some(encap_type_name(encap_type.unwrap_or(1)));
        }
        hop
    }
}

/// The full value of one route at one instant: scalar fields, nested
/// objects, multipath set and bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteState {
    pub fields: FieldMap,
    pub metrics: Metrics,
    pub encap: Encap,
    pub via: Via,
    pub multipath: NextHopSet,
    pub scope: Option<RouteScope>,
}

impl RouteState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn family(&self) -> u32 {
        self.fields.get_u32(Field::Family).unwrap_or(0)
    }

    pub fn is_mpls(&self) -> bool {
        self.family() == AF_MPLS
    }

    /// The kernel table this route belongs to (default table when unset).
    pub fn table_id(&self) -> u32 {
        match self.fields.get_u32(Field::Table) {
            Some(0) | None => msg::DEFAULT_TABLE,
            Some(t) => t,
        }
    }

    /// Merges a decoded authority message into this state. Scope becomes
    /// `System`; multipath, metrics, encap and via are fully replaced, not
    /// merged. Decode-only transients never enter the state.
    pub fn merge_message(&mut self, m: &RouteMessage) {
        self.scope = Some(RouteScope::System);

        // header fields
        self.fields.set(Field::Family, m.family);
        self.fields.set(Field::DstLen, m.dst_len as u32);
        self.fields.set(Field::SrcLen, m.src_len as u32);
        self.fields.set(Field::Tos, m.tos as u32);
        self.fields.set(Field::Table, m.table);
        self.fields.set(Field::Proto, m.proto);
        self.fields.set(Field::RType, m.rtype);
        self.fields.set(Field::RtScope, m.rt_scope);
        self.fields.set(Field::Flags, m.flags);

        // multipath is replaced wholesale
        self.multipath = NextHopSet::new();

        for attr in &m.attrs {
            match attr {
                msg::RouteAttr::Src(s) => {
                    self.fields
                        .set(Field::Src, format!("{}/{}", s, m.src_len));
                }
                msg::RouteAttr::Gateway(g) => self.fields.set(Field::Gateway, g.as_str()),
                msg::RouteAttr::PrefSrc(s) => self.fields.set(Field::PrefSrc, s.as_str()),
                msg::RouteAttr::Oif(v) => self.fields.set(Field::Oif, *v),
                msg::RouteAttr::Iif(v) => self.fields.set(Field::Iif, *v),
                msg::RouteAttr::Priority(v) => self.fields.set(Field::Priority, *v),
                msg::RouteAttr::Table(v) => self.fields.set(Field::Table, *v),
                msg::RouteAttr::EncapType(t) => self.fields.set(Field::EncapType, *t),
                msg::RouteAttr::Encap(stack) => {
                    self.encap.labels = Some(msg::join_labels(stack));
                }
                msg::RouteAttr::Metrics(values) => self.metrics.replace(values),
                msg::RouteAttr::Via { family, addr } => {
                    self.via.family = Some(*family);
                    self.via.addr = Some(addr.clone());
                }
                msg::RouteAttr::NewDst(stack) => {
                    let labels: Vec<u32> = stack.iter().map(|l| l.label).collect();
                    self.fields.set(Field::NewDst, Value::Labels(labels));
                }
                msg::RouteAttr::Multipath(hops) => {
                    for nh in hops {
                        self.multipath.add(NextHop::from_message(nh, m.family));
                    }
                }
                // dst handled below, with family-specific rendering
                msg::RouteAttr::Dst(_) | msg::RouteAttr::MplsDst(_) => {}
            }
        }

        // destination: raw label for MPLS, "addr/len" or "default" otherwise
        if m.family == AF_MPLS {
            if let Some(stack) = m.mpls_dst() {
                if let Some(first) = stack.first() {
                    self.fields.set(Field::Dst, first.label);
                }
            }
        } else {
            self.fields.set(Field::Dst, m.dst_spec());
        }

        // encap type rides in its own attribute; fold it into the nested
        // object and drop the scalar
        if m.encap().is_some() {
            if let Some(t) = self.fields.clear(Field::EncapType).and_then(|v| v.as_u32()) {
                self.encap.etype = Some(encap_type_name(t));
            }
        } else if self.encap.any_set() {
            self.encap.clear();
            self.fields.clear(Field::EncapType);
        }

        // absent nested attributes clear previously-nested state
        if m.metrics().is_none() {
            self.metrics.clear();
        }
        if m.via().is_none() {
            self.via.clear();
        }
    }
}

/// Changed-parts summary of a transaction relative to its snapshot. The
/// lifecycle scope is excluded: a pure scope change never reaches the
/// authority by itself.
#[derive(Debug, Clone)]
pub struct StateDiff {
    pub fields: FieldDiff,
    pub metrics_changed: bool,
    pub encap_changed: bool,
    pub via_changed: bool,
    pub multipath_changed: bool,
}

impl StateDiff {
    pub fn between(tx: &RouteState, snapshot: &RouteState) -> StateDiff {
        StateDiff {
            fields: FieldMap::diff(&tx.fields, &snapshot.fields),
            metrics_changed: tx.metrics != snapshot.metrics,
            encap_changed: tx.encap != snapshot.encap,
            via_changed: tx.via != snapshot.via,
            multipath_changed: tx.multipath != snapshot.multipath,
        }
    }

    pub fn changed(&self) -> bool {
        self.fields.changed()
            || self.metrics_changed
            || self.encap_changed
            || self.via_changed
            || self.multipath_changed
    }
}

/// Text name for a numeric encapsulation type (LWTUNNEL_ENCAP_*).
pub fn encap_type_name(t: u32) -> String {
    match t {
        1 => "mpls".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{MplsLabel, RouteAttr, RouteEvent, AF_INET};

    #[test]
    fn test_value_truthiness() {
        assert!(!Value::U32(0).is_truthy());
        assert!(Value::U32(1).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::Str("x".into()).is_truthy());
        assert!(!Value::Labels(vec![]).is_truthy());
    }

    #[test]
    fn test_field_diff() {
        let mut a = FieldMap::new();
        a.set(Field::Dst, "10.0.0.0/24");
        a.set(Field::Priority, 10u32);
        let mut b = FieldMap::new();
        b.set(Field::Dst, "10.0.0.0/24");
        b.set(Field::Gateway, "192.168.1.1");

        let diff = FieldMap::diff(&a, &b);
        assert_eq!(diff.set, vec![(Field::Priority, Value::U32(10))]);
        assert_eq!(diff.cleared, vec![Field::Gateway]);
        assert!(diff.changed());

        let noop = FieldMap::diff(&b, &b);
        assert!(!noop.changed());
    }

    #[test]
    fn test_encap_normalize() {
        let e = Encap::normalize(None, LabelInput::Stack(vec![16, 17]));
        assert_eq!(e.etype.as_deref(), Some("mpls"));
        assert_eq!(e.labels.as_deref(), Some("16/17"));

        let e = Encap::normalize(Some("mpls"), LabelInput::Text("200".into()));
        assert_eq!(e.labels.as_deref(), Some("200"));
    }

    #[test]
    fn test_merge_message_basic() {
        let m = RouteMessage::new(RouteEvent::NewRoute, AF_INET)
            .with_dst("10.0.0.0", 24)
            .with_attr(RouteAttr::Gateway("192.168.1.1".into()))
            .with_attr(RouteAttr::Oif(2));
        let mut state = RouteState::new();
        state.merge_message(&m);

        assert_eq!(state.scope, Some(RouteScope::System));
        assert_eq!(state.fields.get_str(Field::Dst), Some("10.0.0.0/24"));
        assert_eq!(state.fields.get_str(Field::Gateway), Some("192.168.1.1"));
        assert_eq!(state.fields.get_u32(Field::Oif), Some(2));
    }

    #[test]
    fn test_merge_message_clears_stale_nested() {
        let mut state = RouteState::new();
        state.metrics.set(MetricField::Mtu, 1400);
        state.encap.labels = Some("16".into());
        state.encap.etype = Some("mpls".into());
        state.via.addr = Some("10.1.1.1".into());

        let m = RouteMessage::new(RouteEvent::NewRoute, AF_INET).with_dst("10.0.0.0", 24);
        state.merge_message(&m);

        assert!(state.metrics.is_empty());
        assert!(!state.encap.any_set());
        assert!(!state.via.any_set());
    }

    #[test]
    fn test_merge_message_mpls_dst_is_label() {
        let m = RouteMessage::new(RouteEvent::NewRoute, AF_MPLS).with_mpls_dst(100);
        let mut state = RouteState::new();
        state.merge_message(&m);
        assert_eq!(state.fields.get_u32(Field::Dst), Some(100));
    }

    #[test]
    fn test_merge_message_encap_type_folds_into_nested() {
        let m = RouteMessage::new(RouteEvent::NewRoute, AF_INET)
            .with_dst("10.0.0.0", 24)
            .with_attr(RouteAttr::EncapType(1))
            .with_attr(RouteAttr::Encap(vec![MplsLabel::new(16), MplsLabel::new(17)]));
        let mut state = RouteState::new();
        state.merge_message(&m);
        assert_eq!(state.encap.etype.as_deref(), Some("mpls"));
        assert_eq!(state.encap.labels.as_deref(), Some("16/17"));
        assert!(state.fields.get(Field::EncapType).is_none());
    }
}
