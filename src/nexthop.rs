//! Multipath nexthop set.
//!
//! An insertion-ordered set of nexthop segments keyed by their structural
//! key. Membership is structural: two payloads with the same key are the
//! same hop, and adding a hop displaces any existing hop that differs only
//! in fields the authority fills in later.

use crate::error::{Result, RouteDbError};
use crate::key::NhKey;
use crate::ordered::OrderedMap;
use crate::state::NextHop;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NextHopSet {
    inner: OrderedMap<NhKey, NextHop>,
}

impl NextHopSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains_key(&self, key: &NhKey) -> bool {
        self.inner.contains_key(key)
    }

    pub fn get(&self, key: &NhKey) -> Option<&NextHop> {
        self.inner.get(key)
    }

    /// Adds a segment, returning its key. An existing segment whose key
    /// matches on the required fields is displaced first, so a
    /// spec-level hop and its authority-confirmed form never coexist.
    pub fn add(&mut self, hop: NextHop) -> NhKey {
        let key = hop.key();
        let prefix = key.required_prefix();
        let displaced: Vec<NhKey> = self
            .inner
            .keys()
            .filter(|k| k.required_prefix() == prefix)
            .cloned()
            .collect();
        for k in &displaced {
            self.inner.remove(k);
        }
        self.inner.insert(key.clone(), hop);
        key
    }

    /// Removes the segment matching `spec`: by exact key first, then by the
    /// first segment agreeing with `spec` on every field the caller set.
    pub fn remove(&mut self, spec: &NextHop) -> Result<NextHop> {
        let key = spec.key();
        if let Some(hop) = self.inner.remove(&key) {
            return Ok(hop);
        }
        let found = self
            .inner
            .keys()
            .find(|candidate| key_subsumes(&key, candidate))
            .cloned();
        found
            .and_then(|k| self.inner.remove(&k))
            .ok_or(RouteDbError::NotFound)
    }

    /// Keys present here but not in `other`, in insertion order.
    pub fn diff_keys(&self, other: &NextHopSet) -> Vec<NhKey> {
        self.inner
            .keys()
            .filter(|k| !other.inner.contains_key(k))
            .cloned()
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &NhKey> {
        self.inner.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NhKey, &NextHop)> {
        self.inner.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &NextHop> {
        self.inner.values()
    }
}

/// Whether every field the caller set in `spec` agrees with `candidate`.
/// Unset (absent, empty or zero) fields in `spec` are wildcards.
fn key_subsumes(spec: &NhKey, candidate: &NhKey) -> bool {
    match (spec, candidate) {
        (NhKey::Ip(s), NhKey::Ip(c)) => {
            str_matches(&s.src, &c.src)
                && str_matches(&s.dst, &c.dst)
                && str_matches(&s.gateway, &c.gateway)
                && str_matches(&s.encap, &c.encap)
                && u32_matches(&s.iif, &c.iif)
                && u32_matches(&s.oif, &c.oif)
        }
        (NhKey::Mpls(s), NhKey::Mpls(c)) => {
            (s.newdst.is_empty() || s.newdst == c.newdst)
                && str_matches(&s.via, &c.via)
                && u32_matches(&s.oif, &c.oif)
        }
        _ => false,
    }
}

fn str_matches(spec: &Option<String>, candidate: &Option<String>) -> bool {
    match spec.as_deref() {
        None | Some("") => true,
        Some(v) => candidate.as_deref() == Some(v),
    }
}

fn u32_matches(spec: &Option<u32>, candidate: &Option<u32>) -> bool {
    match spec {
        None | Some(0) => true,
        Some(v) => candidate == &Some(*v),
    }
}
