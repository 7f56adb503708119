//! Structural route and nexthop keys.
//!
//! A key identifies a route's equivalence class independently of its mutable
//! payload. Ordinary routes key on `(src, dst, gateway, encap, iif, oif)`
//! where the first four fields are always compared and the interface indices
//! only participate once the authority has assigned them. MPLS routes key on
//! the destination label, MPLS nexthops on `(newdst, via, oif)`.

use crate::msg::{RouteMessage, AF_MPLS};
use crate::state::{Field, NextHop, RouteState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Universal key of an ordinary (address-family) route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteKey {
    pub src: Option<String>,
    pub dst: Option<String>,
    pub gateway: Option<String>,
    pub encap: Option<String>,
    pub iif: Option<u32>,
    pub oif: Option<u32>,
}

impl RouteKey {
    /// The key with the optional interface indices cleared; used as the
    /// fallback lookup for routes the authority has not yet identified.
    pub fn required_prefix(&self) -> RouteKey {
        RouteKey {
            src: self.src.clone(),
            dst: self.dst.clone(),
            gateway: self.gateway.clone(),
            encap: self.encap.clone(),
            iif: None,
            oif: None,
        }
    }

    /// Key of a decoded authority message.
    pub fn from_message(m: &RouteMessage) -> RouteKey {
        let src = m.src().map(|s| format!("{}/{}", s, m.src_len));
        let dst = Some(m.dst_spec());
        let gateway = m.gateway().map(str::to_string);
        // encap participates only for MPLS-compatible encapsulation
        let encap = if m.encap_type() == Some(1) {
            m.encap().map(crate::msg::join_labels)
        } else {
            None
        };
        RouteKey {
            src,
            dst,
            gateway,
            encap,
            iif: m.iif(),
            oif: m.oif(),
        }
    }

    /// Key of a route state (current values or a transaction).
    ///
    /// When the route has exactly one multipath segment, an absent gateway
    /// or encap inherits that segment's, so a single-hop route and its
    /// inline-gateway equivalent share a key.
    pub fn from_state(state: &RouteState) -> RouteKey {
        let single = if state.multipath.len() == 1 {
            state.multipath.values().next()
        } else {
            None
        };

        let gateway = match state.fields.get_str(Field::Gateway) {
            Some(g) if !g.is_empty() => Some(g.to_string()),
            _ => single.and_then(|nh| nh.fields.get_str(Field::Gateway).map(str::to_string)),
        };
        let encap = match state.encap.labels.as_deref() {
            Some(l) if !l.is_empty() => Some(l.to_string()),
            _ => single.and_then(|nh| nh.encap.labels.clone()),
        };

        RouteKey {
            src: state.fields.get_str(Field::Src).map(str::to_string),
            dst: state.fields.get_str(Field::Dst).map(str::to_string),
            gateway,
            encap,
            iif: state.fields.get_u32(Field::Iif),
            oif: state.fields.get_u32(Field::Oif),
        }
    }

    /// Key of one multipath segment payload. Segments never inherit.
    pub fn from_hop(hop: &NextHop) -> RouteKey {
        RouteKey {
            src: hop.fields.get_str(Field::Src).map(str::to_string),
            dst: hop.fields.get_str(Field::Dst).map(str::to_string),
            gateway: hop.fields.get_str(Field::Gateway).map(str::to_string),
            encap: hop.encap.labels.clone(),
            iif: hop.fields.get_u32(Field::Iif),
            oif: hop.fields.get_u32(Field::Oif),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map(|x| x.to_string()).unwrap_or_else(|| "-".into())
        }
        write!(
            f,
            "{}|{}|{}|{}|{}|{}",
            opt(&self.src),
            opt(&self.dst),
            opt(&self.gateway),
            opt(&self.encap),
            opt(&self.iif),
            opt(&self.oif)
        )
    }
}

/// Key of an MPLS multipath nexthop, which has no destination of its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MplsNhKey {
    pub newdst: Vec<u32>,
    pub via: Option<String>,
    pub oif: Option<u32>,
}

impl MplsNhKey {
    /// The key with the optional output interface cleared.
    pub fn required_prefix(&self) -> MplsNhKey {
        MplsNhKey {
            newdst: self.newdst.clone(),
            via: self.via.clone(),
            oif: None,
        }
    }

    pub fn from_hop(hop: &NextHop) -> MplsNhKey {
        let newdst = hop
            .fields
            .get(Field::NewDst)
            .and_then(|v| v.as_labels())
            .map(|l| l.to_vec())
            .unwrap_or_default();
        MplsNhKey {
            newdst,
            via: hop.via.addr.clone(),
            oif: hop.fields.get_u32(Field::Oif),
        }
    }
}

impl fmt::Display for MplsNhKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<String> = self.newdst.iter().map(|l| l.to_string()).collect();
        write!(
            f,
            "{}@{}",
            labels.join("/"),
            self.via.as_deref().unwrap_or("-")
        )?;
        if let Some(oif) = self.oif {
            write!(f, "%{}", oif)?;
        }
        Ok(())
    }
}

/// Key of an MPLS route: its destination label, or the nexthop triple for
/// segments without an explicit label chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MplsKey {
    Label(u32),
    Nexthop(MplsNhKey),
}

impl MplsKey {
    pub fn from_message(m: &RouteMessage) -> MplsKey {
        if let Some(first) = m.mpls_dst().and_then(|stack| stack.first()) {
            return MplsKey::Label(first.label);
        }
        MplsKey::Nexthop(MplsNhKey {
            newdst: m
                .newdst()
                .map(|stack| stack.iter().map(|l| l.label).collect())
                .unwrap_or_default(),
            via: m.via().map(|(_, addr)| addr.to_string()),
            oif: m.oif(),
        })
    }

    pub fn from_state(state: &RouteState) -> MplsKey {
        match state.fields.get(Field::Dst) {
            Some(v) => {
                if let Some(label) = v.as_u32() {
                    return MplsKey::Label(label);
                }
                if let Some(first) = v.as_labels().and_then(|l| l.first()) {
                    return MplsKey::Label(*first);
                }
                MplsKey::nexthop_of(state)
            }
            None => MplsKey::nexthop_of(state),
        }
    }

    fn nexthop_of(state: &RouteState) -> MplsKey {
        MplsKey::Nexthop(MplsNhKey {
            newdst: state
                .fields
                .get(Field::NewDst)
                .and_then(|v| v.as_labels())
                .map(|l| l.to_vec())
                .unwrap_or_default(),
            via: state.via.addr.clone(),
            oif: state.fields.get_u32(Field::Oif),
        })
    }
}

impl fmt::Display for MplsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MplsKey::Label(l) => write!(f, "label:{}", l),
            MplsKey::Nexthop(nh) => write!(f, "nh:{}", nh),
        }
    }
}

/// Key of one entry in a multipath nexthop set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NhKey {
    Ip(RouteKey),
    Mpls(MplsNhKey),
}

impl NhKey {
    /// Derives the key of a segment payload; the address family selects
    /// the key model.
    pub fn of(hop: &NextHop) -> NhKey {
        if hop.family() == AF_MPLS {
            NhKey::Mpls(MplsNhKey::from_hop(hop))
        } else {
            NhKey::Ip(RouteKey::from_hop(hop))
        }
    }

    /// Required-field prefix with the optional suffix cleared.
    pub fn required_prefix(&self) -> NhKey {
        match self {
            NhKey::Ip(k) => NhKey::Ip(k.required_prefix()),
            NhKey::Mpls(k) => NhKey::Mpls(k.required_prefix()),
        }
    }
}

/// Key of one entry in a routing table index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKey {
    Ip(RouteKey),
    Mpls(MplsKey),
}

impl IndexKey {
    pub fn of_state(state: &RouteState) -> IndexKey {
        if state.is_mpls() {
            IndexKey::Mpls(MplsKey::from_state(state))
        } else {
            IndexKey::Ip(RouteKey::from_state(state))
        }
    }

    pub fn of_message(m: &RouteMessage) -> IndexKey {
        if m.family == AF_MPLS {
            IndexKey::Mpls(MplsKey::from_message(m))
        } else {
            IndexKey::Ip(RouteKey::from_message(m))
        }
    }

    /// Partial-match form, when one exists (ordinary routes only).
    pub fn required_prefix(&self) -> Option<IndexKey> {
        match self {
            IndexKey::Ip(k) => Some(IndexKey::Ip(k.required_prefix())),
            IndexKey::Mpls(_) => None,
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Ip(k) => write!(f, "{}", k),
            IndexKey::Mpls(k) => write!(f, "{}", k),
        }
    }
}
