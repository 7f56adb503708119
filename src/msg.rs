//! Decoded route-message model.
//!
//! This is the boundary to the protocol decoder: the mirror core treats a
//! kernel route notification as a typed header plus a typed attribute list,
//! and never touches wire bytes. Wire encoding/decoding is out of scope.

use serde::{Deserialize, Serialize};

/// AF_INET.
pub const AF_INET: u32 = 2;
/// AF_INET6.
pub const AF_INET6: u32 = 10;
/// AF_MPLS.
pub const AF_MPLS: u32 = 28;

/// Default kernel routing table (RT_TABLE_MAIN).
pub const DEFAULT_TABLE: u32 = 254;
/// RT_TABLE_COMPAT: the real table id rides in the table attribute.
pub const COMPAT_TABLE: u32 = 252;

/// Kind of route notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteEvent {
    /// New or updated route (RTM_NEWROUTE).
    NewRoute,
    /// Route deleted (RTM_DELROUTE).
    DelRoute,
}

/// One MPLS label stack entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MplsLabel {
    pub label: u32,
    pub tc: u8,
    pub bos: u8,
    pub ttl: u8,
}

impl MplsLabel {
    /// Bottom-of-stack label with zeroed traffic class and TTL.
    pub fn new(label: u32) -> Self {
        Self {
            label,
            tc: 0,
            bos: 1,
            ttl: 0,
        }
    }
}

/// Metric attribute names (RTAX_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricField {
    Mtu,
    Window,
    Rtt,
    RttVar,
    Ssthresh,
    Cwnd,
    Advmss,
    Reordering,
    Hoplimit,
    InitCwnd,
    Features,
    RtoMin,
    InitRwnd,
    QuickAck,
}

/// A decoded route attribute (RTA_*).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RouteAttr {
    /// Destination address, without the prefix length (IP families).
    Dst(String),
    /// Destination label stack (MPLS family).
    MplsDst(Vec<MplsLabel>),
    /// Source address, without the prefix length.
    Src(String),
    Gateway(String),
    PrefSrc(String),
    Oif(u32),
    Iif(u32),
    Priority(u32),
    Table(u32),
    /// Encapsulation type (LWTUNNEL_ENCAP_*; 1 = MPLS).
    EncapType(u32),
    /// MPLS encapsulation label stack (MPLS_IPTUNNEL_DST).
    Encap(Vec<MplsLabel>),
    Metrics(Vec<(MetricField, u32)>),
    Via { family: u32, addr: String },
    NewDst(Vec<MplsLabel>),
    Multipath(Vec<NexthopMessage>),
}

/// One multipath segment of a route message (struct rtnexthop).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NexthopMessage {
    pub oif: u32,
    /// Hop weight ("hops" in the kernel struct).
    pub weight: u8,
    pub flags: u32,
    pub attrs: Vec<RouteAttr>,
}

impl NexthopMessage {
    pub fn new(oif: u32) -> Self {
        Self {
            oif,
            weight: 1,
            flags: 0,
            attrs: Vec::new(),
        }
    }

    pub fn with_weight(mut self, weight: u8) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_attr(mut self, attr: RouteAttr) -> Self {
        self.attrs.push(attr);
        self
    }

    pub fn gateway(&self) -> Option<&str> {
        self.attrs.iter().find_map(|a| match a {
            RouteAttr::Gateway(g) => Some(g.as_str()),
            _ => None,
        })
    }
}

/// A decoded route notification: fixed header fields plus attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteMessage {
    pub event: RouteEvent,
    pub family: u32,
    pub dst_len: u8,
    pub src_len: u8,
    pub tos: u8,
    pub table: u32,
    pub proto: u32,
    pub rtype: u32,
    pub rt_scope: u32,
    pub flags: u32,
    pub attrs: Vec<RouteAttr>,
}

impl RouteMessage {
    pub fn new(event: RouteEvent, family: u32) -> Self {
        Self {
            event,
            family,
            dst_len: 0,
            src_len: 0,
            tos: 0,
            table: DEFAULT_TABLE,
            proto: 0,
            rtype: 0,
            rt_scope: 0,
            flags: 0,
            attrs: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: u32) -> Self {
        self.table = table;
        self
    }

    pub fn with_dst(mut self, addr: &str, len: u8) -> Self {
        self.dst_len = len;
        self.attrs.push(RouteAttr::Dst(addr.to_string()));
        self
    }

    pub fn with_mpls_dst(mut self, label: u32) -> Self {
        self.attrs.push(RouteAttr::MplsDst(vec![MplsLabel::new(label)]));
        self
    }

    pub fn with_attr(mut self, attr: RouteAttr) -> Self {
        self.attrs.push(attr);
        self
    }

    /// Destination address attribute (IP families).
    pub fn dst(&self) -> Option<&str> {
        self.attrs.iter().find_map(|a| match a {
            RouteAttr::Dst(d) => Some(d.as_str()),
            _ => None,
        })
    }

    /// Destination label stack (MPLS family).
    pub fn mpls_dst(&self) -> Option<&[MplsLabel]> {
        self.attrs.iter().find_map(|a| match a {
            RouteAttr::MplsDst(l) => Some(l.as_slice()),
            _ => None,
        })
    }

    pub fn src(&self) -> Option<&str> {
        self.attrs.iter().find_map(|a| match a {
            RouteAttr::Src(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn gateway(&self) -> Option<&str> {
        self.attrs.iter().find_map(|a| match a {
            RouteAttr::Gateway(g) => Some(g.as_str()),
            _ => None,
        })
    }

    pub fn pref_src(&self) -> Option<&str> {
        self.attrs.iter().find_map(|a| match a {
            RouteAttr::PrefSrc(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn oif(&self) -> Option<u32> {
        self.attrs.iter().find_map(|a| match a {
            RouteAttr::Oif(v) => Some(*v),
            _ => None,
        })
    }

    pub fn iif(&self) -> Option<u32> {
        self.attrs.iter().find_map(|a| match a {
            RouteAttr::Iif(v) => Some(*v),
            _ => None,
        })
    }

    pub fn priority(&self) -> Option<u32> {
        self.attrs.iter().find_map(|a| match a {
            RouteAttr::Priority(v) => Some(*v),
            _ => None,
        })
    }

    pub fn table_attr(&self) -> Option<u32> {
        self.attrs.iter().find_map(|a| match a {
            RouteAttr::Table(v) => Some(*v),
            _ => None,
        })
    }

    pub fn encap_type(&self) -> Option<u32> {
        self.attrs.iter().find_map(|a| match a {
            RouteAttr::EncapType(v) => Some(*v),
            _ => None,
        })
    }

    pub fn encap(&self) -> Option<&[MplsLabel]> {
        self.attrs.iter().find_map(|a| match a {
            RouteAttr::Encap(l) => Some(l.as_slice()),
            _ => None,
        })
    }

    pub fn metrics(&self) -> Option<&[(MetricField, u32)]> {
        self.attrs.iter().find_map(|a| match a {
            RouteAttr::Metrics(m) => Some(m.as_slice()),
            _ => None,
        })
    }

    pub fn via(&self) -> Option<(u32, &str)> {
        self.attrs.iter().find_map(|a| match a {
            RouteAttr::Via { family, addr } => Some((*family, addr.as_str())),
            _ => None,
        })
    }

    pub fn newdst(&self) -> Option<&[MplsLabel]> {
        self.attrs.iter().find_map(|a| match a {
            RouteAttr::NewDst(l) => Some(l.as_slice()),
            _ => None,
        })
    }

    pub fn multipath(&self) -> Option<&[NexthopMessage]> {
        self.attrs.iter().find_map(|a| match a {
            RouteAttr::Multipath(m) => Some(m.as_slice()),
            _ => None,
        })
    }

    /// Destination rendered the way the mirror stores it: `"addr/len"`,
    /// `"default"` when absent.
    pub fn dst_spec(&self) -> String {
        match self.dst() {
            Some(addr) => format!("{}/{}", addr, self.dst_len),
            None => "default".to_string(),
        }
    }

    /// The table this message belongs to, honoring RT_TABLE_COMPAT.
    pub fn effective_table(&self) -> u32 {
        if self.table == COMPAT_TABLE {
            self.table_attr().unwrap_or(self.table)
        } else if self.table == 0 {
            DEFAULT_TABLE
        } else {
            self.table
        }
    }
}

/// Joins a label stack into the canonical `"16/17"` text form.
pub fn join_labels(labels: &[MplsLabel]) -> String {
    labels
        .iter()
        .map(|l| l.label.to_string())
        .collect::<Vec<_>>()
        .join("/")
}
