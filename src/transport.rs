//! Authority transport seam.
//!
//! Commits never talk to the kernel directly; they hand a declarative
//! request to a [`RouteTransport`] implementation. Tests plug in a mock,
//! production wires in a netlink-backed transport.

use crate::error::Result;
use crate::msg::RouteMessage;
use crate::state::{Encap, FieldMap, Metrics, NextHop, RouteState, Via};

/// Kind of change requested from the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOp {
    /// Create a route the authority does not know yet.
    Add,
    /// Replace an existing route's payload.
    Set,
    /// Delete an existing route.
    Delete,
}

/// Declarative payload of one authority request: the desired route value,
/// stripped of mirror-local bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteRequest {
    pub fields: FieldMap,
    pub metrics: Metrics,
    pub encap: Encap,
    pub via: Via,
    pub multipath: Vec<NextHop>,
}

impl RouteRequest {
    pub fn from_state(state: &RouteState) -> RouteRequest {
        RouteRequest {
            fields: state.fields.clone(),
            metrics: state.metrics.clone(),
            encap: state.encap.clone(),
            via: state.via.clone(),
            multipath: state.multipath.values().cloned().collect(),
        }
    }

    pub fn from_fields(fields: FieldMap) -> RouteRequest {
        RouteRequest {
            fields,
            ..Default::default()
        }
    }
}

/// Interface to the routing authority.
pub trait RouteTransport: Send + Sync {
    /// Submits one route change. Returning `Ok` only means the authority
    /// accepted the request; the change is confirmed by a later broadcast.
    fn request(&self, op: RouteOp, req: &RouteRequest) -> Result<()>;

    /// Queries the authority for routes matching the given selector.
    fn query(&self, req: &RouteRequest) -> Result<Vec<RouteMessage>>;
}
