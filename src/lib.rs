//! routedb - Transactional Route Table Mirror
//!
//! An in-process mirror of the kernel IP routing tables with transactional
//! write access. The mirror stays consistent by ingesting the authority's
//! route broadcasts; local changes are staged on per-route transactions and
//! pushed through a commit protocol that waits for the authority to confirm
//! each change before declaring it done.
//!
//! # Architecture
//!
//! ```text
//! [decoder] ──> RouteDb::ingest ──> RoutingTable ──> RouteEntry
//!                      │                                 │
//!                      ↓                                 ↓
//!               WatchdogRegistry <── commit <── transaction
//!                                      │
//!                                      ↓
//!                               RouteTransport
//! ```
//!
//! # Key Components
//!
//! - [`RouteDb`]: the table set, ingestion dispatch and commit protocol
//! - [`RoutingTable`]: one kernel table's keyed route index
//! - [`RouteEntry`]: one route's live state plus its open transaction
//! - [`RouteTransport`]: the seam to the routing authority

pub mod db;
pub mod error;
pub mod key;
pub mod msg;
pub mod nexthop;
pub mod ordered;
pub mod route;
pub mod state;
pub mod table;
pub mod transport;
pub mod watchdog;

pub use db::{NextHopSpec, RouteDb, RouteSpec, TableId};
pub use error::{Result, RouteDbError};
pub use key::{IndexKey, MplsKey, MplsNhKey, NhKey, RouteKey};
pub use msg::{
    MetricField, MplsLabel, NexthopMessage, RouteAttr, RouteEvent, RouteMessage, AF_INET,
    AF_INET6, AF_MPLS, DEFAULT_TABLE,
};
pub use nexthop::NextHopSet;
pub use route::RouteEntry;
pub use state::{
    Encap, Field, FieldMap, LabelInput, Metrics, NextHop, RouteScope, RouteState, Value, Via,
};
pub use table::{Filter, Lookup, RouteHandle, RoutingTable, TableKind};
pub use transport::{RouteOp, RouteRequest, RouteTransport};
pub use watchdog::{Watchdog, WatchdogRegistry};
