//! End-to-end commit protocol tests against a scripted mock transport.
//!
//! Each scenario plays the authority: the transport records requests and the
//! test feeds confirmation broadcasts back through `ingest` from a helper
//! thread while the commit blocks on its watchdog.

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use routedb::{
    Field, Filter, Lookup, MetricField, NextHopSpec, NexthopMessage, Result, RouteAttr,
    RouteDb, RouteDbError, RouteEvent, RouteMessage, RouteOp, RouteRequest, RouteScope,
    RouteSpec, RouteTransport, TableId, AF_INET,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct MockTransport {
    requests: Mutex<Vec<(RouteOp, RouteRequest)>>,
    fail_ops: Mutex<Vec<RouteOp>>,
    fail_once: Mutex<Vec<RouteOp>>,
    on_request: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    query_responses: Mutex<Vec<RouteMessage>>,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn fail_on(&self, op: RouteOp) {
        self.fail_ops.lock().push(op);
    }

    fn fail_once_on(&self, op: RouteOp) {
        self.fail_once.lock().push(op);
    }

    /// Runs `f` inside the next `request` call, before the scripted failure
    /// check. Used to drift the mirror while a commit is in flight.
    fn on_next_request(&self, f: impl FnOnce() + Send + 'static) {
        *self.on_request.lock() = Some(Box::new(f));
    }

    fn recorded(&self) -> Vec<(RouteOp, RouteRequest)> {
        self.requests.lock().clone()
    }
}

impl RouteTransport for MockTransport {
    fn request(&self, op: RouteOp, req: &RouteRequest) -> Result<()> {
        if let Some(hook) = self.on_request.lock().take() {
            hook();
        }
        let failed_once = {
            let mut once = self.fail_once.lock();
            once.iter().position(|o| *o == op).map(|i| once.remove(i))
        };
        if failed_once.is_some() || self.fail_ops.lock().contains(&op) {
            return Err(RouteDbError::Transport(format!("scripted {op:?} failure")));
        }
        self.requests.lock().push((op, req.clone()));
        Ok(())
    }

    fn query(&self, _req: &RouteRequest) -> Result<Vec<RouteMessage>> {
        Ok(self.query_responses.lock().clone())
    }
}

fn mirror(transport: Arc<MockTransport>) -> Arc<RouteDb> {
    Arc::new(RouteDb::new(transport).with_confirm_timeout(Duration::from_secs(2)))
}

/// Feeds `m` through ingestion from a helper thread once the commit has had
/// a chance to arm its watchdog.
fn confirm_later(db: &Arc<RouteDb>, m: RouteMessage) -> thread::JoinHandle<()> {
    let db = db.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        db.ingest(&m);
    })
}

fn base_msg(dst: &str) -> RouteMessage {
    RouteMessage::new(RouteEvent::NewRoute, AF_INET)
        .with_dst(dst, 24)
        .with_attr(RouteAttr::Gateway("192.168.1.1".into()))
}

#[test]
fn test_create_commit_confirm() {
    let transport = MockTransport::new();
    let db = mirror(transport.clone());

    let handle = db
        .add(RouteSpec::new().dst("10.0.0.0/24").gateway("192.168.1.1"))
        .unwrap();
    assert_eq!(handle.lock().scope(), Some(RouteScope::Create));

    // the confirmation carries the interface the authority picked
    let confirmation = base_msg("10.0.0.0").with_attr(RouteAttr::Oif(2));
    let feeder = confirm_later(&db, confirmation);

    db.commit(&handle).unwrap();
    feeder.join().unwrap();

    let recorded = transport.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, RouteOp::Add);

    let entry = handle.lock();
    assert_eq!(entry.scope(), Some(RouteScope::System));
    assert!(!entry.has_tx());
    assert_eq!(entry.current().fields.get_u32(Field::Oif), Some(2));
    drop(entry);

    // the index moved to the confirmed key, nothing was double-booked
    assert_eq!(db.keys(TableId::Id(254)).len(), 1);
}

#[test]
fn test_confirmation_without_new_fields_keeps_key() {
    let transport = MockTransport::new();
    let db = mirror(transport.clone());

    let handle = db
        .add(
            RouteSpec::new()
                .dst("10.0.0.0/24")
                .gateway("192.168.1.1")
                .table(254),
        )
        .unwrap();
    let staged_key = db.keys(TableId::Id(254))[0].clone();

    let feeder = confirm_later(&db, base_msg("10.0.0.0"));
    db.commit(&handle).unwrap();
    feeder.join().unwrap();

    assert_eq!(handle.lock().scope(), Some(RouteScope::System));
    // dst and gateway did not change, so the route was not re-indexed
    assert_eq!(db.keys(TableId::Id(254)), vec![staged_key]);
}

#[test]
fn test_set_commit_pushes_change() {
    let transport = MockTransport::new();
    let db = mirror(transport.clone());

    db.ingest(&base_msg("10.0.0.0"));
    let handle = db
        .describe(
            TableId::Id(254),
            &Lookup::Filter(Filter::Dst("10.0.0.0/24".into())),
        )
        .unwrap();

    handle.lock().set_field(Field::Priority, 20u32);
    let confirmation = base_msg("10.0.0.0").with_attr(RouteAttr::Priority(20));
    let feeder = confirm_later(&db, confirmation);

    db.commit(&handle).unwrap();
    feeder.join().unwrap();

    let recorded = transport.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, RouteOp::Set);
    assert_eq!(
        recorded[0].1.fields.get_u32(Field::Priority),
        Some(20)
    );
    assert_eq!(
        handle.lock().current().fields.get_u32(Field::Priority),
        Some(20)
    );
}

#[test]
fn test_noop_commit_sends_nothing() {
    let transport = MockTransport::new();
    let db = mirror(transport.clone());

    db.ingest(&base_msg("10.0.0.0"));
    let handle = db
        .describe(TableId::Id(254), &Lookup::Position(0))
        .unwrap();

    // open a transaction but change nothing
    handle.lock().begin();
    db.commit(&handle).unwrap();

    assert!(transport.recorded().is_empty());
    assert!(!handle.lock().has_tx());
}

#[test]
fn test_remove_commit_deletes_and_detaches() {
    let transport = MockTransport::new();
    let db = mirror(transport.clone());

    db.ingest(&base_msg("10.0.0.0"));
    let handle = db
        .describe(TableId::Id(254), &Lookup::Position(0))
        .unwrap();

    let mut deletion = base_msg("10.0.0.0");
    deletion.event = RouteEvent::DelRoute;
    let feeder = confirm_later(&db, deletion);

    db.remove(&handle).unwrap();
    feeder.join().unwrap();

    let recorded = transport.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, RouteOp::Delete);
    assert_eq!(handle.lock().scope(), Some(RouteScope::Detached));
    assert!(db.keys(TableId::Id(254)).is_empty());
}

#[test]
fn test_shadow_commit_retains_route() {
    let transport = MockTransport::new();
    let db = mirror(transport.clone());

    db.ingest(&base_msg("10.0.0.0"));
    let handle = db
        .describe(TableId::Id(254), &Lookup::Position(0))
        .unwrap();

    let mut deletion = base_msg("10.0.0.0");
    deletion.event = RouteEvent::DelRoute;
    let feeder = confirm_later(&db, deletion);

    handle.lock().shadow();
    db.commit(&handle).unwrap();
    feeder.join().unwrap();

    assert_eq!(handle.lock().scope(), Some(RouteScope::Shadow));
    // deleted from the authority, retained in the mirror
    assert_eq!(transport.recorded()[0].0, RouteOp::Delete);
    assert_eq!(db.keys(TableId::Id(254)).len(), 1);
}

#[test]
fn test_failed_set_rolls_back_and_reports() {
    let transport = MockTransport::new();
    let db = mirror(transport.clone());

    db.ingest(&base_msg("10.0.0.0"));
    let handle = db
        .describe(TableId::Id(254), &Lookup::Position(0))
        .unwrap();

    transport.fail_on(RouteOp::Set);
    handle.lock().set_field(Field::Priority, 20u32);

    let err = db.commit(&handle).unwrap_err();
    match err {
        RouteDbError::CommitFailed {
            op, transaction, ..
        } => {
            assert_eq!(op, RouteOp::Set);
            assert_eq!(transaction.fields.get_u32(Field::Priority), Some(20));
        }
        other => panic!("expected CommitFailed, got {other}"),
    }

    // nothing drifted, so the rollback was a no-op and state is untouched
    let entry = handle.lock();
    assert!(entry.current().fields.get_u32(Field::Priority).is_none());
    assert!(!entry.has_tx());
    assert_eq!(entry.scope(), Some(RouteScope::System));
}

#[test]
fn test_failed_set_restores_drifted_state() {
    let transport = MockTransport::new();
    let db = mirror(transport.clone());

    db.ingest(&base_msg("10.0.0.0"));
    let handle = db
        .describe(TableId::Id(254), &Lookup::Position(0))
        .unwrap();
    let snapshot_fields = handle.lock().current().fields.clone();

    handle.lock().set_field(Field::Priority, 20u32);

    // the authority moves under the commit: a broadcast lands between the
    // snapshot and the failing request, so the rollback has work to do
    let drift = base_msg("10.0.0.0").with_attr(RouteAttr::Priority(99));
    {
        let db = db.clone();
        transport.on_next_request(move || db.ingest(&drift));
    }
    transport.fail_once_on(RouteOp::Set);

    let feeder = confirm_later(&db, base_msg("10.0.0.0"));
    let err = db.commit(&handle).unwrap_err();
    feeder.join().unwrap();

    match err {
        RouteDbError::CommitFailed {
            op, transaction, ..
        } => {
            assert_eq!(op, RouteOp::Set);
            assert_eq!(transaction.fields.get_u32(Field::Priority), Some(20));
        }
        other => panic!("expected CommitFailed, got {other}"),
    }

    // the only request that got through is the restoring push, carrying the
    // pre-commit snapshot field for field
    let recorded = transport.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, RouteOp::Set);
    assert_eq!(recorded[0].1.fields, snapshot_fields);
    assert!(recorded[0].1.fields.get_u32(Field::Priority).is_none());
    assert!(!handle.lock().has_tx());
}

#[test]
fn test_failed_rollback_is_fatal() {
    let transport = MockTransport::new();
    let db = mirror(transport.clone());

    db.ingest(&base_msg("10.0.0.0"));
    let handle = db
        .describe(TableId::Id(254), &Lookup::Position(0))
        .unwrap();

    handle.lock().set_field(Field::Priority, 20u32);
    let drift = base_msg("10.0.0.0").with_attr(RouteAttr::Priority(99));
    {
        let db = db.clone();
        transport.on_next_request(move || db.ingest(&drift));
    }
    // every Set fails: the change and the restoring push alike
    transport.fail_on(RouteOp::Set);

    let err = db.commit(&handle).unwrap_err();
    assert!(matches!(err, RouteDbError::Fatal { .. }));
    assert!(transport.recorded().is_empty());
    assert!(!handle.lock().has_tx());
}

#[test]
fn test_failed_add_invalidates_route() {
    let transport = MockTransport::new();
    let db = mirror(transport.clone());

    transport.fail_on(RouteOp::Add);
    let handle = db
        .add(RouteSpec::new().dst("10.0.0.0/24").gateway("192.168.1.1"))
        .unwrap();

    let err = db.commit(&handle).unwrap_err();
    assert!(matches!(
        err,
        RouteDbError::CommitFailed {
            op: RouteOp::Add,
            ..
        }
    ));
    assert_eq!(handle.lock().scope(), Some(RouteScope::Invalid));
    assert!(db.keys(TableId::Id(254)).is_empty());
}

#[test]
fn test_key_move_refuses_double_booking() {
    let transport = MockTransport::new();
    let db = mirror(transport.clone());

    db.ingest(&base_msg("10.0.0.0"));
    db.ingest(
        &RouteMessage::new(RouteEvent::NewRoute, AF_INET)
            .with_dst("10.0.0.0", 24)
            .with_attr(RouteAttr::Gateway("192.168.1.2".into()))
            .with_attr(RouteAttr::Oif(3)),
    );
    assert_eq!(db.keys(TableId::Id(254)).len(), 2);

    // steer the first route onto the second route's key
    let handle = db
        .describe(TableId::Id(254), &Lookup::Position(0))
        .unwrap();
    {
        let mut entry = handle.lock();
        entry.set_field(Field::Gateway, "192.168.1.2");
        entry.set_field(Field::Oif, 3u32);
    }

    let err = db.commit(&handle).unwrap_err();
    match err {
        RouteDbError::CommitFailed { source, .. } => {
            assert!(matches!(*source, RouteDbError::KeyConflict(_)));
        }
        other => panic!("expected CommitFailed, got {other}"),
    }

    // no request ever left, both routes are still indexed
    assert!(transport.recorded().is_empty());
    assert_eq!(db.keys(TableId::Id(254)).len(), 2);
}

#[test]
fn test_routes_differing_only_in_interface_stay_distinct() {
    let transport = MockTransport::new();
    let db = mirror(transport.clone());

    db.ingest(&base_msg("10.0.0.0").with_attr(RouteAttr::Oif(2)));
    db.ingest(&base_msg("10.0.0.0").with_attr(RouteAttr::Oif(3)));

    let keys = db.keys(TableId::Id(254));
    assert_eq!(keys.len(), 2);
    for (key, oif) in keys.iter().zip([2u32, 3]) {
        let handle = db
            .describe(TableId::Id(254), &Lookup::Key(key.clone()))
            .unwrap();
        assert_eq!(
            handle.lock().current().fields.get_u32(Field::Oif),
            Some(oif)
        );
    }
}

#[test]
fn test_multipath_commit_and_shrink() {
    let transport = MockTransport::new();
    let db = mirror(transport.clone());

    let handle = db
        .add(
            RouteSpec::new()
                .dst("172.16.0.0/24")
                .nexthop(NextHopSpec::new().gateway("10.0.0.1").weight(10))
                .nexthop(NextHopSpec::new().gateway("10.0.0.2").weight(20)),
        )
        .unwrap();

    let two_hops = RouteMessage::new(RouteEvent::NewRoute, AF_INET)
        .with_dst("172.16.0.0", 24)
        .with_attr(RouteAttr::Multipath(vec![
            NexthopMessage::new(1)
                .with_weight(10)
                .with_attr(RouteAttr::Gateway("10.0.0.1".into())),
            NexthopMessage::new(2)
                .with_weight(20)
                .with_attr(RouteAttr::Gateway("10.0.0.2".into())),
        ]));
    let feeder = confirm_later(&db, two_hops);
    db.commit(&handle).unwrap();
    feeder.join().unwrap();

    assert_eq!(recorded_multipath_len(&transport), 2);
    assert_eq!(handle.lock().current().multipath.len(), 2);

    // the authority drops one segment: the set is replaced, not merged
    let one_hop = RouteMessage::new(RouteEvent::NewRoute, AF_INET)
        .with_dst("172.16.0.0", 24)
        .with_attr(RouteAttr::Multipath(vec![NexthopMessage::new(1)
            .with_weight(10)
            .with_attr(RouteAttr::Gateway("10.0.0.1".into()))]));
    db.ingest(&one_hop);
    assert_eq!(handle.lock().current().multipath.len(), 1);
}

fn recorded_multipath_len(transport: &MockTransport) -> usize {
    transport.recorded()[0].1.multipath.len()
}

#[test]
fn test_metrics_cleanup_forces_request() {
    let transport = MockTransport::new();
    let db = mirror(transport.clone());

    db.ingest(
        &base_msg("10.0.0.0").with_attr(RouteAttr::Metrics(vec![(MetricField::Mtu, 1400)])),
    );
    let handle = db
        .describe(TableId::Id(254), &Lookup::Position(0))
        .unwrap();
    assert_eq!(
        handle.lock().current().metrics.get(MetricField::Mtu),
        Some(1400)
    );

    // clear every metric; the scalar diff is empty but the commit must
    // still reach the authority
    handle.lock().tx_mut().metrics.clear();
    let feeder = confirm_later(&db, base_msg("10.0.0.0"));
    db.commit(&handle).unwrap();
    feeder.join().unwrap();

    let recorded = transport.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, RouteOp::Set);
    assert!(handle.lock().current().metrics.is_empty());
}

#[test]
fn test_gc_expires_unconfirmed_routes() {
    let transport = MockTransport::new();
    let db = mirror(transport.clone());

    db.ingest(&base_msg("10.0.0.0"));
    db.mark_stale();
    assert!(db.keys(TableId::Id(254)).is_empty());

    // the authority no longer knows the route: gc drops it for good
    db.gc();
    assert!(db.keys(TableId::Id(254)).is_empty());
    assert!(db
        .describe(TableId::Id(254), &Lookup::Position(0))
        .is_err());
}

#[test]
fn test_gc_reconfirms_live_routes() {
    let transport = MockTransport::new();
    let db = mirror(transport.clone());

    db.ingest(&base_msg("10.0.0.0"));
    db.mark_stale();
    transport.query_responses.lock().push(base_msg("10.0.0.0"));

    db.gc();
    let keys = db.keys(TableId::Id(254));
    assert_eq!(keys.len(), 1);
    let handle = db
        .describe(TableId::Id(254), &Lookup::Key(keys[0].clone()))
        .unwrap();
    assert_eq!(handle.lock().scope(), Some(RouteScope::System));
}
