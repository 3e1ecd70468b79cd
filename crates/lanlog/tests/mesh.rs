//! Multi-device scenarios driven by hand over the in-memory network.

use std::collections::BTreeSet;
use std::sync::Arc;

use lanlog::core::{DeviceId, HandshakeInfo, HandshakeMessage, SyncRequest, SyncRequestItem};
use lanlog::store::{LogStore, MemoryStore};
use lanlog::sync::{
    summarize, verify_all_logs, LocalIdentity, MemoryNetwork, MemoryTransport, RequestOutcome,
    SyncConfig, SyncEngine, SyncInfoMessage, Transport, WireMessage,
};
use lanlog_testkit::fixtures::{device, log, placeholder, record, seed_log};
use lanlog_testkit::{CountingStore, TestMesh};

#[tokio::test]
async fn test_three_devices_converge() {
    let mut mesh = TestMesh::new();
    let a = mesh.add_device("A").await;
    let b = mesh.add_device("B").await;
    let c = mesh.add_device("C").await;

    seed_log(mesh.store(a), "A", 1..=10).await;
    seed_log(mesh.store(a), "B", 1..=5).await;
    seed_log(mesh.store(a), "C", 1..=6).await;

    seed_log(mesh.store(b), "A", 1..=5).await;
    seed_log(mesh.store(b), "B", 1..=10).await;
    seed_log(mesh.store(b), "C", 1..=4).await;

    seed_log(mesh.store(c), "B", 1..=3).await;
    seed_log(mesh.store(c), "C", 1..=10).await;

    mesh.start_all().await;
    mesh.settle().await;

    for idx in [a, b, c] {
        let store = mesh.store(idx);
        for user in ["A", "B", "C"] {
            let summary = summarize(store, &log(user)).await.unwrap();
            assert_eq!(summary.head, 10, "device {idx} log {user}");
            assert!(summary.is_complete(), "device {idx} log {user}: {summary:?}");
        }
        assert_eq!(store.len(), 30);
    }

    for other in [b, c] {
        let results = verify_all_logs(mesh.store(a), mesh.store(other)).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|(_, r)| r.is_converged()), "{results:?}");
    }
}

#[tokio::test]
async fn test_behind_device_asks_ahead_device_only() {
    let mut mesh = TestMesh::new();
    let a = mesh.add_device("A").await;
    let b = mesh.add_device("B").await;
    seed_log(mesh.store(a), "A", 1..=10).await;
    seed_log(mesh.store(b), "A", 1..=5).await;

    mesh.start_all().await;
    mesh.pump().await;

    let report_a = mesh.engine(a).close_round().await.unwrap();
    let report_b = mesh.engine(b).close_round().await.unwrap();
    assert_eq!(report_a.asks, 0);
    assert_eq!(report_b.asks, 1);

    let WireMessage::SyncRequest(req) = pending_on(mesh.engine(a)).pop().unwrap() else {
        panic!("expected a sync request");
    };
    assert_eq!(req.target_device_id, device("A"));
    assert_eq!(req.items[0].starting_sequence, 6);
    assert_eq!(req.items[0].ending_sequence, 10);
}

/// Decode everything queued for `engine` without handling it.
fn pending_on(engine: &lanlog_testkit::MeshEngine) -> Vec<WireMessage> {
    std::iter::from_fn(|| engine.transport().try_recv())
        .map(|i| WireMessage::decode(&i.payload).unwrap())
        .collect()
}

#[tokio::test]
async fn test_gap_repair_across_devices() {
    let mut mesh = TestMesh::new();
    let a = mesh.add_device("A").await;
    let b = mesh.add_device("B").await;
    seed_log(mesh.store(a), "A", 1..=6).await;
    mesh.start_all().await;
    mesh.pump().await;
    mesh.close_rounds().await;
    // Drop B's request on the floor; deliver only a partial copy instead.
    pending_on(mesh.engine(a));
    let partial = SyncInfoMessage::new(vec![record("A", 1), record("A", 2), record("A", 5)]);
    mesh.engine(b).handle_sync_info(partial).await.unwrap();

    let missing = mesh.store(b).missing_below(&log("A"), 5).await.unwrap();
    assert_eq!(missing, [3, 4].into_iter().collect::<BTreeSet<u64>>());

    mesh.settle().await;
    let summary = summarize(mesh.store(b), &log("A")).await.unwrap();
    assert_eq!(summary.head, 6);
    assert!(summary.is_complete());
    assert!(mesh.engine(b).is_accepted(&log("A").key(6)));
}

async fn counting_engine() -> (
    SyncEngine<CountingStore<MemoryStore>, MemoryTransport>,
    Arc<MemoryNetwork>,
) {
    let network = MemoryNetwork::new();
    let transport = network.create_transport("E-device").await;
    transport.join().await.unwrap();
    let engine = SyncEngine::new(
        LocalIdentity::new("E", "E-device"),
        Arc::new(CountingStore::new(MemoryStore::new())),
        Arc::new(transport),
        SyncConfig::default(),
    );
    (engine, network)
}

#[tokio::test]
async fn test_foreign_request_never_touches_store() {
    let (engine, _network) = counting_engine().await;
    seed_log(&**engine.store(), "A", 1..=5).await;
    engine.store().reset();

    let item = SyncRequestItem::from_ask(&HandshakeInfo::ask(&log("A"), 1, 5, &device("X")));
    let request = SyncRequest {
        target_device_id: DeviceId::from("X-device"),
        items: vec![item],
    };
    let payload = WireMessage::from(request).encode().unwrap();

    let dispatched = engine.handle_payload(&payload, "peer").await.unwrap();
    assert_eq!(
        dispatched,
        lanlog::sync::Dispatched::SyncRequest(RequestOutcome::Unaddressed)
    );
    assert_eq!(engine.store().counts().total(), 0);
}

#[tokio::test]
async fn test_failed_insert_is_not_accepted() {
    let (engine, _network) = counting_engine().await;
    engine.store().fail_inserts(true);

    let report = engine
        .handle_sync_info(SyncInfoMessage::new(vec![record("A", 1), record("B", 1)]))
        .await
        .unwrap();
    assert_eq!(report.failed, 2);
    assert_eq!(report.accepted, 0);
    assert!(!engine.is_accepted(&log("A").key(1)));
    assert!(!engine.is_accepted(&log("B").key(1)));

    engine.store().fail_inserts(false);
    let report = engine
        .handle_sync_info(SyncInfoMessage::new(vec![record("A", 1)]))
        .await
        .unwrap();
    assert_eq!(report.accepted, 1);
    assert!(engine.is_accepted(&log("A").key(1)));
}

#[tokio::test]
async fn test_window_limits_what_is_asked() {
    let mut mesh = TestMesh::with_config(SyncConfig {
        round_window_ms: 24 * 60 * 60 * 1000,
        sync_window: 10,
        ..SyncConfig::default()
    });
    let a = mesh.add_device("A").await;
    let b = mesh.add_device("B").await;
    seed_log(mesh.store(a), "A", 1..=25).await;

    mesh.start_all().await;
    mesh.settle().await;

    let summary = summarize(mesh.store(b), &log("A")).await.unwrap();
    assert_eq!(summary.head, 25);
    assert_eq!(summary.records, 10);
    // The first record received left a window of placeholders below it,
    // which the next round abandoned and sealed.
    assert_eq!(summary.missing, (6..=15).collect::<BTreeSet<u64>>());
    assert_eq!(mesh.store(b).point_lookup(&log("A"), 5).await.unwrap(), None);
    assert!(mesh.engine(b).is_accepted(&log("A").key(25)));
}

#[tokio::test]
async fn test_late_copy_of_abandoned_record_replaces_placeholder() {
    let mut mesh = TestMesh::with_config(SyncConfig {
        round_window_ms: 24 * 60 * 60 * 1000,
        sync_window: 10,
        ..SyncConfig::default()
    });
    let b = mesh.add_device("B").await;
    let engine = mesh.engine(b);
    let store = mesh.store(b);
    seed_log(store, "A", (1..=2).chain(5..=25)).await;
    for seq in 3..=4 {
        store.insert_if_absent(&placeholder("A", seq, "B-device")).await.unwrap();
    }
    engine.rebuild_accepted().await.unwrap();
    engine.transport().join().await.unwrap();

    engine
        .handle_handshake(HandshakeMessage::new(
            device("A"),
            vec![HandshakeInfo::new(&log("A"), 25)],
            false,
        ))
        .await
        .unwrap();
    let report = engine.close_round().await.unwrap();
    assert_eq!(report.abandoned.len(), 1);

    let report = engine
        .handle_sync_info(SyncInfoMessage::new(vec![record("A", 4)]))
        .await
        .unwrap();
    assert_eq!(report.out_of_sync, 1);
    let at4 = store.point_lookup(&log("A"), 4).await.unwrap().unwrap();
    assert!(!at4.is_placeholder());
}
