//! End-to-end tests of the topology operations against a real database and
//! the mock executor.

use brickyard_core::api::{
    DeviceAddRequest, NodeAddRequest, VolumeCreateRequest, VolumeExpandRequest,
};
use brickyard_core::app::KIB_PER_GIB;
use brickyard_core::entries::{HostNames, ENTITY_TABLES};
use brickyard_core::{
    App, EntryState, ErrorKind, HealthState, Lifecycle, PollOutcome, ScheduledOperation,
};
use brickyard_executor::{BrickInfo, ExecutorError, MockConfig, MockExecutor, MOCK_DEVICE_SIZE_KIB};
use brickyard_store::{ClusterId, Db, DeviceId, NodeId, VolumeId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

struct Fixture {
    dir: TempDir,
    app: App,
    mock: Arc<MockExecutor>,
}

fn fixture() -> Fixture {
    fixture_with(MockConfig::default())
}

fn fixture_with(config: MockConfig) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path().join("brickyard.db"), ENTITY_TABLES).unwrap();
    let mock = Arc::new(MockExecutor::with_config(&config));
    let app = App::new(db, mock.clone());
    Fixture { dir, app, mock }
}

fn finish(app: &App, op: &ScheduledOperation) -> PollOutcome {
    let done = app.operations().wait(&op.id, WAIT).unwrap();
    assert!(done.status.is_terminal(), "operation {} still pending", op.id);
    app.operations().poll(&op.id)
}

fn redirected_id(outcome: PollOutcome, prefix: &str) -> String {
    match outcome {
        PollOutcome::Redirect { location } => location
            .strip_prefix(prefix)
            .unwrap_or_else(|| panic!("unexpected location {location}"))
            .to_owned(),
        other => panic!("expected redirect, got {other:?}"),
    }
}

fn failure_message(outcome: PollOutcome) -> String {
    match outcome {
        PollOutcome::Failed { message } => message,
        other => panic!("expected failure, got {other:?}"),
    }
}

fn node_request(cluster: &ClusterId, n: usize) -> NodeAddRequest {
    NodeAddRequest {
        cluster: cluster.clone(),
        zone: n as u32,
        hostnames: HostNames {
            manage: vec![format!("manage{n}")],
            storage: vec![format!("10.0.0.{n}")],
        },
    }
}

fn add_node(f: &Fixture, cluster: &ClusterId, n: usize) -> NodeId {
    let op = f.app.node_add(node_request(cluster, n)).unwrap();
    NodeId::new(redirected_id(finish(&f.app, &op), "/nodes/"))
}

fn add_device(f: &Fixture, node: &NodeId, name: &str) -> DeviceId {
    let op = f
        .app
        .device_add(&DeviceAddRequest {
            node: node.clone(),
            name: name.to_owned(),
        })
        .unwrap();
    DeviceId::new(redirected_id(finish(&f.app, &op), "/devices/"))
}

/// A cluster of `nodes` nodes with one device each.
fn populated(f: &Fixture, nodes: usize) -> (ClusterId, Vec<NodeId>, Vec<DeviceId>) {
    let cluster = f.app.cluster_create().unwrap().id;
    let mut node_ids = Vec::new();
    let mut device_ids = Vec::new();
    for n in 1..=nodes {
        let node = add_node(f, &cluster, n);
        device_ids.push(add_device(f, &node, "/dev/sdb"));
        node_ids.push(node);
    }
    (cluster, node_ids, device_ids)
}

fn create_volume(f: &Fixture, size_gib: u64, replica: usize) -> ScheduledOperation {
    f.app
        .volume_create(&VolumeCreateRequest {
            size_gib,
            name: None,
            cluster: None,
            replica: Some(replica),
        })
        .unwrap()
}

fn command_failed(output: &str) -> ExecutorError {
    ExecutorError::CommandFailed {
        host: "manage1".to_owned(),
        command: "gluster".to_owned(),
        output: output.to_owned(),
    }
}

// Clusters

#[test]
fn cluster_create_list_delete() {
    let f = fixture();
    let a = f.app.cluster_create().unwrap();
    let b = f.app.cluster_create().unwrap();
    assert_eq!(a.state(), EntryState::Ready);

    let mut listed = f.app.cluster_list().unwrap();
    listed.sort();
    let mut expected = vec![a.id.clone(), b.id.clone()];
    expected.sort();
    assert_eq!(listed, expected);

    f.app.cluster_delete(&a.id).unwrap();
    assert!(f.app.cluster_info(&a.id).unwrap_err().is_not_found());
    assert_eq!(f.app.cluster_list().unwrap(), vec![b.id]);
}

#[test]
fn cluster_with_nodes_cannot_be_deleted() {
    let f = fixture();
    let cluster = f.app.cluster_create().unwrap().id;
    add_node(&f, &cluster, 1);
    let err = f.app.cluster_delete(&cluster).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(f.app.cluster_info(&cluster).unwrap().state(), EntryState::Ready);
}

// Nodes

#[test]
fn second_node_is_probed_from_first() {
    let f = fixture();
    let cluster = f.app.cluster_create().unwrap().id;
    let first = add_node(&f, &cluster, 1);
    assert_eq!(f.mock.count("peer_probe"), 0);

    let second = add_node(&f, &cluster, 2);
    let probes: Vec<_> = f
        .mock
        .calls()
        .into_iter()
        .filter(|c| c.op == "peer_probe")
        .collect();
    assert_eq!(probes.len(), 1);
    assert_eq!(probes[0].host, "manage1");
    assert_eq!(probes[0].args, vec!["10.0.0.2"]);

    let c = f.app.cluster_info(&cluster).unwrap();
    assert_eq!(c.nodes, vec![first, second.clone()]);
    let node = f.app.node_info(&second).unwrap();
    assert_eq!(node.state(), EntryState::Ready);
    assert_eq!(node.health, HealthState::Online);
}

#[test]
fn failed_probe_persists_nothing() {
    let f = fixture();
    let cluster = f.app.cluster_create().unwrap().id;
    add_node(&f, &cluster, 1);
    f.mock
        .set_peer_probe(|_, _| Err(command_failed("peer probe: failed: host unreachable")));

    let op = f.app.node_add(node_request(&cluster, 2)).unwrap();
    let message = failure_message(finish(&f.app, &op));
    assert!(message.contains("host unreachable"), "{message}");
    assert_eq!(f.app.cluster_info(&cluster).unwrap().nodes.len(), 1);

    f.mock.set_peer_probe(|_, _| Ok(()));
    let retried = add_node(&f, &cluster, 2);
    assert_eq!(f.app.node_info(&retried).unwrap().state(), EntryState::Ready);
}

#[test]
fn concurrent_adds_of_one_host_keep_the_winner_peered() {
    let f = fixture();
    let cluster = f.app.cluster_create().unwrap().id;
    add_node(&f, &cluster, 1);

    let (release, gate) = mpsc::channel::<()>();
    let gate = Mutex::new(gate);
    f.mock.set_peer_probe(move |_, _| {
        let _ = gate.lock().unwrap().recv();
        Ok(())
    });
    let first = f.app.node_add(node_request(&cluster, 2)).unwrap();

    let err = f.app.node_add(node_request(&cluster, 2)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let members = f.app.cluster_info(&cluster).unwrap().nodes;
    assert_eq!(members.len(), 2);
    let pending = &members[1];
    assert_eq!(f.app.node_info(pending).unwrap().state(), EntryState::Creating);
    assert_eq!(
        f.app.node_delete(pending).unwrap_err().kind(),
        ErrorKind::Conflict
    );
    assert_eq!(
        f.app.cluster_delete(&cluster).unwrap_err().kind(),
        ErrorKind::Conflict
    );

    release.send(()).unwrap();
    let added = NodeId::new(redirected_id(finish(&f.app, &first), "/nodes/"));
    assert_eq!(&added, pending);
    assert_eq!(f.app.node_info(&added).unwrap().state(), EntryState::Ready);
    assert_eq!(f.mock.count("peer_probe"), 1);
    assert_eq!(f.mock.count("peer_detach"), 0);
    assert_eq!(f.app.cluster_info(&cluster).unwrap().nodes.len(), 2);
}

#[test]
fn duplicate_hostname_is_rejected_synchronously() {
    let f = fixture();
    let cluster = f.app.cluster_create().unwrap().id;
    add_node(&f, &cluster, 1);
    let err = f.app.node_add(node_request(&cluster, 1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(f.app.operations().is_empty());
}

#[test]
fn node_add_to_missing_cluster_is_not_found() {
    let f = fixture();
    let err = f
        .app
        .node_add(node_request(&ClusterId::new("missing"), 1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn node_delete_detaches_from_peer() {
    let f = fixture();
    let cluster = f.app.cluster_create().unwrap().id;
    let first = add_node(&f, &cluster, 1);
    let second = add_node(&f, &cluster, 2);

    let op = f.app.node_delete(&second).unwrap();
    assert_eq!(finish(&f.app, &op), PollOutcome::NoContent);

    let detach = f
        .mock
        .calls()
        .into_iter()
        .find(|c| c.op == "peer_detach")
        .unwrap();
    assert_eq!(detach.host, "manage1");
    assert_eq!(detach.args, vec!["10.0.0.2"]);
    assert!(f.app.node_info(&second).unwrap_err().is_not_found());
    assert_eq!(f.app.cluster_info(&cluster).unwrap().nodes, vec![first]);
}

#[test]
fn failed_detach_returns_node_to_ready() {
    let f = fixture();
    let cluster = f.app.cluster_create().unwrap().id;
    let node = add_node(&f, &cluster, 1);
    f.mock.set_peer_detach(|_, _| {
        Err(command_failed(
            "peer detach: failed: Brick(s) with the peer exist in cluster",
        ))
    });

    let op = f.app.node_delete(&node).unwrap();
    let message = failure_message(finish(&f.app, &op));
    assert!(message.contains("Brick(s) with the peer exist"), "{message}");

    let after = f.app.node_info(&node).unwrap();
    assert_eq!(after.state(), EntryState::Ready);
    assert_eq!(f.app.cluster_info(&cluster).unwrap().nodes, vec![node]);
}

#[test]
fn node_with_devices_cannot_be_deleted() {
    let f = fixture();
    let (_, nodes, _) = populated(&f, 1);
    let err = f.app.node_delete(&nodes[0]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(f.app.node_info(&nodes[0]).unwrap().state(), EntryState::Ready);
}

#[test]
fn node_health_is_independent_of_lifecycle() {
    let f = fixture();
    let cluster = f.app.cluster_create().unwrap().id;
    let node = add_node(&f, &cluster, 1);
    let updated = f.app.node_set_health(&node, HealthState::Offline).unwrap();
    assert_eq!(updated.health, HealthState::Offline);
    assert_eq!(updated.state(), EntryState::Ready);
}

// Devices

#[test]
fn device_add_records_capacity() {
    let f = fixture();
    let (_, nodes, devices) = populated(&f, 1);
    let device = f.app.device_info(&devices[0]).unwrap();
    assert_eq!(device.state(), EntryState::Ready);
    assert_eq!(device.storage.total, MOCK_DEVICE_SIZE_KIB);
    assert_eq!(device.storage.free, MOCK_DEVICE_SIZE_KIB);

    let node = f.app.node_info(&nodes[0]).unwrap();
    assert_eq!(node.devices, vec![devices[0].clone()]);
    assert_eq!(node.state(), EntryState::Ready);
    assert_eq!(node.lifecycle.modify_count(), 0);
}

#[test]
fn duplicate_device_name_is_a_conflict() {
    let f = fixture();
    let (_, nodes, _) = populated(&f, 1);
    let err = f
        .app
        .device_add(&DeviceAddRequest {
            node: nodes[0].clone(),
            name: "/dev/sdb".to_owned(),
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn failed_setup_forgets_device_and_releases_node() {
    let f = fixture();
    let cluster = f.app.cluster_create().unwrap().id;
    let node = add_node(&f, &cluster, 1);
    f.mock
        .set_device_setup(|_, _, _| Err(command_failed("Device /dev/sdc not found")));

    let op = f
        .app
        .device_add(&DeviceAddRequest {
            node: node.clone(),
            name: "/dev/sdc".to_owned(),
        })
        .unwrap();
    let message = failure_message(finish(&f.app, &op));
    assert!(message.contains("not found"), "{message}");

    let n = f.app.node_info(&node).unwrap();
    assert!(n.devices.is_empty());
    assert_eq!(n.state(), EntryState::Ready);
}

#[test]
fn concurrent_device_adds_nest_on_the_node() {
    let f = fixture();
    let cluster = f.app.cluster_create().unwrap().id;
    let node = add_node(&f, &cluster, 1);

    let (release, gate) = mpsc::channel::<()>();
    let gate = Mutex::new(gate);
    f.mock.set_device_setup(move |_, _, _| {
        let _ = gate.lock().unwrap().recv();
        Ok(brickyard_executor::DeviceInfo {
            size_kib: MOCK_DEVICE_SIZE_KIB,
            extent_size_kib: 4096,
        })
    });

    let ops: Vec<_> = ["/dev/sdb", "/dev/sdc"]
        .iter()
        .map(|name| {
            f.app
                .device_add(&DeviceAddRequest {
                    node: node.clone(),
                    name: (*name).to_owned(),
                })
                .unwrap()
        })
        .collect();

    let pending = f.app.node_info(&node).unwrap();
    assert_eq!(pending.state(), EntryState::Modifying);
    assert_eq!(pending.lifecycle.modify_count(), 1);
    assert_eq!(pending.devices.len(), 2);
    let err = f.app.node_delete(&node).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    release.send(()).unwrap();
    release.send(()).unwrap();
    for op in &ops {
        assert!(matches!(finish(&f.app, op), PollOutcome::Redirect { .. }));
    }
    let done = f.app.node_info(&node).unwrap();
    assert_eq!(done.state(), EntryState::Ready);
    assert_eq!(done.devices.len(), 2);
}

#[test]
fn device_delete_tears_down_and_unlinks() {
    let f = fixture();
    let (_, nodes, devices) = populated(&f, 1);
    let op = f.app.device_delete(&devices[0]).unwrap();
    assert_eq!(finish(&f.app, &op), PollOutcome::NoContent);
    assert_eq!(f.mock.count("device_teardown"), 1);
    assert!(f.app.device_info(&devices[0]).unwrap_err().is_not_found());
    let node = f.app.node_info(&nodes[0]).unwrap();
    assert!(node.devices.is_empty());
    assert_eq!(node.state(), EntryState::Ready);
}

#[test]
fn failed_teardown_restores_device() {
    let f = fixture();
    let (_, nodes, devices) = populated(&f, 1);
    f.mock
        .set_device_teardown(|_, _, _| Err(command_failed("Can't open /dev/sdb exclusively")));
    let op = f.app.device_delete(&devices[0]).unwrap();
    failure_message(finish(&f.app, &op));
    assert_eq!(
        f.app.device_info(&devices[0]).unwrap().state(),
        EntryState::Ready
    );
    assert_eq!(f.app.node_info(&nodes[0]).unwrap().state(), EntryState::Ready);
}

// Volumes

#[test]
fn volume_create_places_replicas_on_distinct_nodes() {
    let f = fixture();
    let (cluster, _, devices) = populated(&f, 3);
    let op = create_volume(&f, 2, 2);
    let id = VolumeId::new(redirected_id(finish(&f.app, &op), "/volumes/"));

    let volume = f.app.volume_info(&id).unwrap();
    assert_eq!(volume.state(), EntryState::Ready);
    assert_eq!(volume.cluster, cluster);
    assert_eq!(volume.name, format!("vol_{id}"));
    assert_eq!(f.app.cluster_info(&cluster).unwrap().volumes, vec![id.clone()]);

    let bricks = f.app.volume_bricks(&id).unwrap();
    assert_eq!(bricks.len(), 2);
    assert_ne!(bricks[0].node, bricks[1].node);
    for b in &bricks {
        assert_eq!(b.state(), EntryState::Ready);
        assert!(b.path.ends_with("/brick"), "{}", b.path);
        assert_eq!(b.size_kib, 2 * KIB_PER_GIB);
    }

    let used: u64 = devices
        .iter()
        .map(|d| f.app.device_info(d).unwrap().storage.used)
        .sum();
    assert_eq!(used, 4 * KIB_PER_GIB);

    let create = f
        .mock
        .calls()
        .into_iter()
        .find(|c| c.op == "volume_create")
        .unwrap();
    assert!(create.args.iter().any(|a| a.starts_with("10.0.0.")), "{create:?}");
}

#[test]
fn volume_without_room_is_rejected_synchronously() {
    let f = fixture();
    populated(&f, 1);
    let err = f
        .app
        .volume_create(&VolumeCreateRequest {
            size_gib: 1,
            name: None,
            cluster: None,
            replica: Some(2),
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSpace);
    assert!(f.app.volume_list().unwrap().is_empty());
}

#[test]
fn volume_name_must_be_unique() {
    let f = fixture();
    populated(&f, 2);
    let req = VolumeCreateRequest {
        size_gib: 1,
        name: Some("data".to_owned()),
        cluster: None,
        replica: Some(2),
    };
    let op = f.app.volume_create(&req).unwrap();
    finish(&f.app, &op);
    assert_eq!(
        f.app.volume_create(&req).unwrap_err().kind(),
        ErrorKind::Conflict
    );
}

#[test]
fn failed_volume_create_rolls_back_everything() {
    let f = fixture();
    let (cluster, _, devices) = populated(&f, 2);
    f.mock
        .set_volume_create(|_, _| Err(command_failed("volume create: failed: staging failed")));

    let op = create_volume(&f, 1, 2);
    let message = failure_message(finish(&f.app, &op));
    assert!(message.contains("staging failed"), "{message}");

    assert!(f.app.volume_list().unwrap().is_empty());
    assert!(f.app.cluster_info(&cluster).unwrap().volumes.is_empty());
    assert_eq!(f.mock.count("brick_create"), 2);
    assert_eq!(f.mock.count("brick_destroy"), 2);
    for d in &devices {
        let device = f.app.device_info(d).unwrap();
        assert_eq!(device.storage.free, device.storage.total);
        assert!(device.bricks.is_empty());
        assert_eq!(device.state(), EntryState::Ready);
    }
}

#[test]
fn failed_brick_destroys_only_bricks_already_made() {
    let f = fixture();
    populated(&f, 2);
    let calls = AtomicUsize::new(0);
    f.mock.set_brick_create(move |_, brick| {
        if calls.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(command_failed("lvcreate: insufficient free space"));
        }
        Ok(BrickInfo {
            path: format!("/bricks/{}", brick.brick_id),
        })
    });

    let op = create_volume(&f, 1, 2);
    failure_message(finish(&f.app, &op));
    assert_eq!(f.mock.count("brick_destroy"), 1);
    assert_eq!(f.mock.count("volume_create"), 0);
    assert!(f.app.volume_list().unwrap().is_empty());
}

#[test]
fn volume_expand_adds_a_replica_set() {
    let f = fixture();
    populated(&f, 2);
    let op = create_volume(&f, 1, 2);
    let id = redirected_id(finish(&f.app, &op), "/volumes/");

    let op = f
        .app
        .volume_expand(&id, &VolumeExpandRequest { expand_size_gib: 2 })
        .unwrap();
    assert!(matches!(finish(&f.app, &op), PollOutcome::Redirect { .. }));

    let volume = f.app.volume_info(&id).unwrap();
    assert_eq!(volume.size_gib, 3);
    assert_eq!(volume.bricks.len(), 4);
    assert_eq!(volume.state(), EntryState::Ready);
    assert_eq!(f.mock.count("volume_expand"), 1);
}

#[test]
fn failed_expand_leaves_volume_unchanged() {
    let f = fixture();
    let (_, _, devices) = populated(&f, 2);
    let op = create_volume(&f, 1, 2);
    let id = redirected_id(finish(&f.app, &op), "/volumes/");
    f.mock
        .set_volume_expand(|_, _| Err(command_failed("volume add-brick: failed")));

    let op = f
        .app
        .volume_expand(&id, &VolumeExpandRequest { expand_size_gib: 1 })
        .unwrap();
    failure_message(finish(&f.app, &op));

    let volume = f.app.volume_info(&id).unwrap();
    assert_eq!(volume.size_gib, 1);
    assert_eq!(volume.bricks.len(), 2);
    assert_eq!(volume.state(), EntryState::Ready);
    for d in &devices {
        assert_eq!(f.app.device_info(d).unwrap().storage.used, KIB_PER_GIB);
    }
}

#[test]
fn volume_being_modified_cannot_be_deleted() {
    let f = fixture();
    populated(&f, 2);
    let op = create_volume(&f, 1, 2);
    let id = redirected_id(finish(&f.app, &op), "/volumes/");

    let (release, gate) = mpsc::channel::<()>();
    let gate = Mutex::new(gate);
    f.mock.set_volume_expand(move |_, _| {
        let _ = gate.lock().unwrap().recv();
        Ok(())
    });
    let expand = f
        .app
        .volume_expand(&id, &VolumeExpandRequest { expand_size_gib: 1 })
        .unwrap();

    let err = f.app.volume_delete(&id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    release.send(()).unwrap();
    finish(&f.app, &expand);

    let op = f.app.volume_delete(&id).unwrap();
    assert_eq!(finish(&f.app, &op), PollOutcome::NoContent);
}

#[test]
fn expansions_of_one_volume_do_not_overlap() {
    let f = fixture();
    let (_, _, devices) = populated(&f, 2);
    let op = create_volume(&f, 1, 2);
    let id = redirected_id(finish(&f.app, &op), "/volumes/");

    let (release, gate) = mpsc::channel::<()>();
    let gate = Mutex::new(gate);
    f.mock.set_brick_create(move |_, brick| {
        let _ = gate.lock().unwrap().recv();
        Ok(BrickInfo {
            path: format!("/bricks/{}", brick.brick_id),
        })
    });
    let first = f
        .app
        .volume_expand(&id, &VolumeExpandRequest { expand_size_gib: 1 })
        .unwrap();

    let err = f
        .app
        .volume_expand(&id, &VolumeExpandRequest { expand_size_gib: 1 })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(f.app.volume_delete(&id).unwrap_err().kind(), ErrorKind::Conflict);

    release.send(()).unwrap();
    release.send(()).unwrap();
    assert!(matches!(finish(&f.app, &first), PollOutcome::Redirect { .. }));
    assert_eq!(f.app.volume_info(&id).unwrap().bricks.len(), 4);

    let op = f.app.volume_delete(&id).unwrap();
    assert_eq!(finish(&f.app, &op), PollOutcome::NoContent);
    for d in &devices {
        let device = f.app.device_info(d).unwrap();
        assert!(device.bricks.is_empty());
        assert_eq!(device.storage.used, 0);
        let op = f.app.device_delete(d).unwrap();
        assert_eq!(finish(&f.app, &op), PollOutcome::NoContent);
    }
}

#[test]
fn volume_delete_frees_devices() {
    let f = fixture();
    let (cluster, _, devices) = populated(&f, 2);
    let op = create_volume(&f, 3, 2);
    let id = redirected_id(finish(&f.app, &op), "/volumes/");

    let op = f.app.volume_delete(&id).unwrap();
    assert_eq!(finish(&f.app, &op), PollOutcome::NoContent);
    assert_eq!(f.mock.count("volume_destroy"), 1);
    assert_eq!(f.mock.count("brick_destroy"), 2);
    assert!(f.app.volume_info(&id).unwrap_err().is_not_found());
    assert!(f.app.cluster_info(&cluster).unwrap().volumes.is_empty());
    for d in &devices {
        let device = f.app.device_info(d).unwrap();
        assert_eq!(device.storage.used, 0);
        assert!(device.bricks.is_empty());
    }
}

#[test]
fn failed_volume_destroy_keeps_volume() {
    let f = fixture();
    populated(&f, 2);
    let op = create_volume(&f, 1, 2);
    let id = redirected_id(finish(&f.app, &op), "/volumes/");
    f.mock
        .set_volume_destroy(|_, _| Err(command_failed("volume stop: failed")));

    let op = f.app.volume_delete(&id).unwrap();
    failure_message(finish(&f.app, &op));
    assert_eq!(f.app.volume_info(&id).unwrap().state(), EntryState::Ready);
    assert_eq!(f.mock.count("brick_destroy"), 0);
}

// Throttling and export

#[test]
fn remote_calls_to_one_host_are_serialized() {
    let f = fixture_with(MockConfig {
        max_connections_per_host: 1,
    });
    let cluster = f.app.cluster_create().unwrap().id;
    let node = add_node(&f, &cluster, 1);

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        f.mock.set_device_setup(move |_, _, _| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(brickyard_executor::DeviceInfo {
                size_kib: MOCK_DEVICE_SIZE_KIB,
                extent_size_kib: 4096,
            })
        });
    }

    let ops: Vec<_> = (0..4)
        .map(|i| {
            f.app
                .device_add(&DeviceAddRequest {
                    node: node.clone(),
                    name: format!("/dev/sd{}", char::from(b'b' + i)),
                })
                .unwrap()
        })
        .collect();
    for op in &ops {
        assert!(matches!(finish(&f.app, op), PollOutcome::Redirect { .. }));
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(f.app.node_info(&node).unwrap().devices.len(), 4);
}

#[test]
fn export_restores_into_fresh_database() {
    let f = fixture();
    let (cluster, nodes, _) = populated(&f, 2);

    let mut buf = Vec::new();
    let written = f.app.export(&mut buf).unwrap();
    assert_eq!(written, buf.len() as u64);

    let restored_path = f.dir.path().join("restored.db");
    let db = Db::restore(&restored_path, ENTITY_TABLES, buf.as_slice()).unwrap();
    let restored = App::new(db, Arc::new(MockExecutor::new()));
    assert_eq!(restored.cluster_list().unwrap(), vec![cluster.clone()]);
    let node = restored.node_info(&nodes[1]).unwrap();
    assert_eq!(node.cluster, cluster);
    assert_eq!(node.devices.len(), 1);
}
