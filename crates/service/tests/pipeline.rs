//! End-to-end pipeline scenarios against the in-process test mesh:
//! replication modes, forwarding policies, locking, and the durable
//! mailbox, all without a socket in sight.

use std::time::Duration;

use http::{header, StatusCode};

use common::obj::{ContainerPath, MoveRequest, RenameRequest, ReplicationMode};

use service::error::OpError;
use service::externals::{Capability, ObjectStore};
use service::mailbox::DrainWorker;
use service::ownership::{ForwardPolicy, ForwardingConfig};
use service::peer::PeerTransport;
use service::testkit::{test_node, TestMesh};

/// Background tasks (async replication, bunker fan-out, metadata
/// rewrites) get a moment to land.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/* Replication */

#[tokio::test]
async fn sync_write_reaches_every_replica_then_persists() {
    let mesh = TestMesh::builder()
        .mode(ReplicationMode::Sync)
        .replicas(2)
        .build();
    let obj = mesh
        .core
        .build_object(
            mesh.user,
            ContainerPath::root(),
            "a.txt",
            Some(bytes::Bytes::from_static(b"hello")),
        )
        .unwrap();
    let disk_path = obj.disk_path.clone();
    let url = obj.url_path();

    let response = mesh.core.write_object(&mesh.ctx("PUT"), obj).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert!(mesh.store.contains(&disk_path));
    for node in [2, 3] {
        let calls = mesh.transport.calls_to(node);
        assert_eq!(calls.len(), 1, "node {node} got {calls:?}");
        assert_eq!(calls[0].subject, "object.write");
        assert_eq!(calls[0].user, mesh.user);
    }
    // the guard released on the way out
    assert!(!mesh.core.locks().is_locked(&url));
}

#[tokio::test]
async fn sync_failure_aborts_the_write_and_compensates_every_attempt() {
    let mesh = TestMesh::builder()
        .mode(ReplicationMode::Sync)
        .replicas(2)
        .build();
    mesh.transport.fail_node(3);
    let obj = mesh
        .core
        .build_object(
            mesh.user,
            ContainerPath::root(),
            "a.txt",
            Some(bytes::Bytes::from_static(b"hello")),
        )
        .unwrap();
    let disk_path = obj.disk_path.clone();

    let err = mesh
        .core
        .write_object(&mesh.ctx("PUT"), obj)
        .await
        .unwrap_err();

    assert!(matches!(err, OpError::Unavailable(_)), "got {err:?}");
    assert!(!mesh.store.contains(&disk_path), "local write must not happen");
    // node 2 succeeded and is rolled back; node 3 failed and still gets
    // the compensating delete since its state is unknown
    for node in [2, 3] {
        let subjects: Vec<_> = mesh
            .transport
            .calls_to(node)
            .into_iter()
            .map(|c| c.subject)
            .collect();
        assert_eq!(subjects, ["object.write", "object.delete"], "node {node}");
    }
}

#[tokio::test]
async fn sync_failure_mid_chain_never_reaches_later_replicas() {
    let mesh = TestMesh::builder()
        .mode(ReplicationMode::Sync)
        .replicas(3)
        .build();
    mesh.transport.fail_node(3);
    let obj = mesh
        .core
        .build_object(
            mesh.user,
            ContainerPath::root(),
            "a.txt",
            Some(bytes::Bytes::from_static(b"hello")),
        )
        .unwrap();

    mesh.core
        .write_object(&mesh.ctx("PUT"), obj)
        .await
        .unwrap_err();

    assert!(mesh.transport.calls_to(4).is_empty(), "node 4 is after the failure");
}

#[tokio::test]
async fn local_disk_full_after_sync_pass_rolls_the_replicas_back() {
    let mesh = TestMesh::builder()
        .mode(ReplicationMode::Sync)
        .replicas(1)
        .build();
    mesh.store.set_full(true);
    let obj = mesh
        .core
        .build_object(
            mesh.user,
            ContainerPath::root(),
            "a.txt",
            Some(bytes::Bytes::from_static(b"hello")),
        )
        .unwrap();

    let err = mesh
        .core
        .write_object(&mesh.ctx("PUT"), obj)
        .await
        .unwrap_err();

    assert_eq!(err.status(), StatusCode::INSUFFICIENT_STORAGE);
    let subjects: Vec<_> = mesh
        .transport
        .calls_to(2)
        .into_iter()
        .map(|c| c.subject)
        .collect();
    assert_eq!(subjects, ["object.write", "object.delete"]);
}

#[tokio::test]
async fn async_replication_never_fails_the_client_and_queues_on_failure() {
    let mesh = TestMesh::builder()
        .mode(ReplicationMode::Async)
        .replicas(1)
        .build();
    mesh.transport.fail_node(2);
    let obj = mesh
        .core
        .build_object(
            mesh.user,
            ContainerPath::root(),
            "a.txt",
            Some(bytes::Bytes::from_static(b"hello")),
        )
        .unwrap();
    let disk_path = obj.disk_path.clone();

    let response = mesh.core.write_object(&mesh.ctx("PUT"), obj).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert!(mesh.store.contains(&disk_path));

    settle().await;
    let pending = mesh.core.mailbox().pending(2).await.unwrap();
    assert_eq!(pending.len(), 1, "undelivered mutation must be queued");
    let queued = mesh.core.mailbox().read(&pending[0]).await.unwrap();
    assert_eq!(queued.subject, "object.write");
    assert_eq!(queued.to, 2);
    assert_eq!(queued.meta.user, Some(mesh.user));
}

#[tokio::test]
async fn drain_pass_delivers_the_queue_once_the_node_recovers() {
    let mesh = TestMesh::builder()
        .mode(ReplicationMode::Async)
        .replicas(1)
        .build();
    mesh.transport.fail_node(2);
    let obj = mesh
        .core
        .build_object(
            mesh.user,
            ContainerPath::root(),
            "a.txt",
            Some(bytes::Bytes::from_static(b"hello")),
        )
        .unwrap();
    mesh.core.write_object(&mesh.ctx("PUT"), obj).await.unwrap();
    settle().await;
    assert_eq!(mesh.core.mailbox().pending(2).await.unwrap().len(), 1);

    mesh.transport.recover_node(2);
    let transport: std::sync::Arc<dyn PeerTransport> = mesh.transport.clone();
    let worker = DrainWorker::new(
        mesh.core.mailbox().clone(),
        mesh.core.topology().clone(),
        transport,
        Duration::from_secs(3600),
    );
    worker.drain_once().await;

    assert!(mesh.core.mailbox().pending(2).await.unwrap().is_empty());
    let delivered = mesh.transport.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, 2);
    assert_eq!(delivered[0].1.subject, "object.write");
}

/* Forwarding */

#[tokio::test]
async fn remote_data_is_refused_under_the_default_policy() {
    let mesh = TestMesh::builder().build();
    let obj = mesh
        .core
        .build_object(mesh.remote_user, ContainerPath::root(), "a.txt", None)
        .unwrap();

    let err = mesh
        .core
        .read_object(&mesh.ctx("GET"), obj)
        .await
        .unwrap_err();
    assert!(matches!(err, OpError::ProxyingDisabled));
    assert_eq!(err.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn redirect_policy_points_the_client_at_the_owner() {
    let mesh = TestMesh::builder()
        .forwarding(ForwardingConfig {
            read: ForwardPolicy::Redirect,
            ..Default::default()
        })
        .build();
    let obj = mesh
        .core
        .build_object(mesh.remote_user, ContainerPath::root(), "a.txt", None)
        .unwrap();

    let response = mesh.core.read_object(&mesh.ctx("GET"), obj).await.unwrap();
    assert_eq!(response.status, StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers.get(header::LOCATION).unwrap();
    assert!(
        location
            .to_str()
            .unwrap()
            .starts_with("http://node2.test:9002/api/"),
        "got {location:?}"
    );
}

#[tokio::test]
async fn proxied_read_falls_through_to_the_owners_replica() {
    let mesh = TestMesh::builder()
        .forwarding(ForwardingConfig {
            read: ForwardPolicy::Proxy,
            ..Default::default()
        })
        .owner_replicas(vec![3])
        .build();
    mesh.transport.fail_node(2);
    mesh.transport
        .script_proxy(3, StatusCode::OK, b"replica copy");
    let obj = mesh
        .core
        .build_object(mesh.remote_user, ContainerPath::root(), "a.txt", None)
        .unwrap();

    let response = mesh.core.read_object(&mesh.ctx("GET"), obj).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(&response.body[..], b"replica copy");
}

#[tokio::test]
async fn unreachable_owner_and_replicas_surface_as_unavailable() {
    let mesh = TestMesh::builder()
        .forwarding(ForwardingConfig {
            read: ForwardPolicy::Proxy,
            ..Default::default()
        })
        .build();
    mesh.transport.fail_node(2);
    let obj = mesh
        .core
        .build_object(mesh.remote_user, ContainerPath::root(), "a.txt", None)
        .unwrap();

    let err = mesh
        .core
        .read_object(&mesh.ctx("GET"), obj)
        .await
        .unwrap_err();
    assert!(matches!(err, OpError::Unavailable(_)), "got {err:?}");
}

#[tokio::test]
async fn already_proxied_requests_are_never_forwarded_again() {
    let mesh = TestMesh::builder()
        .forwarding(ForwardingConfig {
            read: ForwardPolicy::Proxy,
            ..Default::default()
        })
        .build();
    mesh.transport.script_proxy(2, StatusCode::OK, b"ok");
    let obj = mesh
        .core
        .build_object(mesh.remote_user, ContainerPath::root(), "a.txt", None)
        .unwrap();
    let mut ctx = mesh.ctx("GET");
    ctx.proxied = true;

    let err = mesh.core.read_object(&ctx, obj).await.unwrap_err();
    assert!(matches!(err, OpError::ProxyingDisabled));
}

#[tokio::test]
async fn proxied_write_relays_the_owners_response_verbatim() {
    let mesh = TestMesh::builder()
        .forwarding(ForwardingConfig {
            write: ForwardPolicy::Proxy,
            ..Default::default()
        })
        .build();
    mesh.transport
        .script_proxy(2, StatusCode::OK, br#"{"url":"remote"}"#);
    let obj = mesh
        .core
        .build_object(
            mesh.remote_user,
            ContainerPath::root(),
            "a.txt",
            Some(bytes::Bytes::from_static(b"hello")),
        )
        .unwrap();

    let response = mesh.core.write_object(&mesh.ctx("PUT"), obj).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(&response.body[..], br#"{"url":"remote"}"#);
    // nothing touched the local store
    assert_eq!(mesh.store.file_count(), 0);
}

/* Locking */

#[tokio::test]
async fn a_held_lock_turns_the_write_away() {
    let mesh = TestMesh::builder().build();
    let obj = mesh
        .core
        .build_object(
            mesh.user,
            ContainerPath::root(),
            "a.txt",
            Some(bytes::Bytes::from_static(b"hello")),
        )
        .unwrap();
    let _held = mesh
        .core
        .locks()
        .acquire(&obj.url_path(), None, "PUT")
        .unwrap();

    let err = mesh
        .core
        .write_object(&mesh.ctx("PUT"), obj)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::LOCKED);
    assert_eq!(mesh.store.file_count(), 0);
}

#[tokio::test]
async fn move_needs_both_endpoints_free() {
    let mesh = TestMesh::builder().build();
    setup_object(&mesh, "docs", "a.txt").await;
    mesh.core
        .create_container(
            &mesh.ctx("PUT"),
            mesh.core
                .build_container(mesh.user, ContainerPath::parse("archive"))
                .unwrap(),
        )
        .await
        .unwrap();

    // hold the destination path only
    let dst = mesh
        .core
        .build_object(mesh.user, ContainerPath::parse("archive"), "a.txt", None)
        .unwrap();
    let _held = mesh
        .core
        .locks()
        .acquire(&dst.disk_path.to_string_lossy(), None, "POST")
        .unwrap();

    let mv = MoveRequest {
        user: mesh.user,
        source: ContainerPath::parse("docs"),
        destination: ContainerPath::parse("archive"),
        key: "a.txt".into(),
    };
    let err = mesh
        .core
        .move_object(&mesh.ctx("POST"), mv)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::LOCKED);

    // the source lock taken first was released again
    let src = mesh
        .core
        .build_object(mesh.user, ContainerPath::parse("docs"), "a.txt", None)
        .unwrap();
    assert!(!mesh
        .core
        .locks()
        .is_locked(&src.disk_path.to_string_lossy()));
}

/* Permissions */

#[tokio::test]
async fn missing_capability_fails_before_anything_happens() {
    let mesh = TestMesh::builder()
        .mode(ReplicationMode::Sync)
        .replicas(1)
        .build();
    mesh.permissions.deny(Capability::WriteObject);
    let obj = mesh
        .core
        .build_object(
            mesh.user,
            ContainerPath::root(),
            "a.txt",
            Some(bytes::Bytes::from_static(b"hello")),
        )
        .unwrap();

    let err = mesh
        .core
        .write_object(&mesh.ctx("PUT"), obj)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
    assert!(mesh.transport.calls().is_empty(), "nothing may leave the node");
    assert_eq!(mesh.store.file_count(), 0);
}

#[tokio::test]
async fn per_resource_policy_denial_is_audited() {
    let mesh = TestMesh::builder().build();
    let obj = mesh
        .core
        .build_object(
            mesh.user,
            ContainerPath::root(),
            "a.txt",
            Some(bytes::Bytes::from_static(b"hello")),
        )
        .unwrap();
    let url = obj.url_path();
    mesh.permissions.deny_path(&url);

    let err = mesh
        .core
        .write_object(&mesh.ctx("PUT"), obj)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
    assert_eq!(mesh.store.file_count(), 0);

    let lines = mesh.audit.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].0, "access");
    assert!(lines[0].1.contains("allowed=false"), "got {:?}", lines[0].1);
    // the denial released the lock
    assert!(!mesh.core.locks().is_locked(&url));
}

/* Object and container lifecycle */

async fn setup_object(mesh: &TestMesh, container: &str, key: &str) {
    let path = ContainerPath::parse(container);
    if !path.is_root() {
        let dir = mesh.core.build_container(mesh.user, path.clone()).unwrap();
        // idempotent setup: a prior call may have created it already
        let _ = mesh.core.create_container(&mesh.ctx("PUT"), dir).await;
    }
    let obj = mesh
        .core
        .build_object(
            mesh.user,
            path,
            key,
            Some(bytes::Bytes::from_static(b"body")),
        )
        .unwrap();
    mesh.core.write_object(&mesh.ctx("PUT"), obj).await.unwrap();
}

#[tokio::test]
async fn write_then_read_round_trips_through_the_codecs() {
    let mesh = TestMesh::builder().build();
    setup_object(&mesh, "docs", "a.txt").await;
    settle().await; // metadata rewrite

    let obj = mesh
        .core
        .build_object(mesh.user, ContainerPath::parse("docs"), "a.txt", None)
        .unwrap();
    let response = mesh.core.read_object(&mesh.ctx("GET"), obj).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(&response.body[..], b"body");
}

#[tokio::test]
async fn read_right_after_write_decodes_the_stored_bytes() {
    let mesh = TestMesh::builder().mirror_compression().build();
    let obj = mesh
        .core
        .build_object(
            mesh.user,
            ContainerPath::root(),
            "a.txt",
            Some(bytes::Bytes::from_static(b"hello")),
        )
        .unwrap();
    let disk_path = obj.disk_path.clone();

    mesh.core.write_object(&mesh.ctx("PUT"), obj).await.unwrap();

    // the stored body is encoded...
    let stored = mesh.store.read_body(&disk_path).await.unwrap();
    assert_eq!(&stored[..], b"olleh");

    // ...and an immediate read, with no time for background tasks,
    // still hands back the original bytes
    let obj = mesh
        .core
        .build_object(mesh.user, ContainerPath::root(), "a.txt", None)
        .unwrap();
    let response = mesh.core.read_object(&mesh.ctx("GET"), obj).await.unwrap();
    assert_eq!(&response.body[..], b"hello");
}

#[tokio::test]
async fn writes_into_a_missing_container_are_refused() {
    let mesh = TestMesh::builder().build();
    let obj = mesh
        .core
        .build_object(
            mesh.user,
            ContainerPath::parse("nope"),
            "a.txt",
            Some(bytes::Bytes::from_static(b"body")),
        )
        .unwrap();

    let err = mesh
        .core
        .write_object(&mesh.ctx("PUT"), obj)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_payloads_are_refused_up_front() {
    let mesh = TestMesh::builder().max_object_bytes(8).build();
    let obj = mesh
        .core
        .build_object(
            mesh.user,
            ContainerPath::root(),
            "a.txt",
            Some(bytes::Bytes::from_static(b"way past eight bytes")),
        )
        .unwrap();

    let err = mesh
        .core
        .write_object(&mesh.ctx("PUT"), obj)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_removes_the_object_and_answers_no_content() {
    let mesh = TestMesh::builder().build();
    setup_object(&mesh, "", "a.txt").await;
    let obj = mesh
        .core
        .build_object(mesh.user, ContainerPath::root(), "a.txt", None)
        .unwrap();

    let response = mesh
        .core
        .delete_object(&mesh.ctx("DELETE"), obj.clone())
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert!(!mesh.store.contains(&obj.disk_path));

    let err = mesh
        .core
        .delete_object(&mesh.ctx("DELETE"), obj)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn move_onto_an_existing_object_is_a_conflict() {
    let mesh = TestMesh::builder().build();
    setup_object(&mesh, "docs", "a.txt").await;
    setup_object(&mesh, "archive", "a.txt").await;

    let mv = MoveRequest {
        user: mesh.user,
        source: ContainerPath::parse("docs"),
        destination: ContainerPath::parse("archive"),
        key: "a.txt".into(),
    };
    let err = mesh
        .core
        .move_object(&mesh.ctx("POST"), mv)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::CONFLICT);

    // nothing moved
    let src = mesh
        .core
        .build_object(mesh.user, ContainerPath::parse("docs"), "a.txt", None)
        .unwrap();
    assert!(mesh.store.contains(&src.disk_path));
}

#[tokio::test]
async fn object_move_requires_a_key() {
    let mesh = TestMesh::builder().build();
    setup_object(&mesh, "docs", "a.txt").await;

    let mv = MoveRequest {
        user: mesh.user,
        source: ContainerPath::parse("docs"),
        destination: ContainerPath::parse("archive"),
        key: String::new(),
    };
    let err = mesh
        .core
        .move_object(&mesh.ctx("POST"), mv)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn move_into_a_missing_container_is_refused() {
    let mesh = TestMesh::builder().build();
    setup_object(&mesh, "docs", "a.txt").await;

    let mv = MoveRequest {
        user: mesh.user,
        source: ContainerPath::parse("docs"),
        destination: ContainerPath::parse("archive"),
        key: "a.txt".into(),
    };
    let err = mesh
        .core
        .move_object(&mesh.ctx("POST"), mv)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rename_relocates_the_object_within_its_container() {
    let mesh = TestMesh::builder().build();
    setup_object(&mesh, "docs", "a.txt").await;

    let rn = RenameRequest {
        user: mesh.user,
        container: ContainerPath::parse("docs"),
        old_name: "a.txt".into(),
        new_name: "b.txt".into(),
    };
    let response = mesh.core.rename_object(&mesh.ctx("POST"), rn).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);

    let old = mesh
        .core
        .build_object(mesh.user, ContainerPath::parse("docs"), "a.txt", None)
        .unwrap();
    let new = mesh
        .core
        .build_object(mesh.user, ContainerPath::parse("docs"), "b.txt", None)
        .unwrap();
    assert!(!mesh.store.contains(&old.disk_path));
    assert!(mesh.store.contains(&new.disk_path));
}

#[tokio::test]
async fn traversal_paths_never_reach_the_store() {
    let mesh = TestMesh::builder().build();
    let err = mesh
        .core
        .build_object(
            mesh.user,
            ContainerPath::parse("docs"),
            "../escape",
            None,
        )
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);

    let rn = RenameRequest {
        user: mesh.user,
        container: ContainerPath::new(vec!["..".into()]),
        old_name: "a".into(),
        new_name: "b".into(),
    };
    let err = mesh
        .core
        .rename_object(&mesh.ctx("POST"), rn)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn container_create_is_not_idempotent() {
    let mesh = TestMesh::builder().build();
    let dir = mesh
        .core
        .build_container(mesh.user, ContainerPath::parse("docs"))
        .unwrap();

    let response = mesh
        .core
        .create_container(&mesh.ctx("PUT"), dir.clone())
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::CREATED);

    let err = mesh
        .core
        .create_container(&mesh.ctx("PUT"), dir)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn nested_containers_need_their_parent_first() {
    let mesh = TestMesh::builder().build();
    let nested = mesh
        .core
        .build_container(mesh.user, ContainerPath::parse("docs/2024"))
        .unwrap();

    let err = mesh
        .core
        .create_container(&mesh.ctx("PUT"), nested)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn container_move_takes_everything_underneath_along() {
    let mesh = TestMesh::builder().build();
    setup_object(&mesh, "docs", "a.txt").await;

    let mv = MoveRequest {
        user: mesh.user,
        source: ContainerPath::parse("docs"),
        destination: ContainerPath::parse("archive"),
        key: String::new(),
    };
    let response = mesh
        .core
        .move_container(&mesh.ctx("POST"), mv)
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);

    let moved = mesh
        .core
        .build_object(mesh.user, ContainerPath::parse("archive"), "a.txt", None)
        .unwrap();
    assert!(mesh.store.contains(&moved.disk_path));
}

#[tokio::test]
async fn listing_returns_the_containers_objects() {
    let mesh = TestMesh::builder().build();
    setup_object(&mesh, "docs", "a.txt").await;
    setup_object(&mesh, "docs", "b.txt").await;

    let dir = mesh
        .core
        .build_container(mesh.user, ContainerPath::parse("docs"))
        .unwrap();
    let response = mesh
        .core
        .list_container(&mesh.ctx("GET"), dir)
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);
    let listed: Vec<serde_json::Value> = serde_json::from_slice(&response.body).unwrap();
    let keys: Vec<_> = listed.iter().map(|m| m["key"].as_str().unwrap()).collect();
    assert_eq!(keys, ["a.txt", "b.txt"]);

    let missing = mesh
        .core
        .build_container(mesh.user, ContainerPath::parse("nope"))
        .unwrap();
    let err = mesh
        .core
        .list_container(&mesh.ctx("GET"), missing)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_honors_the_read_container_capability() {
    let mesh = TestMesh::builder().build();
    mesh.permissions.deny(Capability::ReadContainer);
    let dir = mesh
        .core
        .build_container(mesh.user, ContainerPath::root())
        .unwrap();

    let err = mesh
        .core
        .list_container(&mesh.ctx("GET"), dir)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn active_locks_expose_in_flight_operations() {
    let mesh = TestMesh::builder().build();
    let guard = mesh
        .core
        .locks()
        .acquire("u/docs/a.txt", Some(mesh.user), "PUT")
        .unwrap();

    let held = mesh.core.active_locks();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].user, Some(mesh.user));
    assert_eq!(held[0].verb, "PUT");

    drop(guard);
    assert!(mesh.core.active_locks().is_empty());
}

#[tokio::test]
async fn search_matches_keys_case_insensitively() {
    let mesh = TestMesh::builder().build();
    setup_object(&mesh, "docs", "Report.pdf").await;
    setup_object(&mesh, "docs", "notes.txt").await;
    settle().await; // metadata rewrites

    let dir = mesh
        .core
        .build_container(mesh.user, ContainerPath::parse("docs"))
        .unwrap();
    let mut ctx = mesh.ctx("GET");
    ctx.query.insert("q".into(), "report".into());

    let response = mesh.core.search(&ctx, dir).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    let hits: Vec<serde_json::Value> = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["key"], "Report.pdf");
}

/* Bunker */

#[tokio::test]
async fn bunker_copies_are_remapped_under_the_bunker_account() {
    let account = uuid::Uuid::new_v4();
    let mesh = TestMesh::builder()
        .bunker("vault", test_node(9), account)
        .build();
    setup_object(&mesh, "docs", "a.txt").await;
    settle().await;

    let calls = mesh.transport.calls_to(9);
    // one for the container creation, one for the object write
    assert_eq!(calls.len(), 2, "got {calls:?}");
    for call in &calls {
        assert_eq!(call.user, account);
        assert!(
            call.path.contains(&mesh.user.to_string()),
            "original user must survive as a path segment: {}",
            call.path
        );
    }
    assert!(calls.iter().any(|c| c.subject == "object.write"));
    assert!(calls.iter().any(|c| c.subject == "container.create"));
}

#[tokio::test]
async fn an_unreachable_bunker_never_fails_the_operation() {
    let account = uuid::Uuid::new_v4();
    let mesh = TestMesh::builder()
        .bunker("vault", test_node(9), account)
        .build();
    mesh.transport.fail_node(9);

    setup_object(&mesh, "", "a.txt").await;
    settle().await;

    let obj = mesh
        .core
        .build_object(mesh.user, ContainerPath::root(), "a.txt", None)
        .unwrap();
    assert!(mesh.store.contains(&obj.disk_path));
    assert!(mesh.core.mailbox().pending(9).await.unwrap().is_empty());
}
