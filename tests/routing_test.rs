//! End-to-end routing scenarios driven entirely through fakes: no real
//! Postgres or Redis involved, matching the unit-level fakes' contracts in
//! `directory::fakes` and `liveness::fakes`.

use std::collections::VecDeque;
use std::sync::Arc;

use storage_router::config::{DirectoryConfig, RedisConfig, RouterConfig};
use storage_router::directory::fakes::FakeDirectory;
use storage_router::liveness::fakes::FakeLiveness;
use storage_router::{RouteDecision, Router};

fn config(service_domain: &str, dest: &[&str]) -> RouterConfig {
    RouterConfig {
        service_domain: service_domain.to_string(),
        web_server_port: 80,
        web_writer_port: 8088,
        management_api_request_dest: dest.iter().map(|s| s.to_string()).collect::<VecDeque<_>>(),
        redis: RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
        },
        directory: DirectoryConfig {
            host: "localhost".to_string(),
            port: 5432,
            database: "central".to_string(),
            user: "test".to_string(),
            password: String::new(),
            schema: None,
        },
    }
}

#[tokio::test]
async fn unreachable_hostname_suffix_is_rejected() {
    let router = Router::new(
        config("example.com", &["mgmt1"]),
        Arc::new(FakeDirectory::new()),
        FakeLiveness::new(),
        "hash".to_string(),
    );

    let decision = router
        .route(Some("alpha.wrong-domain.com"), "GET", "/data", "")
        .await
        .unwrap();

    assert!(matches!(decision, RouteDecision::Close(body) if body.starts_with("HTTP/1.0 404")));
}

#[tokio::test]
async fn management_requests_round_robin_across_destinations() {
    let router = Router::new(
        config("example.com", &["mgmt1", "mgmt2", "mgmt3"]),
        Arc::new(FakeDirectory::new()),
        FakeLiveness::new(),
        "hash".to_string(),
    );

    let mut targets = Vec::new();
    for _ in 0..4 {
        match router.route(Some("example.com"), "GET", "/", "").await.unwrap() {
            RouteDecision::Remote(t) => targets.push(t),
            RouteDecision::Close(_) => panic!("expected a management target"),
        }
    }

    assert_eq!(targets, vec!["mgmt2", "mgmt3", "mgmt1", "mgmt2"]);
}

#[tokio::test]
async fn unknown_collection_is_rejected_with_404() {
    let router = Router::new(
        config("example.com", &["mgmt1"]),
        Arc::new(FakeDirectory::new()),
        FakeLiveness::new(),
        "hash".to_string(),
    );

    let decision = router
        .route(Some("no-such-bucket.example.com"), "GET", "/", "")
        .await
        .unwrap();

    assert!(matches!(decision, RouteDecision::Close(body) if body.contains("404")));
}

#[tokio::test]
async fn read_and_write_methods_route_to_different_ports() {
    let directory = Arc::new(
        FakeDirectory::new()
            .with_collection("bucket", 1)
            .with_cluster(1, vec!["node-1"]),
    );
    let liveness = FakeLiveness::new();
    liveness.set_reachable("127.0.0.1:80", true);
    liveness.set_reachable("127.0.0.1:8088", true);

    let router = Router::new(
        config("example.com", &["mgmt1"]),
        directory,
        liveness,
        "hash".to_string(),
    );
    router.seed_host_dns("node-1").await;

    let read = router.route(Some("bucket.example.com"), "HEAD", "/obj", "").await.unwrap();
    assert_eq!(read, RouteDecision::Remote("node-1:80".to_string()));

    let write = router
        .route(Some("bucket.example.com"), "DELETE", "/obj", "")
        .await
        .unwrap();
    assert_eq!(write, RouteDecision::Remote("node-1:8088".to_string()));
}

#[tokio::test]
async fn concurrent_requests_for_the_same_collection_all_succeed() {
    // spec.md §8 Scenario 5: 100 concurrent calls on a cold cache, directory
    // query instrumented with a delay, must collapse to exactly one
    // directory query per lookup (collection→cluster, cluster→hosts) — not
    // "a handful" of redundant ones. The cache write now happens inside the
    // memoizer's lock (see `router.rs::cluster_id_for_collection` /
    // `cluster_record`), so every waiter still queued on the lock when the
    // first query lands observes the cached value via its own recheck.
    let mut directory = FakeDirectory::new()
        .with_collection("bucket", 9)
        .with_cluster(9, vec!["node-1", "node-2"]);
    directory.delay = std::time::Duration::from_millis(50);
    let directory = Arc::new(directory);
    let liveness = FakeLiveness::new();
    liveness.set_reachable("127.0.0.1:80", true);

    let router = Arc::new(Router::new(
        config("example.com", &["mgmt1"]),
        directory.clone(),
        liveness,
        "hash".to_string(),
    ));
    router.seed_host_dns("node-1").await;
    router.seed_host_dns("node-2").await;

    let mut handles = Vec::new();
    for _ in 0..100 {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            router.route(Some("bucket.example.com"), "GET", "/", "").await.unwrap()
        }));
    }

    for h in handles {
        assert!(matches!(h.await.unwrap(), RouteDecision::Remote(_)));
    }
    assert_eq!(directory.call_count(), 2, "one collection lookup + one cluster-info lookup");
}

#[tokio::test(start_paused = true)]
async fn all_hosts_down_rejects_with_503_after_the_availability_timeout() {
    let directory = Arc::new(
        FakeDirectory::new()
            .with_collection("bucket", 1)
            .with_cluster(1, vec!["node-1"]),
    );
    let liveness = FakeLiveness::new();
    liveness.set_reachable("127.0.0.1:80", false);

    let router = Router::new(
        config("example.com", &["mgmt1"]),
        directory,
        liveness,
        "hash".to_string(),
    );
    router.seed_host_dns("node-1").await;

    let decision = router.route(Some("bucket.example.com"), "GET", "/", "").await.unwrap();
    assert!(matches!(decision, RouteDecision::Close(body) if body.starts_with("HTTP/1.0 503")));
}
