//! Multi-node scenarios over real sockets.
//!
//! Each test spins an in-process cluster: every node gets its own store,
//! an axum server on an ephemeral port, and a peer list naming all the
//! cluster members (itself included). Tests drive the nodes through the
//! HTTP surface exactly like external clients and peers do, and assert on
//! the stores directly.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use turnlog::config::Settings;
use turnlog::node::Node;
use turnlog::server;
use turnlog::store::{DiskStore, MemoryStore, Store};

struct TestNode {
    url: String,
    node: Node,
    _dir: Option<tempfile::TempDir>,
}

impl TestNode {
    fn learnt(&self, turn_id: u64) -> Option<String> {
        self.node.store.learnt_value(turn_id).unwrap()
    }
}

async fn spawn_cluster(count: usize, manual: bool, disk: bool) -> Vec<TestNode> {
    let mut listeners = Vec::new();
    for _ in 0..count {
        listeners.push(tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    let urls: Vec<String> = listeners
        .iter()
        .map(|listener| format!("http://{}", listener.local_addr().unwrap()))
        .collect();

    let mut cluster = Vec::new();
    for (index, listener) in listeners.into_iter().enumerate() {
        let mut settings = Settings {
            pid: index as u64 + 1,
            nodes: urls.clone(),
            manual_mode: manual,
            seek_active: false,
            timeout: 1,
            wait_before_automatic_request: 0,
            pr_proposals: 1.0,
            pr_nodes: 1.0,
            ..Settings::default()
        };
        settings.fill_runtime_defaults();

        let (store, dir): (Arc<dyn Store>, _) = if disk {
            let dir = tempfile::tempdir().unwrap();
            (Arc::new(DiskStore::open(dir.path()).unwrap()), Some(dir))
        } else {
            (Arc::new(MemoryStore::new()), None)
        };

        let node = Node::new(settings, store).unwrap();
        let router = server::router(node.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        cluster.push(TestNode {
            url: urls[index].clone(),
            node,
            _dir: dir,
        });
    }
    cluster
}

async fn get_json(url: &str) -> Value {
    reqwest::get(url).await.unwrap().json().await.unwrap()
}

async fn get_message(url: &str) -> String {
    get_json(url).await["message"].as_str().unwrap().to_owned()
}

async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn automatic_round_decides_on_every_node() {
    let cluster = spawn_cluster(3, false, false).await;

    let reply = get_message(&format!(
        "{}/proposer/send_prepare?turn_id=1&seq=1&v=x",
        cluster[0].url
    ))
    .await;
    assert!(reply.contains("Quorum has been reached"), "got: {reply}");
    assert!(reply.contains("Sending accept request"), "got: {reply}");

    wait_for("every node to learn x for turn 1", || {
        cluster.iter().all(|member| member.learnt(1).as_deref() == Some("x"))
    })
    .await;

    // The listing route reports the decision too.
    let rows = get_json(&format!("{}/node/get_all_learnt_values", cluster[1].url)).await;
    assert_eq!(rows[0]["turn_id"], 1);
    assert_eq!(rows[0]["learnt"], "x");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contending_proposers_decide_a_single_value() {
    // Manual mode, so the interleaving is under test control.
    let cluster = spawn_cluster(3, true, false).await;
    let a = &cluster[0];
    let c = &cluster[2];

    // A prepares first; every acceptor promises.
    let reply = get_message(&format!("{}/proposer/send_prepare?turn_id=1&seq=1&v=x", a.url)).await;
    assert!(reply.contains("Quorum has been reached"), "got: {reply}");
    assert!(reply.contains("send_accept?turn_id=1&seq=1&v=x"), "got: {reply}");

    // C prepares with a higher number before A's accept. The promises
    // carry A's value, so C is bound to it even though it proposed y.
    let reply = get_message(&format!("{}/proposer/send_prepare?turn_id=1&seq=2&v=y", c.url)).await;
    assert!(reply.contains("Quorum has been reached"), "got: {reply}");
    assert!(reply.contains("send_accept?turn_id=1&seq=2&v=x"), "got: {reply}");

    // A's accept is now below every acceptor's promise and gets declined;
    // the suggested retry jumps past the highest decline.
    let reply = get_message(&format!("{}/proposer/send_accept?turn_id=1&seq=1&v=x", a.url)).await;
    assert!(reply.contains("Quorum has NOT been reached"), "got: {reply}");
    assert!(reply.contains("send_prepare?turn_id=1&seq=3&v=x"), "got: {reply}");

    // C's accept matches the promised number exactly and goes through.
    let reply = get_message(&format!("{}/proposer/send_accept?turn_id=1&seq=2&v=x", c.url)).await;
    assert!(reply.contains("Quorum has been reached"), "got: {reply}");
    assert!(reply.contains("send_learn?turn_id=1&v=x"), "got: {reply}");

    let reply = get_message(&format!("{}/proposer/send_learn?turn_id=1&v=x", c.url)).await;
    assert!(reply.contains("ignoring responses"), "got: {reply}");

    wait_for("every node to learn x for turn 1", || {
        cluster.iter().all(|member| member.learnt(1).as_deref() == Some("x"))
    })
    .await;

    // A's retry arrives after the decision and is short-circuited.
    let reply = get_message(&format!("{}/proposer/send_prepare?turn_id=1&seq=3&v=x", a.url)).await;
    assert!(reply.contains("already known"), "got: {reply}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partitioned_minority_makes_no_progress() {
    // One live node; the two configured peers are bound-then-dropped ports.
    let mut dead_urls = Vec::new();
    for _ in 0..2 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        dead_urls.push(format!("http://{}", listener.local_addr().unwrap()));
        drop(listener);
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let mut settings = Settings {
        pid: 1,
        nodes: vec![url.clone(), dead_urls[0].clone(), dead_urls[1].clone()],
        manual_mode: true,
        seek_active: false,
        timeout: 1,
        ..Settings::default()
    };
    settings.fill_runtime_defaults();
    assert_eq!(settings.quorum, 2);

    let node = Node::new(settings, Arc::new(MemoryStore::new())).unwrap();
    let router = server::router(node.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let reply = get_message(&format!("{url}/proposer/send_prepare?turn_id=1&seq=1&v=x")).await;
    assert!(reply.contains("Quorum has NOT been reached"), "got: {reply}");
    assert!(reply.contains("Only 1 responded but 2 are needed"), "got: {reply}");

    // The lone acceptor recorded the attempt, but nothing was decided.
    let recorded = node.store.proposal(1).unwrap().unwrap();
    assert_eq!(recorded.seq, 1);
    assert!(node.store.learnt_value(1).unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn seek_pulls_decisions_from_peers() {
    let cluster = spawn_cluster(3, true, false).await;
    let a = &cluster[0];
    let b = &cluster[1];

    // B knows a decision A has never heard of.
    let reply = get_message(&format!("{}/node/set_learnt_value?turn_id=5&v=z", b.url)).await;
    assert_eq!(reply, "set");

    assert_eq!(a.learnt(5), None);
    let reply = get_message(&format!("{}/seeker/send_seek", a.url)).await;
    assert_eq!(reply, "ok");

    assert_eq!(a.learnt(5).as_deref(), Some("z"));
    // The third node did not seek and stays behind for now.
    assert_eq!(cluster[2].learnt(5), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn seek_revives_dangling_proposals() {
    let cluster = spawn_cluster(3, false, false).await;
    let a = &cluster[0];

    // A promised (seq 1, own pid) once but the negotiation died there.
    a.node
        .store
        .set_proposal(4, &turnlog::Proposal::new(1, 1, "w"), true)
        .unwrap();

    let reply = get_message(&format!("{}/seeker/send_seek", a.url)).await;
    assert_eq!(reply, "ok");

    // The revived prepare runs the full automatic round to a decision.
    wait_for("the dangling turn to be decided everywhere", || {
        cluster.iter().all(|member| member.learnt(4).as_deref() == Some("w"))
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn learnt_reply_short_circuits_a_prepare_round() {
    let cluster = spawn_cluster(3, true, false).await;
    let a = &cluster[0];
    let c = &cluster[2];

    let reply = get_message(&format!("{}/node/set_learnt_value?turn_id=7&v=q", c.url)).await;
    assert_eq!(reply, "set");

    let reply = get_message(&format!("{}/proposer/send_prepare?turn_id=7&seq=1&v=other", a.url)).await;
    assert!(reply.contains("learnt value"), "got: {reply}");

    // A adopted the decided value without finishing the round, and its
    // flood brings the remaining node up to date.
    assert_eq!(a.learnt(7).as_deref(), Some("q"));
    wait_for("the flood to reach the remaining node", || {
        cluster[1].learnt(7).as_deref() == Some("q")
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn learn_requests_are_write_once() {
    let cluster = spawn_cluster(3, true, false).await;
    let b = &cluster[1];
    let client = reqwest::Client::new();

    let learn = |v: &str| {
        serde_json::json!({
            "turn_id": 9,
            "message_type": "learn_request",
            "message_body": {
                "message": "",
                "proposal": { "pid": 0, "seq": 0, "v": v },
                "learnt": "",
            },
        })
    };

    let reply: Value = client
        .post(format!("{}/learner/receive_learn", b.url))
        .json(&learn("x"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply["message_body"]["message"], "value stored");
    assert_eq!(reply["message_body"]["learnt"], "x");

    // Same value again: a no-op.
    let reply: Value = client
        .post(format!("{}/learner/receive_learn", b.url))
        .json(&learn("x"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply["message_body"]["message"], "");

    // A different value is refused and nothing changes.
    let reply: Value = client
        .post(format!("{}/learner/receive_learn", b.url))
        .json(&learn("y"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(
        reply["message_body"]["message"]
            .as_str()
            .unwrap()
            .contains("different value")
    );
    assert_eq!(b.learnt(9).as_deref(), Some("x"));

    // The first learn was gossiped to the whole cluster.
    wait_for("the gossip to reach every node", || {
        cluster.iter().all(|member| member.learnt(9).as_deref() == Some("x"))
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disk_backed_cluster_decides_and_persists() {
    let cluster = spawn_cluster(3, false, true).await;

    let reply = get_message(&format!(
        "{}/proposer/send_prepare?turn_id=1&seq=1&v=durable",
        cluster[0].url
    ))
    .await;
    assert!(reply.contains("Quorum has been reached"), "got: {reply}");

    wait_for("every node to learn the value", || {
        cluster
            .iter()
            .all(|member| member.learnt(1).as_deref() == Some("durable"))
    })
    .await;

    // The synced rows are what a restarted process would reload.
    let rows = cluster[2].node.store.all_learnt_values().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].learnt, "durable");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn info_reports_language_mode_and_pid() {
    let cluster = spawn_cluster(1, true, false).await;
    let reply = get_message(&format!("{}/info", cluster[0].url)).await;
    assert_eq!(reply, format!("rust@manual@{}", cluster[0].node.settings.pid));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn debug_routes_round_trip() {
    let cluster = spawn_cluster(1, true, false).await;
    let url = &cluster[0].url;

    let reply = get_message(&format!("{url}/node/set_proposal?turn_id=2&pid=1&seq=4&v=val")).await;
    assert_eq!(reply, "set");

    let row = get_json(&format!("{url}/node/get_proposal?turn_id=2")).await;
    assert_eq!(row["pid"], 1);
    assert_eq!(row["seq"], 4);
    assert_eq!(row["v"], "val");

    // Unknown turns answer with the null proposal.
    let row = get_json(&format!("{url}/node/get_proposal?turn_id=99")).await;
    assert_eq!(row["pid"], 0);
    assert_eq!(row["seq"], 0);

    let reply = get_message(&format!("{url}/node/reset_proposal?turn_id=2")).await;
    assert_eq!(reply, "reset");
    let rows = get_json(&format!("{url}/node/get_all_proposals")).await;
    assert_eq!(rows.as_array().unwrap().len(), 0);

    let envelope = get_json(&format!("{url}/node/get_learnt_value?turn_id=3")).await;
    assert_eq!(envelope["message_body"]["learnt"], "");
}
