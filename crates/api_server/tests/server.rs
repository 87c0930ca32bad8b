//! End-to-end checks of the query surface over an empty store.

use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::HttpClientBuilder;
use jsonrpsee::rpc_params;
use serde_json::Value;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tempfile::TempDir;
use torrent_node_api_server::NodeServerBuilder;
use torrent_node_core::chain::{BlockChain, Timeline};
use torrent_node_core::node::Node;
use torrent_node_core::storage::{BlockStore, KvStore};

async fn spawn_server() -> (TempDir, torrent_node_api_server::NodeServerHandle) {
    let dir = TempDir::new().unwrap();
    let kv = Arc::new(KvStore::open(dir.path().join("db")).unwrap());
    let timeline = Timeline::new();
    timeline.deserialize(Vec::new()).unwrap();
    let node = Node::new(
        kv.clone(),
        Arc::new(KvStore::open(dir.path().join("contract")).unwrap()),
        Arc::new(KvStore::open(dir.path().join("node-test")).unwrap()),
        Arc::new(BlockStore::new(dir.path().join("blocks"), 1 << 20).unwrap()),
        Arc::new(BlockChain::new()),
        Arc::new(timeline),
        torrent_node_config::types::Modules::all(),
        Arc::new(AtomicU64::new(0)),
        None,
    );
    let handle = NodeServerBuilder::new(node)
        .serve("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    (dir, handle)
}

#[tokio::test]
async fn status_and_empty_queries() {
    let (_dir, server) = spawn_server().await;
    let client = HttpClientBuilder::default()
        .build(format!("http://{}", server.local_addr()))
        .unwrap();

    let status: Value = client.request("status", rpc_params![]).await.unwrap();
    assert_eq!(status["count_blocks"], 0);
    assert_eq!(status["version"], "v4.5");

    let count: u64 = client
        .request("get-count-blocks", rpc_params![])
        .await
        .unwrap();
    assert_eq!(count, 0);

    // A never-seen address reports an empty balance instead of an error.
    let address = torrent_node_types::Address::from_pubkey(b"fresh");
    let balance: Value = client
        .request(
            "fetch-balance",
            rpc_params![hex::encode(address.as_bytes())],
        )
        .await
        .unwrap();
    assert_eq!(balance["received"], 0);
    assert_eq!(balance["count_txs"], 0);

    let _ = server.stop();
    server.stopped().await;
}

#[tokio::test]
async fn bad_parameters_are_rejected() {
    let (_dir, server) = spawn_server().await;
    let client = HttpClientBuilder::default()
        .build(format!("http://{}", server.local_addr()))
        .unwrap();

    let result: Result<Value, _> = client
        .request("fetch-balance", rpc_params!["zz-not-hex"])
        .await;
    assert!(result.is_err());

    let result: Result<Value, _> = client
        .request("get-block-by-hash", rpc_params!["00"])
        .await;
    // Wrong hash length.
    assert!(result.is_err());

    let _ = server.stop();
    server.stopped().await;
}
