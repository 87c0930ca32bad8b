use anyhow::Context;
use clap::Parser;
use cli::Cli;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use torrent_node_api_server::NodeServerBuilder;
use torrent_node_config::types::Modules;
use torrent_node_config::NodeConfig;
use torrent_node_core::chain::{BlockChain, Timeline};
use torrent_node_core::node::Node;
use torrent_node_core::source::peers::PeerClient;
use torrent_node_core::source::{BlockSource, FileBlockSource, NetworkBlockSource};
use torrent_node_core::storage::{BlockStore, KvStore};
use torrent_node_core::sync::{Sync, WorkerSet};
use torrent_node_core::workers::oracle::OracleClient;
use torrent_node_core::workers::{MainWorker, NodeTestWorker, ScriptWorker};
use tracing_subscriber::EnvFilter;

mod cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (config, sign_secret) = cli.into_config()?;
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building the tokio runtime")?
        .block_on(run(config, sign_secret))
}

async fn run(config: NodeConfig, sign_secret: Option<[u8; 32]>) -> anyhow::Result<()> {
    let modules = config.modules;
    let store = Arc::new(BlockStore::new(
        &config.storage.blocks_folder,
        config.storage.max_block_file_size,
    )?);
    let kv = Arc::new(KvStore::open(&config.storage.db_folder)?);
    let contract_kv = Arc::new(KvStore::open(&config.storage.contract_db_folder)?);
    let node_test_kv = Arc::new(KvStore::open(&config.storage.node_test_db_folder)?);
    let chain = Arc::new(BlockChain::new());
    let timeline = Arc::new(Timeline::new());

    // The workers resume from their own cursors; the driver replays the
    // distance between the slowest cursor and the chain tip on startup.
    let main_worker = MainWorker::new(kv.clone(), modules, config.sync.validate_states)?;
    let mut min_saved_block = main_worker.init_block_number();

    let script_worker = if modules.contains(Modules::CONTRACT) && !config.oracle.base_url.is_empty()
    {
        let oracle = OracleClient::new(
            config.oracle.base_url.clone(),
            Duration::from_millis(config.oracle.timeout_ms),
        );
        oracle
            .health_check()
            .await
            .context("contract oracle is unreachable")?;
        let worker = ScriptWorker::new(contract_kv.clone(), kv.clone(), oracle, modules)?;
        min_saved_block = min_saved_block.min(worker.init_block_number());
        Some(worker)
    } else {
        None
    };

    let node_test_worker = if modules.contains(Modules::NODE_TEST) {
        let worker = NodeTestWorker::new(node_test_kv.clone())?;
        min_saved_block = min_saved_block.min(worker.init_block_number());
        Some(worker)
    } else {
        None
    };

    let workers = WorkerSet {
        main: Some(main_worker.spawn()),
        script: script_worker.map(ScriptWorker::spawn),
        node_test: node_test_worker.map(NodeTestWorker::spawn),
        min_saved_block,
    };

    let source: Box<dyn BlockSource> = if config.sync.blocks_from_file {
        Box::new(FileBlockSource::new(
            kv.clone(),
            store.clone(),
            config.sync.validate,
        ))
    } else {
        let client = PeerClient::new(config.sync.peers.clone(), Duration::from_secs(30));
        Box::new(NetworkBlockSource::new(client, config.sync.clone()))
    };

    let mut sync = Sync::new(
        kv.clone(),
        store.clone(),
        chain.clone(),
        timeline.clone(),
        source,
        workers,
        modules,
        !config.sync.blocks_from_file,
    );
    let known_last_block = sync.known_last_block();
    sync.initialize().await.context("initializing the node")?;

    let node = Node::new(
        kv,
        contract_kv,
        node_test_kv,
        store,
        chain,
        timeline,
        modules,
        known_last_block,
        sign_secret,
    );
    let mut server_builder = NodeServerBuilder::new(node);
    if config.server.cors {
        server_builder = server_builder.enable_cors();
    }
    let server = server_builder
        .serve(
            config
                .server
                .listen
                .parse()
                .context("parsing the listen address")?,
        )
        .await?;

    let (stop_sender, stop_receiver) = watch::channel(false);
    let mut sync_task = tokio::spawn(sync.run(stop_receiver));

    tokio::select! {
        result = &mut sync_task => {
            // Ingestion ended on its own: either a fatal data error or a
            // worker failure.
            result.context("sync task panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            let _ = stop_sender.send(true);
            sync_task.await.context("sync task panicked")??;
        }
    }

    let _ = server.stop();
    server.stopped().await;
    Ok(())
}
