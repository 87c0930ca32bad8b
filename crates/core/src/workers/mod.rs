//! Projection workers. Each consumes linked main blocks from its own
//! single-slot queue, so one slow worker pauses ingestion instead of
//! falling behind unboundedly, and resumes from its own persisted cursor.

pub mod main_worker;
pub mod node_test_worker;
pub mod oracle;
pub mod script_worker;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use torrent_node_types::BlockInfo;

pub use main_worker::MainWorker;
pub use node_test_worker::NodeTestWorker;
pub use script_worker::ScriptWorker;

/// Driver-side handle of a spawned worker.
pub struct WorkerHandle {
    name: &'static str,
    sender: mpsc::Sender<Arc<BlockInfo>>,
    join: JoinHandle<anyhow::Result<()>>,
}

impl WorkerHandle {
    pub(crate) fn from_parts(
        name: &'static str,
        sender: mpsc::Sender<Arc<BlockInfo>>,
        join: JoinHandle<anyhow::Result<()>>,
    ) -> WorkerHandle {
        WorkerHandle { name, sender, join }
    }

    /// Hands one linked block to the worker, waiting while its slot is
    /// full. Returns false once the worker has shut down.
    pub async fn process(&self, block: Arc<BlockInfo>) -> bool {
        if self.sender.send(block).await.is_err() {
            tracing::error!(worker = self.name, "worker queue closed");
            return false;
        }
        true
    }

    /// Closes the queue and waits for the worker to drain and exit.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        drop(self.sender);
        match self.join.await {
            Ok(result) => result,
            Err(join_error) => Err(anyhow::anyhow!("worker {} panicked: {join_error}", self.name)),
        }
    }
}

/// Runs `apply` for every queued block on a dedicated task.
pub(crate) fn spawn_worker<W, F>(name: &'static str, mut worker: W, apply: F) -> WorkerHandle
where
    W: Send + 'static,
    F: FnMut(&mut W, Arc<BlockInfo>) -> anyhow::Result<()> + Send + 'static,
{
    let (sender, mut receiver) = mpsc::channel::<Arc<BlockInfo>>(1);
    let mut apply = apply;
    let join = tokio::task::spawn_blocking(move || {
        while let Some(block) = receiver.blocking_recv() {
            if let Err(err) = apply(&mut worker, block) {
                tracing::error!(worker = name, error = %err, "worker failed, stopping ingestion");
                return Err(err);
            }
        }
        tracing::info!(worker = name, "worker drained and stopped");
        Ok(())
    });
    WorkerHandle { name, sender, join }
}
