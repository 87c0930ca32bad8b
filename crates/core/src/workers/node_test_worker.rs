//! Node-test projection: per-server, per-day statistics aggregated from
//! the technical test transactions, plus the registered-node directory.

use super::{spawn_worker, WorkerHandle};
use crate::storage::{keys, records, Batch, KvStore};
use anyhow::{bail, Context};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use torrent_node_types::{
    AllNodes, AllNodesNode, AllTestedNodes, BestNodeElement, BestNodeTest, BlockInfo, NodeRps,
    NodeTestCount, NodeTestDayNumber, NodeTestResult, NodeTestTrust, TransactionInfo, WorkerCursor,
};

pub struct NodeTestWorker {
    kv: Arc<KvStore>,
    init_block_number: u64,
}

impl NodeTestWorker {
    pub fn new(kv: Arc<KvStore>) -> anyhow::Result<NodeTestWorker> {
        let cursor = records::find_node_test_cursor(&kv)?;
        Ok(NodeTestWorker {
            kv,
            init_block_number: cursor.block_number,
        })
    }

    pub fn init_block_number(&self) -> u64 {
        self.init_block_number
    }

    pub fn spawn(self) -> WorkerHandle {
        spawn_worker("node-test", self, |worker, block| worker.apply_block(&block))
    }

    pub fn apply_block(&mut self, block: &BlockInfo) -> anyhow::Result<()> {
        let block_number = block
            .header
            .block_number
            .context("worker received an unlinked block")?;

        let cursor = records::find_node_test_cursor(&self.kv)?;
        if block_number <= cursor.block_number {
            return Ok(());
        }
        if let Some(prev) = &cursor.block_hash {
            if *prev != block.header.prev_hash {
                bail!(
                    "node-test worker linearity check failed: expected prev {prev}, block {} has {}",
                    block_number,
                    block.header.prev_hash
                );
            }
        }

        let started = Instant::now();
        let curr_day = records::find_node_test_day(&self.kv)?.day_number;

        let mut batch = Batch::new();
        let mut tested_today = AllTestedNodes {
            day: curr_day,
            ..AllTestedNodes::default()
        };
        let mut registered = AllNodes::default();
        let mut count_tests: HashMap<String, NodeTestCount> = HashMap::new();
        let mut nodes_rps: HashMap<String, NodeRps> = HashMap::new();
        let mut all_tests = NodeTestCount::new(curr_day);
        let mut last_tests: HashMap<String, BestNodeTest> = HashMap::new();

        for tx in &block.txs {
            if tx.is_status_node_test() {
                // A malformed test payload is the sender's problem, not
                // ours: skip the transaction and keep going.
                match parse_test_transaction(tx) {
                    Some(result) => self.record_test(
                        block,
                        tx,
                        result,
                        curr_day,
                        &mut last_tests,
                        &mut count_tests,
                        &mut nodes_rps,
                        &mut all_tests,
                        &mut tested_today,
                    )?,
                    None => {
                        tracing::debug!(tx = %tx.hash, "unparseable node-test transaction");
                    }
                }
            } else if block.header.is_state_block() {
                record_trust(block, tx, &mut batch)?;
            } else {
                record_registration(tx, &mut registered);
            }
        }

        if block.header.is_state_block() {
            batch.put_record(
                keys::NODE_TEST_DAY_KEY.to_vec(),
                &NodeTestDayNumber {
                    day_number: curr_day + 1,
                },
            )?;
        }

        for (server, count) in count_tests {
            let mut merged = records::find_node_stat_count(&self.kv, &server, curr_day)?;
            merged.merge(&count);
            batch.put_record(keys::node_stat_count(&server, curr_day), &merged)?;
        }
        for (server, rps) in nodes_rps {
            let mut merged = records::find_node_rps(&self.kv, &server, curr_day)?;
            merged.rps.extend(rps.rps);
            batch.put_record(keys::node_rps(&server, curr_day), &merged)?;
        }
        if all_tests.count_all != 0 {
            let mut merged = records::find_node_stats_count(&self.kv, curr_day)?;
            merged.merge(&all_tests);
            batch.put_record(keys::node_stats_count(curr_day), &merged)?;
        }
        for (server, best) in last_tests {
            batch.put_record(keys::node_stat_result(&server), &best)?;
        }
        if !tested_today.nodes.is_empty() {
            let mut merged = records::find_all_tested_nodes(&self.kv, curr_day)?;
            merged.merge(&tested_today);
            merged.day = curr_day;
            batch.put_record(keys::all_tested_nodes(curr_day), &merged)?;
        }
        if !registered.nodes.is_empty() {
            let mut merged = records::find_all_nodes(&self.kv)?;
            merged.merge(&registered);
            batch.put_record(keys::ALL_NODES_KEY.to_vec(), &merged)?;
        }

        batch.put_record(
            keys::NODE_TEST_CURSOR_KEY.to_vec(),
            &WorkerCursor::new(block_number, block.header.hash, 0),
        )?;
        self.kv.write(batch)?;

        tracing::info!(
            block = block_number,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "block saved to node-test store"
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn record_test(
        &self,
        block: &BlockInfo,
        tx: &TransactionInfo,
        result: NodeTestResult,
        curr_day: u64,
        last_tests: &mut HashMap<String, BestNodeTest>,
        count_tests: &mut HashMap<String, NodeTestCount>,
        nodes_rps: &mut HashMap<String, NodeRps>,
        all_tests: &mut NodeTestCount,
        tested_today: &mut AllTestedNodes,
    ) -> anyhow::Result<()> {
        if !last_tests.contains_key(&result.server_address) {
            let loaded = records::find_node_stat_result(&self.kv, &result.server_address)?;
            last_tests.insert(result.server_address.clone(), loaded);
        }
        let best = last_tests
            .get_mut(&result.server_address)
            .expect("entry inserted above");
        best.add_element(
            BestNodeElement {
                timestamp: block.header.timestamp,
                geo: result.geo.clone(),
                rps: result.rps,
                tx_pos: tx.file_pos.clone(),
            },
            curr_day,
        );
        best.is_max_element = result.is_forward_sort;

        let count = count_tests
            .entry(result.server_address.clone())
            .or_insert_with(|| NodeTestCount::new(curr_day));
        count.count_all += 1;
        if !result.success {
            count.count_failure += 1;
        }
        count.testers.insert(result.tester_address.clone());

        nodes_rps
            .entry(result.server_address.clone())
            .or_default()
            .rps
            .push(if result.success { result.rps } else { 0 });

        all_tests.count_all += 1;
        if !result.success {
            all_tests.count_failure += 1;
        }
        all_tests.testers.insert(result.tester_address.clone());

        tested_today.nodes.insert(result.server_address);
        Ok(())
    }
}

/// Decodes `proxy_load_results` and `mhAddNodeCheckResult` payloads.
pub fn parse_test_transaction(tx: &TransactionInfo) -> Option<NodeTestResult> {
    let doc: Value = serde_json::from_slice(&tx.data).ok()?;
    let method = doc.get("method")?.as_str()?;
    let params = doc.get("params")?;

    let string_param = |name: &str| -> Option<String> {
        params.get(name).and_then(Value::as_str).map(str::to_string)
    };
    let numeric_param = |name: &str| -> Option<u64> {
        params.get(name).and_then(Value::as_str)?.parse().ok()
    };

    match method {
        "proxy_load_results" => {
            let server_address = string_param("mhaddr")?;
            let ip = string_param("ip")?;
            let mut rps = numeric_param("rps")?;
            let success = string_param("success").map(|s| s == "true").unwrap_or(true);
            if !success {
                rps = 0;
            }
            let geo = string_param("geo").unwrap_or_default();
            Some(NodeTestResult {
                server_address,
                tester_address: tx.from_address.clone(),
                type_node: "Proxy".to_string(),
                raw_result: tx.data.clone(),
                ip,
                geo,
                rps,
                success,
                is_forward_sort: true,
                ..NodeTestResult::default()
            })
        }
        "mhAddNodeCheckResult" => {
            let type_node = string_param("type")?;
            let server_address = string_param("address")?;
            let ip = string_param("host")?;
            // Newer testers report rps, older ones latency.
            let mut rps = numeric_param("rps")
                .or_else(|| numeric_param("latency"))
                .unwrap_or(0);
            let success = string_param("success")? == "true";
            if !success {
                rps = 0;
            }
            let geo = string_param("geo")?;
            Some(NodeTestResult {
                server_address,
                tester_address: tx.from_address.clone(),
                type_node,
                raw_result: tx.data.clone(),
                ip,
                geo,
                rps,
                success,
                is_forward_sort: false,
                ..NodeTestResult::default()
            })
        }
        _ => None,
    }
}

/// State-block trust assertions for a server address.
fn record_trust(block: &BlockInfo, tx: &TransactionInfo, batch: &mut Batch) -> anyhow::Result<()> {
    let Ok(doc) = serde_json::from_slice::<Value>(&tx.data) else {
        return Ok(());
    };
    let Some(trust) = doc.get("trust").and_then(Value::as_i64) else {
        return Ok(());
    };
    let server = format!("0x{}", hex::encode(tx.to_address.as_bytes()));
    batch.put_record(
        keys::node_stat_trust(&server),
        &NodeTestTrust {
            trust_json: String::from_utf8_lossy(&tx.data).to_string(),
            timestamp: block.header.timestamp,
            trust,
        },
    )?;
    Ok(())
}

/// `mh-noderegistration` / `mhRegisterNode` announcements.
fn record_registration(tx: &TransactionInfo, registered: &mut AllNodes) {
    if tx.data.first() != Some(&b'{') || tx.data.last() != Some(&b'}') {
        return;
    }
    let Ok(doc) = serde_json::from_slice::<Value>(&tx.data) else {
        return;
    };
    let Some(method) = doc.get("method").and_then(Value::as_str) else {
        return;
    };
    if method != "mh-noderegistration" && method != "mhRegisterNode" {
        return;
    }
    let Some(params) = doc.get("params") else {
        return;
    };
    let (Some(host), Some(name)) = (
        params.get("host").and_then(Value::as_str),
        params.get("name").and_then(Value::as_str),
    ) else {
        return;
    };
    let kind = params
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();
    registered.nodes.insert(
        host.to_string(),
        AllNodesNode {
            name: name.to_string(),
            kind: kind.to_string(),
        },
    );
}
