//! Records the node-test worker aggregates per server address and per day.

use crate::primitives::{Address, FilePosition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One decoded node-test transaction.
#[derive(Clone, Debug, Default)]
pub struct NodeTestResult {
    pub server_address: String,
    pub tester_address: Address,
    pub type_node: String,
    pub raw_result: Vec<u8>,
    pub ip: String,
    pub geo: String,
    pub rps: u64,
    pub success: bool,
    /// Proxy testers report throughput (higher is better); node testers
    /// report latency, where lower wins.
    pub is_forward_sort: bool,
    pub day: u64,
    pub timestamp: u64,
    pub avg_rps: u64,
}

/// One sample kept in the per-server rolling day window.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestNodeElement {
    pub timestamp: u64,
    pub geo: String,
    pub rps: u64,
    pub tx_pos: FilePosition,
}

/// Rolling list of the current day's samples for one server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BestNodeTest {
    pub tests: Vec<BestNodeElement>,
    pub day: u64,
    pub is_max_element: bool,
}

impl Default for BestNodeTest {
    fn default() -> Self {
        BestNodeTest {
            tests: Vec::new(),
            day: 0,
            is_max_element: true,
        }
    }
}

impl BestNodeTest {
    /// Appends a sample, resetting the window when the day rolls over.
    pub fn add_element(&mut self, element: BestNodeElement, curr_day: u64) {
        if self.day != curr_day {
            self.tests.clear();
            self.day = curr_day;
        }
        self.tests.push(element);
    }

    /// Picks the representative sample of `curr_day`: the latest one from
    /// the geo whose average rps wins the arg-min/arg-max selection.
    pub fn get_max(&self, curr_day: u64) -> Option<BestNodeElement> {
        if curr_day != self.day {
            return None;
        }

        let mut geos: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
        for test in &self.tests {
            if test.rps != 0 {
                let entry = geos.entry(test.geo.as_str()).or_default();
                entry.0 += test.rps;
                entry.1 += 1;
            }
        }

        let averaged = geos.iter().map(|(geo, (sum, count))| (*geo, sum / count));
        let best_geo = if self.is_max_element {
            averaged.max_by_key(|(_, avg)| *avg)?.0
        } else {
            averaged.min_by_key(|(_, avg)| *avg)?.0
        };

        self.tests.iter().rev().find(|t| t.geo == best_geo).cloned()
    }
}

/// Test counters for one (server, day) pair.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTestCount {
    pub count_all: u64,
    pub count_failure: u64,
    pub day: u64,
    pub testers: BTreeSet<Address>,
}

impl NodeTestCount {
    pub fn new(day: u64) -> NodeTestCount {
        NodeTestCount {
            day,
            ..NodeTestCount::default()
        }
    }

    pub fn count_success(&self) -> u64 {
        self.count_all - self.count_failure
    }

    pub fn merge(&mut self, other: &NodeTestCount) {
        self.count_all += other.count_all;
        self.count_failure += other.count_failure;
        self.day = self.day.max(other.day);
        self.testers.extend(other.testers.iter().cloned());
    }
}

/// Raw rps samples of one (server, day) pair; averaged on read.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRps {
    pub rps: Vec<u64>,
}

impl NodeRps {
    pub fn average(&self) -> Option<u64> {
        if self.rps.is_empty() {
            return None;
        }
        Some(self.rps.iter().sum::<u64>() / self.rps.len() as u64)
    }
}

/// Trust value asserted for a server by a state block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeTestTrust {
    pub trust_json: String,
    pub timestamp: u64,
    pub trust: i64,
}

impl Default for NodeTestTrust {
    fn default() -> Self {
        NodeTestTrust {
            trust_json: String::new(),
            timestamp: 0,
            trust: 1,
        }
    }
}

/// The worker's day counter; bumps at the end of every state block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTestDayNumber {
    pub day_number: u64,
}

/// Servers that received at least one test on a given day.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllTestedNodes {
    pub nodes: BTreeSet<String>,
    pub day: u64,
}

impl AllTestedNodes {
    pub fn merge(&mut self, other: &AllTestedNodes) {
        self.nodes.extend(other.nodes.iter().cloned());
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllNodesNode {
    pub name: String,
    pub kind: String,
}

/// Directory of every node that ever registered, keyed by host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllNodes {
    pub nodes: BTreeMap<String, AllNodesNode>,
}

impl AllNodes {
    pub fn merge(&mut self, other: &AllNodes) {
        for (host, node) in &other.nodes {
            self.nodes.entry(host.clone()).or_insert_with(|| node.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(geo: &str, rps: u64, timestamp: u64) -> BestNodeElement {
        BestNodeElement {
            timestamp,
            geo: geo.to_string(),
            rps,
            tx_pos: FilePosition::default(),
        }
    }

    #[test]
    fn day_rollover_clears_window() {
        let mut best = BestNodeTest::default();
        best.add_element(sample("eu", 10, 1), 1);
        best.add_element(sample("eu", 20, 2), 2);
        assert_eq!(best.tests.len(), 1);
        assert_eq!(best.day, 2);
    }

    #[test]
    fn get_max_picks_latest_sample_of_best_geo() {
        let mut best = BestNodeTest::default();
        best.add_element(sample("eu", 10, 1), 5);
        best.add_element(sample("us", 100, 2), 5);
        best.add_element(sample("us", 200, 3), 5);
        let max = best.get_max(5).unwrap();
        assert_eq!(max.geo, "us");
        assert_eq!(max.timestamp, 3);
    }

    #[test]
    fn reverse_sort_prefers_lowest_latency_geo() {
        let mut best = BestNodeTest {
            is_max_element: false,
            ..BestNodeTest::default()
        };
        best.add_element(sample("eu", 10, 1), 5);
        best.add_element(sample("us", 100, 2), 5);
        assert_eq!(best.get_max(5).unwrap().geo, "eu");
    }

    #[test]
    fn stale_day_yields_nothing() {
        let mut best = BestNodeTest::default();
        best.add_element(sample("eu", 10, 1), 5);
        assert!(best.get_max(6).is_none());
    }

    #[test]
    fn failed_samples_do_not_skew_geo_selection() {
        let mut best = BestNodeTest::default();
        best.add_element(sample("eu", 0, 1), 5);
        best.add_element(sample("us", 5, 2), 5);
        assert_eq!(best.get_max(5).unwrap().geo, "us");
    }
}
