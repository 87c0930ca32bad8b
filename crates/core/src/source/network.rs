//! Fetches blocks from a peer fleet with look-ahead, dump verification and
//! per-request failover.

use super::messages::{self, PeerBlockHeader};
use super::peers::PeerClient;
use super::{BlockSource, SourceError};
use crate::parser::{parse_block, ParseOptions};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use torrent_node_config::constants::{COUNT_ADVANCED_BLOCKS, PRELOAD_BLOCKS, PRELOAD_MAX_BLOCK_SIZE};
use torrent_node_config::types::SyncConfig;
use torrent_node_types::{Block, BlockHeader, BlockInfo, FileInfo, FilePosition, Hash};

/// Room reserved for the sender envelope when a signed dump is requested.
const ESTIMATE_SIZE_SIGNATURE: u64 = 250;
/// Dumps above this size are fetched as byte-range segments.
const SEGMENT_SIZE: u64 = 100_000;

type FetchedBlock = Result<(Block, Vec<u8>), SourceError>;

pub struct NetworkBlockSource {
    client: PeerClient,
    config: SyncConfig,
    next_block: u64,
    last_known: u64,
    /// Peers that agreed on the winning height; requests rotate over them.
    servers: Vec<String>,
    advanced_headers: VecDeque<(u64, PeerBlockHeader)>,
    /// Dumps delivered by `pre-load`, keyed by hex hash.
    preload_dumps: HashMap<String, Vec<u8>>,
    /// Parsed blocks fetched ahead of the driver; errors are carried and
    /// re-raised when their block is asked for.
    advanced_blocks: BTreeMap<u64, FetchedBlock>,
    /// Sign blocks discovered via pre-load extras, handed out before the
    /// next main block.
    pending_extra: VecDeque<(Block, Vec<u8>)>,
}

impl NetworkBlockSource {
    pub fn new(client: PeerClient, config: SyncConfig) -> NetworkBlockSource {
        NetworkBlockSource {
            client,
            config,
            next_block: 1,
            last_known: 0,
            servers: Vec::new(),
            advanced_headers: VecDeque::new(),
            preload_dumps: HashMap::new(),
            advanced_blocks: BTreeMap::new(),
            pending_extra: VecDeque::new(),
        }
    }

    fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            validate: self.config.validate,
            ..ParseOptions::default()
        }
    }

    /// Sync-mode height poll: the highest height wins and the peers that
    /// reported it become the round's server set.
    async fn poll_height(&mut self) -> Result<(), SourceError> {
        let responses = self.client.broadcast(&messages::make_get_count_blocks()).await;
        let mut best: Option<u64> = None;
        let mut servers = Vec::new();
        let mut last_error = String::new();
        for (peer, response) in responses {
            let raw = match response {
                Ok(raw) => raw,
                Err(err) => {
                    last_error = err.to_string();
                    continue;
                }
            };
            let parsed = match messages::parse_count_blocks(&raw) {
                Ok(parsed) => parsed,
                Err(err) => {
                    last_error = err.to_string();
                    continue;
                }
            };
            if Some(parsed.count_blocks) > best {
                best = Some(parsed.count_blocks);
                servers = vec![peer];
            } else if Some(parsed.count_blocks) == best {
                servers.push(peer);
            }
        }
        let Some(best) = best else {
            return Err(SourceError::Frame(format!(
                "no peer answered get-count-blocks: {last_error}"
            )));
        };
        self.last_known = best;
        self.servers = servers;
        Ok(())
    }

    /// Pre-load mode: one broadcast returns height, headers and dumps.
    async fn poll_preload(&mut self, current_block: u64) -> Result<(), SourceError> {
        let body = messages::make_preload_blocks(
            current_block,
            self.config.compress,
            self.config.validate_sign,
            PRELOAD_BLOCKS,
            PRELOAD_MAX_BLOCK_SIZE,
        );
        let responses = self.client.broadcast(&body).await;
        let mut best: Option<messages::PreloadResponse> = None;
        let mut servers = Vec::new();
        let mut last_error = String::new();
        for (peer, response) in responses {
            let raw = match response {
                Ok(raw) => raw,
                Err(err) => {
                    last_error = err.to_string();
                    continue;
                }
            };
            match messages::parse_preload_blocks(&raw, self.config.compress) {
                Ok(parsed) => {
                    let best_count = best.as_ref().map(|b| b.count_blocks);
                    if Some(parsed.count_blocks) > best_count {
                        best = Some(parsed);
                        servers = vec![peer];
                    } else if Some(parsed.count_blocks) == best_count {
                        servers.push(peer);
                    }
                }
                Err(err) => {
                    last_error = err.to_string();
                }
            }
        }
        let Some(preload) = best else {
            return Err(SourceError::Frame(format!(
                "no peer answered pre-load: {last_error}"
            )));
        };

        self.last_known = preload.count_blocks;
        self.servers = servers;

        // Pair headers with the leading dumps; extras follow in blob order.
        let mut dumps = preload.dumps.into_iter();
        for (offset, header) in preload.headers.iter().enumerate() {
            let Some(dump) = dumps.next() else {
                return Err(SourceError::Frame("pre-load dumps shorter than headers".to_string()));
            };
            if header.number != current_block + 1 + offset as u64 {
                return Err(SourceError::Frame(format!(
                    "pre-load header out of sequence: {}",
                    header.number
                )));
            }
            self.preload_dumps.insert(header.hash.clone(), dump);
            self.advanced_headers.push_back((header.number, header.clone()));
        }
        for hash in preload
            .headers
            .iter()
            .flat_map(|header| header.prev_extra_blocks.iter())
            .chain(preload.additional_hashes.iter())
        {
            let Some(dump) = dumps.next() else {
                return Err(SourceError::Frame("pre-load dumps shorter than extras".to_string()));
            };
            // Extras are sign blocks attesting already-seen main blocks.
            let parsed = self.parse_extra_dump(hash, dump);
            match parsed {
                Ok(entry) => self.pending_extra.push_back(entry),
                Err(err) => tracing::warn!(hash = %hash, error = %err, "dropping bad pre-load extra"),
            }
        }
        Ok(())
    }

    fn parse_extra_dump(&self, hash: &str, dump: Vec<u8>) -> Result<(Block, Vec<u8>), SourceError> {
        let (dump, envelope) = if self.config.validate_sign {
            let checked = messages::check_signature_block(&dump)?;
            (checked.block.clone(), Some(checked))
        } else {
            (dump, None)
        };
        let mut block = parse_block(&dump, &FilePosition::default(), &self.parse_options())?;
        let expected = Hash::from_hex(hash)
            .ok_or_else(|| SourceError::BadDump(format!("bad extra hash {hash}")))?;
        let actual = match &mut block {
            Block::Main(info) => {
                if let Some(envelope) = envelope {
                    info.header.sender_sign = envelope.sign;
                    info.header.sender_pubkey = envelope.pubkey;
                    info.header.sender_address = envelope.address;
                }
                info.header.hash
            }
            Block::Sign(info) => {
                if let Some(envelope) = envelope {
                    info.header.sender_sign = envelope.sign;
                    info.header.sender_pubkey = envelope.pubkey;
                    info.header.sender_address = envelope.address;
                }
                info.header.hash
            }
            Block::Rejected(_) => Hash::ZERO,
        };
        if actual != expected {
            return Err(SourceError::BadDump(format!(
                "extra dump hash mismatch: expected {expected}, got {actual}"
            )));
        }
        Ok((block, dump))
    }

    /// Header for `number`, served from the look-ahead cache or fetched in
    /// batches with per-batch failover.
    async fn block_header(&mut self, number: u64) -> Result<PeerBlockHeader, SourceError> {
        if let Some((_, header)) = self
            .advanced_headers
            .iter()
            .find(|(cached, _)| *cached == number)
        {
            return Ok(header.clone());
        }
        self.advanced_headers.clear();

        let count = (self.last_known - number + 1).min(self.config.max_advanced_load_blocks);
        let batch = self.config.count_blocks_in_batch.max(1);
        let parts = (count + batch - 1) / batch;
        for part in 0..parts {
            let begin = number + part * batch;
            let in_part = batch.min(count - part * batch);
            let body = if in_part == 1 {
                messages::make_get_block_by_number(begin)
            } else {
                messages::make_get_blocks(begin, in_part)
            };
            let raw = self
                .client
                .request_failover(&body, &self.servers, part as usize)
                .await?;
            let headers = if in_part == 1 {
                vec![messages::parse_block_header(&raw)?]
            } else {
                messages::parse_block_headers(&raw)?
            };
            if headers.len() as u64 != in_part {
                return Err(SourceError::Frame(format!(
                    "peer returned {} headers, wanted {in_part}",
                    headers.len()
                )));
            }
            for (offset, header) in headers.into_iter().enumerate() {
                let expected = begin + offset as u64;
                if header.number != expected {
                    return Err(SourceError::Frame(format!(
                        "header out of sequence: expected {expected}, got {}",
                        header.number
                    )));
                }
                self.advanced_headers.push_back((header.number, header));
            }
        }

        self.advanced_headers
            .front()
            .map(|(_, header)| header.clone())
            .ok_or_else(|| SourceError::NotFound(format!("header {number}")))
    }

    /// One dump, segmented for large blocks, each segment with failover.
    async fn fetch_dump(&self, header: &PeerBlockHeader, seed: usize) -> Result<Vec<u8>, SourceError> {
        let want = if self.config.validate_sign {
            header.size + ESTIMATE_SIZE_SIGNATURE
        } else {
            header.size
        };
        let mut segments = Vec::new();
        let mut from = 0;
        while from < want {
            let to = (from + SEGMENT_SIZE).min(want);
            segments.push((from, to));
            from = to;
        }

        let fetches = segments.iter().enumerate().map(|(index, (from, to))| {
            let body =
                messages::make_get_dump_block(&header.hash, *from, *to, self.config.validate_sign, false);
            let servers = &self.servers;
            async move {
                self.client
                    .request_failover(&body, servers, seed + index)
                    .await
            }
        });
        let results = futures::future::join_all(fetches).await;
        let mut dump = Vec::with_capacity(want as usize);
        for result in results {
            dump.extend_from_slice(&result?);
        }
        Ok(dump)
    }

    /// Verifies a fetched dump against its header and parses it.
    fn check_and_parse(
        &self,
        header: &PeerBlockHeader,
        dump: Vec<u8>,
    ) -> Result<(Block, Vec<u8>), SourceError> {
        let (dump, envelope) = if self.config.validate_sign {
            let checked = messages::check_signature_block(&dump)?;
            (checked.block.clone(), Some(checked))
        } else {
            (dump, None)
        };
        if dump.len() as u64 != header.size {
            return Err(SourceError::BadDump(format!(
                "dump size {} does not match header size {}",
                dump.len(),
                header.size
            )));
        }
        let file_name = header
            .file_name
            .rsplit('/')
            .next()
            .unwrap_or(header.file_name.as_str())
            .to_string();
        let mut block = parse_block(
            &dump,
            &FilePosition::new(file_name, 0),
            &self.parse_options(),
        )?;
        let expected = Hash::from_hex(&header.hash)
            .ok_or_else(|| SourceError::BadDump(format!("bad header hash {}", header.hash)))?;
        match &mut block {
            Block::Main(info) => {
                if info.header.hash != expected {
                    return Err(SourceError::BadDump(format!(
                        "dump of block {} hashes to {}",
                        header.number, info.header.hash
                    )));
                }
                if let Some(envelope) = envelope {
                    info.header.sender_sign = envelope.sign;
                    info.header.sender_pubkey = envelope.pubkey;
                    info.header.sender_address = envelope.address;
                }
            }
            Block::Sign(info) => {
                if info.header.hash != expected {
                    return Err(SourceError::BadDump(format!(
                        "sign dump of block {} hashes to {}",
                        header.number, info.header.hash
                    )));
                }
                if let Some(envelope) = envelope {
                    info.header.sender_sign = envelope.sign;
                    info.header.sender_pubkey = envelope.pubkey;
                    info.header.sender_address = envelope.address;
                }
            }
            Block::Rejected(_) => {}
        }
        Ok((block, dump))
    }

    /// Fills the look-ahead window starting at `self.next_block`.
    async fn fill_advanced(&mut self) -> Result<(), SourceError> {
        self.advanced_blocks.clear();
        if self.servers.is_empty() {
            return Err(SourceError::NoPeers);
        }
        let count = COUNT_ADVANCED_BLOCKS.min(self.last_known - self.next_block + 1);

        let mut headers = Vec::new();
        for index in 0..count {
            headers.push((self.next_block + index, self.block_header(self.next_block + index).await));
        }

        let fetches = headers.into_iter().enumerate().map(|(seed, (number, header))| {
            let preload = header
                .as_ref()
                .ok()
                .and_then(|header| self.preload_dumps.get(&header.hash).cloned());
            async move {
                let result = match header {
                    Ok(header) => {
                        let dump = match preload {
                            Some(dump) => Ok(dump),
                            None => self.fetch_dump(&header, seed).await,
                        };
                        match dump {
                            Ok(dump) => self.check_and_parse(&header, dump),
                            Err(err) => Err(err),
                        }
                    }
                    Err(err) => Err(err),
                };
                (number, result)
            }
        });
        let results = futures::future::join_all(fetches).await;
        for (number, result) in results {
            self.advanced_blocks.insert(number, result);
        }
        Ok(())
    }
}

#[async_trait]
impl BlockSource for NetworkBlockSource {
    async fn initialize(&mut self) -> Result<(), SourceError> {
        if self.client.peers().is_empty() {
            return Err(SourceError::NoPeers);
        }
        Ok(())
    }

    async fn do_process(&mut self, count_blocks: u64) -> Result<(bool, u64), SourceError> {
        self.next_block = count_blocks + 1;
        self.advanced_blocks.clear();
        self.advanced_headers.clear();
        self.preload_dumps.clear();

        if self.config.pre_load {
            self.poll_preload(count_blocks).await?;
        } else {
            self.poll_height().await?;
        }
        Ok((self.last_known >= self.next_block, self.last_known))
    }

    async fn process(&mut self) -> Result<Option<(Block, Vec<u8>)>, SourceError> {
        if let Some(extra) = self.pending_extra.pop_front() {
            return Ok(Some(extra));
        }
        if self.next_block > self.last_known {
            return Ok(None);
        }
        if !self.advanced_blocks.contains_key(&self.next_block) {
            self.fill_advanced().await?;
        }
        let result = self
            .advanced_blocks
            .remove(&self.next_block)
            .unwrap_or_else(|| Err(SourceError::NotFound(format!("block {}", self.next_block))));
        let (block, dump) = result?;
        self.next_block += 1;
        Ok(Some((block, dump)))
    }

    async fn confirm(&mut self, _file_info: &FileInfo) -> Result<(), SourceError> {
        Ok(())
    }

    async fn get_existing_block(
        &self,
        header: &BlockHeader,
    ) -> Result<(BlockInfo, Vec<u8>), SourceError> {
        let number = header
            .block_number
            .ok_or_else(|| SourceError::NotFound("block without number".to_string()))?;
        let servers = if self.servers.is_empty() {
            self.client.peers().to_vec()
        } else {
            self.servers.clone()
        };
        let raw = self
            .client
            .request_failover(&messages::make_get_block_by_number(number), &servers, 0)
            .await?;
        let peer_header = messages::parse_block_header(&raw)?;
        let dump = {
            // Borrow trick: fetch_dump consults self.servers.
            let body = messages::make_get_dump_block(
                &peer_header.hash,
                0,
                if self.config.validate_sign {
                    peer_header.size + ESTIMATE_SIZE_SIGNATURE
                } else {
                    peer_header.size
                },
                self.config.validate_sign,
                false,
            );
            self.client.request_failover(&body, &servers, 0).await?
        };
        let (block, dump) = self.check_and_parse(&peer_header, dump)?;
        let Block::Main(mut block) = block else {
            return Err(SourceError::NotFound(format!("block {number} is not a main block")));
        };
        block.header.block_number = Some(number);
        block.header.file_pos.file_name = header.file_pos.file_name.clone();
        for tx in &mut block.txs {
            tx.block_number = number;
            tx.file_pos.file_name = header.file_pos.file_name.clone();
        }
        Ok((block, dump))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wallet, BlockBuilder, TxSpec};
    use torrent_node_common::crypto;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;
    use std::time::Duration;

    fn header_json(number: u64, payload: &[u8], prev: &Hash) -> serde_json::Value {
        let hash = Hash(crypto::double_sha256(payload));
        json!({
            "number": number,
            "hash": hash.to_string(),
            "prev_hash": prev.to_string(),
            "size": payload.len(),
            "fileName": "blk00001.dat",
        })
    }

    fn source_for(servers: Vec<String>) -> NetworkBlockSource {
        let client = PeerClient::new(servers, Duration::from_secs(2));
        NetworkBlockSource::new(
            client,
            SyncConfig {
                count_blocks_in_batch: 10,
                ..SyncConfig::default()
            },
        )
    }

    fn chain_of(count: usize) -> Vec<Vec<u8>> {
        let mut prev = Hash::ZERO;
        let mut payloads = Vec::new();
        for index in 0..count {
            let builder = BlockBuilder::new(prev).tx(TxSpec::transfer(
                format!("key-{index}").as_bytes(),
                wallet(b"to"),
                index as u64 + 1,
            ));
            prev = builder.hash();
            payloads.push(builder.build());
        }
        payloads
    }

    #[tokio::test]
    async fn fetches_blocks_in_order() {
        let payloads = chain_of(3);
        let headers: Vec<serde_json::Value> = payloads
            .iter()
            .enumerate()
            .map(|(index, payload)| {
                let prev = if index == 0 {
                    Hash::ZERO
                } else {
                    Hash(crypto::double_sha256(&payloads[index - 1]))
                };
                header_json(index as u64 + 1, payload, &prev)
            })
            .collect();

        let server = Server::run();
        server.expect(
            Expectation::matching(request::body(matches("get-count-blocks")))
                .times(1..)
                .respond_with(json_encoded(json!({"result": {"count_blocks": 3}}))),
        );
        server.expect(
            Expectation::matching(request::body(matches("get-blocks")))
                .times(1..)
                .respond_with(json_encoded(json!({"result": headers}))),
        );
        for payload in &payloads {
            let hash = Hash(crypto::double_sha256(payload)).to_string();
            server.expect(
                Expectation::matching(request::body(matches(hash)))
                    .times(1..)
                    .respond_with(status_code(200).body(payload.clone())),
            );
        }

        let mut source = source_for(vec![server.url("/").to_string()]);
        source.initialize().await.unwrap();
        let (more, last) = source.do_process(0).await.unwrap();
        assert!(more);
        assert_eq!(last, 3);

        for expected in 1..=3u64 {
            let (block, _) = source.process().await.unwrap().unwrap();
            let Block::Main(block) = block else {
                panic!("expected main block");
            };
            assert_eq!(block.txs[0].value, expected);
        }
        assert!(source.process().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dump_failure_fails_over_to_second_peer() {
        let payloads = chain_of(2);
        let headers: Vec<serde_json::Value> = payloads
            .iter()
            .enumerate()
            .map(|(index, payload)| {
                let prev = if index == 0 {
                    Hash::ZERO
                } else {
                    Hash(crypto::double_sha256(&payloads[index - 1]))
                };
                header_json(index as u64 + 1, payload, &prev)
            })
            .collect();
        let second_hash = Hash(crypto::double_sha256(&payloads[1])).to_string();

        let flaky = Server::run();
        flaky.expect(
            Expectation::matching(request::body(matches("get-count-blocks")))
                .times(1..)
                .respond_with(json_encoded(json!({"result": {"count_blocks": 2}}))),
        );
        flaky.expect(
            Expectation::matching(request::body(matches("get-blocks")))
                .times(0..)
                .respond_with(json_encoded(json!({"result": headers}))),
        );
        // The flaky peer errors on every dump request.
        let first_hash = Hash(crypto::double_sha256(&payloads[0])).to_string();
        flaky.expect(
            Expectation::matching(request::body(matches(first_hash.clone())))
                .times(0..)
                .respond_with(status_code(500)),
        );
        flaky.expect(
            Expectation::matching(request::body(matches(second_hash.clone())))
                .times(0..)
                .respond_with(status_code(500)),
        );

        let healthy = Server::run();
        healthy.expect(
            Expectation::matching(request::body(matches("get-count-blocks")))
                .times(1..)
                .respond_with(json_encoded(json!({"result": {"count_blocks": 2}}))),
        );
        healthy.expect(
            Expectation::matching(request::body(matches("get-blocks")))
                .times(0..)
                .respond_with(json_encoded(json!({"result": headers}))),
        );
        healthy.expect(
            Expectation::matching(request::body(matches(first_hash)))
                .times(0..)
                .respond_with(status_code(200).body(payloads[0].clone())),
        );
        healthy.expect(
            Expectation::matching(request::body(matches(second_hash)))
                .times(1..)
                .respond_with(status_code(200).body(payloads[1].clone())),
        );

        let mut source = source_for(vec![
            flaky.url("/").to_string(),
            healthy.url("/").to_string(),
        ]);
        source.initialize().await.unwrap();
        source.do_process(0).await.unwrap();

        let mut seen = Vec::new();
        while let Some((block, _)) = source.process().await.unwrap() {
            let Block::Main(block) = block else {
                panic!("expected main block");
            };
            seen.push(block.txs[0].value);
        }
        // Both blocks arrive, in order, none twice.
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn bad_dump_is_a_carried_error() {
        let payloads = chain_of(1);
        let headers = vec![header_json(1, &payloads[0], &Hash::ZERO)];

        let server = Server::run();
        server.expect(
            Expectation::matching(request::body(matches("get-count-blocks")))
                .times(1..)
                .respond_with(json_encoded(json!({"result": {"count_blocks": 1}}))),
        );
        server.expect(
            Expectation::matching(request::body(matches("get-block-by-number")))
                .times(1..)
                .respond_with(json_encoded(json!({"result": headers[0]}))),
        );
        let hash = Hash(crypto::double_sha256(&payloads[0])).to_string();
        // Wrong bytes: same length, different content.
        let mut wrong = payloads[0].clone();
        wrong[20] ^= 0xff;
        server.expect(
            Expectation::matching(request::body(matches(hash)))
                .times(1..)
                .respond_with(status_code(200).body(wrong)),
        );

        let mut source = source_for(vec![server.url("/").to_string()]);
        source.initialize().await.unwrap();
        source.do_process(0).await.unwrap();
        assert!(source.process().await.is_err());
    }
}
