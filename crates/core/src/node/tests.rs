use super::*;
use crate::parser::parse_block;
use crate::testing::{wallet, BlockBuilder, TxSpec};
use crate::workers::MainWorker;
use std::sync::atomic::AtomicU64;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    kv: Arc<KvStore>,
    store: Arc<BlockStore>,
    chain: Arc<BlockChain>,
    timeline: Arc<Timeline>,
}

impl Fixture {
    fn new() -> Fixture {
        let dir = TempDir::new().unwrap();
        let timeline = Timeline::new();
        timeline.deserialize(Vec::new()).unwrap();
        Fixture {
            kv: Arc::new(KvStore::open(dir.path().join("db")).unwrap()),
            store: Arc::new(BlockStore::new(dir.path().join("blocks"), 1 << 20).unwrap()),
            chain: Arc::new(BlockChain::new()),
            timeline: Arc::new(timeline),
            _dir: dir,
        }
    }

    fn node(&self) -> Node {
        Node::new(
            self.kv.clone(),
            self.kv.clone(),
            self.kv.clone(),
            self.store.clone(),
            self.chain.clone(),
            self.timeline.clone(),
            Modules::all(),
            Arc::new(AtomicU64::new(0)),
            Some([9u8; 32]),
        )
    }

    /// Appends, links and projects one built block.
    fn ingest(&self, builder: &BlockBuilder, number: u64) -> BlockInfo {
        let payload = builder.build();
        let pos = self
            .store
            .append(&self.store.current_file().unwrap(), &payload)
            .unwrap();
        let Block::Main(mut block) =
            parse_block(&payload, &pos, &ParseOptions::default()).unwrap()
        else {
            panic!("expected main block");
        };
        block.header.block_number = Some(number);
        for tx in &mut block.txs {
            tx.block_number = number;
        }
        self.chain.add_block(block.header.clone()).unwrap();
        self.kv
            .put_record(&keys::block_header(&block.header.hash), &block.header)
            .unwrap();
        let mut worker = MainWorker::new(self.kv.clone(), Modules::all(), false).unwrap();
        worker.apply_block(&block).unwrap();
        block
    }
}

#[test]
fn history_rereads_transactions_from_files() {
    let fixture = Fixture::new();
    let receiver = wallet(b"receiver");

    let first = BlockBuilder::new(Hash::ZERO).tx(
        TxSpec::transfer(b"sender", receiver.clone(), 11).with_data(b"first".to_vec()),
    );
    fixture.ingest(&first, 1);
    let second = BlockBuilder::new(first.hash()).tx(
        TxSpec::transfer(b"sender", receiver.clone(), 22).with_data(b"second".to_vec()),
    );
    fixture.ingest(&second, 2);

    let node = fixture.node();
    let history = node.fetch_history(&receiver, 0, 0, None).unwrap();
    assert_eq!(history.len(), 2);
    // Newest first, with the bodies re-read from the block files.
    assert_eq!(history[0].value, 22);
    assert_eq!(history[0].data, b"second");
    assert_eq!(history[0].block_number, 2);
    assert_eq!(history[1].value, 11);
    assert_eq!(history[1].data, b"first");
}

#[test]
fn history_filters_by_direction() {
    let fixture = Fixture::new();
    let account = wallet(b"account-key");

    let incoming =
        BlockBuilder::new(Hash::ZERO).tx(TxSpec::transfer(b"peer", account.clone(), 5));
    fixture.ingest(&incoming, 1);
    let outgoing = BlockBuilder::new(incoming.hash())
        .tx(TxSpec::transfer(b"account-key", wallet(b"peer"), 3));
    fixture.ingest(&outgoing, 2);

    let node = fixture.node();
    let only_input = TransactionsFilters {
        is_input: Some(true),
        ..TransactionsFilters::default()
    };
    let history = node.fetch_history(&account, 0, 0, Some(&only_input)).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].to_address, account);

    let only_output = TransactionsFilters {
        is_output: Some(true),
        ..TransactionsFilters::default()
    };
    let history = node.fetch_history(&account, 0, 0, Some(&only_output)).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_address, account);
}

#[test]
fn tx_lookup_and_balances() {
    let fixture = Fixture::new();
    let receiver = wallet(b"receiver");
    let block = fixture.ingest(
        &BlockBuilder::new(Hash::ZERO).tx(TxSpec::transfer(b"sender", receiver.clone(), 11)),
        1,
    );

    let node = fixture.node();
    let tx = node.get_tx(&block.txs[0].hash).unwrap().unwrap();
    assert_eq!(tx.value, 11);
    assert!(node.get_tx(&Hash([0xcc; 32])).unwrap().is_none());

    let balance = node.fetch_balance(&receiver).unwrap();
    assert_eq!(balance.received(), 11);

    let batch = node
        .fetch_balances(&[receiver.clone(), wallet(b"other")])
        .unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].1.received(), 11);
    assert_eq!(batch[1].1.received(), 0);
}

#[test]
fn full_block_and_dumps() {
    let fixture = Fixture::new();
    let builder = BlockBuilder::new(Hash::ZERO)
        .tx(TxSpec::transfer(b"a", wallet(b"x"), 1))
        .tx(TxSpec::transfer(b"b", wallet(b"y"), 2));
    fixture.ingest(&builder, 1);

    let node = fixture.node();
    let header = node.get_block_by_number(1).unwrap().unwrap();
    assert_eq!(header.hash, builder.hash());

    let block = node.get_full_block(&header, 0, 0).unwrap();
    assert_eq!(block.txs.len(), 2);
    let partial = node.get_full_block(&header, 1, 1).unwrap();
    assert_eq!(partial.txs.len(), 1);
    assert_eq!(partial.txs[0].value, 2);

    let dump = node
        .get_dump_block_by_hash(&header.hash, 0, u64::MAX, false)
        .unwrap();
    assert_eq!(dump, builder.build());

    // Ranged read.
    let slice = node
        .get_dump_block_by_hash(&header.hash, 8, 16, false)
        .unwrap();
    assert_eq!(slice, builder.build()[8..16].to_vec());

    // Signed envelope roundtrip.
    let signed = node
        .get_dump_block_by_hash(&header.hash, 0, u64::MAX, true)
        .unwrap();
    let checked = crate::source::messages::check_signature_block(&signed).unwrap();
    assert_eq!(checked.block, builder.build());

    let blob = node
        .get_dumps_blocks(&[header.hash], false, true)
        .unwrap();
    let dumps = crate::source::messages::parse_dumps_blob(&blob, true).unwrap();
    assert_eq!(dumps, vec![builder.build()]);
}

#[test]
fn batch_limits_are_enforced() {
    let fixture = Fixture::new();
    let node = fixture.node();
    let too_many = vec![wallet(b"x"); MAX_BATCH_BALANCES + 1];
    assert!(matches!(
        node.fetch_balances(&too_many),
        Err(NodeError::LimitExceeded(_))
    ));
    assert!(matches!(
        node.get_blocks(1, MAX_BATCH_BLOCKS as u64 + 1, true),
        Err(NodeError::LimitExceeded(_))
    ));
}

#[test]
fn delegations_listing() {
    let fixture = Fixture::new();
    let to = wallet(b"validator");
    let data = br#"{"method":"delegate","params":{"value":"70"}}"#.to_vec();
    fixture.ingest(
        &BlockBuilder::new(Hash::ZERO)
            .tx(TxSpec::transfer(b"delegator", to.clone(), 0).with_data(data)),
        1,
    );

    let node = fixture.node();
    let delegations = node
        .get_address_delegations(&wallet(b"delegator"))
        .unwrap();
    assert_eq!(delegations.len(), 1);
    assert_eq!(delegations[0].0, to);
    assert_eq!(delegations[0].1.value, 70);
}

#[test]
fn timeline_queries_surface_sign_blocks() {
    let fixture = Fixture::new();
    let main = BlockBuilder::new(Hash::ZERO).tx(TxSpec::transfer(b"a", wallet(b"b"), 1));
    fixture.ingest(&main, 1);
    fixture
        .timeline
        .add_simple_block(&fixture.chain.get_block_by_number(1).unwrap())
        .unwrap();
    let sign_header = torrent_node_types::SignBlockHeader {
        hash: Hash([0xee; 32]),
        prev_hash: main.hash(),
        file_pos: torrent_node_types::FilePosition::new("blk00001.dat", 0),
        ..torrent_node_types::SignBlockHeader::default()
    };
    fixture.timeline.add_sign_block(&sign_header).unwrap();

    let node = fixture.node();
    let attesting = node.find_sign_block(&main.hash()).unwrap().unwrap();
    assert_eq!(attesting.hash, Hash([0xee; 32]));

    let between = node.get_signatures_between(None, None).unwrap();
    assert_eq!(between.len(), 1);
    assert_eq!(between[0].prev_hash, main.hash());
}

#[test]
fn status_reports_chain_height() {
    let fixture = Fixture::new();
    fixture.ingest(
        &BlockBuilder::new(Hash::ZERO).tx(TxSpec::transfer(b"a", wallet(b"b"), 1)),
        1,
    );
    let node = fixture.node();
    let status = node.status();
    assert_eq!(status.count_blocks, 1);
    assert_eq!(status.version, VERSION_DB);
}
