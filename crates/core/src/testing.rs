//! Builders for hand-assembled binary blocks, shared by the unit tests of
//! the parser, the sync driver and the workers.

#![cfg(test)]

use ed25519_dalek::{Signer, SigningKey};
use torrent_node_common::crypto;
use torrent_node_types::block::block_type;
use torrent_node_types::varint::write_varint;
use torrent_node_types::{Address, Hash};

/// One transaction to embed into a [`BlockBuilder`].
#[derive(Clone)]
pub struct TxSpec {
    pub to: Address,
    pub value: u64,
    pub fees: u64,
    pub nonce: u64,
    pub data: Vec<u8>,
    pub sign: Vec<u8>,
    pub pub_key: Vec<u8>,
    pub int_status: Option<u64>,
}

impl TxSpec {
    pub fn transfer(pub_key: &[u8], to: Address, value: u64) -> TxSpec {
        TxSpec {
            to,
            value,
            fees: 0,
            nonce: 1,
            data: Vec::new(),
            sign: vec![0xaa; 16],
            pub_key: pub_key.to_vec(),
            int_status: Some(torrent_node_types::transaction::int_status::ACCEPT),
        }
    }

    pub fn with_fees(mut self, fees: u64) -> TxSpec {
        self.fees = fees;
        self
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> TxSpec {
        self.data = data.into();
        self
    }

    pub fn with_status(mut self, status: u64) -> TxSpec {
        self.int_status = Some(status);
        self
    }

    pub fn without_status(mut self) -> TxSpec {
        self.int_status = None;
        self
    }

    /// Pads the data field so `size_raw_tx` lands on `target`.
    pub fn padded_to(mut self, target: u64) -> TxSpec {
        while self.body_len() < target {
            self.data.push(0);
        }
        self
    }

    fn body_len(&self) -> u64 {
        let mut body = Vec::new();
        self.encode_clear(&mut body);
        write_varint(self.sign.len() as u64, &mut body);
        body.extend_from_slice(&self.sign);
        write_varint(self.pub_key.len() as u64, &mut body);
        body.extend_from_slice(&self.pub_key);
        if let Some(status) = self.int_status {
            write_varint(status, &mut body);
        }
        body.len() as u64
    }

    /// Signs the body with an ed25519 key, making the tx pass `validate`.
    pub fn signed(mut self, key: &SigningKey) -> TxSpec {
        self.pub_key = key.verifying_key().as_bytes().to_vec();
        let mut clear = Vec::new();
        self.encode_clear(&mut clear);
        self.sign = key.sign(&clear).to_bytes().to_vec();
        self
    }

    /// Body bytes up to and including `data` (the signature preimage).
    fn encode_clear(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.to.as_bytes());
        write_varint(self.value, out);
        write_varint(self.fees, out);
        write_varint(self.nonce, out);
        write_varint(self.data.len() as u64, out);
        out.extend_from_slice(&self.data);
    }

    /// The full record: size varint followed by the body.
    fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        self.encode_clear(&mut body);
        write_varint(self.sign.len() as u64, &mut body);
        body.extend_from_slice(&self.sign);
        write_varint(self.pub_key.len() as u64, &mut body);
        body.extend_from_slice(&self.pub_key);
        if let Some(status) = self.int_status {
            write_varint(status, &mut body);
        }
        let mut record = Vec::new();
        write_varint(body.len() as u64, &mut record);
        record.extend_from_slice(&body);
        record
    }
}

pub struct BlockBuilder {
    pub block_type: u64,
    pub timestamp: u64,
    pub prev_hash: Hash,
    pub txs: Vec<TxSpec>,
}

impl BlockBuilder {
    pub fn new(prev_hash: Hash) -> BlockBuilder {
        BlockBuilder {
            block_type: block_type::COMMON_V2,
            timestamp: 1_600_000_000,
            prev_hash,
            txs: Vec::new(),
        }
    }

    pub fn of_type(mut self, block_type: u64) -> BlockBuilder {
        self.block_type = block_type;
        self
    }

    pub fn at(mut self, timestamp: u64) -> BlockBuilder {
        self.timestamp = timestamp;
        self
    }

    pub fn tx(mut self, tx: TxSpec) -> BlockBuilder {
        self.txs.push(tx);
        self
    }

    /// Assembles the block payload as it would sit in a block file record.
    pub fn build(&self) -> Vec<u8> {
        let mut txs_region = Vec::new();
        for tx in &self.txs {
            txs_region.extend_from_slice(&tx.encode());
        }
        write_varint(0, &mut txs_region);

        let txs_hash = crypto::double_sha256(&txs_region);

        let mut payload = Vec::new();
        payload.extend_from_slice(&self.block_type.to_le_bytes());
        payload.extend_from_slice(&self.timestamp.to_le_bytes());
        payload.extend_from_slice(self.prev_hash.as_bytes());
        payload.extend_from_slice(&txs_hash);
        payload.extend_from_slice(&txs_region);
        payload
    }

    pub fn hash(&self) -> Hash {
        Hash(crypto::double_sha256(&self.build()))
    }
}

/// Assembles a sign block attesting `attested`, each entry signed with one
/// of `keys`.
pub fn build_sign_block(prev_hash: Hash, attested: Hash, keys: &[SigningKey]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&block_type::SIGN.to_le_bytes());
    payload.extend_from_slice(&1_600_000_100u64.to_le_bytes());
    payload.extend_from_slice(prev_hash.as_bytes());
    for key in keys {
        let sign = key.sign(attested.as_bytes()).to_bytes().to_vec();
        let pubkey = key.verifying_key().as_bytes().to_vec();
        let mut entry = Vec::new();
        entry.extend_from_slice(attested.as_bytes());
        write_varint(sign.len() as u64, &mut entry);
        entry.extend_from_slice(&sign);
        write_varint(pubkey.len() as u64, &mut entry);
        entry.extend_from_slice(&pubkey);
        write_varint(entry.len() as u64, &mut payload);
        payload.extend_from_slice(&entry);
    }
    write_varint(0, &mut payload);
    payload
}

/// A rejected-txs block envelope with opaque content.
pub fn build_rejected_block(content: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&block_type::REJECTED_TXS.to_le_bytes());
    payload.extend_from_slice(content);
    payload
}

pub fn wallet(seed: &[u8]) -> Address {
    Address::from_pubkey(seed)
}
