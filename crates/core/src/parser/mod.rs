//! Decoder of the binary block format.
//!
//! A block payload starts with an eight-byte little-endian type tag. Main
//! blocks carry `timestamp(8) prev_hash(32) txs_hash(32)` and a zero-varint
//! terminated transaction sequence; sign blocks carry `timestamp(8)
//! prev_hash(32)` and attestation records; rejected-txs blocks are kept as
//! an opaque envelope.

mod data;

use thiserror::Error;
use torrent_node_common::crypto;
use torrent_node_types::block::block_type;
use torrent_node_types::varint::{read_varint, VarintError};
use torrent_node_types::{
    Address, Block, BlockHeader, BlockInfo, FilePosition, Hash, RejectedBlockHeader,
    RejectedBlockInfo, SignBlockHeader, SignBlockInfo, SignTransactionInfo, TransactionInfo,
};

pub use data::decode_transaction_data;

const TAG_LEN: usize = 8;
const TIMESTAMP_LEN: usize = 8;
const HASH_LEN: usize = 32;
const ADDRESS_LEN: usize = 25;
const MAIN_HEADER_LEN: usize = TAG_LEN + TIMESTAMP_LEN + 2 * HASH_LEN;
const SIGN_HEADER_LEN: usize = TAG_LEN + TIMESTAMP_LEN + HASH_LEN;
/// Length-field size the on-disk positions account for.
const BLOCK_SIZE_FIELD: u64 = 8;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload ends inside {0}")]
    Truncated(&'static str),
    #[error(transparent)]
    Varint(#[from] VarintError),
    #[error("transactions hash mismatch in block {block}")]
    TxsHashMismatch { block: Hash },
    #[error("signature of transaction {tx} does not verify")]
    BadTxSignature { tx: Hash },
    #[error("signature of attestation for block {block} does not verify")]
    BadSignTxSignature { block: Hash },
    #[error("empty pubkey in attestation for block {block}")]
    EmptySignPubkey { block: Hash },
}

/// Knobs of one parse call.
#[derive(Clone, Copy, Debug)]
pub struct ParseOptions {
    /// Verify each transaction signature (initial-wallet senders excluded).
    pub validate: bool,
    /// First transaction index to materialize.
    pub begin_tx: usize,
    /// How many transactions to materialize; 0 means all.
    pub count_tx: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            validate: false,
            begin_tx: 0,
            count_tx: 0,
        }
    }
}

impl ParseOptions {
    pub fn validated() -> ParseOptions {
        ParseOptions {
            validate: true,
            ..ParseOptions::default()
        }
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Cursor<'a> {
        Cursor { data, pos: 0 }
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], ParseError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(ParseError::Truncated(what))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u64_le(&mut self, what: &'static str) -> Result<u64, ParseError> {
        let bytes = self.take(8, what)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("eight bytes")))
    }

    fn varint(&mut self) -> Result<u64, ParseError> {
        let (value, consumed) = read_varint(&self.data[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }
}

/// Decodes one block payload. `file_pos` locates the record's length field
/// in its block file; transaction positions are derived from it.
pub fn parse_block(
    payload: &[u8],
    file_pos: &FilePosition,
    options: &ParseOptions,
) -> Result<Block, ParseError> {
    if payload.len() < TAG_LEN {
        return Err(ParseError::Truncated("block type tag"));
    }
    let tag = u64::from_le_bytes(payload[..TAG_LEN].try_into().expect("eight bytes"));
    match tag {
        block_type::SIGN => parse_sign_block(payload, file_pos).map(Block::Sign),
        block_type::REJECTED_TXS => Ok(Block::Rejected(RejectedBlockInfo {
            header: RejectedBlockHeader {
                block_size: payload.len() as u64,
                file_pos: file_pos.clone(),
            },
        })),
        _ => parse_main_block(payload, file_pos, options).map(Block::Main),
    }
}

fn parse_main_block(
    payload: &[u8],
    file_pos: &FilePosition,
    options: &ParseOptions,
) -> Result<BlockInfo, ParseError> {
    let mut cursor = Cursor::new(payload);
    let mut header = BlockHeader {
        block_type: cursor.u64_le("block type")?,
        timestamp: cursor.u64_le("timestamp")?,
        prev_hash: Hash::from_slice(cursor.take(HASH_LEN, "prev hash")?)
            .ok_or(ParseError::Truncated("prev hash"))?,
        txs_hash: Hash::from_slice(cursor.take(HASH_LEN, "txs hash")?)
            .ok_or(ParseError::Truncated("txs hash"))?,
        block_size: payload.len() as u64,
        file_pos: file_pos.clone(),
        ..BlockHeader::default()
    };
    header.hash = Hash(crypto::double_sha256(payload));

    let txs_hash = Hash(crypto::double_sha256(&payload[MAIN_HEADER_LEN..]));
    if txs_hash != header.txs_hash {
        return Err(ParseError::TxsHashMismatch { block: header.hash });
    }

    let mut txs = Vec::new();
    let mut tx_index: u64 = 0;
    let mut count_sign_txs: u64 = 0;
    // The leading run of self-signed transactions attests the block itself;
    // the heuristic needs the previous transaction's role and data.
    let mut prev_is_sign = true;
    let mut prev_data: Vec<u8> = Vec::new();
    let mut is_first = true;
    let mut signature: Vec<u8> = Vec::new();

    loop {
        let tx_offset = cursor.pos;
        let materialize = tx_index as usize >= options.begin_tx;
        let Some(mut tx) = parse_transaction_body(
            &mut cursor,
            materialize,
            options.validate,
            prev_is_sign,
            is_first,
            &prev_data,
        )?
        else {
            break;
        };
        tx.block_index = tx_index;
        tx.file_pos = FilePosition::new(
            file_pos.file_name.clone(),
            tx_offset as u64 + file_pos.pos + BLOCK_SIZE_FIELD,
        );

        if is_first && tx.from_address == tx.to_address && tx.value == 0 {
            signature = tx.data.clone();
        }

        prev_is_sign = tx.is_sign_block_tx;
        prev_data = tx.data.clone();
        is_first = false;
        if tx.is_sign_block_tx {
            count_sign_txs += 1;
        }

        if materialize {
            txs.push(tx);
        }
        tx_index += 1;

        if options.count_tx != 0 && txs.len() >= options.count_tx {
            break;
        }
    }

    if options.count_tx == 0 && options.begin_tx == 0 {
        header.count_txs = txs.len() as u64;
        header.count_sign_tx = count_sign_txs;
    }
    header.signature = signature;

    Ok(BlockInfo { header, txs })
}

/// Parses one transaction starting at the size varint. Returns `None` on
/// the zero-size terminator. When `materialize` is false the body is only
/// skipped over.
fn parse_transaction_body(
    cursor: &mut Cursor<'_>,
    materialize: bool,
    validate: bool,
    prev_is_sign: bool,
    is_first: bool,
    prev_data: &[u8],
) -> Result<Option<TransactionInfo>, ParseError> {
    let tx_size = cursor.varint()?;
    if tx_size == 0 {
        return Ok(None);
    }
    let body_start = cursor.pos;
    let body = Cursor {
        data: cursor
            .data
            .get(..body_start + tx_size as usize)
            .ok_or(ParseError::Truncated("transaction body"))?,
        pos: body_start,
    };
    cursor.pos = body_start + tx_size as usize;
    if !materialize {
        // Still consumed; the caller keeps indexing past it.
        return Ok(Some(TransactionInfo {
            size_raw_tx: tx_size,
            ..TransactionInfo::default()
        }));
    }

    let mut body = body;
    let mut tx = TransactionInfo {
        to_address: Address::new(body.take(ADDRESS_LEN, "to address")?.to_vec()),
        ..TransactionInfo::default()
    };
    tx.value = body.varint()?;
    tx.fees = body.varint()?;
    tx.nonce = body.varint()?;

    let data_len = body.varint()? as usize;
    tx.data = body.take(data_len, "transaction data")?.to_vec();

    data::decode_transaction_data(&mut tx);

    let end_clear_tx = body.pos;

    let sign_len = body.varint()? as usize;
    tx.sign = body.take(sign_len, "transaction sign")?.to_vec();

    let pubkey_len = body.varint()? as usize;
    if pubkey_len != 0 {
        tx.pub_key = body.take(pubkey_len, "transaction pubkey")?.to_vec();
    }

    // A trailing varint, when present, is the producer status; it is not
    // part of the hash preimage.
    let mut tx_hash_size = tx_size as usize;
    if body.pos < body.data.len() {
        let before = body.pos;
        tx.int_status = Some(body.varint()?);
        tx_hash_size -= body.pos - before;
    }

    if tx.pub_key.is_empty() {
        tx.from_address = Address::default();
    } else {
        tx.from_address = Address::from_pubkey(&tx.pub_key);
        if tx.is_blocked_from {
            tracing::debug!(from = %tx.from_address, "sender flagged blocked");
        }
    }

    let full = cursor.data;
    tx.hash = Hash(crypto::double_sha256(
        &full[body_start..body_start + tx_hash_size],
    ));
    if let Some(script) = &mut tx.script_info {
        script.raw_tx = full[body_start..end_clear_tx].to_vec();
    }
    tx.size_raw_tx = tx_size;

    tx.is_sign_block_tx = is_sign_block_tx(&tx, prev_is_sign, is_first, prev_data);

    if validate && !tx.from_address.is_initial_wallet() && !tx.from_address.is_empty_addr() {
        let message = &full[body_start..end_clear_tx];
        if !crypto::verify_signature(&tx.sign, &tx.pub_key, message) {
            return Err(ParseError::BadTxSignature { tx: tx.hash });
        }
    }

    Ok(Some(tx))
}

fn is_sign_block_tx(
    tx: &TransactionInfo,
    prev_is_sign: bool,
    is_first: bool,
    prev_data: &[u8],
) -> bool {
    if !prev_is_sign {
        return false;
    }
    tx.from_address == tx.to_address
        && tx.value == 0
        && (is_first || (tx.data == prev_data && !tx.data.is_empty()))
}

fn parse_sign_block(
    payload: &[u8],
    file_pos: &FilePosition,
) -> Result<SignBlockInfo, ParseError> {
    let mut cursor = Cursor::new(payload);
    let _tag = cursor.u64_le("block type")?;
    let header = SignBlockHeader {
        timestamp: cursor.u64_le("timestamp")?,
        prev_hash: Hash::from_slice(cursor.take(HASH_LEN, "prev hash")?)
            .ok_or(ParseError::Truncated("prev hash"))?,
        hash: Hash(crypto::double_sha256(payload)),
        block_size: payload.len() as u64,
        file_pos: file_pos.clone(),
        ..SignBlockHeader::default()
    };
    debug_assert_eq!(cursor.pos, SIGN_HEADER_LEN);

    let mut txs = Vec::new();
    loop {
        let tx_size = cursor.varint()?;
        if tx_size == 0 {
            break;
        }
        let block_hash = Hash::from_slice(cursor.take(HASH_LEN, "attested hash")?)
            .ok_or(ParseError::Truncated("attested hash"))?;
        let sign_len = cursor.varint()? as usize;
        let sign = cursor.take(sign_len, "attestation sign")?.to_vec();
        let pubkey_len = cursor.varint()? as usize;
        let pubkey = cursor.take(pubkey_len, "attestation pubkey")?.to_vec();
        if pubkey.is_empty() {
            return Err(ParseError::EmptySignPubkey { block: block_hash });
        }
        if !crypto::verify_signature(&sign, &pubkey, block_hash.as_bytes()) {
            return Err(ParseError::BadSignTxSignature { block: block_hash });
        }
        let address = Address::from_pubkey(&pubkey);
        txs.push(SignTransactionInfo {
            block_hash,
            sign,
            pubkey,
            address,
        });
    }

    Ok(SignBlockInfo { header, txs })
}

/// Parses one transaction out of raw file bytes starting at its size
/// varint, as stored by the address index.
pub fn parse_transaction(bytes: &[u8]) -> Result<Option<TransactionInfo>, ParseError> {
    let mut cursor = Cursor::new(bytes);
    parse_transaction_body(&mut cursor, true, false, false, false, &[])
}
