//! Peer wire protocol: JSON request bodies, typed response shapes and the
//! binary frames used by `pre-load` and dump transfers.

use super::SourceError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Deserialize;
use serde_json::json;
use std::io::{Read, Write};
use torrent_node_common::crypto;
use torrent_node_types::serde_helpers::string_or_u64;
use torrent_node_types::varint::{read_varint, write_varint};

/// Header fields a peer reports for one block.
#[derive(Clone, Debug, Deserialize)]
pub struct PeerBlockHeader {
    #[serde(deserialize_with = "string_or_u64::deserialize")]
    pub number: u64,
    pub hash: String,
    pub prev_hash: String,
    #[serde(deserialize_with = "string_or_u64::deserialize")]
    pub size: u64,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(default)]
    pub prev_extra_blocks: Vec<String>,
    #[serde(default)]
    pub next_extra_blocks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct CountBlocksResult {
    pub count_blocks: u64,
    #[serde(default)]
    pub next_extra_blocks: Vec<String>,
}

pub fn make_get_count_blocks() -> String {
    json!({"method": "get-count-blocks", "id": 1, "params": {"type": "forP2P"}}).to_string()
}

pub fn make_preload_blocks(
    current_block: u64,
    compress: bool,
    is_sign: bool,
    preload_blocks: u64,
    max_block_size: u64,
) -> String {
    json!({
        "method": "pre-load",
        "id": 1,
        "params": {
            "currentBlock": current_block,
            "compress": compress,
            "isSign": is_sign,
            "preLoad": preload_blocks,
            "maxBlockSize": max_block_size,
        }
    })
    .to_string()
}

pub fn make_get_blocks(begin_block: u64, count_blocks: u64) -> String {
    json!({
        "method": "get-blocks",
        "id": 1,
        "params": {
            "beginBlock": begin_block,
            "countBlocks": count_blocks,
            "type": "forP2P",
            "direction": "forward",
        }
    })
    .to_string()
}

pub fn make_get_block_by_number(number: u64) -> String {
    json!({
        "method": "get-block-by-number",
        "id": 1,
        "params": {"number": number, "type": "forP2P"}
    })
    .to_string()
}

pub fn make_get_dump_block(
    hash: &str,
    from_byte: u64,
    to_byte: u64,
    is_sign: bool,
    compress: bool,
) -> String {
    json!({
        "method": "get-dump-block-by-hash",
        "id": 1,
        "params": {
            "hash": hash,
            "fromByte": from_byte,
            "toByte": to_byte,
            "isHex": false,
            "compress": compress,
            "isSign": is_sign,
        }
    })
    .to_string()
}

fn parse_envelope<T: serde::de::DeserializeOwned>(raw: &[u8]) -> Result<T, SourceError> {
    let envelope: RpcEnvelope<T> = serde_json::from_slice(raw)
        .map_err(|err| SourceError::Frame(format!("bad json response: {err}")))?;
    if let Some(error) = envelope.error {
        return Err(SourceError::Frame(format!("peer error: {error}")));
    }
    envelope
        .result
        .ok_or_else(|| SourceError::Frame("response without result".to_string()))
}

pub fn parse_count_blocks(raw: &[u8]) -> Result<CountBlocksResult, SourceError> {
    parse_envelope(raw)
}

pub fn parse_block_header(raw: &[u8]) -> Result<PeerBlockHeader, SourceError> {
    parse_envelope(raw)
}

pub fn parse_block_headers(raw: &[u8]) -> Result<Vec<PeerBlockHeader>, SourceError> {
    parse_envelope(raw)
}

/// Decoded `pre-load` frame: `[headersLen:8][addHashesLen:8][blocksLen:8]
/// [countBlocks:8][headersJson][addHashesJson][dumpsBlob]`.
#[derive(Debug, Default)]
pub struct PreloadResponse {
    pub count_blocks: u64,
    pub headers: Vec<PeerBlockHeader>,
    pub additional_hashes: Vec<String>,
    pub dumps: Vec<Vec<u8>>,
}

pub fn parse_preload_blocks(raw: &[u8], compress: bool) -> Result<PreloadResponse, SourceError> {
    // Short all-JSON responses carry an error object instead of a frame.
    if raw.len() <= 320 {
        if let Ok(doc) = serde_json::from_slice::<serde_json::Value>(raw) {
            let error = doc.get("error").cloned().unwrap_or(serde_json::Value::Null);
            return Err(SourceError::Frame(format!("peer error: {error}")));
        }
    }

    let take_u64 = |pos: usize| -> Result<u64, SourceError> {
        raw.get(pos..pos + 8)
            .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
            .map(u64::from_le_bytes)
            .ok_or_else(|| SourceError::Frame("preload frame too short".to_string()))
    };
    let headers_len = take_u64(0)? as usize;
    let add_hashes_len = take_u64(8)? as usize;
    let blocks_len = take_u64(16)? as usize;
    let count_blocks = take_u64(24)?;

    let mut pos = 32usize;
    let slice = |pos: usize, len: usize| -> Result<&[u8], SourceError> {
        raw.get(pos..pos + len)
            .ok_or_else(|| SourceError::Frame("preload frame truncated".to_string()))
    };
    let headers_raw = slice(pos, headers_len)?;
    pos += headers_len;
    let add_hashes_raw = slice(pos, add_hashes_len)?;
    pos += add_hashes_len;
    let dumps_raw = slice(pos, blocks_len)?;
    pos += blocks_len;
    if pos != raw.len() {
        return Err(SourceError::Frame("preload frame has trailing bytes".to_string()));
    }

    let headers = if headers_raw.is_empty() {
        Vec::new()
    } else {
        parse_block_headers(headers_raw)?
    };
    let additional_hashes = if add_hashes_raw.is_empty() {
        Vec::new()
    } else {
        parse_envelope(add_hashes_raw)?
    };
    let dumps = parse_dumps_blob(dumps_raw, compress)?;

    Ok(PreloadResponse {
        count_blocks,
        headers,
        additional_hashes,
        dumps,
    })
}

/// Splits a dump blob: concatenated `[size:8_be][dump]` entries, the whole
/// blob optionally zlib-compressed.
pub fn parse_dumps_blob(raw: &[u8], compress: bool) -> Result<Vec<Vec<u8>>, SourceError> {
    let data;
    let raw = if compress {
        data = decompress(raw)?;
        data.as_slice()
    } else {
        raw
    };
    let mut dumps = Vec::new();
    let mut pos = 0usize;
    while pos < raw.len() {
        let size = raw
            .get(pos..pos + 8)
            .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
            .map(u64::from_be_bytes)
            .ok_or_else(|| SourceError::Frame("dump blob truncated".to_string()))?
            as usize;
        pos += 8;
        let dump = raw
            .get(pos..pos + size)
            .ok_or_else(|| SourceError::Frame("dump blob truncated".to_string()))?;
        dumps.push(dump.to_vec());
        pos += size;
    }
    Ok(dumps)
}

/// Builds a dump blob, the serving-side counterpart of [`parse_dumps_blob`].
pub fn make_dumps_blob(dumps: &[Vec<u8>], compress_blob: bool) -> Result<Vec<u8>, SourceError> {
    let mut blob = Vec::new();
    for dump in dumps {
        blob.extend_from_slice(&(dump.len() as u64).to_be_bytes());
        blob.extend_from_slice(dump);
    }
    if compress_blob {
        compress(&blob)
    } else {
        Ok(blob)
    }
}

pub fn compress(raw: &[u8]) -> Result<Vec<u8>, SourceError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(raw)
        .and_then(|_| encoder.finish())
        .map_err(|err| SourceError::Frame(format!("compression failed: {err}")))
}

pub fn decompress(raw: &[u8]) -> Result<Vec<u8>, SourceError> {
    let mut decoder = ZlibDecoder::new(raw);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map(|_| out)
        .map_err(|err| SourceError::Frame(format!("decompression failed: {err}")))
}

/// A dump with the sender attestation envelope stripped off.
#[derive(Debug)]
pub struct BlockSignatureCheckResult {
    pub block: Vec<u8>,
    pub sign: Vec<u8>,
    pub pubkey: Vec<u8>,
    pub address: Vec<u8>,
}

/// Signed-dump envelope: `[block_size:8_le][block][sign_len:varint][sign]
/// [pubkey_len:varint][pubkey]`; the signature covers the block bytes.
pub fn check_signature_block(dump: &[u8]) -> Result<BlockSignatureCheckResult, SourceError> {
    let size = dump
        .get(..8)
        .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| SourceError::Frame("signed dump too short".to_string()))? as usize;
    let block = dump
        .get(8..8 + size)
        .ok_or_else(|| SourceError::Frame("signed dump truncated".to_string()))?
        .to_vec();

    let mut pos = 8 + size;
    let mut take_varint_bytes = |what: &'static str| -> Result<Vec<u8>, SourceError> {
        let (len, consumed) = read_varint(&dump[pos.min(dump.len())..])
            .map_err(|_| SourceError::Frame(format!("signed dump missing {what}")))?;
        pos += consumed;
        let bytes = dump
            .get(pos..pos + len as usize)
            .ok_or_else(|| SourceError::Frame(format!("signed dump missing {what}")))?
            .to_vec();
        pos += len as usize;
        Ok(bytes)
    };
    let sign = take_varint_bytes("sign")?;
    let pubkey = take_varint_bytes("pubkey")?;

    if !crypto::verify_signature(&sign, &pubkey, &block) {
        return Err(SourceError::BadDump("sender envelope does not verify".to_string()));
    }
    let address = crypto::address_from_pubkey(&pubkey).to_vec();

    Ok(BlockSignatureCheckResult {
        block,
        sign,
        pubkey,
        address,
    })
}

/// Wraps a dump into the signed envelope [`check_signature_block`] accepts.
pub fn make_signed_dump(block: &[u8], secret: &[u8; 32]) -> Vec<u8> {
    let sign = crypto::sign_data(secret, block);
    let pubkey = crypto::pubkey_of(secret);
    let mut out = Vec::with_capacity(block.len() + sign.len() + pubkey.len() + 16);
    out.extend_from_slice(&(block.len() as u64).to_le_bytes());
    out.extend_from_slice(block);
    write_varint(sign.len() as u64, &mut out);
    out.extend_from_slice(&sign);
    write_varint(pubkey.len() as u64, &mut out);
    out.extend_from_slice(&pubkey);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_blocks_roundtrip() {
        let raw = br#"{"result": {"count_blocks": 100, "next_extra_blocks": ["ab"]}}"#;
        let parsed = parse_count_blocks(raw).unwrap();
        assert_eq!(parsed.count_blocks, 100);
        assert_eq!(parsed.next_extra_blocks, vec!["ab".to_string()]);
    }

    #[test]
    fn error_envelope_is_surfaced() {
        let raw = br#"{"error": {"message": "nope"}}"#;
        assert!(parse_count_blocks(raw).is_err());
    }

    #[test]
    fn header_accepts_stringly_numbers() {
        let raw = br#"{"result": {"number": "7", "hash": "aa", "prev_hash": "bb", "size": 10, "fileName": "blk00001.dat"}}"#;
        let header = parse_block_header(raw).unwrap();
        assert_eq!(header.number, 7);
        assert_eq!(header.size, 10);
        assert_eq!(header.file_name, "blk00001.dat");
    }

    #[test]
    fn dumps_blob_roundtrip_with_compression() {
        let dumps = vec![b"first".to_vec(), b"second dump".to_vec()];
        for compress_blob in [false, true] {
            let blob = make_dumps_blob(&dumps, compress_blob).unwrap();
            let back = parse_dumps_blob(&blob, compress_blob).unwrap();
            assert_eq!(back, dumps);
        }
    }

    #[test]
    fn preload_frame_roundtrip() {
        let headers_json = br#"{"result": [{"number": 1, "hash": "aa", "prev_hash": "00", "size": 4, "fileName": "blk00001.dat"}]}"#.to_vec();
        let add_hashes_json = br#"{"result": ["cc"]}"#.to_vec();
        let blob = make_dumps_blob(&[b"dump".to_vec(), b"xtra".to_vec()], false).unwrap();

        let mut frame = Vec::new();
        frame.extend_from_slice(&(headers_json.len() as u64).to_le_bytes());
        frame.extend_from_slice(&(add_hashes_json.len() as u64).to_le_bytes());
        frame.extend_from_slice(&(blob.len() as u64).to_le_bytes());
        frame.extend_from_slice(&55u64.to_le_bytes());
        frame.extend_from_slice(&headers_json);
        frame.extend_from_slice(&add_hashes_json);
        frame.extend_from_slice(&blob);

        let parsed = parse_preload_blocks(&frame, false).unwrap();
        assert_eq!(parsed.count_blocks, 55);
        assert_eq!(parsed.headers.len(), 1);
        assert_eq!(parsed.additional_hashes, vec!["cc".to_string()]);
        assert_eq!(parsed.dumps, vec![b"dump".to_vec(), b"xtra".to_vec()]);
    }

    #[test]
    fn short_error_json_instead_of_frame() {
        let raw = br#"{"error": "too far behind"}"#;
        assert!(parse_preload_blocks(raw, false).is_err());
    }

    #[test]
    fn signed_dump_envelope_roundtrip() {
        let secret = [3u8; 32];
        let dump = make_signed_dump(b"block bytes", &secret);
        let checked = check_signature_block(&dump).unwrap();
        assert_eq!(checked.block, b"block bytes");
        assert_eq!(checked.pubkey, crypto::pubkey_of(&secret));

        let mut tampered = dump.clone();
        tampered[10] ^= 0x01;
        assert!(check_signature_block(&tampered).is_err());
    }
}
