//! Hashes, addresses and file positions.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use torrent_node_common::crypto;

/// 32-byte double-SHA256 identifier of a block or transaction.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Hash> {
        <[u8; 32]>::try_from(bytes).ok().map(Hash)
    }

    pub fn from_hex(data: &str) -> Option<Hash> {
        let raw = torrent_node_common::utils::from_hex(data).ok()?;
        Self::from_slice(&raw)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Hash::from_hex(&raw).ok_or_else(|| D::Error::custom("invalid hash hex"))
    }
}

/// Marker bytes of the sentinel address that funds genesis wallets. The
/// producer emits it verbatim in place of a derived address.
const INITIAL_WALLET_MARKER: &[u8] = b"InitialWalletTransaction";

/// 25-byte account identifier derived from a public key.
///
/// Two sentinels share the type: the empty address (transactions whose
/// pubkey field is empty) and the initial-wallet marker.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(Vec<u8>);

impl Address {
    pub fn new(bytes: Vec<u8>) -> Address {
        Address(bytes)
    }

    pub fn initial_wallet() -> Address {
        Address(INITIAL_WALLET_MARKER.to_vec())
    }

    pub fn from_pubkey(pubkey: &[u8]) -> Address {
        Address(crypto::address_from_pubkey(pubkey).to_vec())
    }

    pub fn from_hex(data: &str) -> Option<Address> {
        torrent_node_common::utils::from_hex(data).ok().map(Address)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty_addr(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_initial_wallet(&self) -> bool {
        self.0 == INITIAL_WALLET_MARKER
    }

    pub fn is_script(&self) -> bool {
        self.0.len() == crypto::ADDRESS_LEN && self.0[0] == crypto::ADDRESS_TAG_SCRIPT
    }

    pub fn is_token(&self) -> bool {
        self.0.len() == crypto::ADDRESS_LEN && self.0[0] == crypto::ADDRESS_TAG_TOKEN
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_initial_wallet() {
            f.write_str("InitialWalletTransaction")
        } else if self.is_empty_addr() {
            Ok(())
        } else {
            write!(f, "0x{}", hex::encode(&self.0))
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Address::from_hex(&raw).ok_or_else(|| D::Error::custom("invalid address hex"))
    }
}

/// Location of a record inside the append-only block file set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePosition {
    pub file_name: String,
    pub pos: u64,
}

impl FilePosition {
    pub fn new(file_name: impl Into<String>, pos: u64) -> FilePosition {
        FilePosition {
            file_name: file_name.into(),
            pos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_hex_roundtrip() {
        let hash = Hash([0xab; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn address_sentinels() {
        assert!(Address::default().is_empty_addr());
        assert!(Address::initial_wallet().is_initial_wallet());
        let derived = Address::from_pubkey(b"key");
        assert!(!derived.is_initial_wallet());
        assert!(!derived.is_script());
        assert_eq!(derived.as_bytes().len(), 25);
    }

    #[test]
    fn script_and_token_tags() {
        let mut bytes = Address::from_pubkey(b"key").as_bytes().to_vec();
        bytes[0] = 0x08;
        assert!(Address::new(bytes.clone()).is_script());
        bytes[0] = 0x09;
        assert!(Address::new(bytes).is_token());
    }

    #[test]
    fn bincode_roundtrip() {
        let pos = FilePosition::new("blk00001.dat", 17);
        let raw = bincode::serialize(&pos).unwrap();
        let back: FilePosition = bincode::deserialize(&raw).unwrap();
        assert_eq!(back, pos);
    }
}
