//! Serde adapters for fields that travel as hex strings in JSON.

/// `Vec<u8>` as a lowercase hex string.
pub mod hex_bytes {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let trimmed = raw.strip_prefix("0x").unwrap_or(&raw);
        hex::decode(trimmed).map_err(D::Error::custom)
    }
}

/// Numbers that some peers send as JSON strings.
pub mod string_or_u64 {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(value),
            Raw::Text(text) => text.parse().map_err(D::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(with = "super::hex_bytes")]
        data: Vec<u8>,
        #[serde(deserialize_with = "super::string_or_u64::deserialize")]
        number: u64,
    }

    #[test]
    fn hex_and_stringly_numbers() {
        let parsed: Wrapper = serde_json::from_str(r#"{"data": "0xff00", "number": "42"}"#).unwrap();
        assert_eq!(parsed.data, vec![0xff, 0x00]);
        assert_eq!(parsed.number, 42);
    }

    #[test]
    fn plain_number_still_works() {
        let parsed: Wrapper = serde_json::from_str(r#"{"data": "", "number": 7}"#).unwrap();
        assert!(parsed.data.is_empty());
        assert_eq!(parsed.number, 7);
    }
}
