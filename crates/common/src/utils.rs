use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Renders a byte slice as lowercase hex, the form used in every log line
/// that mentions a hash.
pub fn to_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Parses lowercase or uppercase hex, tolerating an optional `0x` prefix.
pub fn from_hex(data: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let trimmed = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip_with_prefix() {
        assert_eq!(from_hex("0x00ff").unwrap(), vec![0x00, 0xff]);
        assert_eq!(from_hex("00ff").unwrap(), vec![0x00, 0xff]);
        assert_eq!(to_hex(&[0x00, 0xff]), "00ff");
    }
}
