//! Best-effort decoding of the transaction `data` field.
//!
//! `data` is opaque at the format level; recognized JSON payloads set the
//! delegate, script and token sub-records. Anything that fails to parse
//! simply leaves the sub-records unset.

use serde_json::Value;
use torrent_node_types::{Address, DelegateInfo, ScriptInfo, ScriptKind, TokenInfo, TransactionInfo};

const BLOCKED_RECORD_LEN: usize = 9;
const BLOCKED_RECORD_TAG: u8 = 0x01;

pub fn decode_transaction_data(tx: &mut TransactionInfo) {
    let json = parse_json(&tx.data);

    if tx.data.len() == BLOCKED_RECORD_LEN && tx.data[0] == BLOCKED_RECORD_TAG {
        tx.is_blocked_from = true;
    } else if let Some(doc) = &json {
        if let Some(method) = doc.get("method").and_then(Value::as_str) {
            match method {
                "delegate" => {
                    if let Some(value) = doc
                        .get("params")
                        .and_then(|params| params.get("value"))
                        .and_then(Value::as_str)
                        .and_then(|raw| raw.parse::<u64>().ok())
                    {
                        tx.delegate = Some(DelegateInfo {
                            value,
                            is_delegate: true,
                        });
                    }
                }
                "undelegate" => {
                    tx.delegate = Some(DelegateInfo {
                        value: 0,
                        is_delegate: false,
                    });
                }
                _ => {}
            }
        }
    }

    if tx.to_address.is_script() {
        let kind = match &json {
            Some(doc) => match doc.get("method").and_then(Value::as_str) {
                Some("compile") => ScriptKind::Compile,
                Some("run") => ScriptKind::Run,
                _ => ScriptKind::Unknown,
            },
            // A plain value transfer to a contract address.
            None => ScriptKind::Pay,
        };
        tx.script_info = Some(ScriptInfo {
            kind,
            raw_tx: Vec::new(),
        });
    }

    if tx.to_address.is_token() {
        tx.token_info = json.as_ref().and_then(parse_token_info);
    }
}

fn parse_json(data: &[u8]) -> Option<Value> {
    if data.first() != Some(&b'{') || data.last() != Some(&b'}') {
        return None;
    }
    serde_json::from_slice(data).ok()
}

fn parse_token_info(doc: &Value) -> Option<TokenInfo> {
    // Token creation is a bare object carrying `type`; the other operations
    // arrive as method calls.
    if let Some(kind) = doc.get("type").and_then(Value::as_str) {
        let owner = Address::from_hex(doc.get("owner")?.as_str()?)?;
        let decimals = doc.get("decimals")?.as_u64()? as u32;
        let value = doc.get("total")?.as_u64()?;
        let symbol = doc.get("symbol")?.as_str()?.to_string();
        let name = doc.get("name")?.as_str()?.to_string();
        let emission = doc.get("emission")?.as_bool()?;
        let mut begin_distribution = Vec::new();
        if let Some(entries) = doc.get("data").and_then(Value::as_array) {
            for entry in entries {
                let address = Address::from_hex(entry.get("address")?.as_str()?)?;
                let amount = entry.get("value")?.as_u64()?;
                begin_distribution.push((address, amount));
            }
        }
        return Some(TokenInfo::Create {
            kind: kind.to_string(),
            owner,
            decimals,
            value,
            symbol,
            name,
            emission,
            begin_distribution,
        });
    }

    let method = doc.get("method")?.as_str()?;
    let params = doc.get("params")?;
    match method {
        "change-token-owner" => Some(TokenInfo::ChangeOwner {
            new_owner: Address::from_hex(params.get("owner")?.as_str()?)?,
        }),
        "change-token-emission" => Some(TokenInfo::ChangeEmission {
            new_emission: params.get("emission")?.as_bool()?,
        }),
        "add-tokens" => Some(TokenInfo::AddTokens {
            to: Address::from_hex(params.get("address")?.as_str()?)?,
            value: params.get("value")?.as_u64()?,
        }),
        "move-tokens" => Some(TokenInfo::MoveTokens {
            to: Address::from_hex(params.get("address")?.as_str()?)?,
            value: params.get("value")?.as_u64()?,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx_with_data(data: &[u8]) -> TransactionInfo {
        TransactionInfo {
            data: data.to_vec(),
            ..TransactionInfo::default()
        }
    }

    fn token_address() -> Address {
        let mut bytes = Address::from_pubkey(b"token").as_bytes().to_vec();
        bytes[0] = 0x09;
        Address::new(bytes)
    }

    fn script_address() -> Address {
        let mut bytes = Address::from_pubkey(b"script").as_bytes().to_vec();
        bytes[0] = 0x08;
        Address::new(bytes)
    }

    #[test]
    fn delegate_method_sets_subrecord() {
        let mut tx = tx_with_data(br#"{"method":"delegate","params":{"value":"100"}}"#);
        decode_transaction_data(&mut tx);
        assert_eq!(
            tx.delegate,
            Some(DelegateInfo {
                value: 100,
                is_delegate: true
            })
        );
    }

    #[test]
    fn undelegate_needs_no_value() {
        let mut tx = tx_with_data(br#"{"method":"undelegate"}"#);
        decode_transaction_data(&mut tx);
        assert_eq!(tx.delegate.unwrap().is_delegate, false);
    }

    #[test]
    fn bad_delegate_value_is_ignored() {
        let mut tx = tx_with_data(br#"{"method":"delegate","params":{"value":"oops"}}"#);
        decode_transaction_data(&mut tx);
        assert!(tx.delegate.is_none());
    }

    #[test]
    fn blocked_marker() {
        let mut tx = tx_with_data(&[0x01, 0, 0, 0, 0, 0, 0, 0, 0]);
        decode_transaction_data(&mut tx);
        assert!(tx.is_blocked_from);
    }

    #[test]
    fn script_kind_from_method_or_pay() {
        let mut tx = tx_with_data(br#"{"method":"compile"}"#);
        tx.to_address = script_address();
        decode_transaction_data(&mut tx);
        assert_eq!(tx.script_info.as_ref().unwrap().kind, ScriptKind::Compile);

        let mut pay = tx_with_data(b"not json at all");
        pay.to_address = script_address();
        decode_transaction_data(&mut pay);
        assert_eq!(pay.script_info.as_ref().unwrap().kind, ScriptKind::Pay);

        let mut unknown = tx_with_data(br#"{"method":"transfer"}"#);
        unknown.to_address = script_address();
        decode_transaction_data(&mut unknown);
        assert_eq!(unknown.script_info.as_ref().unwrap().kind, ScriptKind::Unknown);
    }

    #[test]
    fn token_create_with_distribution() {
        let owner = Address::from_pubkey(b"owner");
        let holder = Address::from_pubkey(b"holder");
        let data = format!(
            r#"{{"type":"shares","owner":"{}","decimals":8,"total":1000,"symbol":"SHR","name":"Shares","emission":true,"data":[{{"address":"{}","value":10}}]}}"#,
            hex::encode(owner.as_bytes()),
            hex::encode(holder.as_bytes()),
        );
        let mut tx = tx_with_data(data.as_bytes());
        tx.to_address = token_address();
        decode_transaction_data(&mut tx);
        match tx.token_info.unwrap() {
            TokenInfo::Create {
                owner: parsed_owner,
                value,
                begin_distribution,
                ..
            } => {
                assert_eq!(parsed_owner, owner);
                assert_eq!(value, 1000);
                assert_eq!(begin_distribution, vec![(holder, 10)]);
            }
            other => panic!("expected Create, got {other:?}"),
        }
    }

    #[test]
    fn token_move() {
        let to = Address::from_pubkey(b"to");
        let data = format!(
            r#"{{"method":"move-tokens","params":{{"address":"{}","value":5}}}}"#,
            hex::encode(to.as_bytes()),
        );
        let mut tx = tx_with_data(data.as_bytes());
        tx.to_address = token_address();
        decode_transaction_data(&mut tx);
        assert_eq!(tx.token_info, Some(TokenInfo::MoveTokens { to, value: 5 }));
    }

    #[test]
    fn garbage_json_leaves_subrecords_unset() {
        let mut tx = tx_with_data(b"{broken");
        tx.to_address = token_address();
        decode_transaction_data(&mut tx);
        assert!(tx.token_info.is_none());
        assert!(tx.delegate.is_none());
    }
}
