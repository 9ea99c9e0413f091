use std::fmt;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ChainId;
use crate::ports::ConnectError;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestArguments {
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl RequestArguments {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    pub fn method(method: impl Into<String>) -> Self {
        Self::new(method, Value::Array(Vec::new()))
    }

    /// Params as a positional list; a missing value becomes `[]`.
    pub fn params_or_empty(&self) -> Value {
        if self.params.is_null() {
            Value::Array(Vec::new())
        } else {
            self.params.clone()
        }
    }
}

/// Full JSON-RPC request envelope used on the legacy `send`/`sendAsync` path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, args: &RequestArguments) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: id.into(),
            method: args.method.clone(),
            params: args.params_or_empty(),
        }
    }

    pub fn arguments(&self) -> RequestArguments {
        RequestArguments::new(self.method.clone(), self.params.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({ "code": self.code, "message": self.message })
        })
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

pub fn json_chain_id(value: &Value) -> Result<ChainId, ConnectError> {
    if let Some(n) = value.as_u64() {
        return positive_chain_id(n);
    }
    let s = value
        .as_str()
        .ok_or_else(|| ConnectError::Validation("chain id must be string or number".to_owned()))?;
    parse_chain_id_str(s)
}

pub fn parse_chain_id_str(raw: &str) -> Result<ChainId, ConnectError> {
    let raw = raw.trim();
    let parsed = if raw.starts_with("0x") || raw.starts_with("0X") {
        u64::from_str_radix(&raw[2..], 16)
            .map_err(|e| ConnectError::Validation(format!("invalid hex chain id: {e}")))?
    } else {
        raw.parse()
            .map_err(|e| ConnectError::Validation(format!("invalid chain id: {e}")))?
    };
    positive_chain_id(parsed)
}

fn positive_chain_id(n: u64) -> Result<ChainId, ConnectError> {
    if n == 0 {
        return Err(ConnectError::Validation("chain id must be positive".to_owned()));
    }
    Ok(ChainId(n))
}

/// Reads the target chain out of `wallet_switchEthereumChain` params
/// (`[{ "chainId": "0x89" }]`).
pub fn switch_chain_target(params: &Value) -> Result<ChainId, ConnectError> {
    let raw = params
        .get(0)
        .and_then(|p| p.get("chainId"))
        .ok_or_else(|| {
            ConnectError::Validation("wallet_switchEthereumChain requires a chainId".to_owned())
        })?;
    json_chain_id(raw)
}

pub fn parse_accounts(value: &Value) -> Result<Vec<Address>, ConnectError> {
    let arr = value
        .as_array()
        .ok_or_else(|| ConnectError::Transport("accounts result must be an array".to_owned()))?;
    arr.iter().map(parse_account).collect()
}

pub fn parse_account(value: &Value) -> Result<Address, ConnectError> {
    let raw = value
        .as_str()
        .ok_or_else(|| ConnectError::Transport("account must be a string".to_owned()))?;
    raw.parse()
        .map_err(|e| ConnectError::Validation(format!("invalid account address {raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_ids_parse_from_hex_decimal_and_numbers() {
        assert_eq!(json_chain_id(&Value::from("0x89")).unwrap(), ChainId::MATIC_MAINNET);
        assert_eq!(json_chain_id(&Value::from("11155111")).unwrap(), ChainId::ETHEREUM_SEPOLIA);
        assert_eq!(json_chain_id(&Value::from(1u64)).unwrap(), ChainId::ETHEREUM_MAINNET);
        assert!(json_chain_id(&Value::Bool(true)).is_err());
        assert!(parse_chain_id_str("0xzz").is_err());
    }

    #[test]
    fn zero_chain_id_is_rejected_in_every_form() {
        for raw in [Value::from(0u64), Value::from("0x0"), Value::from("0")] {
            assert!(matches!(json_chain_id(&raw), Err(ConnectError::Validation(_))));
        }
        assert!(switch_chain_target(&serde_json::json!([{ "chainId": "0x00" }])).is_err());
    }

    #[test]
    fn switch_chain_target_reads_first_param() {
        let params = serde_json::json!([{ "chainId": "0xaa36a7" }]);
        assert_eq!(switch_chain_target(&params).unwrap(), ChainId::ETHEREUM_SEPOLIA);
        assert!(switch_chain_target(&serde_json::json!([])).is_err());
    }

    #[test]
    fn legacy_envelope_defaults_params_to_empty_list() {
        let envelope = JsonRpcRequest::new(7u64, &RequestArguments::new("eth_chainId", Value::Null));
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            serde_json::json!({ "jsonrpc": "2.0", "id": 7, "method": "eth_chainId", "params": [] })
        );
    }
}
