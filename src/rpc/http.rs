// JSON-RPC 2.0 client for a single settlement endpoint.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{LedgerTxStatus, RpcError, SettlementRpc, SignedTransfer, TransferDetails};

/// How a single RPC call came apart. `LedgerError` means the endpoint is
/// healthy but the ledger refused the request; the caller decides whether
/// that is terminal (submission) or transient (queries).
enum CallFailure {
    Transport(String),
    Protocol(String),
    LedgerError { message: String },
}

pub struct HttpRpcClient {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpRpcClient {
    pub fn new(endpoint: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            http,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, CallFailure> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallFailure::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CallFailure::Transport(format!(
                "HTTP {} from {}",
                response.status(),
                self.endpoint
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| CallFailure::Protocol(format!("invalid JSON-RPC response: {e}")))?;

        if let Some(err) = payload.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown ledger error")
                .to_string();
            return Err(CallFailure::LedgerError { message });
        }

        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }
}

fn parse_status(value: &Value) -> Result<LedgerTxStatus, RpcError> {
    let status = value
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::Protocol(format!("missing transaction status in {value}")))?;

    match status {
        "notFound" => Ok(LedgerTxStatus::NotFound),
        "pending" => Ok(LedgerTxStatus::Pending),
        "confirmed" => Ok(LedgerTxStatus::Confirmed),
        "failed" => {
            let err = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("transaction failed")
                .to_string();
            Ok(LedgerTxStatus::Failed(err))
        }
        other => Err(RpcError::Protocol(format!(
            "unknown transaction status: {other}"
        ))),
    }
}

#[async_trait]
impl SettlementRpc for HttpRpcClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn submit_transfer(&self, transfer: &SignedTransfer) -> Result<String, RpcError> {
        let params = json!([{
            "from": transfer.from,
            "to": transfer.to,
            "amount": transfer.native_amount,
            "nonce": transfer.nonce,
            "signature": transfer.signature,
        }]);
        match self.call("submitTransfer", params).await {
            Ok(result) => result
                .as_str()
                .map(str::to_string)
                .or_else(|| {
                    result
                        .get("signature")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .ok_or_else(|| {
                    RpcError::Protocol(format!("submitTransfer returned no signature: {result}"))
                }),
            Err(CallFailure::Transport(e)) => Err(RpcError::Transport(e)),
            Err(CallFailure::Protocol(e)) => Err(RpcError::Protocol(e)),
            // The ledger saw the transfer and said no. Every endpoint fronts
            // the same ledger, so retrying elsewhere would just replay the
            // rejection.
            Err(CallFailure::LedgerError { message }) => Err(RpcError::Rejected(message)),
        }
    }

    async fn transaction_status(&self, signature: &str) -> Result<LedgerTxStatus, RpcError> {
        match self.call("getTransactionStatus", json!([signature])).await {
            Ok(Value::Null) => Ok(LedgerTxStatus::NotFound),
            Ok(result) => parse_status(&result),
            Err(CallFailure::Transport(e)) => Err(RpcError::Transport(e)),
            Err(CallFailure::Protocol(e)) => Err(RpcError::Protocol(e)),
            Err(CallFailure::LedgerError { message }) => Err(RpcError::Protocol(message)),
        }
    }

    async fn transfer_details(
        &self,
        signature: &str,
    ) -> Result<Option<TransferDetails>, RpcError> {
        match self.call("getTransaction", json!([signature])).await {
            Ok(Value::Null) => Ok(None),
            Ok(result) => {
                let recipient = result
                    .get("to")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        RpcError::Protocol(format!("getTransaction missing recipient: {result}"))
                    })?
                    .to_string();
                let native_amount = result
                    .get("amount")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| {
                        RpcError::Protocol(format!("getTransaction missing amount: {result}"))
                    })?;
                let status = parse_status(&result)?;
                Ok(Some(TransferDetails {
                    signature: signature.to_string(),
                    recipient,
                    native_amount,
                    status,
                }))
            }
            Err(CallFailure::Transport(e)) => Err(RpcError::Transport(e)),
            Err(CallFailure::Protocol(e)) => Err(RpcError::Protocol(e)),
            Err(CallFailure::LedgerError { message }) => Err(RpcError::Protocol(message)),
        }
    }

    async fn balance(&self, address: &str) -> Result<f64, RpcError> {
        match self.call("getBalance", json!([address])).await {
            Ok(result) => result.as_f64().ok_or_else(|| {
                RpcError::Protocol(format!("getBalance returned non-numeric: {result}"))
            }),
            Err(CallFailure::Transport(e)) => Err(RpcError::Transport(e)),
            Err(CallFailure::Protocol(e)) => Err(RpcError::Protocol(e)),
            Err(CallFailure::LedgerError { message }) => Err(RpcError::Protocol(message)),
        }
    }

    async fn latest_reference_price(
        &self,
        oracle_account: &str,
    ) -> Result<Option<f64>, RpcError> {
        match self.call("getOraclePrice", json!([oracle_account])).await {
            Ok(Value::Null) => Ok(None),
            Ok(result) => {
                let price = result
                    .as_f64()
                    .or_else(|| result.get("price").and_then(Value::as_f64))
                    .ok_or_else(|| {
                        RpcError::Protocol(format!("getOraclePrice returned non-numeric: {result}"))
                    })?;
                Ok(Some(price))
            }
            Err(CallFailure::Transport(e)) => Err(RpcError::Transport(e)),
            Err(CallFailure::Protocol(e)) => Err(RpcError::Protocol(e)),
            Err(CallFailure::LedgerError { message }) => Err(RpcError::Protocol(message)),
        }
    }
}
