//! Caller-facing payment header.
//!
//! One line, semicolon-delimited key=value pairs:
//!
//! ```text
//! session=<token>; wallet=<address>; amount=<ref>; currency=<unit>;
//! timestamp=<epoch-ms>[; proof=<signature>][; signature=<sig>]
//! ```
//!
//! `session=` spends against a payment session; `proof=` presents a
//! standalone on-chain transfer; neither means the request is unpaid.

use crate::types::{PaymentError, PaymentResult};

/// Header name carrying payment evidence on metered requests.
pub const PAYMENT_HEADER: &str = "x-payment";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentHeader {
    pub session: Option<String>,
    pub wallet: Option<String>,
    pub amount_usd: Option<f64>,
    pub currency: Option<String>,
    pub timestamp_ms: Option<i64>,
    pub proof: Option<String>,
    pub signature: Option<String>,
}

impl PaymentHeader {
    pub fn parse(raw: &str) -> PaymentResult<Self> {
        let mut header = Self::default();

        for part in raw.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').ok_or_else(|| {
                PaymentError::InvalidHeader(format!("expected key=value, got '{part}'"))
            })?;
            let value = value.trim();
            match key.trim() {
                "session" => header.session = Some(value.to_string()),
                "wallet" => header.wallet = Some(value.to_string()),
                "amount" => {
                    header.amount_usd = Some(value.parse().map_err(|_| {
                        PaymentError::InvalidHeader(format!("amount is not a number: '{value}'"))
                    })?)
                }
                "currency" => header.currency = Some(value.to_string()),
                "timestamp" => {
                    header.timestamp_ms = Some(value.parse().map_err(|_| {
                        PaymentError::InvalidHeader(format!(
                            "timestamp is not epoch millis: '{value}'"
                        ))
                    })?)
                }
                "proof" => header.proof = Some(value.to_string()),
                "signature" => header.signature = Some(value.to_string()),
                // Unknown keys are ignored so clients can extend the header.
                _ => {}
            }
        }

        Ok(header)
    }

    /// True when the header carries something that could pay for a request.
    pub fn has_evidence(&self) -> bool {
        self.session.is_some() || self.proof.is_some()
    }

    /// Render back to wire form (client helpers and tests).
    pub fn to_header_value(&self) -> String {
        let mut parts = Vec::new();
        if let Some(v) = &self.session {
            parts.push(format!("session={v}"));
        }
        if let Some(v) = &self.wallet {
            parts.push(format!("wallet={v}"));
        }
        if let Some(v) = self.amount_usd {
            parts.push(format!("amount={v}"));
        }
        if let Some(v) = &self.currency {
            parts.push(format!("currency={v}"));
        }
        if let Some(v) = self.timestamp_ms {
            parts.push(format!("timestamp={v}"));
        }
        if let Some(v) = &self.proof {
            parts.push(format!("proof={v}"));
        }
        if let Some(v) = &self.signature {
            parts.push(format!("signature={v}"));
        }
        parts.join("; ")
    }
}
