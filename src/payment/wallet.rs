//! Payer wallet: address plus optional signing capability.
//!
//! The settlement ledger accepts HMAC-SHA256 transfer authorizations keyed
//! by the payer's secret. A wallet without a secret can identify itself but
//! not pay; attempting to sign with it is the "signing declined" case and
//! creates no transaction.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::rpc::SignedTransfer;
use crate::types::{PaymentError, PaymentResult};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct Wallet {
    pub address: String,
    secret: Option<String>,
}

impl Wallet {
    pub fn new(address: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            address: address.into(),
            secret,
        }
    }

    pub fn can_sign(&self) -> bool {
        self.secret.is_some()
    }

    /// Build and sign a native-asset transfer to `recipient`.
    pub fn sign_transfer(
        &self,
        recipient: &str,
        native_amount: f64,
    ) -> PaymentResult<SignedTransfer> {
        let secret = self.secret.as_ref().ok_or_else(|| {
            PaymentError::PaymentRejected(format!(
                "wallet {} has no signing capability",
                self.address
            ))
        })?;

        let mut nonce_bytes = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = hex::encode(nonce_bytes);

        let message = format!("{}:{}:{}:{}", self.address, recipient, native_amount, nonce);
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(message.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(SignedTransfer {
            from: self.address.clone(),
            to: recipient.to_string(),
            native_amount,
            nonce,
            signature,
        })
    }
}
