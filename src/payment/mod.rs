//! The payment engine: submission, confirmation, sessions, credits, and
//! the caller-facing header protocol.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub mod credit;
pub mod header;
pub mod monitor;
pub mod session;
pub mod submitter;
pub mod verifier;
pub mod wallet;

pub use header::{PaymentHeader, PAYMENT_HEADER};
pub use wallet::Wallet;

/// Per-key async mutexes, used to serialize spends within one session or
/// credit account. Locks are created on first use and kept for the process
/// lifetime; the key space (open sessions, active accounts) is small.
#[derive(Default)]
pub(crate) struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}
