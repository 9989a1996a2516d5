//! Payment gate middleware.
//!
//! Wraps a metered route with the x402 challenge flow: no payment header
//! means HTTP 402 naming the required amount; `session=` spends against the
//! session manager (after the resource-pattern policy check); `proof=` goes
//! through standalone on-chain verification.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::models::{AppState, ServiceConfig};
use crate::payment::session::{pattern_matches, SessionManager};
use crate::payment::verifier::ProofVerifier;
use crate::payment::{PaymentHeader, PAYMENT_HEADER};
use crate::types::{PaymentError, PaymentResult};

#[derive(Clone)]
pub struct PaymentGate {
    sessions: Arc<SessionManager>,
    verifier: Arc<ProofVerifier>,
    service: ServiceConfig,
}

impl PaymentGate {
    pub fn new(state: &AppState, service: ServiceConfig) -> Self {
        let verifier = Arc::new(ProofVerifier::new(
            Arc::clone(&state.rpc),
            Arc::clone(&state.oracle),
            Arc::clone(&state.store),
            state.config.payment.recipient_address.clone(),
        ));
        Self {
            sessions: Arc::clone(&state.sessions),
            verifier,
            service,
        }
    }

    async fn settle(&self, header: &PaymentHeader, path: &str, method: &str) -> PaymentResult<()> {
        let price = self.service.base_price_usd;

        if let Some(token) = &header.session {
            // Pattern policy runs before any spend is attempted.
            let session = self.sessions.validate(token, price).await?;
            if !pattern_matches(&session.resource_pattern, path) {
                return Err(PaymentError::VerificationFailed(format!(
                    "session does not cover {path}"
                )));
            }
            self.sessions
                .spend(token, price, path, &self.service.service_type, method)
                .await?;
            return Ok(());
        }

        if header.proof.is_some() {
            return self.verifier.verify(header, price).await;
        }

        Err(PaymentError::PaymentRequired { amount_usd: price })
    }
}

pub async fn require_payment(
    State(gate): State<PaymentGate>,
    req: Request,
    next: Next,
) -> Result<Response, PaymentError> {
    let raw = req
        .headers()
        .get(PAYMENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(PaymentError::PaymentRequired {
            amount_usd: gate.service.base_price_usd,
        })?;

    let header = PaymentHeader::parse(raw)?;
    let path = req.uri().path().to_string();
    let method = req.method().as_str().to_string();
    gate.settle(&header, &path, &method).await?;

    Ok(next.run(req).await)
}
