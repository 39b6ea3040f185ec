//! Payment Processor Port
//!
//! Extensions are paid before they are applied. The processor hands the
//! client a proof — an order id, a payment id, and a signature the
//! processor computed over `"<order_id>|<payment_id>"` with a shared
//! secret. Verification is pure and deterministic: once the proof is in
//! hand no further round-trip is needed.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use consult_session_core::MinorUnits;

use crate::error::PaymentError;

type HmacSha256 = Hmac<Sha256>;

/// Proof of a completed payment, as delivered by the processor's
/// checkout/webhook flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProof {
    pub order_id: String,
    pub payment_id: String,
    /// Hex-encoded HMAC-SHA256 over `"<order_id>|<payment_id>"`.
    pub signature: String,
    /// Amount the processor captured, in minor units.
    pub amount: MinorUnits,
}

/// Port to the external payment processor.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Verify a proof against the amount the engine expects. Any failure
    /// leaves the session untouched; the caller may retry with a fresh
    /// proof.
    async fn verify(
        &self,
        proof: &PaymentProof,
        expected_amount: MinorUnits,
    ) -> std::result::Result<(), PaymentError>;
}

/// Signature-scheme verifier over a shared secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Compute the signature the processor would produce for this
    /// order/payment pair. Used by webhook emulators and tests.
    pub fn sign(&self, order_id: &str, payment_id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(Self::payload(order_id, payment_id).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn payload(order_id: &str, payment_id: &str) -> String {
        format!("{}|{}", order_id, payment_id)
    }
}

#[async_trait]
impl PaymentProcessor for SignatureVerifier {
    async fn verify(
        &self,
        proof: &PaymentProof,
        expected_amount: MinorUnits,
    ) -> std::result::Result<(), PaymentError> {
        if proof.amount != expected_amount {
            return Err(PaymentError::ProcessorError(format!(
                "captured amount {} does not match expected {}",
                proof.amount, expected_amount
            )));
        }

        let signature = hex::decode(&proof.signature)
            .map_err(|_| PaymentError::SignatureMismatch)?;
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(Self::payload(&proof.order_id, &proof.payment_id).as_bytes());
        // Constant-time comparison via the Mac verifier.
        mac.verify_slice(&signature)
            .map_err(|_| PaymentError::SignatureMismatch)?;

        tracing::debug!(
            "Payment {} for order {} verified",
            proof.payment_id,
            proof.order_id
        );
        Ok(())
    }
}
