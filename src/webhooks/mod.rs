//! Payment gateway callback verification.
//!
//! The gateway signs each transaction callback with HMAC-SHA512 over a fixed
//! concatenation of payload fields and passes the hex digest as an `hmac`
//! query parameter. Nothing in the payload is trusted until the signature
//! checks out.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use uuid::Uuid;

use crate::errors::ServiceError;

type HmacSha512 = Hmac<Sha512>;

/// Order reference inside a transaction callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRef {
    /// Gateway-side order id
    pub id: i64,
    /// Our order id, echoed back from order registration
    pub merchant_order_id: String,
}

/// Card details subset included in the signed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceData {
    pub pan: String,
    pub sub_type: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Transaction object posted by the gateway. Field names mirror the wire
/// format; only the fields that participate in the signature plus the order
/// reference are modeled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPayload {
    pub id: i64,
    pub amount_cents: i64,
    pub created_at: String,
    pub currency: String,
    pub error_occured: bool,
    pub has_parent_transaction: bool,
    pub integration_id: i64,
    pub is_3d_secure: bool,
    pub is_auth: bool,
    pub is_capture: bool,
    pub is_refunded: bool,
    pub is_standalone_payment: bool,
    pub is_voided: bool,
    pub order: OrderRef,
    pub owner: i64,
    pub pending: bool,
    pub source_data: SourceData,
    pub success: bool,
}

fn push_bool(out: &mut String, value: bool) {
    out.push_str(if value { "true" } else { "false" });
}

impl TransactionPayload {
    /// Concatenates the signed fields in the order the gateway documents.
    /// Any change to this ordering breaks every signature.
    pub fn canonical_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.amount_cents.to_string());
        out.push_str(&self.created_at);
        out.push_str(&self.currency);
        push_bool(&mut out, self.error_occured);
        push_bool(&mut out, self.has_parent_transaction);
        out.push_str(&self.id.to_string());
        out.push_str(&self.integration_id.to_string());
        push_bool(&mut out, self.is_3d_secure);
        push_bool(&mut out, self.is_auth);
        push_bool(&mut out, self.is_capture);
        push_bool(&mut out, self.is_refunded);
        push_bool(&mut out, self.is_standalone_payment);
        push_bool(&mut out, self.is_voided);
        out.push_str(&self.order.id.to_string());
        out.push_str(&self.owner.to_string());
        push_bool(&mut out, self.pending);
        out.push_str(&self.source_data.pan);
        out.push_str(&self.source_data.sub_type);
        out.push_str(&self.source_data.kind);
        push_bool(&mut out, self.success);
        out
    }

    /// Parses `order.merchant_order_id` back into our order id.
    pub fn merchant_order_id(&self) -> Result<Uuid, ServiceError> {
        Uuid::parse_str(&self.order.merchant_order_id).map_err(|_| {
            ServiceError::ValidationError(format!(
                "merchant_order_id is not a valid order id: {}",
                self.order.merchant_order_id
            ))
        })
    }
}

/// Verifies callback signatures against the shared webhook secret.
#[derive(Clone)]
pub struct HmacVerifier {
    secret: String,
}

impl HmacVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Checks the supplied hex digest against the payload. Comparison happens
    /// inside the MAC verification, which is constant-time.
    pub fn verify(
        &self,
        supplied_hex: &str,
        payload: &TransactionPayload,
    ) -> Result<(), ServiceError> {
        let supplied = hex::decode(supplied_hex.trim())
            .map_err(|_| ServiceError::SignatureMismatch)?;

        let mut mac = HmacSha512::new_from_slice(self.secret.as_bytes())
            .map_err(|e| ServiceError::InternalError(format!("hmac init failed: {}", e)))?;
        mac.update(payload.canonical_string().as_bytes());

        mac.verify_slice(&supplied)
            .map_err(|_| ServiceError::SignatureMismatch)
    }

    /// Signs a payload, returning the hex digest. Used by tests and by local
    /// tooling that replays callbacks.
    pub fn sign(&self, payload: &TransactionPayload) -> Result<String, ServiceError> {
        let mut mac = HmacSha512::new_from_slice(self.secret.as_bytes())
            .map_err(|e| ServiceError::InternalError(format!("hmac init failed: {}", e)))?;
        mac.update(payload.canonical_string().as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sample_payload() -> TransactionPayload {
        TransactionPayload {
            id: 9_123_456,
            amount_cents: 15_000,
            created_at: "2024-03-01T10:15:30.123456".to_string(),
            currency: "EGP".to_string(),
            error_occured: false,
            has_parent_transaction: false,
            integration_id: 44_556,
            is_3d_secure: true,
            is_auth: false,
            is_capture: false,
            is_refunded: false,
            is_standalone_payment: true,
            is_voided: false,
            order: OrderRef {
                id: 777_001,
                merchant_order_id: Uuid::new_v4().to_string(),
            },
            owner: 12,
            pending: false,
            source_data: SourceData {
                pan: "2346".to_string(),
                sub_type: "MasterCard".to_string(),
                kind: "card".to_string(),
            },
            success: true,
        }
    }

    #[test]
    fn canonical_string_field_order() {
        let payload = sample_payload();
        let s = payload.canonical_string();
        assert!(s.starts_with("150002024-03-01T10:15:30.123456EGPfalsefalse9123456"));
        assert!(s.ends_with("2346MasterCardcardtrue"));
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let verifier = HmacVerifier::new("whsec_test");
        let payload = sample_payload();
        let digest = verifier.sign(&payload).unwrap();
        assert!(verifier.verify(&digest, &payload).is_ok());
    }

    #[test]
    fn tampered_amount_fails_verification() {
        let verifier = HmacVerifier::new("whsec_test");
        let mut payload = sample_payload();
        let digest = verifier.sign(&payload).unwrap();
        payload.amount_cents += 1;
        assert_matches!(
            verifier.verify(&digest, &payload),
            Err(ServiceError::SignatureMismatch)
        );
    }

    #[test]
    fn flipped_success_flag_fails_verification() {
        let verifier = HmacVerifier::new("whsec_test");
        let mut payload = sample_payload();
        let digest = verifier.sign(&payload).unwrap();
        payload.success = false;
        assert_matches!(
            verifier.verify(&digest, &payload),
            Err(ServiceError::SignatureMismatch)
        );
    }

    #[test]
    fn non_hex_signature_is_rejected() {
        let verifier = HmacVerifier::new("whsec_test");
        let payload = sample_payload();
        assert_matches!(
            verifier.verify("zz-not-hex", &payload),
            Err(ServiceError::SignatureMismatch)
        );
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let payload = sample_payload();
        let digest = HmacVerifier::new("whsec_test").sign(&payload).unwrap();
        assert_matches!(
            HmacVerifier::new("other_secret").verify(&digest, &payload),
            Err(ServiceError::SignatureMismatch)
        );
    }
}
