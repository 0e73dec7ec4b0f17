use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::ServiceError;
use crate::services::orders::PaymentOutcome;
use crate::webhooks::TransactionPayload;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    pub hmac: String,
}

/// Gateway callbacks wrap the transaction object in an `obj` envelope.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub obj: TransactionPayload,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
}

// POST /api/v1/webhooks/payment?hmac=<hex>
//
// Signature failures return 401 without touching the ledger. Verified
// deliveries are applied exactly once; redeliveries and callbacks for orders
// this system never issued are acknowledged with 200 so the gateway stops
// retrying.
pub async fn payment_webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    Json(envelope): Json<WebhookEnvelope>,
) -> Result<impl IntoResponse, ServiceError> {
    let payload = envelope.obj;

    state.hmac_verifier.verify(&query.hmac, &payload)?;

    let order_id = payload.merchant_order_id()?;

    match state
        .order_service
        .apply_payment_outcome(order_id, payload.success, payload.id)
        .await
    {
        Ok(PaymentOutcome::Applied(status)) => {
            info!(%order_id, %status, "payment outcome applied");
            Ok(Json(WebhookAck { status: "processed" }))
        }
        Ok(PaymentOutcome::AlreadyProcessed) => {
            info!(%order_id, "payment outcome already applied");
            Ok(Json(WebhookAck { status: "processed" }))
        }
        Err(ServiceError::OrderNotFound(_)) => {
            // Callback for an order we never created. Acknowledge so the
            // gateway does not retry forever, but leave a trace.
            warn!(%order_id, transaction_id = payload.id, "callback for unknown order");
            Ok(Json(WebhookAck { status: "ignored" }))
        }
        Err(e) => Err(e),
    }
}
