//! Paymob payment gateway client.
//!
//! Obtaining a payment token is a three-step handshake: exchange the API key
//! for a short-lived auth token, register the order, then request a payment
//! key scoped to that order. Each step is a distinct HTTP call and any
//! failure aborts the whole sequence.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::PaymobConfig;
use crate::errors::ServiceError;

/// Payment key lifetime in seconds.
const PAYMENT_KEY_EXPIRATION_SECS: u32 = 3600;

/// Seam between the order ledger and the payment provider. Production uses
/// [`PaymobClient`]; tests substitute a scripted double.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Runs the handshake and returns the token the storefront feeds to the
    /// hosted payment page.
    async fn request_payment_token(
        &self,
        amount: Decimal,
        merchant_order_id: Uuid,
        billing: &BillingData,
    ) -> Result<String, ServiceError>;
}

/// Billing block required by the payment key request. The gateway mandates
/// every field, so absent values are filled with the literal `"NA"`.
#[derive(Debug, Clone, Serialize)]
pub struct BillingData {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub apartment: String,
    pub floor: String,
    pub street: String,
    pub building: String,
    pub shipping_method: String,
    pub postal_code: String,
    pub city: String,
    pub country: String,
    pub state: String,
}

fn or_na(value: Option<&str>) -> String {
    match value {
        Some(s) if !s.trim().is_empty() => s.to_string(),
        _ => "NA".to_string(),
    }
}

impl BillingData {
    pub fn new(
        first_name: Option<&str>,
        last_name: Option<&str>,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Self {
        Self {
            first_name: or_na(first_name),
            last_name: or_na(last_name),
            email: or_na(email),
            phone_number: or_na(phone),
            apartment: "NA".to_string(),
            floor: "NA".to_string(),
            street: "NA".to_string(),
            building: "NA".to_string(),
            shipping_method: "NA".to_string(),
            postal_code: "NA".to_string(),
            city: "NA".to_string(),
            country: "NA".to_string(),
            state: "NA".to_string(),
        }
    }
}

/// Converts a decimal amount of major currency units to minor units (cents),
/// rounding to the nearest cent.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| {
            ServiceError::ValidationError(format!("amount out of range: {}", amount))
        })
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    api_key: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Serialize)]
struct OrderRegistrationRequest<'a> {
    auth_token: &'a str,
    // The gateway expects this flag as a string, not a boolean.
    delivery_needed: &'a str,
    amount_cents: i64,
    currency: &'a str,
    merchant_order_id: String,
    items: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct OrderRegistrationResponse {
    id: i64,
}

#[derive(Serialize)]
struct PaymentKeyRequest<'a> {
    auth_token: &'a str,
    amount_cents: i64,
    expiration: u32,
    order_id: i64,
    billing_data: &'a BillingData,
    currency: &'a str,
    integration_id: i64,
}

#[derive(Deserialize)]
struct PaymentKeyResponse {
    token: String,
}

/// HTTP client for the Paymob Accept API.
#[derive(Clone)]
pub struct PaymobClient {
    http: reqwest::Client,
    config: PaymobConfig,
}

impl PaymobClient {
    pub fn new(config: PaymobConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client build failed: {}", e)))?;

        Ok(Self { http, config })
    }

    async fn authenticate(&self) -> Result<String, ServiceError> {
        let url = format!("{}/auth/tokens", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .json(&AuthRequest {
                api_key: &self.config.api_key,
            })
            .send()
            .await
            .map_err(|e| ServiceError::GatewayAuth(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ServiceError::GatewayAuth(format!("{}: {}", status, detail)));
        }

        let body: AuthResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayAuth(format!("malformed response: {}", e)))?;

        Ok(body.token)
    }

    async fn register_order(
        &self,
        auth_token: &str,
        amount_cents: i64,
        merchant_order_id: Uuid,
    ) -> Result<i64, ServiceError> {
        let url = format!("{}/ecommerce/orders", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .json(&OrderRegistrationRequest {
                auth_token,
                delivery_needed: "false",
                amount_cents,
                currency: &self.config.currency,
                merchant_order_id: merchant_order_id.to_string(),
                items: Vec::new(),
            })
            .send()
            .await
            .map_err(|e| ServiceError::GatewayOrder(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ServiceError::GatewayOrder(format!("{}: {}", status, detail)));
        }

        let body: OrderRegistrationResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayOrder(format!("malformed response: {}", e)))?;

        Ok(body.id)
    }

    async fn request_payment_key(
        &self,
        auth_token: &str,
        amount_cents: i64,
        gateway_order_id: i64,
        billing: &BillingData,
    ) -> Result<String, ServiceError> {
        let url = format!("{}/acceptance/payment_keys", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .json(&PaymentKeyRequest {
                auth_token,
                amount_cents,
                expiration: PAYMENT_KEY_EXPIRATION_SECS,
                order_id: gateway_order_id,
                billing_data: billing,
                currency: &self.config.currency,
                integration_id: self.config.integration_id,
            })
            .send()
            .await
            .map_err(|e| ServiceError::GatewayKey(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ServiceError::GatewayKey(format!("{}: {}", status, detail)));
        }

        let body: PaymentKeyResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayKey(format!("malformed response: {}", e)))?;

        Ok(body.token)
    }
}

#[async_trait]
impl PaymentGateway for PaymobClient {
    #[instrument(skip(self, billing), fields(merchant_order_id = %merchant_order_id))]
    async fn request_payment_token(
        &self,
        amount: Decimal,
        merchant_order_id: Uuid,
        billing: &BillingData,
    ) -> Result<String, ServiceError> {
        let amount_cents = to_minor_units(amount)?;

        let auth_token = self.authenticate().await?;
        debug!("gateway auth token obtained");

        let gateway_order_id = self
            .register_order(&auth_token, amount_cents, merchant_order_id)
            .await?;
        debug!(gateway_order_id, "gateway order registered");

        self.request_payment_key(&auth_token, amount_cents, gateway_order_id, billing)
            .await
    }
}
