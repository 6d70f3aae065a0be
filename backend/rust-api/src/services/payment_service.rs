use chrono::Utc;
use hmac::{Hmac, Mac};
use mongodb::bson::doc;
use mongodb::Database;
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;

use crate::config::PaymentSettings;
use crate::error::AppError;
use crate::metrics::PAYMENT_ORDERS_TOTAL;
use crate::models::payment::{
    CreateOrderRequest, CreateOrderResponse, Payment, PaymentStatus, VerifyPaymentRequest,
};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct GatewayOrder {
    id: String,
    amount: i64,
    currency: String,
}

/// Payment capture against a Razorpay-style gateway: order creation over
/// HTTP basic auth, then HMAC-SHA256 signature verification of the
/// callback. Reconciliation is out of scope.
pub struct PaymentService {
    mongo: Database,
    http_client: Client,
    settings: PaymentSettings,
}

impl PaymentService {
    pub const PAYMENTS: &'static str = "payments";

    pub fn new(mongo: Database, settings: PaymentSettings) -> Self {
        Self {
            mongo,
            http_client: Client::new(),
            settings,
        }
    }

    fn payments(&self) -> mongodb::Collection<Payment> {
        self.mongo.collection(Self::PAYMENTS)
    }

    pub async fn create_order(
        &self,
        user_id: &str,
        req: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, AppError> {
        let url = format!("{}/v1/orders", self.settings.gateway_url);
        let receipt = format!("receipt_{}", Utc::now().timestamp_millis());

        // Gateways take the amount in the currency's smallest unit.
        let payload = serde_json::json!({
            "amount": req.amount * 100,
            "currency": req.currency,
            "receipt": receipt,
        });

        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.settings.key_id, Some(&self.settings.key_secret))
            .json(&payload)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| AppError::Infrastructure(anyhow::anyhow!("Gateway request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Infrastructure(anyhow::anyhow!(
                "Gateway returned {}: {}",
                status,
                body
            )));
        }

        let order: GatewayOrder = response
            .json()
            .await
            .map_err(|e| AppError::Infrastructure(anyhow::anyhow!("Bad gateway response: {}", e)))?;

        let now = Utc::now();
        let payment = Payment {
            id: None,
            order_id: order.id.clone(),
            payment_id: None,
            signature: None,
            amount: order.amount,
            currency: order.currency.clone(),
            user_id: Some(user_id.to_string()),
            status: PaymentStatus::Created,
            created_at: now,
            updated_at: now,
        };
        self.payments().insert_one(&payment).await?;

        PAYMENT_ORDERS_TOTAL.with_label_values(&["created"]).inc();
        tracing::info!(order_id = %order.id, user_id, "Payment order created");

        Ok(CreateOrderResponse {
            order_id: order.id,
            amount: order.amount,
            currency: order.currency,
        })
    }

    /// Verify the gateway callback signature and settle the order either
    /// way; a bad signature marks the payment failed rather than leaving
    /// it dangling.
    pub async fn verify_payment(&self, req: VerifyPaymentRequest) -> Result<bool, AppError> {
        let authentic = verify_signature(
            &self.settings.key_secret,
            &req.order_id,
            &req.payment_id,
            &req.signature,
        );

        let status = if authentic {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Failed
        };
        let status_bson = mongodb::bson::to_bson(&status)
            .map_err(|e| AppError::Infrastructure(anyhow::Error::new(e)))?;

        let updated = self
            .payments()
            .find_one_and_update(
                doc! { "order_id": &req.order_id },
                doc! { "$set": {
                    "payment_id": &req.payment_id,
                    "signature": &req.signature,
                    "status": status_bson,
                    "updated_at": mongodb::bson::DateTime::now(),
                }},
            )
            .await?;

        if updated.is_none() {
            return Err(AppError::NotFound("Payment"));
        }

        let label = if authentic { "paid" } else { "failed" };
        PAYMENT_ORDERS_TOTAL.with_label_values(&[label]).inc();
        tracing::info!(order_id = %req.order_id, authentic, "Payment verification processed");

        Ok(authentic)
    }

    pub async fn get_status(&self, order_id: &str) -> Result<Payment, AppError> {
        self.payments()
            .find_one(doc! { "order_id": order_id })
            .await?
            .ok_or(AppError::NotFound("Payment"))
    }
}

/// Expected signature is hex(HMAC-SHA256(secret, "order_id|payment_id")).
pub fn verify_signature(secret: &str, order_id: &str, payment_id: &str, signature: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    expected == signature
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, order_id: &str, payment_id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_verifies() {
        let sig = sign("secret", "order_1", "pay_1");
        assert!(verify_signature("secret", "order_1", "pay_1", &sig));
    }

    #[test]
    fn tampered_fields_fail_verification() {
        let sig = sign("secret", "order_1", "pay_1");
        assert!(!verify_signature("secret", "order_2", "pay_1", &sig));
        assert!(!verify_signature("secret", "order_1", "pay_2", &sig));
        assert!(!verify_signature("other", "order_1", "pay_1", &sig));
    }
}
