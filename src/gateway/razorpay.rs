use super::{
    to_minor_units, CreatePaymentRequest, EventRef, GatewayError, GatewayEvent, PaymentGateway,
    RefundTarget, RemotePayment, RemoteRefund, RemoteStatus,
};
use crate::config::GatewayCredentials;
use crate::entities::GatewayKind;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;
use tracing::instrument;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_API_BASE: &str = "https://api.razorpay.com";

/// Regional processor adapter.
///
/// Remote payment objects are processor orders; the client pays against
/// the order id and posts back an `order_id|payment_id` proof signed with
/// the key secret, while webhooks settle asynchronously.
pub struct RazorpayGateway {
    client: reqwest::Client,
    credentials: GatewayCredentials,
    api_base: String,
}

impl RazorpayGateway {
    pub fn new(credentials: GatewayCredentials, timeout_secs: u64) -> Self {
        let api_base = credentials
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            credentials,
            api_base,
        }
    }

    fn map_order_status(status: &str) -> RemoteStatus {
        match status {
            "paid" => RemoteStatus::Succeeded,
            "attempted" => RemoteStatus::Processing,
            _ => RemoteStatus::Created,
        }
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, GatewayError> {
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        if status.is_success() {
            return Ok(body);
        }

        let message = body["error"]["description"]
            .as_str()
            .unwrap_or("unknown error")
            .to_string();
        let code = body["error"]["code"].as_str().map(str::to_string);
        Err(GatewayError::Api { code, message })
    }

    fn str_field(value: &Value, field: &str) -> Result<String, GatewayError> {
        value[field]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::InvalidResponse(format!("missing field '{field}'")))
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Razorpay
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_remote_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<RemotePayment, GatewayError> {
        let body = json!({
            "amount": to_minor_units(request.amount)?,
            "currency": request.currency.to_uppercase(),
            "receipt": request.order_number,
            "notes": {
                "order_id": request.order_id.to_string(),
                "customer_email": request.customer_email,
            },
        });

        let response = self
            .client
            .post(format!("{}/v1/orders", self.api_base))
            .basic_auth(&self.credentials.key_id, Some(&self.credentials.key_secret))
            .json(&body)
            .send()
            .await?;

        let body = Self::read_json(response).await?;
        Ok(RemotePayment {
            external_id: Self::str_field(&body, "id")?,
            // The key id is the public client-side handle for this processor.
            client_secret: Some(self.credentials.key_id.clone()),
            status: Self::map_order_status(body["status"].as_str().unwrap_or_default()),
        })
    }

    #[instrument(skip(self))]
    async fn fetch_status(&self, external_id: &str) -> Result<RemoteStatus, GatewayError> {
        let response = self
            .client
            .get(format!("{}/v1/orders/{external_id}", self.api_base))
            .basic_auth(&self.credentials.key_id, Some(&self.credentials.key_secret))
            .send()
            .await?;

        let body = Self::read_json(response).await?;
        Ok(Self::map_order_status(
            body["status"].as_str().unwrap_or_default(),
        ))
    }

    /// The webhook MAC covers the raw body with the webhook secret.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.credentials.webhook_secret.as_bytes())
        else {
            return false;
        };
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }

    /// Client callback proof: HMAC over `"{order_id}|{payment_id}"` with
    /// the key secret.
    fn verify_callback_signature(
        &self,
        external_order_id: &str,
        external_payment_id: &str,
        signature: &str,
    ) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.credentials.key_secret.as_bytes())
        else {
            return false;
        };
        mac.update(external_order_id.as_bytes());
        mac.update(b"|");
        mac.update(external_payment_id.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    fn parse_webhook(&self, payload: &[u8]) -> Result<GatewayEvent, GatewayError> {
        let body: Value = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let event_type = body["event"].as_str().unwrap_or_default().to_string();

        let event = match event_type.as_str() {
            "payment.captured" => {
                let entity = &body["payload"]["payment"]["entity"];
                GatewayEvent::PaymentSucceeded {
                    reference: EventRef::Intent(Self::str_field(entity, "order_id")?),
                    external_payment_id: Self::str_field(entity, "id")?,
                    method: entity["method"].as_str().map(str::to_string),
                    card_brand: entity["card"]["network"].as_str().map(str::to_string),
                    card_last4: entity["card"]["last4"].as_str().map(str::to_string),
                }
            }
            "payment.failed" => {
                let entity = &body["payload"]["payment"]["entity"];
                GatewayEvent::PaymentFailed {
                    reference: EventRef::Intent(Self::str_field(entity, "order_id")?),
                    error: entity["error_description"].as_str().map(str::to_string),
                }
            }
            "refund.created" => {
                let entity = &body["payload"]["refund"]["entity"];
                GatewayEvent::RefundCreated {
                    reference: EventRef::Charge(Self::str_field(entity, "payment_id")?),
                }
            }
            _ => GatewayEvent::Ignored { event_type },
        };

        Ok(event)
    }

    #[instrument(skip(self, target))]
    async fn refund(
        &self,
        target: RefundTarget<'_>,
        amount: Option<Decimal>,
    ) -> Result<RemoteRefund, GatewayError> {
        let payment_id = target.charge_id.ok_or_else(|| GatewayError::Api {
            code: None,
            message: "payment has not been captured".to_string(),
        })?;

        let mut body = json!({});
        if let Some(amount) = amount {
            body["amount"] = json!(to_minor_units(amount)?);
        }

        let response = self
            .client
            .post(format!(
                "{}/v1/payments/{payment_id}/refund",
                self.api_base
            ))
            .basic_auth(&self.credentials.key_id, Some(&self.credentials.key_secret))
            .json(&body)
            .send()
            .await?;

        let body = Self::read_json(response).await?;
        Ok(RemoteRefund {
            refund_id: Self::str_field(&body, "id")?,
            status: match body["status"].as_str() {
                Some("processed") => RemoteStatus::Refunded,
                Some("failed") => RemoteStatus::Failed,
                _ => RemoteStatus::Processing,
            },
        })
    }
}
