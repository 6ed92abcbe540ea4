use super::{
    to_minor_units, CreatePaymentRequest, EventRef, GatewayError, GatewayEvent, PaymentGateway,
    RefundTarget, RemotePayment, RemoteRefund, RemoteStatus,
};
use crate::config::GatewayCredentials;
use crate::entities::GatewayKind;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::instrument;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// Card-network processor adapter.
///
/// Remote payment objects are payment intents; the client completes the
/// charge with the returned client secret and settlement lands through the
/// `payment_intent.*` / `charge.refunded` webhook events.
pub struct StripeGateway {
    client: reqwest::Client,
    credentials: GatewayCredentials,
    api_base: String,
}

impl StripeGateway {
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

    fn map_status(status: &str) -> RemoteStatus {
        match status {
            "succeeded" => RemoteStatus::Succeeded,
            "processing" => RemoteStatus::Processing,
            "canceled" => RemoteStatus::Cancelled,
            // requires_payment_method / requires_confirmation / requires_action
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

        let message = body["error"]["message"]
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
impl PaymentGateway for StripeGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Stripe
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_remote_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<RemotePayment, GatewayError> {
        let amount = to_minor_units(request.amount)?;
        let params = [
            ("amount", amount.to_string()),
            ("currency", request.currency.to_lowercase()),
            ("receipt_email", request.customer_email.clone()),
            ("metadata[order_id]", request.order_id.to_string()),
            ("metadata[order_number]", request.order_number.clone()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.credentials.key_secret)
            .form(&params)
            .send()
            .await?;

        let body = Self::read_json(response).await?;
        Ok(RemotePayment {
            external_id: Self::str_field(&body, "id")?,
            client_secret: body["client_secret"].as_str().map(str::to_string),
            status: Self::map_status(body["status"].as_str().unwrap_or_default()),
        })
    }

    #[instrument(skip(self))]
    async fn fetch_status(&self, external_id: &str) -> Result<RemoteStatus, GatewayError> {
        let response = self
            .client
            .get(format!(
                "{}/v1/payment_intents/{external_id}",
                self.api_base
            ))
            .bearer_auth(&self.credentials.key_secret)
            .send()
            .await?;

        let body = Self::read_json(response).await?;
        Ok(Self::map_status(
            body["status"].as_str().unwrap_or_default(),
        ))
    }

    /// Signature header format: `t=<unix>,v1=<hex hmac>`; the MAC covers
    /// `"{t}.{raw body}"`.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        let mut timestamp = "";
        let mut v1 = "";
        for part in signature.split(',') {
            match part.trim().split_once('=') {
                Some(("t", val)) => timestamp = val,
                Some(("v1", val)) => v1 = val,
                _ => {}
            }
        }
        if timestamp.is_empty() || v1.is_empty() {
            return false;
        }

        let Ok(expected) = hex::decode(v1) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.credentials.webhook_secret.as_bytes())
        else {
            return false;
        };
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }

    /// There is no synchronous callback proof in this flow; settlement is
    /// webhook-only.
    fn verify_callback_signature(&self, _order: &str, _payment: &str, _signature: &str) -> bool {
        false
    }

    fn parse_webhook(&self, payload: &[u8]) -> Result<GatewayEvent, GatewayError> {
        let body: Value = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let event_type = body["type"].as_str().unwrap_or_default().to_string();
        let object = &body["data"]["object"];

        let event = match event_type.as_str() {
            "payment_intent.succeeded" => {
                let intent_id = Self::str_field(object, "id")?;
                let charge_id = object["latest_charge"]
                    .as_str()
                    .unwrap_or(&intent_id)
                    .to_string();
                GatewayEvent::PaymentSucceeded {
                    reference: EventRef::Intent(intent_id),
                    external_payment_id: charge_id,
                    method: object["payment_method_types"][0]
                        .as_str()
                        .map(str::to_string),
                    card_brand: object["charges"]["data"][0]["payment_method_details"]["card"]
                        ["brand"]
                        .as_str()
                        .map(str::to_string),
                    card_last4: object["charges"]["data"][0]["payment_method_details"]["card"]
                        ["last4"]
                        .as_str()
                        .map(str::to_string),
                }
            }
            "payment_intent.payment_failed" => GatewayEvent::PaymentFailed {
                reference: EventRef::Intent(Self::str_field(object, "id")?),
                error: object["last_payment_error"]["message"]
                    .as_str()
                    .map(str::to_string),
            },
            "charge.refunded" => {
                // Prefer the intent reference when the charge carries one.
                match object["payment_intent"].as_str() {
                    Some(intent) => GatewayEvent::RefundCreated {
                        reference: EventRef::Intent(intent.to_string()),
                    },
                    None => GatewayEvent::RefundCreated {
                        reference: EventRef::Charge(Self::str_field(object, "id")?),
                    },
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
        let mut params = vec![("payment_intent", target.intent_id.to_string())];
        if let Some(amount) = amount {
            params.push(("amount", to_minor_units(amount)?.to_string()));
        }

        let response = self
            .client
            .post(format!("{}/v1/refunds", self.api_base))
            .bearer_auth(&self.credentials.key_secret)
            .form(&params)
            .send()
            .await?;

        let body = Self::read_json(response).await?;
        Ok(RemoteRefund {
            refund_id: Self::str_field(&body, "id")?,
            status: match body["status"].as_str() {
                Some("succeeded") => RemoteStatus::Refunded,
                Some("failed") => RemoteStatus::Failed,
                _ => RemoteStatus::Processing,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> StripeGateway {
        StripeGateway::new(
            GatewayCredentials {
                key_id: "pk_test".into(),
                key_secret: "sk_test".into(),
                webhook_secret: "whsec_test".into(),
                api_base: None,
            },
            10,
        )
    }

    fn sign(secret: &str, timestamp: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn webhook_signature_roundtrip() {
        let gw = gateway();
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let sig = sign("whsec_test", "1700000000", payload);
        let header = format!("t=1700000000,v1={sig}");

        assert!(gw.verify_webhook_signature(payload, &header));
        assert!(!gw.verify_webhook_signature(b"tampered", &header));
        assert!(!gw.verify_webhook_signature(payload, "t=1700000000,v1=deadbeef"));
        assert!(!gw.verify_webhook_signature(payload, "garbage"));
    }

    #[test]
    fn parse_succeeded_event() {
        let gw = gateway();
        let payload = serde_json::json!({
            "type": "payment_intent.succeeded",
            "data": {"object": {
                "id": "pi_123",
                "latest_charge": "ch_456",
                "payment_method_types": ["card"],
            }}
        });

        let event = gw.parse_webhook(payload.to_string().as_bytes()).unwrap();
        match event {
            GatewayEvent::PaymentSucceeded {
                reference,
                external_payment_id,
                method,
                ..
            } => {
                assert_eq!(reference, EventRef::Intent("pi_123".into()));
                assert_eq!(external_payment_id, "ch_456");
                assert_eq!(method.as_deref(), Some("card"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn parse_unrelated_event_is_ignored() {
        let gw = gateway();
        let payload = serde_json::json!({
            "type": "customer.created",
            "data": {"object": {"id": "cus_1"}}
        });

        let event = gw.parse_webhook(payload.to_string().as_bytes()).unwrap();
        assert!(matches!(event, GatewayEvent::Ignored { event_type } if event_type == "customer.created"));
    }

    #[test]
    fn refund_event_prefers_intent_reference() {
        let gw = gateway();
        let payload = serde_json::json!({
            "type": "charge.refunded",
            "data": {"object": {"id": "ch_456", "payment_intent": "pi_123"}}
        });

        let event = gw.parse_webhook(payload.to_string().as_bytes()).unwrap();
        assert!(
            matches!(event, GatewayEvent::RefundCreated { reference } if reference == EventRef::Intent("pi_123".into()))
        );
    }

    #[test]
    fn callback_proof_unsupported() {
        assert!(!gateway().verify_callback_signature("pi_1", "ch_1", "sig"));
    }
}
