pub mod razorpay;
pub mod stripe;

use crate::config::{PaymentConfig, PaymentProvider};
use crate::entities::GatewayKind;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub use razorpay::RazorpayGateway;
pub use stripe::StripeGateway;

/// Errors surfaced by a payment processor adapter.
///
/// A remote failure never mutates local Payment/Order state; in particular
/// a timeout leaves the local row `pending` until a webhook or an explicit
/// status fetch settles it.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway rejected the request: {message}")]
    Api { code: Option<String>, message: String },

    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),

    #[error("gateway is not configured: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// Request to create the processor-side payment object for an order.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePaymentRequest {
    pub order_id: Uuid,
    pub order_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub customer_email: String,
}

/// Processor-side payment object returned by `create_remote_payment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePayment {
    /// The processor's identifier, stored locally as the idempotency key
    pub external_id: String,
    /// Client-side handle (Stripe client secret, Razorpay key id)
    pub client_secret: Option<String>,
    pub status: RemoteStatus,
}

/// Normalized processor payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Created,
    Processing,
    Succeeded,
    Failed,
    Refunded,
    Cancelled,
}

/// Result of a refund call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRefund {
    pub refund_id: String,
    pub status: RemoteStatus,
}

/// How a webhook event references the local payment row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRef {
    /// By the remote payment-object id (our `gateway_intent_id`)
    Intent(String),
    /// By the remote charge/payment id (our `gateway_charge_id`)
    Charge(String),
}

/// Normalized webhook event, shared by both processors so the reconciler
/// is processor-agnostic.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    PaymentSucceeded {
        reference: EventRef,
        external_payment_id: String,
        method: Option<String>,
        card_brand: Option<String>,
        card_last4: Option<String>,
    },
    PaymentFailed {
        reference: EventRef,
        error: Option<String>,
    },
    RefundCreated {
        reference: EventRef,
    },
    /// Event types outside this system's concern
    Ignored {
        event_type: String,
    },
}

/// Identifiers handed to `refund`; each processor picks the one it needs.
#[derive(Debug, Clone, Copy)]
pub struct RefundTarget<'a> {
    pub intent_id: &'a str,
    pub charge_id: Option<&'a str>,
}

/// Capability set every payment processor adapter must provide.
///
/// Both concrete adapters satisfy the identical contract and error
/// taxonomy so checkout, order, and reconciliation code never branch on
/// the processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    /// Creates the processor-side payment object for an order.
    async fn create_remote_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<RemotePayment, GatewayError>;

    /// Fetches the authoritative status of a remote payment object.
    async fn fetch_status(&self, external_id: &str) -> Result<RemoteStatus, GatewayError>;

    /// Verifies an inbound webhook signature over the raw body.
    /// Implementations must compare in constant time.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;

    /// Verifies a synchronous client callback proof
    /// (processor-specific; Stripe deployments settle via webhook only).
    fn verify_callback_signature(
        &self,
        external_order_id: &str,
        external_payment_id: &str,
        signature: &str,
    ) -> bool;

    /// Parses a verified webhook body into a normalized event.
    fn parse_webhook(&self, payload: &[u8]) -> Result<GatewayEvent, GatewayError>;

    /// Issues a refund; `None` amount refunds the full charge.
    async fn refund(
        &self,
        target: RefundTarget<'_>,
        amount: Option<Decimal>,
    ) -> Result<RemoteRefund, GatewayError>;
}

/// Builds the adapter selected by configuration.
pub fn from_config(cfg: &PaymentConfig) -> Arc<dyn PaymentGateway> {
    match cfg.provider {
        PaymentProvider::Stripe => Arc::new(StripeGateway::new(
            cfg.stripe.clone(),
            cfg.request_timeout_secs,
        )),
        PaymentProvider::Razorpay => Arc::new(RazorpayGateway::new(
            cfg.razorpay.clone(),
            cfg.request_timeout_secs,
        )),
    }
}

/// Converts a decimal major-unit amount into the minor units processors
/// expect (e.g. 12.34 -> 1234). Amounts carry at most two fraction digits.
pub(crate) fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| GatewayError::InvalidResponse(format!("amount out of range: {amount}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_units_conversion() {
        assert_eq!(to_minor_units(dec!(12.34)).unwrap(), 1234);
        assert_eq!(to_minor_units(dec!(0.01)).unwrap(), 1);
        assert_eq!(to_minor_units(dec!(50)).unwrap(), 5000);
    }
}
