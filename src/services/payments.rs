use crate::{
    entities::{
        payment, Payment, PaymentModel, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{
        CreatePaymentRequest, EventRef, GatewayEvent, PaymentGateway, RefundTarget, RemoteStatus,
    },
    services::orders::OrderService,
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Input for creating a remote payment object.
#[derive(Debug, Deserialize)]
pub struct CreatePaymentInput {
    pub order_id: Uuid,
    /// Defaults to the order total
    pub amount: Option<Decimal>,
    /// Defaults to the order currency
    pub currency: Option<String>,
}

/// Result of creating a remote payment object.
#[derive(Debug, Serialize)]
pub struct CreatedPayment {
    pub payment_id: Uuid,
    pub external_id: String,
    pub client_secret: Option<String>,
    pub amount: Decimal,
    pub currency: String,
}

/// Synchronous confirmation proof posted by the client after paying.
#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentInput {
    pub external_order_id: String,
    pub external_payment_id: String,
    pub signature: String,
}

/// Result of confirming a payment.
#[derive(Debug, Serialize)]
pub struct ConfirmedPayment {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub status: PaymentStatus,
}

/// What a webhook delivery did. Duplicates and unknown references are
/// acknowledged outcomes, not errors, so the sender stops retrying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied { payment_id: Uuid },
    AlreadyApplied { payment_id: Uuid },
    UnknownReference,
    Ignored { event_type: String },
}

/// Details recorded when a success event is applied.
#[derive(Debug, Default)]
struct CaptureDetails {
    external_payment_id: Option<String>,
    method: Option<String>,
    card_brand: Option<String>,
    card_last4: Option<String>,
}

/// Payment settlement service.
///
/// Creates processor-side payment objects, records one local Payment row
/// per attempt, and reconciles asynchronous processor notifications
/// against those rows. Effects are at-most-once: both the Payment and the
/// Order transition are status-guarded conditional updates, so
/// at-least-once webhook delivery and the synchronous confirm path can
/// race or repeat without double-crediting.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
        }
    }

    /// Creates the processor-side payment object for an order and records
    /// the local Payment row before the external id is returned to any
    /// client, so a webhook can never legitimately arrive for an id whose
    /// row does not exist yet.
    ///
    /// A timed-out gateway call leaves no local state behind; the caller
    /// retries and a fresh remote object is created.
    #[instrument(skip(self, input), fields(order_id = %input.order_id))]
    pub async fn create_remote_payment(
        &self,
        input: CreatePaymentInput,
    ) -> Result<CreatedPayment, ServiceError> {
        let order = self.load_order(input.order_id).await?;

        let amount = input.amount.unwrap_or(order.total_amount);
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Payment amount must be positive".to_string(),
            ));
        }
        let currency = input.currency.unwrap_or_else(|| order.currency.clone());

        let remote = self
            .gateway
            .create_remote_payment(&CreatePaymentRequest {
                order_id: order.id,
                order_number: order.order_number.clone(),
                amount,
                currency: currency.clone(),
                customer_email: order.customer_email.clone(),
            })
            .await?;

        let now = Utc::now();
        let row = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            gateway: Set(self.gateway.kind()),
            gateway_intent_id: Set(remote.external_id.clone()),
            gateway_charge_id: Set(None),
            amount: Set(amount),
            currency: Set(currency.clone()),
            status: Set(PaymentStatus::Pending),
            payment_method: Set(None),
            card_brand: Set(None),
            card_last4: Set(None),
            error_message: Set(None),
            metadata: Set(Some(serde_json::json!({
                "order_number": order.order_number,
            }))),
            created_at: Set(now),
            updated_at: Set(now),
            succeeded_at: Set(None),
            failed_at: Set(None),
        };
        let row = row.insert(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::PaymentCreated(row.id))
            .await;

        info!(payment_id = %row.id, external_id = %remote.external_id, "remote payment created");
        Ok(CreatedPayment {
            payment_id: row.id,
            external_id: remote.external_id,
            client_secret: remote.client_secret,
            amount,
            currency,
        })
    }

    /// Synchronous confirm path: verifies the client's callback proof,
    /// fetches the authoritative status, and applies the same idempotent
    /// transitions the webhook path uses.
    #[instrument(skip(self, input), fields(external_order_id = %input.external_order_id))]
    pub async fn confirm_payment(
        &self,
        input: ConfirmPaymentInput,
    ) -> Result<ConfirmedPayment, ServiceError> {
        if !self.gateway.verify_callback_signature(
            &input.external_order_id,
            &input.external_payment_id,
            &input.signature,
        ) {
            return Err(ServiceError::InvalidSignature);
        }

        let payment = self
            .find_by_intent(&input.external_order_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Payment record not found for {}",
                    input.external_order_id
                ))
            })?;

        let remote_status = self.gateway.fetch_status(&input.external_order_id).await?;
        match remote_status {
            RemoteStatus::Succeeded => {
                self.apply_success(
                    &payment,
                    CaptureDetails {
                        external_payment_id: Some(input.external_payment_id),
                        ..CaptureDetails::default()
                    },
                )
                .await?;
            }
            RemoteStatus::Failed => {
                self.apply_failure(&payment, None).await?;
            }
            // Still settling remotely; a webhook will finish the job.
            _ => {}
        }

        let refreshed = self
            .find_by_intent(&input.external_order_id)
            .await?
            .ok_or_else(|| ServiceError::InternalError("payment row vanished".to_string()))?;

        Ok(ConfirmedPayment {
            payment_id: refreshed.id,
            order_id: refreshed.order_id,
            status: refreshed.status,
        })
    }

    /// Webhook reconciliation entry point.
    ///
    /// The signature is recomputed over the raw, unparsed body; a mismatch
    /// rejects the request with no state change. Events for unknown
    /// payments are logged and acknowledged: the row may not exist yet
    /// (create racing the webhook) or the event belongs to another system.
    #[instrument(skip(self, raw_payload, signature))]
    pub async fn handle_webhook(
        &self,
        raw_payload: &[u8],
        signature: &str,
    ) -> Result<WebhookOutcome, ServiceError> {
        if !self.gateway.verify_webhook_signature(raw_payload, signature) {
            counter!("storefront_webhooks.invalid_signature", 1);
            return Err(ServiceError::InvalidSignature);
        }

        let event = self.gateway.parse_webhook(raw_payload)?;

        let outcome = match event {
            GatewayEvent::PaymentSucceeded {
                reference,
                external_payment_id,
                method,
                card_brand,
                card_last4,
            } => {
                match self.find_by_reference(&reference).await? {
                    Some(payment) => {
                        self.apply_success(
                            &payment,
                            CaptureDetails {
                                external_payment_id: Some(external_payment_id),
                                method,
                                card_brand,
                                card_last4,
                            },
                        )
                        .await?
                    }
                    None => self.unknown_reference(&reference),
                }
            }
            GatewayEvent::PaymentFailed { reference, error } => {
                match self.find_by_reference(&reference).await? {
                    Some(payment) => self.apply_failure(&payment, error).await?,
                    None => self.unknown_reference(&reference),
                }
            }
            GatewayEvent::RefundCreated { reference } => {
                match self.find_by_reference(&reference).await? {
                    Some(payment) => self.apply_refund_transitions(&payment).await?,
                    None => self.unknown_reference(&reference),
                }
            }
            GatewayEvent::Ignored { event_type } => {
                info!(event_type, "webhook event outside this system's concern");
                WebhookOutcome::Ignored { event_type }
            }
        };

        Ok(outcome)
    }

    /// Initiates a refund for a succeeded payment.
    ///
    /// The remote call happens first; a gateway failure leaves local state
    /// untouched. On success the Payment and Order move to their refunded
    /// states in one transaction.
    #[instrument(skip(self))]
    pub async fn create_refund(
        &self,
        payment_id: Uuid,
        amount: Option<Decimal>,
    ) -> Result<PaymentModel, ServiceError> {
        let payment = Payment::find_by_id(payment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))?;

        if !payment.status.is_refundable() {
            return Err(ServiceError::NotRefundable {
                payment_id,
                status: payment.status.to_string(),
            });
        }

        self.gateway
            .refund(
                RefundTarget {
                    intent_id: &payment.gateway_intent_id,
                    charge_id: payment.gateway_charge_id.as_deref(),
                },
                amount,
            )
            .await?;

        self.apply_refund_transitions(&payment).await?;

        let refreshed = Payment::find_by_id(payment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::InternalError("payment row vanished".to_string()))?;
        Ok(refreshed)
    }

    /// Fetches a payment by its local id.
    pub async fn get_payment(&self, payment_id: Uuid) -> Result<PaymentModel, ServiceError> {
        Payment::find_by_id(payment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))
    }

    /// Lists an order's payment attempts, oldest first.
    pub async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<PaymentModel>, ServiceError> {
        use sea_orm::QueryOrder;
        Ok(Payment::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_asc(payment::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Applies a payment success at most once.
    ///
    /// The Payment row update is guarded on not-yet-settled status and the
    /// Order transition carries its own pending-only guard, so the second
    /// delivery of the same event changes nothing.
    async fn apply_success(
        &self,
        payment: &PaymentModel,
        details: CaptureDetails,
    ) -> Result<WebhookOutcome, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let mut update = Payment::update_many()
            .col_expr(
                payment::Column::Status,
                Expr::value(PaymentStatus::Succeeded.to_value()),
            )
            .col_expr(payment::Column::SucceededAt, Expr::value(now))
            .col_expr(payment::Column::UpdatedAt, Expr::value(now));

        if let Some(charge_id) = &details.external_payment_id {
            update = update.col_expr(
                payment::Column::GatewayChargeId,
                Expr::value(charge_id.clone()),
            );
        }
        if let Some(method) = &details.method {
            update = update.col_expr(payment::Column::PaymentMethod, Expr::value(method.clone()));
        }
        if let Some(brand) = &details.card_brand {
            update = update.col_expr(payment::Column::CardBrand, Expr::value(brand.clone()));
        }
        if let Some(last4) = &details.card_last4 {
            update = update.col_expr(payment::Column::CardLast4, Expr::value(last4.clone()));
        }

        let result = update
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.is_not_in([
                PaymentStatus::Succeeded,
                PaymentStatus::Refunded,
            ]))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            counter!("storefront_webhooks.duplicate_success", 1);
            info!(payment_id = %payment.id, "success already applied; no-op");
            txn.commit().await?;
            return Ok(WebhookOutcome::AlreadyApplied {
                payment_id: payment.id,
            });
        }

        let order_advanced =
            OrderService::apply_payment_success(&txn, payment.order_id, now).await?;
        txn.commit().await?;

        if !order_advanced {
            // Another attempt already paid this order; the payment row
            // still records this capture.
            warn!(order_id = %payment.order_id, payment_id = %payment.id,
                "payment captured for an order that is not pending");
        }

        self.event_sender
            .send_or_log(Event::PaymentCaptured(payment.id))
            .await;

        Ok(WebhookOutcome::Applied {
            payment_id: payment.id,
        })
    }

    /// Marks a payment failed; the order's lifecycle axis is untouched.
    async fn apply_failure(
        &self,
        payment: &PaymentModel,
        error: Option<String>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let mut update = Payment::update_many()
            .col_expr(
                payment::Column::Status,
                Expr::value(PaymentStatus::Failed.to_value()),
            )
            .col_expr(payment::Column::FailedAt, Expr::value(now))
            .col_expr(payment::Column::UpdatedAt, Expr::value(now));
        if let Some(error) = &error {
            update = update.col_expr(payment::Column::ErrorMessage, Expr::value(error.clone()));
        }

        let result = update
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.is_in([
                PaymentStatus::Pending,
                PaymentStatus::Processing,
            ]))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            txn.commit().await?;
            return Ok(WebhookOutcome::AlreadyApplied {
                payment_id: payment.id,
            });
        }

        OrderService::apply_payment_failure(&txn, payment.order_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentFailed(payment.id))
            .await;

        Ok(WebhookOutcome::Applied {
            payment_id: payment.id,
        })
    }

    /// Moves payment and order to their refunded states, at most once.
    async fn apply_refund_transitions(
        &self,
        payment: &PaymentModel,
    ) -> Result<WebhookOutcome, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let result = Payment::update_many()
            .col_expr(
                payment::Column::Status,
                Expr::value(PaymentStatus::Refunded.to_value()),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(now))
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.eq(PaymentStatus::Succeeded))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            counter!("storefront_webhooks.duplicate_refund", 1);
            txn.commit().await?;
            return Ok(WebhookOutcome::AlreadyApplied {
                payment_id: payment.id,
            });
        }

        OrderService::apply_refund(&txn, payment.order_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentRefunded(payment.id))
            .await;

        Ok(WebhookOutcome::Applied {
            payment_id: payment.id,
        })
    }

    fn unknown_reference(&self, reference: &EventRef) -> WebhookOutcome {
        // Not an error: the local row may not exist yet, or the event is
        // for a concern outside this system.
        info!(?reference, "webhook references no local payment; ignored");
        counter!("storefront_webhooks.unknown_reference", 1);
        WebhookOutcome::UnknownReference
    }

    async fn find_by_intent(&self, intent_id: &str) -> Result<Option<PaymentModel>, ServiceError> {
        Ok(Payment::find()
            .filter(payment::Column::GatewayIntentId.eq(intent_id))
            .one(&*self.db)
            .await?)
    }

    async fn find_by_reference(
        &self,
        reference: &EventRef,
    ) -> Result<Option<PaymentModel>, ServiceError> {
        match reference {
            EventRef::Intent(intent_id) => self.find_by_intent(intent_id).await,
            EventRef::Charge(charge_id) => Ok(Payment::find()
                .filter(payment::Column::GatewayChargeId.eq(charge_id.clone()))
                .one(&*self.db)
                .await?),
        }
    }

    async fn load_order(
        &self,
        order_id: Uuid,
    ) -> Result<crate::entities::OrderModel, ServiceError> {
        crate::entities::Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_outcome_serializes_with_tag() {
        let outcome = WebhookOutcome::Ignored {
            event_type: "customer.created".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "ignored");
        assert_eq!(json["event_type"], "customer.created");

        let outcome = WebhookOutcome::UnknownReference;
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "unknown_reference");
    }
}
