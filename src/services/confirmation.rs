use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::cancellation::release_reservation;
use super::payment::{PaymentIntent, PaymentIntentRequest, Settlement};
use super::{quantities_by_type, OrderEngine};
use crate::error::{AppError, AppResult};
use crate::models::{OrderDetails, OrderStatus, TicketStatus};
use crate::store::TxMode;

/// A payment the gateway has already confirmed as captured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
    pub payment_method: String,
    pub payment_provider_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    pub succeeded: bool,
    pub order: OrderDetails,
}

impl OrderEngine {
    /// Opens a payment intent for a pending order of `user_id`.
    pub async fn start_payment(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        user_email: Option<String>,
    ) -> AppResult<PaymentIntent> {
        let details = self.owned_order(order_id, user_id).await?;
        let order = &details.order;
        if order.status != OrderStatus::Pending {
            return Err(AppError::conflict(format!("order is {}", order.status.as_str())));
        }
        if order.is_expired_at(self.clock.now()) {
            return Err(AppError::conflict("reservation has expired"));
        }

        let intent = self
            .payments
            .create_intent(&PaymentIntentRequest {
                order_id,
                order_number: order.order_number.clone(),
                amount: order.amount,
                currency: order.currency.clone(),
                user_id,
                user_email,
            })
            .await?;

        self.within_deadline("payment start", async {
            let mut tx = self.store.begin(TxMode::ReadCommitted).await?;
            let mut locked = tx
                .lock_order(order_id)
                .await?
                .ok_or_else(|| AppError::not_found(format!("order {order_id} not found")))?;
            if locked.order.status != OrderStatus::Pending {
                return Err(AppError::conflict(format!(
                    "order is {}",
                    locked.order.status.as_str()
                )));
            }
            locked.order.payment_intent_id = Some(intent.intent_id.clone());
            tx.save_order(&locked.order).await?;
            tx.commit().await
        })
        .await?;

        info!(order_id = %order_id, intent_id = %intent.intent_id, "Payment intent created");
        Ok(intent)
    }

    /// Asks the gateway whether the intent was paid. A capture confirms the
    /// order and a terminal decline fails it. While the gateway is still
    /// processing the order stays pending and the caller gets a retryable
    /// Conflict. A wrong client secret is a BadRequest and mutates nothing.
    pub async fn complete_payment(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        client_secret: &str,
    ) -> AppResult<PaymentOutcome> {
        let details = self.owned_order(order_id, user_id).await?;
        let order = &details.order;
        if order.status != OrderStatus::Pending {
            return Err(AppError::conflict(format!("order is {}", order.status.as_str())));
        }
        if order.is_expired_at(self.clock.now()) {
            return Err(AppError::conflict("reservation has expired"));
        }
        let intent_id = order
            .payment_intent_id
            .clone()
            .ok_or_else(|| AppError::bad_request("payment has not been started for this order"))?;

        let settlement = self.payments.confirm_payment(&intent_id, client_secret).await?;
        match settlement {
            Settlement::Captured => {
                let confirmation = PaymentConfirmation {
                    payment_method: self.payments.provider().to_string(),
                    payment_provider_id: intent_id,
                };
                let order = self.confirm(order_id, confirmation).await?;
                Ok(PaymentOutcome { succeeded: true, order })
            }
            Settlement::Declined => {
                warn!(order_id = %order_id, intent_id = %intent_id, "Payment declined");
                let order = self.fail_payment(order_id).await?;
                Ok(PaymentOutcome { succeeded: false, order })
            }
            Settlement::Unsettled => {
                info!(order_id = %order_id, intent_id = %intent_id, "Payment not settled yet");
                Err(AppError::retryable("payment is still being processed, please retry"))
            }
        }
    }

    /// Turns a pending order into a confirmed purchase.
    ///
    /// A second call for the same order fails with Conflict and changes
    /// nothing, so callers may retry after a transient error.
    pub async fn confirm(
        &self,
        order_id: Uuid,
        payment: PaymentConfirmation,
    ) -> AppResult<OrderDetails> {
        let details = self
            .within_deadline("confirmation", async {
                let now = self.clock.now();
                let mut tx = self.store.begin(TxMode::ReadCommitted).await?;
                let mut details = tx
                    .lock_order(order_id)
                    .await?
                    .ok_or_else(|| AppError::not_found(format!("order {order_id} not found")))?;

                if details.order.status != OrderStatus::Pending {
                    return Err(AppError::conflict(format!(
                        "order is already {}",
                        details.order.status.as_str()
                    )));
                }
                if details.order.is_expired_at(now) {
                    return Err(AppError::conflict("reservation has expired"));
                }

                let order = &mut details.order;
                order.status = OrderStatus::Confirmed;
                order.confirmed_at = Some(now);
                order.expires_at = None;
                order.payment_method = Some(payment.payment_method.clone());
                order.payment_provider_id = Some(payment.payment_provider_id.clone());

                for ticket in &mut details.tickets {
                    if !ticket.status.can_transition_to(TicketStatus::Confirmed) {
                        return Err(AppError::conflict(format!(
                            "ticket {} cannot be confirmed",
                            ticket.id
                        )));
                    }
                    ticket.status = TicketStatus::Confirmed;
                    ticket.qr_code = Some(self.qr.generate(ticket.id));
                }

                tx.save_order(&details.order).await?;
                tx.save_tickets(&details.tickets).await?;
                for (ticket_type_id, quantity) in quantities_by_type(&details.items) {
                    tx.adjust_inventory(ticket_type_id, quantity, -quantity).await?;
                }
                tx.adjust_event_attendees(details.order.event_id, details.total_quantity())
                    .await?;
                tx.commit().await?;
                Ok(details)
            })
            .await?;

        info!(
            order_id = %order_id,
            order_number = %details.order.order_number,
            tickets = details.tickets.len(),
            "Order confirmed"
        );
        self.enroll_in_chat(details.order.user_id, details.order.event_id);
        Ok(details)
    }

    /// pending -> failed after the gateway declined; seats go back on sale.
    pub async fn fail_payment(&self, order_id: Uuid) -> AppResult<OrderDetails> {
        let details = self
            .within_deadline("payment failure", async {
                let now = self.clock.now();
                let mut tx = self.store.begin(TxMode::ReadCommitted).await?;
                let mut details = tx
                    .lock_order(order_id)
                    .await?
                    .ok_or_else(|| AppError::not_found(format!("order {order_id} not found")))?;
                release_reservation(tx.as_mut(), &mut details, OrderStatus::Failed, now).await?;
                tx.commit().await?;
                Ok(details)
            })
            .await?;

        info!(order_id = %order_id, "Order marked as failed, reservation released");
        Ok(details)
    }

    /// Detached: never delays or undoes the purchase.
    fn enroll_in_chat(&self, user_id: Uuid, event_id: Uuid) {
        let events = self.events.clone();
        let chat = self.chat.clone();
        tokio::spawn(async move {
            let event = match events.find_event(event_id).await {
                Ok(Some(event)) => event,
                Ok(None) => return,
                Err(e) => {
                    warn!(event_id = %event_id, error = %e, "Could not load event for chat enrollment");
                    return;
                }
            };
            if !event.settings.enrolls_buyers_in_chat() {
                return;
            }
            match chat.add_participant_to_event_chat(user_id, event_id).await {
                Ok(()) => info!(user_id = %user_id, event_id = %event_id, "💬 Buyer joined event chat"),
                Err(e) => warn!(user_id = %user_id, event_id = %event_id, error = %e, "Chat enrollment failed"),
            }
        });
    }
}
