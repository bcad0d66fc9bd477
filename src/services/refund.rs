use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::{quantities_by_type, OrderEngine};
use crate::error::{AppError, AppResult};
use crate::models::{OrderDetails, OrderStatus, TicketStatus};
use crate::store::TxMode;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    #[validate(length(min = 1, max = 500, message = "reason must be 1-500 characters"))]
    pub reason: String,
}

impl OrderEngine {
    /// Organizer reverses a confirmed order.
    ///
    /// When the order was paid through a provider, the gateway refund runs
    /// while the order row is locked and must succeed before any local state
    /// changes. Concurrent refunds of one order therefore reach the gateway
    /// once; the loser sees a refunded order and gets a Conflict.
    pub async fn refund(
        &self,
        order_id: Uuid,
        organizer_id: Uuid,
        request: RefundRequest,
    ) -> AppResult<OrderDetails> {
        request
            .validate()
            .map_err(|e| AppError::bad_request(e.to_string()))?;

        let current = self
            .store
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("order {order_id} not found")))?;
        let event = self.event(current.order.event_id).await?;
        if event.organizer_id != organizer_id {
            return Err(AppError::forbidden("only the event organizer can refund orders"));
        }
        if current.order.status != OrderStatus::Confirmed {
            return Err(AppError::conflict(format!(
                "order is {}, only confirmed orders can be refunded",
                current.order.status.as_str()
            )));
        }

        let reason = request.reason;
        let details = self
            .within_deadline("refund", async {
                let now = self.clock.now();
                let mut tx = self.store.begin(TxMode::ReadCommitted).await?;
                let mut details = tx
                    .lock_order(order_id)
                    .await?
                    .ok_or_else(|| AppError::not_found(format!("order {order_id} not found")))?;
                if !details.order.status.can_transition_to(OrderStatus::Refunded) {
                    return Err(AppError::conflict(format!(
                        "order is {}, only confirmed orders can be refunded",
                        details.order.status.as_str()
                    )));
                }

                if let Some(payment_id) = details.order.payment_provider_id.as_deref() {
                    if !self.payments.refund_payment(payment_id, None).await? {
                        warn!(order_id = %order_id, payment_id, "Gateway refused the refund");
                        return Err(AppError::PaymentGateway(
                            "refund was declined by the payment provider".into(),
                        ));
                    }
                }

                details.order.status = OrderStatus::Refunded;
                details.order.refunded_at = Some(now);
                for ticket in &mut details.tickets {
                    if ticket.status.can_transition_to(TicketStatus::Refunded) {
                        ticket.status = TicketStatus::Refunded;
                        ticket.refund_reason = Some(reason.clone());
                    }
                }

                tx.save_order(&details.order).await?;
                tx.save_tickets(&details.tickets).await?;
                for (ticket_type_id, quantity) in quantities_by_type(&details.items) {
                    tx.adjust_inventory(ticket_type_id, -quantity, 0).await?;
                }
                tx.adjust_event_attendees(details.order.event_id, -details.total_quantity())
                    .await?;
                tx.commit().await?;
                Ok(details)
            })
            .await?;

        info!(
            order_id = %order_id,
            organizer_id = %organizer_id,
            tickets = details.tickets.len(),
            "💸 Order refunded"
        );
        Ok(details)
    }
}
