use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use super::{quantities_by_type, OrderEngine};
use crate::error::{AppError, AppResult};
use crate::models::{OrderDetails, OrderStatus, TicketStatus};
use crate::store::{StoreTx, TxMode};

/// Moves a locked pending order to `to` (cancelled or failed) and gives its
/// seats and discount usage back. Shared by cancel, expiry and payment failure.
pub(crate) async fn release_reservation(
    tx: &mut dyn StoreTx,
    details: &mut OrderDetails,
    to: OrderStatus,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let order = &mut details.order;
    let releases = matches!(to, OrderStatus::Cancelled | OrderStatus::Failed);
    if !releases || !order.status.can_transition_to(to) {
        return Err(AppError::conflict(format!(
            "order is {}, cannot move to {}",
            order.status.as_str(),
            to.as_str()
        )));
    }

    order.status = to;
    order.expires_at = None;
    if to == OrderStatus::Cancelled {
        order.cancelled_at = Some(now);
    }

    for ticket in &mut details.tickets {
        if ticket.status.can_transition_to(TicketStatus::Cancelled) {
            ticket.status = TicketStatus::Cancelled;
        }
    }

    tx.save_order(&details.order).await?;
    tx.save_tickets(&details.tickets).await?;
    for (ticket_type_id, quantity) in quantities_by_type(&details.items) {
        tx.adjust_inventory(ticket_type_id, 0, -quantity).await?;
    }
    if let Some(code_id) = details.order.discount_code_id {
        tx.adjust_discount_usage(code_id, -1).await?;
    }
    Ok(())
}

impl OrderEngine {
    /// Buyer gives up a pending order. Allowed until the reaper has run,
    /// even once `expires_at` has passed.
    pub async fn cancel(&self, order_id: Uuid, user_id: Uuid) -> AppResult<OrderDetails> {
        let details = self
            .within_deadline("cancellation", async {
                let now = self.clock.now();
                let mut tx = self.store.begin(TxMode::ReadCommitted).await?;
                let mut details = tx
                    .lock_order(order_id)
                    .await?
                    .filter(|d| d.order.user_id == user_id)
                    .ok_or_else(|| AppError::not_found(format!("order {order_id} not found")))?;
                release_reservation(tx.as_mut(), &mut details, OrderStatus::Cancelled, now).await?;
                tx.commit().await?;
                Ok(details)
            })
            .await?;

        info!(
            order_id = %order_id,
            user_id = %user_id,
            released = details.total_quantity(),
            "Order cancelled by buyer"
        );
        Ok(details)
    }
}
