use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OrderEngine;
use crate::error::{AppError, AppResult};
use crate::models::{Availability, Order, OrderDetails};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAvailability {
    pub event_id: Uuid,
    pub ticket_types: Vec<Availability>,
}

impl OrderEngine {
    /// Order with its lines and tickets; other users' orders look missing.
    pub async fn owned_order(&self, order_id: Uuid, user_id: Uuid) -> AppResult<OrderDetails> {
        self.store
            .find_order(order_id)
            .await?
            .filter(|details| details.order.user_id == user_id)
            .ok_or_else(|| AppError::not_found(format!("order {order_id} not found")))
    }

    /// Newest first.
    pub async fn order_history(&self, user_id: Uuid) -> AppResult<Vec<Order>> {
        self.store.orders_for_user(user_id).await
    }

    pub async fn availability(&self, event_id: Uuid) -> AppResult<EventAvailability> {
        self.event(event_id).await?;
        let now = self.clock.now();
        let ticket_types = self
            .store
            .ticket_types_for_event(event_id)
            .await?
            .iter()
            .map(|tt| Availability::of(tt, now))
            .collect();
        Ok(EventAvailability { event_id, ticket_types })
    }
}
