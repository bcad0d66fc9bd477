use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TicketStatus {
    Reserved,
    Confirmed,
    Cancelled,
    Refunded,
}

impl TicketStatus {
    pub fn can_transition_to(self, next: TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (self, next),
            (Reserved, Confirmed) | (Reserved, Cancelled) | (Confirmed, Refunded)
        )
    }

    /// Reserved and confirmed seats count against capacity.
    pub fn holds_capacity(self) -> bool {
        matches!(self, TicketStatus::Reserved | TicketStatus::Confirmed)
    }
}

/// One physical seat: the unit of inventory, check-in, transfer and refund.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_item_id: Uuid,
    pub event_id: Uuid,
    pub ticket_type_id: Uuid,
    /// Current holder.
    pub user_id: Uuid,
    pub status: TicketStatus,
    pub qr_code: Option<String>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub transferred_at: Option<DateTime<Utc>>,
    pub original_owner_id: Option<Uuid>,
    pub refund_reason: Option<String>,
}

impl Ticket {
    pub fn reserved(
        order_id: Uuid,
        order_item_id: Uuid,
        event_id: Uuid,
        ticket_type_id: Uuid,
        user_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            order_item_id,
            event_id,
            ticket_type_id,
            user_id,
            status: TicketStatus::Reserved,
            qr_code: None,
            checked_in_at: None,
            transferred_at: None,
            original_owner_id: None,
            refund_reason: None,
        }
    }

    pub fn is_transferable(&self) -> bool {
        self.status == TicketStatus::Confirmed && self.checked_in_at.is_none()
    }
}
