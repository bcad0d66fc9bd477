//! Transactional persistence for orders, tickets and inventory counters.
//!
//! Every logical engine operation opens exactly one [`StoreTx`] and either
//! commits it or drops it. Dropping an uncommitted transaction rolls back
//! every write made through it.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{DiscountCode, Order, OrderDetails, OrderItem, Ticket, TicketType};

pub use memory::MemoryOrderStore;
pub use postgres::PgOrderStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Used on the reservation path.
    Serializable,
    /// Row locks only; used by confirm/cancel/expire/refund and ticket ops.
    ReadCommitted,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn begin(&self, mode: TxMode) -> AppResult<Box<dyn StoreTx>>;

    async fn find_order(&self, order_id: Uuid) -> AppResult<Option<OrderDetails>>;

    async fn orders_for_user(&self, user_id: Uuid) -> AppResult<Vec<Order>>;

    /// Ids of pending orders whose `expires_at` is before `now`, oldest first.
    async fn expired_pending_orders(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Uuid>>;

    async fn ticket_types_for_event(&self, event_id: Uuid) -> AppResult<Vec<TicketType>>;
}

#[async_trait]
pub trait StoreTx: Send {
    /// Locks every listed ticket type with one statement, in ascending id
    /// order. Unknown ids are simply absent from the result.
    async fn lock_ticket_types(&mut self, ids: &[Uuid]) -> AppResult<Vec<TicketType>>;

    /// Locks the discount code matching `(event_id, code)`; `code` is
    /// already normalized.
    async fn lock_discount_code(&mut self, event_id: Uuid, code: &str)
        -> AppResult<Option<DiscountCode>>;

    async fn insert_order(
        &mut self,
        order: &Order,
        items: &[OrderItem],
        tickets: &[Ticket],
    ) -> AppResult<()>;

    async fn lock_order(&mut self, order_id: Uuid) -> AppResult<Option<OrderDetails>>;

    async fn lock_ticket(&mut self, ticket_id: Uuid) -> AppResult<Option<Ticket>>;

    async fn lock_ticket_by_code(&mut self, qr_code: &str) -> AppResult<Option<Ticket>>;

    /// Persists status, timestamps and payment references of the order.
    async fn save_order(&mut self, order: &Order) -> AppResult<()>;

    async fn save_tickets(&mut self, tickets: &[Ticket]) -> AppResult<()>;

    /// Applies counter deltas to a ticket type. Fails with a Conflict
    /// instead of letting `sold + reserved` exceed capacity or either
    /// counter go negative.
    async fn adjust_inventory(
        &mut self,
        ticket_type_id: Uuid,
        sold_delta: i32,
        reserved_delta: i32,
    ) -> AppResult<()>;

    async fn adjust_discount_usage(&mut self, discount_code_id: Uuid, delta: i32) -> AppResult<()>;

    async fn adjust_event_attendees(&mut self, event_id: Uuid, delta: i32) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
