use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{OrderStore, StoreTx, TxMode};
use crate::error::{AppError, AppResult};
use crate::models::{DiscountCode, Order, OrderDetails, OrderItem, Ticket, TicketType};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    ticket_types: BTreeMap<Uuid, TicketType>,
    discount_codes: HashMap<Uuid, DiscountCode>,
    orders: HashMap<Uuid, Order>,
    items: BTreeMap<Uuid, OrderItem>,
    tickets: BTreeMap<Uuid, Ticket>,
    attendees: HashMap<Uuid, i32>,
}

impl MemoryState {
    fn details(&self, order_id: Uuid) -> Option<OrderDetails> {
        let order = self.orders.get(&order_id)?.clone();
        let mut items: Vec<OrderItem> =
            self.items.values().filter(|i| i.order_id == order_id).cloned().collect();
        items.sort_by_key(|i| (i.ticket_type_id, i.id));
        let tickets = self.tickets.values().filter(|t| t.order_id == order_id).cloned().collect();
        Some(OrderDetails { order, items, tickets })
    }
}

/// Single-process store with the same all-or-nothing semantics as the
/// Postgres one: a transaction owns the whole state, works on a copy and
/// publishes it on commit.
#[derive(Clone)]
pub struct MemoryOrderStore {
    state: Arc<Mutex<MemoryState>>,
    lock_timeout: Duration,
}

impl Default for MemoryOrderStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl MemoryOrderStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self { state: Arc::new(Mutex::new(MemoryState::default())), lock_timeout }
    }

    pub async fn insert_ticket_type(&self, ticket_type: TicketType) {
        self.state.lock().await.ticket_types.insert(ticket_type.id, ticket_type);
    }

    pub async fn insert_discount_code(&self, code: DiscountCode) {
        self.state.lock().await.discount_codes.insert(code.id, code);
    }

    pub async fn ticket_type(&self, id: Uuid) -> Option<TicketType> {
        self.state.lock().await.ticket_types.get(&id).cloned()
    }

    pub async fn discount_code(&self, id: Uuid) -> Option<DiscountCode> {
        self.state.lock().await.discount_codes.get(&id).cloned()
    }

    pub async fn event_attendees(&self, event_id: Uuid) -> i32 {
        self.state.lock().await.attendees.get(&event_id).copied().unwrap_or(0)
    }

    pub async fn tickets_of_type(&self, ticket_type_id: Uuid) -> Vec<Ticket> {
        self.state
            .lock()
            .await
            .tickets
            .values()
            .filter(|t| t.ticket_type_id == ticket_type_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn begin(&self, _mode: TxMode) -> AppResult<Box<dyn StoreTx>> {
        let guard = tokio::time::timeout(self.lock_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| AppError::retryable("inventory is busy, please retry"))?;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn find_order(&self, order_id: Uuid) -> AppResult<Option<OrderDetails>> {
        Ok(self.state.lock().await.details(order_id))
    }

    async fn orders_for_user(&self, user_id: Uuid) -> AppResult<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> =
            state.orders.values().filter(|o| o.user_id == user_id).cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn expired_pending_orders(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        let mut expired: Vec<(DateTime<Utc>, Uuid)> = state
            .orders
            .values()
            .filter(|o| o.status == crate::models::OrderStatus::Pending)
            .filter_map(|o| o.expires_at.filter(|at| *at < now).map(|at| (at, o.id)))
            .collect();
        expired.sort();
        Ok(expired.into_iter().take(limit.max(0) as usize).map(|(_, id)| id).collect())
    }

    async fn ticket_types_for_event(&self, event_id: Uuid) -> AppResult<Vec<TicketType>> {
        let state = self.state.lock().await;
        let mut types: Vec<TicketType> =
            state.ticket_types.values().filter(|t| t.event_id == event_id).cloned().collect();
        types.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.name.cmp(&b.name)));
        Ok(types)
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_ticket_types(&mut self, ids: &[Uuid]) -> AppResult<Vec<TicketType>> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        Ok(ids.iter().filter_map(|id| self.working.ticket_types.get(id).cloned()).collect())
    }

    async fn lock_discount_code(
        &mut self,
        event_id: Uuid,
        code: &str,
    ) -> AppResult<Option<DiscountCode>> {
        Ok(self
            .working
            .discount_codes
            .values()
            .find(|d| d.event_id == event_id && d.code.to_uppercase() == code)
            .cloned())
    }

    async fn insert_order(
        &mut self,
        order: &Order,
        items: &[OrderItem],
        tickets: &[Ticket],
    ) -> AppResult<()> {
        if self.working.orders.values().any(|o| o.order_number == order.order_number) {
            return Err(AppError::retryable("order number collision, please retry"));
        }
        self.working.orders.insert(order.id, order.clone());
        for item in items {
            self.working.items.insert(item.id, item.clone());
        }
        for ticket in tickets {
            self.working.tickets.insert(ticket.id, ticket.clone());
        }
        Ok(())
    }

    async fn lock_order(&mut self, order_id: Uuid) -> AppResult<Option<OrderDetails>> {
        Ok(self.working.details(order_id))
    }

    async fn lock_ticket(&mut self, ticket_id: Uuid) -> AppResult<Option<Ticket>> {
        Ok(self.working.tickets.get(&ticket_id).cloned())
    }

    async fn lock_ticket_by_code(&mut self, qr_code: &str) -> AppResult<Option<Ticket>> {
        Ok(self
            .working
            .tickets
            .values()
            .find(|t| t.qr_code.as_deref() == Some(qr_code))
            .cloned())
    }

    async fn save_order(&mut self, order: &Order) -> AppResult<()> {
        match self.working.orders.get_mut(&order.id) {
            Some(existing) => {
                *existing = order.clone();
                Ok(())
            }
            None => Err(AppError::not_found(format!("order {}", order.id))),
        }
    }

    async fn save_tickets(&mut self, tickets: &[Ticket]) -> AppResult<()> {
        for ticket in tickets {
            self.working.tickets.insert(ticket.id, ticket.clone());
        }
        Ok(())
    }

    async fn adjust_inventory(
        &mut self,
        ticket_type_id: Uuid,
        sold_delta: i32,
        reserved_delta: i32,
    ) -> AppResult<()> {
        let ticket_type = self
            .working
            .ticket_types
            .get_mut(&ticket_type_id)
            .ok_or_else(|| AppError::not_found(format!("ticket type {ticket_type_id}")))?;

        let sold = ticket_type.sold_count + sold_delta;
        let reserved = ticket_type.reserved_count + reserved_delta;
        if sold < 0 || reserved < 0 || sold + reserved > ticket_type.capacity {
            return Err(AppError::conflict(format!(
                "inventory of ticket type {ticket_type_id} cannot absorb this change"
            )));
        }
        ticket_type.sold_count = sold;
        ticket_type.reserved_count = reserved;
        Ok(())
    }

    async fn adjust_discount_usage(&mut self, discount_code_id: Uuid, delta: i32) -> AppResult<()> {
        if let Some(code) = self.working.discount_codes.get_mut(&discount_code_id) {
            code.used_count = (code.used_count + delta).max(0);
        }
        Ok(())
    }

    async fn adjust_event_attendees(&mut self, event_id: Uuid, delta: i32) -> AppResult<()> {
        let attendees = self.working.attendees.entry(event_id).or_insert(0);
        *attendees = (*attendees + delta).max(0);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
