use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::time::Duration;
use uuid::Uuid;

use super::{OrderStore, StoreTx, TxMode};
use crate::error::{AppError, AppResult};
use crate::models::{DiscountCode, Order, OrderDetails, OrderItem, Ticket, TicketType};

const ORDER_COLUMNS: &str = "id, user_id, event_id, order_number, status, subtotal, \
    discount_amount, service_fee, amount, currency, discount_code_id, expires_at, \
    payment_intent_id, payment_method, payment_provider_id, created_at, confirmed_at, \
    cancelled_at, refunded_at";

const ITEM_COLUMNS: &str = "id, order_id, ticket_type_id, quantity, unit_price, total_price";

const TICKET_COLUMNS: &str = "id, order_id, order_item_id, event_id, ticket_type_id, user_id, \
    status, qr_code, checked_in_at, transferred_at, original_owner_id, refund_reason";

const TICKET_TYPE_COLUMNS: &str = "id, event_id, name, price, capacity, sold_count, \
    reserved_count, min_per_order, max_per_order, sale_start_date, sale_end_date, is_active";

const DISCOUNT_COLUMNS: &str = "id, event_id, code, discount_type, value, max_uses, used_count, \
    min_purchase_amount, max_discount_amount, expires_at, is_active";

/// Postgres-backed store. Contention on ticket type rows is resolved by
/// `SELECT ... FOR UPDATE`; waits are bounded by `lock_timeout`.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgOrderStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    async fn load_details(
        conn: &mut sqlx::PgConnection,
        order: Order,
        lock_tickets: bool,
    ) -> AppResult<OrderDetails> {
        let items = sqlx::query_as::<_, OrderItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY ticket_type_id, id"
        ))
        .bind(order.id)
        .fetch_all(&mut *conn)
        .await?;

        let lock = if lock_tickets { " FOR UPDATE" } else { "" };
        let tickets = sqlx::query_as::<_, Ticket>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE order_id = $1 ORDER BY id{lock}"
        ))
        .bind(order.id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(OrderDetails { order, items, tickets })
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn begin(&self, mode: TxMode) -> AppResult<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;

        // Must be the first statement of the transaction.
        if mode == TxMode::Serializable {
            sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgOrderTx { tx }))
    }

    async fn find_order(&self, order_id: Uuid) -> AppResult<Option<OrderDetails>> {
        let mut conn = self.pool.acquire().await?;
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;

        match order {
            Some(order) => Ok(Some(Self::load_details(&mut conn, order, false).await?)),
            None => Ok(None),
        }
    }

    async fn orders_for_user(&self, user_id: Uuid) -> AppResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    async fn expired_pending_orders(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM orders
            WHERE status = 'pending'
              AND expires_at < $1
            ORDER BY expires_at
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn ticket_types_for_event(&self, event_id: Uuid) -> AppResult<Vec<TicketType>> {
        let types = sqlx::query_as::<_, TicketType>(&format!(
            "SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE event_id = $1 ORDER BY price, name"
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(types)
    }
}

pub struct PgOrderTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgOrderTx {
    async fn lock_ticket_types(&mut self, ids: &[Uuid]) -> AppResult<Vec<TicketType>> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();

        // ORDER BY before FOR UPDATE: rows are locked in ascending id order,
        // so overlapping carts cannot deadlock each other.
        let types = sqlx::query_as::<_, TicketType>(&format!(
            "SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        ))
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(types)
    }

    async fn lock_discount_code(
        &mut self,
        event_id: Uuid,
        code: &str,
    ) -> AppResult<Option<DiscountCode>> {
        let discount = sqlx::query_as::<_, DiscountCode>(&format!(
            "SELECT {DISCOUNT_COLUMNS} FROM discount_codes \
             WHERE event_id = $1 AND upper(code) = $2 FOR UPDATE"
        ))
        .bind(event_id)
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(discount)
    }

    async fn insert_order(
        &mut self,
        order: &Order,
        items: &[OrderItem],
        tickets: &[Ticket],
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, event_id, order_number, status, subtotal, discount_amount,
                service_fee, amount, currency, discount_code_id, expires_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.event_id)
        .bind(&order.order_number)
        .bind(order.status)
        .bind(order.subtotal)
        .bind(order.discount_amount)
        .bind(order.service_fee)
        .bind(order.amount)
        .bind(&order.currency)
        .bind(order.discount_code_id)
        .bind(order.expires_at)
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await?;

        if !items.is_empty() {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO order_items (id, order_id, ticket_type_id, quantity, unit_price, total_price) ",
            );
            builder.push_values(items, |mut row, item| {
                row.push_bind(item.id)
                    .push_bind(item.order_id)
                    .push_bind(item.ticket_type_id)
                    .push_bind(item.quantity)
                    .push_bind(item.unit_price)
                    .push_bind(item.total_price);
            });
            builder.build().execute(&mut *self.tx).await?;
        }

        if !tickets.is_empty() {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO tickets (id, order_id, order_item_id, event_id, ticket_type_id, user_id, status) ",
            );
            builder.push_values(tickets, |mut row, ticket| {
                row.push_bind(ticket.id)
                    .push_bind(ticket.order_id)
                    .push_bind(ticket.order_item_id)
                    .push_bind(ticket.event_id)
                    .push_bind(ticket.ticket_type_id)
                    .push_bind(ticket.user_id)
                    .push_bind(ticket.status);
            });
            builder.build().execute(&mut *self.tx).await?;
        }

        Ok(())
    }

    async fn lock_order(&mut self, order_id: Uuid) -> AppResult<Option<OrderDetails>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        match order {
            Some(order) => Ok(Some(PgOrderStore::load_details(&mut self.tx, order, true).await?)),
            None => Ok(None),
        }
    }

    async fn lock_ticket(&mut self, ticket_id: Uuid) -> AppResult<Option<Ticket>> {
        let ticket = sqlx::query_as::<_, Ticket>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1 FOR UPDATE"
        ))
        .bind(ticket_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(ticket)
    }

    async fn lock_ticket_by_code(&mut self, qr_code: &str) -> AppResult<Option<Ticket>> {
        let ticket = sqlx::query_as::<_, Ticket>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE qr_code = $1 FOR UPDATE"
        ))
        .bind(qr_code)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(ticket)
    }

    async fn save_order(&mut self, order: &Order) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2,
                expires_at = $3,
                payment_intent_id = $4,
                payment_method = $5,
                payment_provider_id = $6,
                confirmed_at = $7,
                cancelled_at = $8,
                refunded_at = $9,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status)
        .bind(order.expires_at)
        .bind(&order.payment_intent_id)
        .bind(&order.payment_method)
        .bind(&order.payment_provider_id)
        .bind(order.confirmed_at)
        .bind(order.cancelled_at)
        .bind(order.refunded_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn save_tickets(&mut self, tickets: &[Ticket]) -> AppResult<()> {
        for ticket in tickets {
            sqlx::query(
                r#"
                UPDATE tickets
                SET user_id = $2,
                    status = $3,
                    qr_code = $4,
                    checked_in_at = $5,
                    transferred_at = $6,
                    original_owner_id = $7,
                    refund_reason = $8,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(ticket.id)
            .bind(ticket.user_id)
            .bind(ticket.status)
            .bind(&ticket.qr_code)
            .bind(ticket.checked_in_at)
            .bind(ticket.transferred_at)
            .bind(ticket.original_owner_id)
            .bind(&ticket.refund_reason)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn adjust_inventory(
        &mut self,
        ticket_type_id: Uuid,
        sold_delta: i32,
        reserved_delta: i32,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE ticket_types
            SET sold_count = sold_count + $2,
                reserved_count = reserved_count + $3,
                updated_at = NOW()
            WHERE id = $1
              AND sold_count + $2 >= 0
              AND reserved_count + $3 >= 0
              AND sold_count + $2 + reserved_count + $3 <= capacity
            "#,
        )
        .bind(ticket_type_id)
        .bind(sold_delta)
        .bind(reserved_delta)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::conflict(format!(
                "inventory of ticket type {ticket_type_id} cannot absorb this change"
            )));
        }
        Ok(())
    }

    async fn adjust_discount_usage(&mut self, discount_code_id: Uuid, delta: i32) -> AppResult<()> {
        sqlx::query(
            "UPDATE discount_codes SET used_count = GREATEST(used_count + $2, 0) WHERE id = $1",
        )
        .bind(discount_code_id)
        .bind(delta)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn adjust_event_attendees(&mut self, event_id: Uuid, delta: i32) -> AppResult<()> {
        sqlx::query(
            "UPDATE events SET current_attendees = GREATEST(current_attendees + $2, 0) WHERE id = $1",
        )
        .bind(event_id)
        .bind(delta)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
