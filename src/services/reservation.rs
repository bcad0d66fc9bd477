use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use super::{pricing, OrderEngine};
use crate::error::{AppError, AppResult};
use crate::models::{
    DiscountCode, EventStatus, Order, OrderDetails, OrderItem, OrderStatus, Ticket, TicketType,
};
use crate::store::TxMode;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub ticket_type_id: Uuid,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    pub event_id: Uuid,
    #[validate(length(min = 1, message = "cart is empty"), nested)]
    pub items: Vec<CartLine>,
    pub discount_code: Option<String>,
}

/// Human-readable, e.g. `ORD-20300101-7KQ2ZD`.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}

fn check_cart(request: &ReservationRequest) -> AppResult<()> {
    request
        .validate()
        .map_err(|e| AppError::bad_request(e.to_string()))?;

    let mut seen = HashSet::new();
    for line in &request.items {
        if !seen.insert(line.ticket_type_id) {
            return Err(AppError::bad_request(format!(
                "ticket type {} appears more than once in the cart",
                line.ticket_type_id
            )));
        }
    }
    Ok(())
}

/// Per-line policy checked against the locked row.
fn check_line(
    ticket_type: &TicketType,
    event_id: Uuid,
    quantity: i32,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let id = ticket_type.id;
    if ticket_type.event_id != event_id {
        return Err(AppError::bad_request(format!("ticket type {id} does not belong to this event")));
    }
    if !ticket_type.is_active {
        return Err(AppError::bad_request(format!("ticket type {id} is not on sale")));
    }
    if ticket_type.sale_start_date.is_some_and(|start| now < start) {
        return Err(AppError::bad_request(format!("sale of ticket type {id} has not started")));
    }
    if ticket_type.sale_end_date.is_some_and(|end| now > end) {
        return Err(AppError::bad_request(format!("sale of ticket type {id} has ended")));
    }
    if quantity < ticket_type.min_per_order || quantity > ticket_type.max_per_order {
        return Err(AppError::bad_request(format!(
            "quantity for ticket type {id} must be between {} and {}",
            ticket_type.min_per_order, ticket_type.max_per_order
        )));
    }
    if ticket_type.available() < quantity {
        return Err(AppError::conflict(format!(
            "only {} tickets of type {id} left",
            ticket_type.available().max(0)
        )));
    }
    Ok(())
}

impl OrderEngine {
    /// Turns a cart into a pending order holding RESERVED tickets.
    ///
    /// All-or-nothing: any violation rolls back every write of the attempt.
    pub async fn reserve(&self, user_id: Uuid, request: ReservationRequest) -> AppResult<OrderDetails> {
        check_cart(&request)?;

        let now = self.clock.now();
        let event = self.event(request.event_id).await?;
        if event.status != EventStatus::Published {
            return Err(AppError::forbidden("event is not open for sales"));
        }
        if event.start_date <= now {
            return Err(AppError::forbidden("event has already started"));
        }

        let details = self
            .within_deadline("reservation", self.reserve_in_tx(user_id, &request, now))
            .await?;

        info!(
            order_id = %details.order.id,
            order_number = %details.order.order_number,
            user_id = %user_id,
            event_id = %request.event_id,
            tickets = details.tickets.len(),
            amount = %details.order.amount,
            "Reservation created"
        );
        Ok(details)
    }

    async fn reserve_in_tx(
        &self,
        user_id: Uuid,
        request: &ReservationRequest,
        now: DateTime<Utc>,
    ) -> AppResult<OrderDetails> {
        let mut tx = self.store.begin(TxMode::Serializable).await?;

        let ids: Vec<Uuid> = request.items.iter().map(|line| line.ticket_type_id).collect();
        let locked: HashMap<Uuid, TicketType> = tx
            .lock_ticket_types(&ids)
            .await?
            .into_iter()
            .map(|tt| (tt.id, tt))
            .collect();

        let mut lines = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let ticket_type = locked.get(&line.ticket_type_id).ok_or_else(|| {
                AppError::not_found(format!("ticket type {} not found", line.ticket_type_id))
            })?;
            if let Err(e) = check_line(ticket_type, request.event_id, line.quantity, now) {
                debug!(ticket_type_id = %ticket_type.id, error = %e, "Cart line rejected");
                return Err(e);
            }
            lines.push((ticket_type, line.quantity));
        }

        let subtotal = pricing::subtotal(lines.iter().map(|(tt, qty)| (tt.price, *qty)));

        let discount: Option<DiscountCode> = match request.discount_code.as_deref() {
            Some(raw) if !raw.trim().is_empty() => {
                let code = DiscountCode::normalize(raw);
                let found = tx.lock_discount_code(request.event_id, &code).await?;
                Some(found.ok_or_else(|| AppError::bad_request(format!("discount code {code} is not valid")))?)
            }
            _ => None,
        };

        let quote = pricing::quote(subtotal, discount.as_ref(), self.settings.service_fee_rate, now)?;

        let order = Order {
            id: Uuid::new_v4(),
            user_id,
            event_id: request.event_id,
            order_number: generate_order_number(now),
            status: OrderStatus::Pending,
            subtotal: quote.subtotal,
            discount_amount: quote.discount_amount,
            service_fee: quote.service_fee,
            amount: quote.total,
            currency: self.settings.currency.clone(),
            discount_code_id: discount.as_ref().map(|d| d.id),
            expires_at: Some(now + self.settings.hold_duration),
            payment_intent_id: None,
            payment_method: None,
            payment_provider_id: None,
            created_at: now,
            confirmed_at: None,
            cancelled_at: None,
            refunded_at: None,
        };

        let mut items = Vec::with_capacity(lines.len());
        let mut tickets = Vec::new();
        for (ticket_type, quantity) in &lines {
            let item = OrderItem {
                id: Uuid::new_v4(),
                order_id: order.id,
                ticket_type_id: ticket_type.id,
                quantity: *quantity,
                unit_price: ticket_type.price,
                total_price: pricing::line_total(ticket_type.price, *quantity),
            };
            for _ in 0..*quantity {
                tickets.push(Ticket::reserved(order.id, item.id, order.event_id, ticket_type.id, user_id));
            }
            items.push(item);
        }

        tx.insert_order(&order, &items, &tickets).await?;

        let mut by_type: Vec<(Uuid, i32)> = lines.iter().map(|(tt, qty)| (tt.id, *qty)).collect();
        by_type.sort();
        for (ticket_type_id, quantity) in by_type {
            tx.adjust_inventory(ticket_type_id, 0, quantity).await?;
        }
        if let Some(code) = &discount {
            tx.adjust_discount_usage(code.id, 1).await?;
        }

        tx.commit().await?;

        items.sort_by_key(|item| (item.ticket_type_id, item.id));
        Ok(OrderDetails { order, items, tickets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    fn ticket_type(event_id: Uuid) -> TicketType {
        TicketType {
            id: Uuid::new_v4(),
            event_id,
            name: "GA".to_string(),
            price: Decimal::ONE_HUNDRED,
            capacity: 10,
            sold_count: 2,
            reserved_count: 3,
            min_per_order: 1,
            max_per_order: 6,
            sale_start_date: None,
            sale_end_date: None,
            is_active: true,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 5, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn order_number_shape() {
        let number = generate_order_number(now());
        assert!(number.starts_with("ORD-20300501-"));
        assert_eq!(number.len(), "ORD-20300501-".len() + 6);
        assert!(number[13..].chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn line_checks() {
        let event_id = Uuid::new_v4();
        let tt = ticket_type(event_id);
        assert!(check_line(&tt, event_id, 5, now()).is_ok());
        assert!(matches!(check_line(&tt, event_id, 6, now()), Err(AppError::BadRequest(_))));
        assert!(matches!(check_line(&tt, event_id, 0, now()), Err(AppError::BadRequest(_))));
        assert!(matches!(check_line(&tt, Uuid::new_v4(), 1, now()), Err(AppError::BadRequest(_))));

        let mut nearly_full = tt.clone();
        nearly_full.reserved_count = 7;
        assert!(matches!(
            check_line(&nearly_full, event_id, 2, now()),
            Err(AppError::Conflict { retryable: false, .. })
        ));
    }

    #[test]
    fn sale_window_is_inclusive() {
        let event_id = Uuid::new_v4();
        let mut tt = ticket_type(event_id);
        tt.sale_start_date = Some(now());
        tt.sale_end_date = Some(now() + Duration::days(1));
        assert!(check_line(&tt, event_id, 1, now()).is_ok());
        assert!(check_line(&tt, event_id, 1, now() - Duration::seconds(1)).is_err());
        assert!(check_line(&tt, event_id, 1, now() + Duration::days(2)).is_err());
    }

    #[test]
    fn cart_hygiene() {
        let id = Uuid::new_v4();
        let empty = ReservationRequest { event_id: id, items: vec![], discount_code: None };
        assert!(check_cart(&empty).is_err());

        let dup = ReservationRequest {
            event_id: id,
            items: vec![
                CartLine { ticket_type_id: id, quantity: 1 },
                CartLine { ticket_type_id: id, quantity: 2 },
            ],
            discount_code: None,
        };
        assert!(check_cart(&dup).is_err());

        let zero = ReservationRequest {
            event_id: id,
            items: vec![CartLine { ticket_type_id: id, quantity: 0 }],
            discount_code: None,
        };
        assert!(check_cart(&zero).is_err());
    }
}
