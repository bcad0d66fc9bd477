use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Sellable inventory bucket of an event.
///
/// `sold_count + reserved_count <= capacity` holds at all times; the counters
/// are only ever changed inside a transaction holding the row lock.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TicketType {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub capacity: i32,
    pub sold_count: i32,
    pub reserved_count: i32,
    pub min_per_order: i32,
    pub max_per_order: i32,
    pub sale_start_date: Option<DateTime<Utc>>,
    pub sale_end_date: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl TicketType {
    pub fn available(&self) -> i32 {
        self.capacity - self.sold_count - self.reserved_count
    }

    pub fn sale_open_at(&self, now: DateTime<Utc>) -> bool {
        self.sale_start_date.map_or(true, |start| now >= start)
            && self.sale_end_date.map_or(true, |end| now <= end)
    }
}

/// Public availability snapshot of one ticket type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    pub ticket_type_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub capacity: i32,
    pub sold: i32,
    pub reserved: i32,
    pub available: i32,
    pub on_sale: bool,
}

impl Availability {
    pub fn of(ticket_type: &TicketType, now: DateTime<Utc>) -> Self {
        Self {
            ticket_type_id: ticket_type.id,
            name: ticket_type.name.clone(),
            price: ticket_type.price,
            capacity: ticket_type.capacity,
            sold: ticket_type.sold_count,
            reserved: ticket_type.reserved_count,
            available: ticket_type.available().max(0),
            on_sale: ticket_type.is_active && ticket_type.sale_open_at(now),
        }
    }
}
