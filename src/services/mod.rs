//! The order & ticket reservation engine.
//!
//! `OrderEngine` is split across files by operation, each adding an
//! `impl OrderEngine` block:
//! - `reservation`: cart -> pending order + RESERVED tickets
//! - `confirmation`: payment intent, confirmation and payment failure
//! - `cancellation`: user-initiated release of a pending order
//! - `reaper`: background expiry of stale pending orders
//! - `refund`: organizer-initiated reversal of a confirmed order
//! - `tickets`: transfer and check-in of confirmed tickets
//! - `queries`: read-only views
//!
//! Each mutating operation runs in exactly one store transaction bounded by
//! `EngineSettings::transaction_timeout`.

pub mod cancellation;
pub mod chat;
pub mod confirmation;
pub mod events;
pub mod payment;
pub mod pricing;
pub mod queries;
pub mod reaper;
pub mod refund;
pub mod reservation;
pub mod tickets;

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::models::{EventInfo, OrderItem};
use crate::qr::QrGenerator;
use crate::store::OrderStore;
use chat::ChatService;
use events::EventDirectory;
use payment::PaymentGateway;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How long a pending order holds its seats.
    pub hold_duration: chrono::Duration,
    pub service_fee_rate: Decimal,
    pub currency: String,
    pub transaction_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            hold_duration: chrono::Duration::minutes(15),
            service_fee_rate: Decimal::new(5, 2),
            currency: "USD".to_string(),
            transaction_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct OrderEngine {
    store: Arc<dyn OrderStore>,
    events: Arc<dyn EventDirectory>,
    payments: Arc<dyn PaymentGateway>,
    chat: Arc<dyn ChatService>,
    clock: Arc<dyn Clock>,
    qr: QrGenerator,
    settings: EngineSettings,
}

impl OrderEngine {
    pub fn new(
        store: Arc<dyn OrderStore>,
        events: Arc<dyn EventDirectory>,
        payments: Arc<dyn PaymentGateway>,
        chat: Arc<dyn ChatService>,
        clock: Arc<dyn Clock>,
        qr: QrGenerator,
        settings: EngineSettings,
    ) -> Self {
        Self { store, events, payments, chat, clock, qr, settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn qr(&self) -> &QrGenerator {
        &self.qr
    }

    /// Runs one transactional operation, turning an overrun into a
    /// retryable Conflict. The dropped transaction rolls back.
    async fn within_deadline<T, F>(&self, operation: &'static str, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout(self.settings.transaction_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, "transaction exceeded its time budget, rolled back");
                Err(AppError::retryable(format!("{operation} timed out, please retry")))
            }
        }
    }

    async fn event(&self, event_id: Uuid) -> AppResult<EventInfo> {
        match self.events.find_event(event_id).await? {
            Some(event) if !event.is_deleted => Ok(event),
            _ => Err(AppError::not_found(format!("event {event_id} not found"))),
        }
    }
}

/// Total quantity per ticket type, iterated in ascending ticket type id so
/// every handler touches inventory rows in the same order.
pub(crate) fn quantities_by_type(items: &[OrderItem]) -> BTreeMap<Uuid, i32> {
    let mut quantities = BTreeMap::new();
    for item in items {
        *quantities.entry(item.ticket_type_id).or_insert(0) += item.quantity;
    }
    quantities
}
