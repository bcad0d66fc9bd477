#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use ticket_marketplace::clock::ManualClock;
use ticket_marketplace::error::AppResult;
use ticket_marketplace::models::{
    DiscountCode, DiscountType, EventInfo, EventSettings, EventStatus, OrderDetails, TicketType,
};
use ticket_marketplace::qr::QrGenerator;
use ticket_marketplace::services::chat::RecordingChatService;
use ticket_marketplace::services::events::InMemoryEventDirectory;
use ticket_marketplace::services::payment::MockPaymentGateway;
use ticket_marketplace::services::reservation::{CartLine, ReservationRequest};
use ticket_marketplace::services::{EngineSettings, OrderEngine};
use ticket_marketplace::store::MemoryOrderStore;

pub const QR_SECRET: &str = "gate-secret";

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 5, 1, 10, 0, 0).unwrap()
}

/// Engine wired to in-memory collaborators, plus one published event.
pub struct Harness {
    pub engine: Arc<OrderEngine>,
    pub store: Arc<MemoryOrderStore>,
    pub events: Arc<InMemoryEventDirectory>,
    pub payments: Arc<MockPaymentGateway>,
    pub chat: Arc<RecordingChatService>,
    pub clock: Arc<ManualClock>,
    pub event_id: Uuid,
    pub organizer_id: Uuid,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(MockPaymentGateway::new(), RecordingChatService::default()).await
    }

    pub async fn with(payments: MockPaymentGateway, chat: RecordingChatService) -> Self {
        Self::assemble(MemoryOrderStore::default(), payments, chat, EngineSettings::default()).await
    }

    /// Custom store lock wait and engine budgets; mock collaborators.
    pub async fn with_store(store: MemoryOrderStore, settings: EngineSettings) -> Self {
        Self::assemble(store, MockPaymentGateway::new(), RecordingChatService::default(), settings)
            .await
    }

    async fn assemble(
        store: MemoryOrderStore,
        payments: MockPaymentGateway,
        chat: RecordingChatService,
        settings: EngineSettings,
    ) -> Self {
        let store = Arc::new(store);
        let events = Arc::new(InMemoryEventDirectory::new());
        let payments = Arc::new(payments);
        let chat = Arc::new(chat);
        let clock = Arc::new(ManualClock::new(start_time()));

        let engine = Arc::new(OrderEngine::new(
            store.clone(),
            events.clone(),
            payments.clone(),
            chat.clone(),
            clock.clone(),
            QrGenerator::new("TKT", QR_SECRET),
            settings,
        ));

        let organizer_id = Uuid::new_v4();
        let event_id = Uuid::new_v4();
        events
            .insert(EventInfo {
                id: event_id,
                organizer_id,
                title: "Summer Open Air".to_string(),
                status: EventStatus::Published,
                start_date: start_time() + Duration::days(30),
                is_deleted: false,
                settings: EventSettings { chat_enabled: true, auto_join_chat: true },
            })
            .await;

        Self { engine, store, events, payments, chat, clock, event_id, organizer_id }
    }

    pub fn ticket_type_template(&self, capacity: i32, price: &str) -> TicketType {
        TicketType {
            id: Uuid::new_v4(),
            event_id: self.event_id,
            name: format!("Tier {price}"),
            price: dec(price),
            capacity,
            sold_count: 0,
            reserved_count: 0,
            min_per_order: 1,
            max_per_order: 10,
            sale_start_date: None,
            sale_end_date: None,
            is_active: true,
        }
    }

    pub async fn add_ticket_type(&self, ticket_type: TicketType) -> Uuid {
        let id = ticket_type.id;
        self.store.insert_ticket_type(ticket_type).await;
        id
    }

    pub async fn ticket_type(&self, capacity: i32, price: &str) -> Uuid {
        self.add_ticket_type(self.ticket_type_template(capacity, price)).await
    }

    pub async fn discount(&self, code: &str, discount_type: DiscountType, value: &str) -> DiscountCode {
        let discount = DiscountCode {
            id: Uuid::new_v4(),
            event_id: self.event_id,
            code: DiscountCode::normalize(code),
            discount_type,
            value: dec(value),
            max_uses: None,
            used_count: 0,
            min_purchase_amount: None,
            max_discount_amount: None,
            expires_at: None,
            is_active: true,
        };
        self.store.insert_discount_code(discount.clone()).await;
        discount
    }

    pub fn request(&self, lines: &[(Uuid, i32)], code: Option<&str>) -> ReservationRequest {
        ReservationRequest {
            event_id: self.event_id,
            items: lines
                .iter()
                .map(|(ticket_type_id, quantity)| CartLine {
                    ticket_type_id: *ticket_type_id,
                    quantity: *quantity,
                })
                .collect(),
            discount_code: code.map(str::to_string),
        }
    }

    pub async fn reserve(&self, user_id: Uuid, lines: &[(Uuid, i32)]) -> AppResult<OrderDetails> {
        self.engine.reserve(user_id, self.request(lines, None)).await
    }

    /// Full happy payment path through the mock gateway.
    pub async fn pay(&self, order_id: Uuid, user_id: Uuid) -> AppResult<OrderDetails> {
        let intent = self
            .engine
            .start_payment(order_id, user_id, Some("buyer@example.com".to_string()))
            .await?;
        let outcome = self
            .engine
            .complete_payment(order_id, user_id, &intent.client_secret)
            .await?;
        assert!(outcome.succeeded);
        Ok(outcome.order)
    }

    pub async fn counters(&self, ticket_type_id: Uuid) -> (i32, i32) {
        let tt = self.store.ticket_type(ticket_type_id).await.unwrap();
        (tt.sold_count, tt.reserved_count)
    }
}
