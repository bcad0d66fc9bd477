use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::EventInfo;

/// Read-only lookups into the event catalogue owned by another service.
#[async_trait]
pub trait EventDirectory: Send + Sync {
    async fn find_event(&self, event_id: Uuid) -> AppResult<Option<EventInfo>>;
}

#[derive(Clone)]
pub struct PgEventDirectory {
    pool: PgPool,
}

impl PgEventDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventDirectory for PgEventDirectory {
    async fn find_event(&self, event_id: Uuid) -> AppResult<Option<EventInfo>> {
        let event = sqlx::query_as::<_, EventInfo>(
            "SELECT id, organizer_id, title, status, start_date, is_deleted, settings
             FROM events
             WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(event)
    }
}

#[derive(Default)]
pub struct InMemoryEventDirectory {
    events: RwLock<HashMap<Uuid, EventInfo>>,
}

impl InMemoryEventDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, event: EventInfo) {
        self.events.write().await.insert(event.id, event);
    }
}

#[async_trait]
impl EventDirectory for InMemoryEventDirectory {
    async fn find_event(&self, event_id: Uuid) -> AppResult<Option<EventInfo>> {
        Ok(self.events.read().await.get(&event_id).cloned())
    }
}
