use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Published,
    Cancelled,
    Completed,
}

/// Organizer-controlled switches stored as JSON on the event row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventSettings {
    pub chat_enabled: bool,
    pub auto_join_chat: bool,
}

impl EventSettings {
    pub fn enrolls_buyers_in_chat(&self) -> bool {
        self.chat_enabled && self.auto_join_chat
    }
}

/// Read-only view of an event as served by the event directory.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EventInfo {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub title: String,
    pub status: EventStatus,
    pub start_date: DateTime<Utc>,
    pub is_deleted: bool,
    #[sqlx(json)]
    pub settings: EventSettings,
}
