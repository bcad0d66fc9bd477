use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Event chat rooms live in another service; enrollment is best-effort.
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn add_participant_to_event_chat(&self, user_id: Uuid, event_id: Uuid) -> AppResult<()>;
}

/// Used when no chat service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopChatService;

#[async_trait]
impl ChatService for NoopChatService {
    async fn add_participant_to_event_chat(&self, _user_id: Uuid, _event_id: Uuid) -> AppResult<()> {
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddParticipantRequest {
    user_id: Uuid,
}

#[derive(Clone)]
pub struct HttpChatService {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpChatService {
    pub fn new(base_url: impl Into<String>) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::Internal(format!("chat http client: {e}")))?;
        Ok(Self { base_url: base_url.into().trim_end_matches('/').to_string(), http_client })
    }
}

#[async_trait]
impl ChatService for HttpChatService {
    async fn add_participant_to_event_chat(&self, user_id: Uuid, event_id: Uuid) -> AppResult<()> {
        let response = self
            .http_client
            .post(format!("{}/events/{}/chat/participants", self.base_url, event_id))
            .json(&AddParticipantRequest { user_id })
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("chat service unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "chat service answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Remembers every enrollment; can be told to fail. For tests and demos.
#[derive(Default)]
pub struct RecordingChatService {
    calls: Mutex<Vec<(Uuid, Uuid)>>,
    fail: bool,
}

impl RecordingChatService {
    pub fn failing() -> Self {
        Self { calls: Mutex::default(), fail: true }
    }

    pub async fn enrollments(&self) -> Vec<(Uuid, Uuid)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ChatService for RecordingChatService {
    async fn add_participant_to_event_chat(&self, user_id: Uuid, event_id: Uuid) -> AppResult<()> {
        self.calls.lock().await.push((user_id, event_id));
        if self.fail {
            return Err(AppError::Internal("chat service down".to_string()));
        }
        Ok(())
    }
}
