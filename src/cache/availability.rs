use redis::AsyncCommands;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::CacheService;
use crate::error::AppResult;
use crate::services::queries::EventAvailability;

fn availability_key(event_id: Uuid) -> String {
    format!("availability:{event_id}")
}

impl CacheService {
    pub async fn get_availability(&self, event_id: Uuid) -> AppResult<EventAvailability> {
        if let Ok(cached) = self.availability_from_cache(event_id).await {
            return Ok(cached);
        }

        let fresh = self.engine.availability(event_id).await?;
        if let Err(e) = self.save_availability_to_cache(&fresh).await {
            debug!(event_id = %event_id, error = %e, "Availability not cached");
        }
        Ok(fresh)
    }

    /// Called after anything that moves inventory counters.
    pub async fn invalidate_availability(&self, event_id: Uuid) {
        let mut conn = self.redis.conn.clone();
        let result: Result<i64, _> = conn.del(availability_key(event_id)).await;
        if let Err(e) = result {
            warn!(event_id = %event_id, error = %e, "Failed to invalidate availability cache");
        }
    }

    // === redis ===
    async fn availability_from_cache(
        &self,
        event_id: Uuid,
    ) -> Result<EventAvailability, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let data: String = conn.get(availability_key(event_id)).await?;
        serde_json::from_str(&data)
            .map_err(|_| redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error")))
    }

    async fn save_availability_to_cache(
        &self,
        availability: &EventAvailability,
    ) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(availability).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error"))
        })?;
        let mut conn = self.redis.conn.clone();
        conn.set_ex(availability_key(availability.event_id), data, self.ttl_seconds).await
    }
}
