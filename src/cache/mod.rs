use std::sync::Arc;

use crate::{redis_client::RedisClient, services::OrderEngine};

pub mod availability;

/// Read-through redis cache in front of the engine's read paths. Redis
/// failures degrade to a direct read, never to an error.
#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    engine: Arc<OrderEngine>,
    ttl_seconds: u64,
}

impl CacheService {
    pub fn new(redis: RedisClient, engine: Arc<OrderEngine>, ttl_seconds: u64) -> Self {
        Self { redis, engine, ttl_seconds }
    }
}
