pub mod cache;
pub mod clock;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod qr;
pub mod redis_client;
pub mod services;
pub mod store;

use std::sync::Arc;

use services::OrderEngine;

// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub cache: cache::CacheService,
    pub config: config::Config,
    pub engine: Arc<OrderEngine>,
}
