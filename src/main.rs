use anyhow::Context;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ticket_marketplace::{
    cache::CacheService,
    clock::SystemClock,
    config::{Config, PaymentMode},
    controllers,
    database::Database,
    qr::QrGenerator,
    redis_client::RedisClient,
    services::{
        chat::{ChatService, HttpChatService, NoopChatService},
        events::PgEventDirectory,
        payment::{MockPaymentGateway, PaymentGateway, PaymentGatewayClient},
        reaper::ExpirationReaper,
        OrderEngine,
    },
    store::PgOrderStore,
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(&config.app.rust_log);
    if config.app.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();
    init_tracing(&config);

    info!(environment = %config.app.environment, "Starting ticket marketplace order engine");

    let db = Database::new(&config.database)
        .await
        .context("Failed to connect to database")?;
    db.run_migrations().await.context("Failed to run migrations")?;

    let redis = RedisClient::new(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;

    let payments: Arc<dyn PaymentGateway> = match config.payment.mode {
        PaymentMode::Gateway => Arc::new(
            PaymentGatewayClient::from_config(&config.payment, &config.circuit_breaker)
                .context("Failed to build payment gateway client")?,
        ),
        PaymentMode::Mock => {
            info!("💳 Using the mock payment gateway");
            Arc::new(MockPaymentGateway::new())
        }
    };

    let chat: Arc<dyn ChatService> = match &config.chat.service_url {
        Some(url) => Arc::new(HttpChatService::new(url.clone()).context("Failed to build chat client")?),
        None => Arc::new(NoopChatService),
    };

    let engine = Arc::new(OrderEngine::new(
        Arc::new(PgOrderStore::new(db.pool.clone(), config.lock_timeout())),
        Arc::new(PgEventDirectory::new(db.pool.clone())),
        payments,
        chat,
        Arc::new(SystemClock),
        QrGenerator::new(&config.qr.prefix, &config.qr.secret),
        config.engine_settings(),
    ));

    let cache = CacheService::new(redis.clone(), engine.clone(), config.redis.availability_ttl_seconds);

    let app_state = Arc::new(AppState {
        db,
        redis,
        cache: cache.clone(),
        config: config.clone(),
        engine: engine.clone(),
    });

    // --- Background tasks ---
    let reaper = ExpirationReaper::new(
        engine,
        Duration::from_secs(config.reservation.reaper_interval_seconds),
        config.reservation.reaper_batch_size,
    );
    reaper.spawn(move |report| {
        let cache = cache.clone();
        tokio::spawn(async move {
            for event_id in report.events {
                cache.invalidate_availability(event_id).await;
            }
        });
    });

    // --- Web server ---
    let app = Router::new()
        .route("/", get(|| async { "Ticket marketplace order engine v1.0" }))
        .merge(controllers::health_route())
        .nest("/api", controllers::routes())
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port)
        .parse()
        .context("HOST/PORT do not form a valid socket address")?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
