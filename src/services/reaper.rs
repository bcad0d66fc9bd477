use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::cancellation::release_reservation;
use super::OrderEngine;
use crate::error::AppResult;
use crate::models::OrderStatus;
use crate::store::TxMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// Released; carries the event whose availability changed.
    Expired { event_id: Uuid },
    /// Confirmed, cancelled or extended since it was listed.
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub skipped: usize,
    pub failed: usize,
    pub events: BTreeSet<Uuid>,
}

impl OrderEngine {
    /// Expires one order in its own transaction, re-checking state under lock.
    pub async fn expire_order(&self, order_id: Uuid) -> AppResult<ExpireOutcome> {
        self.within_deadline("expiration", async {
            let now = self.clock.now();
            let mut tx = self.store.begin(TxMode::ReadCommitted).await?;
            let Some(mut details) = tx.lock_order(order_id).await? else {
                return Ok(ExpireOutcome::Skipped);
            };
            if details.order.status != OrderStatus::Pending || !details.order.is_expired_at(now) {
                return Ok(ExpireOutcome::Skipped);
            }
            release_reservation(tx.as_mut(), &mut details, OrderStatus::Cancelled, now).await?;
            tx.commit().await?;
            Ok(ExpireOutcome::Expired { event_id: details.order.event_id })
        })
        .await
    }
}

/// Periodically cancels pending orders whose hold has lapsed.
pub struct ExpirationReaper {
    engine: Arc<OrderEngine>,
    interval: Duration,
    batch_size: i64,
}

impl ExpirationReaper {
    pub fn new(engine: Arc<OrderEngine>, interval: Duration, batch_size: i64) -> Self {
        Self { engine, interval, batch_size }
    }

    /// One pass. A failing order is logged and skipped; the rest of the
    /// batch still runs.
    pub async fn sweep(&self) -> AppResult<SweepReport> {
        let now = self.engine.clock.now();
        let candidates = self.engine.store.expired_pending_orders(now, self.batch_size).await?;

        let mut report = SweepReport::default();
        if candidates.is_empty() {
            return Ok(report);
        }
        info!("🧹 Found {} expired reservations to release", candidates.len());

        for order_id in candidates {
            match self.engine.expire_order(order_id).await {
                Ok(ExpireOutcome::Expired { event_id }) => {
                    report.expired += 1;
                    report.events.insert(event_id);
                    info!("⏰ Order {} expired, seats released", order_id);
                }
                Ok(ExpireOutcome::Skipped) => {
                    report.skipped += 1;
                    warn!("⏰ Order {} was not expired (status changed?)", order_id);
                }
                Err(e) => {
                    report.failed += 1;
                    error!("⏰ Failed to expire order {}: {}", order_id, e);
                }
            }
        }

        info!(
            expired = report.expired,
            skipped = report.skipped,
            failed = report.failed,
            "✅ Expiration sweep completed"
        );
        Ok(report)
    }

    /// Runs `sweep` forever on a fixed interval; `after_sweep` sees every
    /// report that released something.
    pub fn spawn<F>(self, after_sweep: F) -> JoinHandle<()>
    where
        F: Fn(SweepReport) + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.sweep().await {
                    Ok(report) if report.expired > 0 => after_sweep(report),
                    Ok(_) => {}
                    Err(e) => error!("🧹 Expiration sweep failed: {}", e),
                }
            }
        })
    }
}
