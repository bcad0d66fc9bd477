use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "discount_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Amount,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DiscountCode {
    pub id: Uuid,
    pub event_id: Uuid,
    pub code: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    pub min_purchase_amount: Option<Decimal>,
    pub max_discount_amount: Option<Decimal>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl DiscountCode {
    /// Codes are stored upper-case; lookups go through this.
    pub fn normalize(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max| self.used_count >= max)
    }
}
