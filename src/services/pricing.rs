//! Pure price computation: subtotal, discount, service fee and total.
//!
//! Nothing here touches storage; the only time-dependent input is the
//! `now` used to decide whether a discount code has expired.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::{DiscountCode, DiscountType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceBreakdown {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub service_fee: Decimal,
    pub total: Decimal,
}

/// Rounds half away from zero to cents.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    unit_price * Decimal::from(quantity)
}

pub fn subtotal<I>(lines: I) -> Decimal
where
    I: IntoIterator<Item = (Decimal, i32)>,
{
    lines.into_iter().map(|(price, qty)| line_total(price, qty)).sum()
}

/// Rejects a code that cannot be applied to this subtotal right now.
pub fn check_discount(code: &DiscountCode, subtotal: Decimal, now: DateTime<Utc>) -> AppResult<()> {
    if !code.is_active {
        return Err(AppError::bad_request(format!("discount code {} is not active", code.code)));
    }
    if code.is_expired(now) {
        return Err(AppError::bad_request(format!("discount code {} has expired", code.code)));
    }
    if code.is_exhausted() {
        return Err(AppError::bad_request(format!(
            "discount code {} has reached its usage limit",
            code.code
        )));
    }
    if let Some(min) = code.min_purchase_amount {
        if subtotal < min {
            return Err(AppError::bad_request(format!(
                "discount code {} requires a minimum purchase of {min}",
                code.code
            )));
        }
    }
    Ok(())
}

/// Discount for an already validated code, never more than the subtotal.
pub fn discount_amount(code: &DiscountCode, subtotal: Decimal) -> Decimal {
    let raw = match code.discount_type {
        DiscountType::Percentage => {
            let pct = subtotal * code.value / Decimal::ONE_HUNDRED;
            match code.max_discount_amount {
                Some(cap) => pct.min(cap),
                None => pct,
            }
        }
        DiscountType::Amount => code.value,
    };
    round2(raw.max(Decimal::ZERO).min(subtotal))
}

pub fn service_fee(discounted_subtotal: Decimal, fee_rate: Decimal) -> Decimal {
    round2(discounted_subtotal * fee_rate)
}

/// Full quote. A supplied code that fails validation aborts the quote.
pub fn quote(
    subtotal: Decimal,
    discount: Option<&DiscountCode>,
    fee_rate: Decimal,
    now: DateTime<Utc>,
) -> AppResult<PriceBreakdown> {
    let discount_amount = match discount {
        Some(code) => {
            check_discount(code, subtotal, now)?;
            discount_amount(code, subtotal)
        }
        None => Decimal::ZERO,
    };

    let discounted = subtotal - discount_amount;
    let service_fee = service_fee(discounted, fee_rate);

    Ok(PriceBreakdown {
        subtotal,
        discount_amount,
        service_fee,
        total: discounted + service_fee,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use std::str::FromStr;
    use uuid::Uuid;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn code(discount_type: DiscountType, value: &str) -> DiscountCode {
        DiscountCode {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            code: "SAVE".to_string(),
            discount_type,
            value: dec(value),
            max_uses: None,
            used_count: 0,
            min_purchase_amount: None,
            max_discount_amount: None,
            expires_at: None,
            is_active: true,
        }
    }

    #[test]
    fn percentage_discount_on_300() {
        let quote = quote(
            dec("300"),
            Some(&code(DiscountType::Percentage, "10")),
            dec("0.05"),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(quote.discount_amount, dec("30"));
        assert_eq!(quote.service_fee, dec("13.5"));
        assert_eq!(quote.total, dec("283.5"));
    }

    #[test]
    fn no_discount_quote() {
        let quote = quote(dec("99.99"), None, dec("0.05"), Utc::now()).unwrap();
        assert_eq!(quote.discount_amount, Decimal::ZERO);
        // 4.9995 rounds half away from zero
        assert_eq!(quote.service_fee, dec("5.00"));
        assert_eq!(quote.total, dec("104.99"));
    }

    #[test]
    fn percentage_discount_is_capped() {
        let mut c = code(DiscountType::Percentage, "50");
        c.max_discount_amount = Some(dec("20"));
        assert_eq!(discount_amount(&c, dec("100")), dec("20"));
    }

    #[test]
    fn amount_discount_never_exceeds_subtotal() {
        let c = code(DiscountType::Amount, "75");
        assert_eq!(discount_amount(&c, dec("50")), dec("50"));
        let quote = quote(dec("50"), Some(&c), dec("0.05"), Utc::now()).unwrap();
        assert_eq!(quote.total, Decimal::ZERO);
    }

    #[test]
    fn percentage_result_is_rounded_to_cents() {
        let c = code(DiscountType::Percentage, "15");
        // 33.33 * 0.15 = 4.9995
        assert_eq!(discount_amount(&c, dec("33.33")), dec("5.00"));
    }

    #[test]
    fn inactive_expired_and_exhausted_codes_are_rejected() {
        let now = Utc::now();

        let mut inactive = code(DiscountType::Amount, "5");
        inactive.is_active = false;
        assert!(matches!(check_discount(&inactive, dec("10"), now), Err(AppError::BadRequest(_))));

        let mut expired = code(DiscountType::Amount, "5");
        expired.expires_at = Some(now - Duration::seconds(1));
        assert!(matches!(check_discount(&expired, dec("10"), now), Err(AppError::BadRequest(_))));

        let mut exhausted = code(DiscountType::Amount, "5");
        exhausted.max_uses = Some(3);
        exhausted.used_count = 3;
        assert!(matches!(check_discount(&exhausted, dec("10"), now), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn minimum_purchase_is_enforced() {
        let mut c = code(DiscountType::Amount, "5");
        c.min_purchase_amount = Some(dec("100"));
        assert!(check_discount(&c, dec("99.99"), Utc::now()).is_err());
        assert!(check_discount(&c, dec("100"), Utc::now()).is_ok());
    }

    #[test]
    fn subtotal_sums_lines() {
        let total = subtotal([(dec("100"), 3), (dec("12.50"), 2)]);
        assert_eq!(total, dec("325"));
    }

    proptest! {
        #[test]
        fn quote_invariants(
            cents in 0i64..10_000_000,
            pct in 0i64..=100,
            fixed_cents in 0i64..10_000_000,
            use_pct in any::<bool>(),
        ) {
            let subtotal = Decimal::new(cents, 2);
            let c = if use_pct {
                code(DiscountType::Percentage, &pct.to_string())
            } else {
                let mut c = code(DiscountType::Amount, "0");
                c.value = Decimal::new(fixed_cents, 2);
                c
            };
            let q = quote(subtotal, Some(&c), dec("0.05"), Utc::now()).unwrap();

            prop_assert!(q.discount_amount >= Decimal::ZERO);
            prop_assert!(q.discount_amount <= subtotal);
            prop_assert!(q.total >= Decimal::ZERO);
            prop_assert_eq!(q.service_fee, round2((subtotal - q.discount_amount) * dec("0.05")));
            prop_assert_eq!(q.total, subtotal - q.discount_amount + q.service_fee);
            prop_assert!(q.discount_amount.scale() <= 2);
            prop_assert!(q.service_fee.scale() <= 2);
        }
    }
}
