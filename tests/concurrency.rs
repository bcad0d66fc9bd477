mod common;

use futures::future::join_all;
use uuid::Uuid;

use common::Harness;
use ticket_marketplace::error::AppError;
use ticket_marketplace::models::OrderStatus;
use ticket_marketplace::services::confirmation::PaymentConfirmation;
use ticket_marketplace::services::refund::RefundRequest;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_seat_goes_to_exactly_one_buyer() {
    let h = Harness::new().await;
    let tt = h.ticket_type(1, "100").await;

    let attempts = (0..16).map(|_| {
        let engine = h.engine.clone();
        let request = h.request(&[(tt, 1)], None);
        tokio::spawn(async move { engine.reserve(Uuid::new_v4(), request).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(result, Err(AppError::Conflict { .. })));
    }
    assert_eq!(h.counters(tt).await, (0, 1));
    assert_eq!(h.store.tickets_of_type(tt).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn capacity_holds_under_mixed_quantities() {
    let h = Harness::new().await;
    let tt = h.ticket_type(7, "10").await;

    let attempts = (0..24).map(|i| {
        let engine = h.engine.clone();
        let quantity = (i % 3) + 1;
        let request = h.request(&[(tt, quantity)], None);
        tokio::spawn(async move { engine.reserve(Uuid::new_v4(), request).await.map(|d| d.total_quantity()) })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let granted: i32 = results.iter().filter_map(|r| r.as_ref().ok()).sum();
    let (sold, reserved) = h.counters(tt).await;
    assert_eq!(sold, 0);
    assert_eq!(reserved, granted);
    assert!(reserved <= 7);

    let holding = h
        .store
        .tickets_of_type(tt)
        .await
        .into_iter()
        .filter(|t| t.status.holds_capacity())
        .count();
    assert_eq!(holding as i32, reserved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_carts_in_opposite_order_all_complete() {
    let h = Harness::new().await;
    let a = h.ticket_type(50, "10").await;
    let b = h.ticket_type(50, "20").await;

    let attempts = (0..40).map(|i| {
        let engine = h.engine.clone();
        let lines = if i % 2 == 0 { [(a, 1), (b, 1)] } else { [(b, 1), (a, 1)] };
        let request = h.request(&lines, None);
        tokio::spawn(async move { engine.reserve(Uuid::new_v4(), request).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(h.counters(a).await, (0, 40));
    assert_eq!(h.counters(b).await, (0, 40));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn confirm_and_cancel_race_has_one_winner() {
    let h = Harness::new().await;
    let tt = h.ticket_type(5, "10").await;
    let user = Uuid::new_v4();
    let order = h.reserve(user, &[(tt, 2)]).await.unwrap();
    let order_id = order.order.id;

    let confirm = {
        let engine = h.engine.clone();
        tokio::spawn(async move {
            engine
                .confirm(
                    order_id,
                    PaymentConfirmation {
                        payment_method: "mock".to_string(),
                        payment_provider_id: "pi_race".to_string(),
                    },
                )
                .await
        })
    };
    let cancel = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.cancel(order_id, user).await })
    };

    let confirmed = confirm.await.unwrap();
    let cancelled = cancel.await.unwrap();
    assert!(confirmed.is_ok() ^ cancelled.is_ok());

    let stored = h.engine.owned_order(order_id, user).await.unwrap();
    match stored.order.status {
        OrderStatus::Confirmed => assert_eq!(h.counters(tt).await, (2, 0)),
        OrderStatus::Cancelled => assert_eq!(h.counters(tt).await, (0, 0)),
        other => panic!("unexpected status {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refunds_reach_the_gateway_once() {
    let h = Harness::new().await;
    let tt = h.ticket_type(5, "10").await;
    let user = Uuid::new_v4();
    let order = h.reserve(user, &[(tt, 2)]).await.unwrap();
    h.pay(order.order.id, user).await.unwrap();

    let attempts = (0..4).map(|_| {
        let engine = h.engine.clone();
        let order_id = order.order.id;
        let organizer_id = h.organizer_id;
        tokio::spawn(async move {
            engine
                .refund(order_id, organizer_id, RefundRequest { reason: "cancelled show".to_string() })
                .await
        })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(result, Err(AppError::Conflict { .. })));
    }
    assert_eq!(h.payments.refunds().await.len(), 1);
    assert_eq!(h.counters(tt).await, (0, 0));
}
