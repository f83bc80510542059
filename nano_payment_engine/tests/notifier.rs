//! Lifecycle tests for the per-invoice payment notification hub.
use nano_payment_engine::{
    db_types::{InvoiceId, Payment},
    notifier::{NotifierConfig, NotifierError, NotifierRegistry, SessionEvent, StopReason},
};
use npg_common::NanoAmount;

mod support;
use support::*;

fn make_payment(n: u32, micro: i64) -> Payment {
    Payment {
        from: external_address(100 + n),
        to: address_for_index(1000),
        amount: NanoAmount::from_micro(micro),
        amount_raws: raw_amount(micro as u64).parse().unwrap(),
        hash: format!("{n:064X}").into(),
        timestamp: 1_718_900_000_000 + i64::from(n),
    }
}

#[tokio::test]
async fn subscribers_are_rejected_before_start() {
    let db = setup_db().await;
    let registry = NotifierRegistry::new(db.clone(), NotifierConfig::default());
    let id = InvoiceId::from("AAAA-0001");
    let notifier = registry.get(&id).await.unwrap();
    assert!(matches!(notifier.subscribe().await, Err(NotifierError::NotStarted(_))));

    // after start, a new connection succeeds and receives an empty backlog
    notifier.start().await.unwrap();
    let mut session = notifier.subscribe().await.unwrap();
    assert!(session.try_recv().is_err());
    tear_down(db).await;
}

#[tokio::test]
async fn backlog_replays_oldest_first_then_goes_live() {
    let db = setup_db().await;
    let registry = NotifierRegistry::new(db.clone(), NotifierConfig::default());
    let id = InvoiceId::from("AAAA-0002");
    let notifier = registry.get(&id).await.unwrap();
    notifier.start().await.unwrap();
    for n in 1..=3 {
        notifier.notify(&make_payment(n, 1_000)).await.unwrap();
    }

    let mut session = notifier.subscribe().await.unwrap();
    for expected in 1..=3u32 {
        match session.recv().await.unwrap() {
            SessionEvent::Payment(p) => assert_eq!(p.hash, make_payment(expected, 1_000).hash),
            other => panic!("Expected a backlog payment, got {other:?}"),
        }
    }
    // live events resume after the backlog
    notifier.notify(&make_payment(4, 1_000)).await.unwrap();
    match session.recv().await.unwrap() {
        SessionEvent::Payment(p) => assert_eq!(p.hash, make_payment(4, 1_000).hash),
        other => panic!("Expected a live payment, got {other:?}"),
    }
    tear_down(db).await;
}

#[tokio::test]
async fn retention_keeps_only_the_recent_window() {
    let db = setup_db().await;
    let config = NotifierConfig { retention: 2, ..NotifierConfig::default() };
    let registry = NotifierRegistry::new(db.clone(), config);
    let id = InvoiceId::from("AAAA-0003");
    let notifier = registry.get(&id).await.unwrap();
    notifier.start().await.unwrap();
    for n in 1..=3 {
        notifier.notify(&make_payment(n, 1_000)).await.unwrap();
    }
    let mut session = notifier.subscribe().await.unwrap();
    // the oldest event fell out of the window; the remaining two replay oldest-first
    for expected in 2..=3u32 {
        match session.recv().await.unwrap() {
            SessionEvent::Payment(p) => assert_eq!(p.hash, make_payment(expected, 1_000).hash),
            other => panic!("Expected a backlog payment, got {other:?}"),
        }
    }
    assert!(session.try_recv().is_err());
    tear_down(db).await;
}

#[tokio::test]
async fn session_cap_rejects_additional_subscribers() {
    let db = setup_db().await;
    let config = NotifierConfig { max_sessions: 2, ..NotifierConfig::default() };
    let registry = NotifierRegistry::new(db.clone(), config);
    let id = InvoiceId::from("AAAA-0004");
    let notifier = registry.get(&id).await.unwrap();
    notifier.start().await.unwrap();
    let _first = notifier.subscribe().await.unwrap();
    let _second = notifier.subscribe().await.unwrap();
    assert!(matches!(notifier.subscribe().await, Err(NotifierError::TooManySessions(_))));
    tear_down(db).await;
}

#[tokio::test]
async fn stop_closes_sessions_and_purges_history() {
    let db = setup_db().await;
    let registry = NotifierRegistry::new(db.clone(), NotifierConfig::default());
    let id = InvoiceId::from("AAAA-0005");
    let notifier = registry.get(&id).await.unwrap();
    notifier.start().await.unwrap();
    notifier.notify(&make_payment(1, 1_000)).await.unwrap();
    let mut session = notifier.subscribe().await.unwrap();

    notifier.stop(StopReason::Expired).await.unwrap();
    // drain the backlog, then the close event with the expired status code
    let mut closed = None;
    while let Some(event) = session.recv().await {
        if let SessionEvent::Closed(reason) = event {
            closed = Some(reason);
        }
    }
    assert_eq!(closed, Some(StopReason::Expired));
    assert_eq!(closed.unwrap().close_code(), 4002);
    assert_eq!(notifier.session_count().await, 0);

    // fully reset: not started, and the history is gone after a restart
    assert!(matches!(notifier.subscribe().await, Err(NotifierError::NotStarted(_))));
    notifier.start().await.unwrap();
    let mut fresh = notifier.subscribe().await.unwrap();
    assert!(fresh.try_recv().is_err(), "History must be purged on stop");
    tear_down(db).await;
}

#[tokio::test]
async fn dead_sessions_are_pruned_without_aborting_broadcast() {
    let db = setup_db().await;
    let registry = NotifierRegistry::new(db.clone(), NotifierConfig::default());
    let id = InvoiceId::from("AAAA-0006");
    let notifier = registry.get(&id).await.unwrap();
    notifier.start().await.unwrap();
    let dead = notifier.subscribe().await.unwrap();
    let mut live = notifier.subscribe().await.unwrap();
    drop(dead);

    notifier.notify(&make_payment(1, 1_000)).await.unwrap();
    match live.recv().await.unwrap() {
        SessionEvent::Payment(p) => assert_eq!(p.hash, make_payment(1, 1_000).hash),
        other => panic!("Expected the broadcast to reach the live session, got {other:?}"),
    }
    assert_eq!(notifier.session_count().await, 1);
    tear_down(db).await;
}

#[tokio::test]
async fn grace_period_holds_early_subscribers_until_start() {
    let db = setup_db().await;
    let config = NotifierConfig {
        subscribe_grace: Some(std::time::Duration::from_millis(500)),
        ..NotifierConfig::default()
    };
    let registry = NotifierRegistry::new(db.clone(), config);
    let id = InvoiceId::from("AAAA-0007");
    let notifier = registry.get(&id).await.unwrap();

    let early = {
        let notifier = registry.get(&id).await.unwrap();
        tokio::spawn(async move { notifier.subscribe().await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    notifier.start().await.unwrap();
    assert!(early.await.unwrap().is_ok(), "The early subscriber should be released by start()");
    tear_down(db).await;
}

#[tokio::test]
async fn grace_period_expires_into_rejection() {
    let db = setup_db().await;
    let config = NotifierConfig {
        subscribe_grace: Some(std::time::Duration::from_millis(100)),
        ..NotifierConfig::default()
    };
    let registry = NotifierRegistry::new(db.clone(), config);
    let id = InvoiceId::from("AAAA-0008");
    let notifier = registry.get(&id).await.unwrap();
    let result = notifier.subscribe().await;
    assert!(matches!(result, Err(NotifierError::NotStarted(_))));
    tear_down(db).await;
}
