//! End-to-end tests for the settlement worker: a mock node pushes confirmation frames and the tests observe the
//! pipeline messages and database transitions the worker produces.
use nano_payment_engine::{
    db_types::{InvoiceStatus, NanoAddress},
    events::EventProducers,
    notifier::{NotifierConfig, NotifierError, NotifierRegistry},
    pipeline::{PipelineMessage, PipelineSender, QueueName},
    settlement::{SettlementConfig, SettlementError, SettlementHandle, SettlementWorker},
    InvoiceManagement,
    SqliteDatabase,
};
use npg_common::NanoAmount;
use tokio::sync::mpsc;

mod support;
use support::*;

fn block_hash(n: u32) -> String {
    format!("{n:064X}")
}

fn start_worker(
    db: SqliteDatabase,
    node_url: &str,
    config: SettlementConfig,
) -> (SettlementHandle, mpsc::Receiver<PipelineMessage>, NotifierRegistry<SqliteDatabase>) {
    let notifiers = NotifierRegistry::new(db.clone(), NotifierConfig::default());
    let (sender, rx) = PipelineSender::channel(64);
    let (handle, _join) =
        SettlementWorker::spawn(db, node_url, sender, notifiers.clone(), EventProducers::default(), config)
            .expect("Error spawning settlement worker");
    (handle, rx, notifiers)
}

/// Wait for the next pipeline message, with a generous timeout so a hung worker fails the test instead of the CI
/// job.
async fn next_message(rx: &mut mpsc::Receiver<PipelineMessage>) -> PipelineMessage {
    tokio::time::timeout(std::time::Duration::from_secs(10), rx.recv())
        .await
        .expect("Timed out waiting for a pipeline message")
        .expect("Pipeline channel closed")
}

async fn assert_no_message(rx: &mut mpsc::Receiver<PipelineMessage>) {
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    assert!(rx.try_recv().is_err(), "Expected no pipeline message");
}

#[tokio::test]
async fn cumulative_payments_settle_the_invoice() {
    let db = setup_db().await;
    seed_service(&db, "svc").await;
    let invoice =
        create_open_invoice(&db, "svc", NanoAmount::from_nano(1.0).unwrap(), expiry_in(60)).await;
    let pay_address = invoice.pay_address.clone().unwrap();
    let node = spawn_mock_node().await;
    let (handle, mut rx, notifiers) = start_worker(db.clone(), &node.url, SettlementConfig::default());

    handle.listen(invoice.clone(), None, Vec::new()).await.unwrap();
    // the notifier accepts subscribers as soon as listening starts
    let notifier = notifiers.get(&invoice.id).await.unwrap();
    let mut session = notifier.subscribe().await.unwrap();

    let payer = external_address(1);
    for (i, micro) in [400_000u64, 400_000, 300_000].iter().enumerate() {
        node.frames.send(send_frame(&payer, &pay_address, &raw_amount(*micro), &block_hash(i as u32 + 1))).unwrap();
    }

    let mut writes = Vec::new();
    let mut pushes = 0;
    let settle = loop {
        let message = next_message(&mut rx).await;
        match message.queue {
            QueueName::PaymentWrite => writes.push(message.body.payment.unwrap()),
            QueueName::PaymentPusher => pushes += 1,
            QueueName::PaymentReceiver => break message,
            other => panic!("Unexpected queue: {other}"),
        }
    };

    // every accepted payment got a write and a push before settlement
    assert_eq!(writes.len(), 3);
    assert_eq!(pushes, 3);
    let payments = settle.body.payments.unwrap();
    assert_eq!(payments.len(), 3);
    // arrival order is preserved and the cumulative total crossed the price
    let hashes: Vec<String> = payments.iter().map(|p| p.hash.as_str().to_string()).collect();
    assert_eq!(hashes, vec![block_hash(1), block_hash(2), block_hash(3)]);
    let total: NanoAmount = payments.iter().map(|p| p.amount).sum();
    assert_eq!(total, NanoAmount::from_micro(1_100_000));

    let stored = db.fetch_invoice(&invoice.id).await.unwrap().unwrap();
    assert_eq!(stored.status, InvoiceStatus::Paid);

    // the notifier was stopped with the paid status and its session closed
    let mut saw_close = false;
    while let Ok(event) = session.try_recv() {
        if let nano_payment_engine::notifier::SessionEvent::Closed(reason) = event {
            assert_eq!(reason.close_code(), 1000);
            saw_close = true;
        }
    }
    assert!(saw_close, "Subscriber session should have been closed");
    tear_down(db).await;
}

#[tokio::test]
async fn dust_and_self_transfers_are_ignored() {
    let db = setup_db().await;
    seed_service(&db, "svc").await;
    let invoice =
        create_open_invoice(&db, "svc", NanoAmount::from_nano(1.0).unwrap(), expiry_in(60)).await;
    let pay_address = invoice.pay_address.clone().unwrap();
    let node = spawn_mock_node().await;
    let (handle, mut rx, _notifiers) = start_worker(db.clone(), &node.url, SettlementConfig::default());
    handle.listen(invoice.clone(), None, Vec::new()).await.unwrap();

    let payer = external_address(2);
    // 5 micro-nano is below the 10 micro-nano dust threshold
    node.frames.send(send_frame(&payer, &pay_address, &raw_amount(5), &block_hash(10))).unwrap();
    // a transfer from the invoice's own address is never a payment
    node.frames.send(send_frame(&pay_address, &pay_address, &raw_amount(500_000), &block_hash(11))).unwrap();
    // a real payment that settles the invoice outright
    node.frames.send(send_frame(&payer, &pay_address, &raw_amount(1_000_000), &block_hash(12))).unwrap();

    let settle = loop {
        let message = next_message(&mut rx).await;
        if message.queue == QueueName::PaymentReceiver {
            break message;
        }
    };
    let payments = settle.body.payments.unwrap();
    assert_eq!(payments.len(), 1, "Only the real payment may be recorded");
    assert_eq!(payments[0].hash.as_str(), block_hash(12));
    tear_down(db).await;
}

#[tokio::test]
async fn duplicate_hashes_are_seen_once() {
    let db = setup_db().await;
    seed_service(&db, "svc").await;
    let invoice =
        create_open_invoice(&db, "svc", NanoAmount::from_nano(1.0).unwrap(), expiry_in(60)).await;
    let pay_address = invoice.pay_address.clone().unwrap();
    let node = spawn_mock_node().await;
    let (handle, mut rx, _notifiers) = start_worker(db.clone(), &node.url, SettlementConfig::default());
    handle.listen(invoice.clone(), None, Vec::new()).await.unwrap();

    let payer = external_address(3);
    node.frames.send(send_frame(&payer, &pay_address, &raw_amount(600_000), &block_hash(20))).unwrap();
    node.frames.send(send_frame(&payer, &pay_address, &raw_amount(600_000), &block_hash(20))).unwrap();
    node.frames.send(send_frame(&payer, &pay_address, &raw_amount(400_000), &block_hash(21))).unwrap();

    let settle = loop {
        let message = next_message(&mut rx).await;
        if message.queue == QueueName::PaymentReceiver {
            break message;
        }
    };
    let payments = settle.body.payments.unwrap();
    assert_eq!(payments.len(), 2);
    assert_eq!(payments[0].hash.as_str(), block_hash(20));
    assert_eq!(payments[1].hash.as_str(), block_hash(21));
    tear_down(db).await;
}

#[tokio::test]
async fn payment_cap_stops_listening_without_settling() {
    let db = setup_db().await;
    seed_service(&db, "svc").await;
    let invoice =
        create_open_invoice(&db, "svc", NanoAmount::from_nano(1000.0).unwrap(), expiry_in(60)).await;
    let pay_address = invoice.pay_address.clone().unwrap();
    let node = spawn_mock_node().await;
    let config = SettlementConfig { max_payments_per_invoice: 3, ..SettlementConfig::default() };
    let (handle, mut rx, notifiers) = start_worker(db.clone(), &node.url, config);
    handle.listen(invoice.clone(), None, Vec::new()).await.unwrap();

    let payer = external_address(4);
    for i in 0..3u32 {
        node.frames.send(send_frame(&payer, &pay_address, &raw_amount(1_000), &block_hash(30 + i))).unwrap();
    }

    // three writes and three pushes, then nothing: no settlement for a capped invoice
    let mut writes = 0;
    let mut pushes = 0;
    while writes + pushes < 6 {
        let message = next_message(&mut rx).await;
        match message.queue {
            QueueName::PaymentWrite => writes += 1,
            QueueName::PaymentPusher => pushes += 1,
            other => panic!("Unexpected queue: {other}"),
        }
    }
    assert_no_message(&mut rx).await;

    // the invoice is not paid, and its notifier has been reset
    let stored = db.fetch_invoice(&invoice.id).await.unwrap().unwrap();
    assert_eq!(stored.status, InvoiceStatus::Pending);
    let notifier = notifiers.get(&invoice.id).await.unwrap();
    assert!(matches!(notifier.subscribe().await, Err(NotifierError::NotStarted(_))));
    tear_down(db).await;
}

#[tokio::test]
async fn expired_invoices_are_reaped() {
    let db = setup_db().await;
    seed_service(&db, "svc").await;
    let invoice = create_open_invoice(&db, "svc", NanoAmount::from_nano(1.0).unwrap(), expiry_in(1)).await;
    let node = spawn_mock_node().await;
    let (handle, mut rx, notifiers) = start_worker(db.clone(), &node.url, SettlementConfig::default());
    handle.listen(invoice.clone(), None, Vec::new()).await.unwrap();

    // the reaper wakes at the nearest deadline rather than the 30s ceiling
    tokio::time::sleep(std::time::Duration::from_millis(2_500)).await;
    let stored = db.fetch_invoice(&invoice.id).await.unwrap().unwrap();
    assert_eq!(stored.status, InvoiceStatus::Expired);
    assert!(rx.try_recv().is_err(), "Expiry must not produce pipeline messages");
    let notifier = notifiers.get(&invoice.id).await.unwrap();
    assert!(matches!(notifier.subscribe().await, Err(NotifierError::NotStarted(_))));
    tear_down(db).await;
}

#[tokio::test]
async fn listening_for_an_already_expired_invoice_is_a_timeout() {
    let db = setup_db().await;
    seed_service(&db, "svc").await;
    let invoice = create_open_invoice(&db, "svc", NanoAmount::from_nano(1.0).unwrap(), expiry_in(-5)).await;
    let node = spawn_mock_node().await;
    let (handle, _rx, _notifiers) = start_worker(db.clone(), &node.url, SettlementConfig::default());
    let result = handle.listen(invoice, None, Vec::new()).await;
    assert!(matches!(result, Err(SettlementError::DeadlinePassed)));
    tear_down(db).await;
}

#[tokio::test]
async fn connection_reopens_for_subsequent_invoices() {
    let db = setup_db().await;
    seed_service(&db, "svc").await;
    let node = spawn_mock_node().await;
    let (handle, mut rx, _notifiers) = start_worker(db.clone(), &node.url, SettlementConfig::default());
    let payer: NanoAddress = external_address(5);

    for round in 0..2u32 {
        let invoice =
            create_open_invoice(&db, "svc", NanoAmount::from_nano(0.5).unwrap(), expiry_in(60)).await;
        let pay_address = invoice.pay_address.clone().unwrap();
        handle.listen(invoice.clone(), None, Vec::new()).await.unwrap();
        node.frames
            .send(send_frame(&payer, &pay_address, &raw_amount(500_000), &block_hash(40 + round)))
            .unwrap();
        loop {
            let message = next_message(&mut rx).await;
            if message.queue == QueueName::PaymentReceiver {
                break;
            }
        }
        let stored = db.fetch_invoice(&invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Paid);
        // settling the only tracked invoice closes the node connection; the next round must reconnect
    }
    tear_down(db).await;
}
