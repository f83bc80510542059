//! Dispatcher routing, retry classification and stage-level validation tests.
use nano_payment_engine::{
    db_types::{Invoice, Webhook},
    events::EventProducers,
    node::{NodeRpcClient, WalletFactory},
    notifier::{NotifierConfig, NotifierRegistry},
    pipeline::{
        run_pipeline,
        Dispatcher,
        LogPubSub,
        MessageBody,
        PipelineError,
        PipelineMessage,
        PipelineSender,
        QueueName,
        WebhookDeliverer,
    },
    settlement::{SettlementConfig, SettlementWorker},
    InvoiceManagement,
    SqliteDatabase,
};
use npg_common::{NanoAmount, Secret};
use tokio::sync::mpsc;

mod support;
use support::*;

fn make_payment(invoice: &Invoice, n: u32, micro: i64) -> nano_payment_engine::db_types::Payment {
    nano_payment_engine::db_types::Payment {
        from: external_address(200 + n),
        to: invoice.pay_address.clone().unwrap(),
        amount: NanoAmount::from_micro(micro),
        amount_raws: raw_amount(micro as u64).parse().unwrap(),
        hash: format!("{n:064X}").into(),
        timestamp: 1_718_900_000_000,
    }
}

/// A dispatcher wired against a throwaway database. The node endpoints point at closed ports: stages that would
/// touch the chain are not exercised here.
fn build_dispatcher(
    db: SqliteDatabase,
    node_url: &str,
) -> (Dispatcher<SqliteDatabase, LogPubSub>, PipelineSender, mpsc::Receiver<PipelineMessage>) {
    let notifiers = NotifierRegistry::new(db.clone(), NotifierConfig::default());
    let (sender, rx) = PipelineSender::channel(64);
    let (settlement, _join) = SettlementWorker::spawn(
        db.clone(),
        node_url,
        sender.clone(),
        notifiers.clone(),
        EventProducers::default(),
        SettlementConfig::default(),
    )
    .expect("Error spawning settlement worker");
    let rpc = NodeRpcClient::new(
        &["http://127.0.0.1:1".to_string()],
        &["http://127.0.0.1:1".to_string()],
        std::time::Duration::from_millis(200),
    )
    .unwrap();
    let wallets = WalletFactory::new(Secret::new(TEST_SEED.to_string()), external_address(42), rpc).unwrap();
    let webhooks = WebhookDeliverer::new(std::time::Duration::from_millis(200), false);
    let dispatcher = Dispatcher::new(db, sender.clone(), settlement, notifiers, wallets, webhooks, LogPubSub);
    (dispatcher, sender, rx)
}

#[tokio::test]
async fn batches_of_more_than_one_message_are_dropped() {
    let db = setup_db().await;
    seed_service(&db, "svc").await;
    let invoice = create_open_invoice(&db, "svc", NanoAmount::from_nano(1.0).unwrap(), expiry_in(60)).await;
    let (dispatcher, _sender, _rx) = build_dispatcher(db.clone(), "ws://127.0.0.1:1");

    let payment = make_payment(&invoice, 1, 500_000);
    let message = PipelineMessage {
        queue: QueueName::PaymentWrite,
        body: MessageBody::write(invoice.clone(), payment, None, Vec::new()),
    };
    let result = dispatcher.dispatch(vec![message.clone(), message]).await;
    assert!(result.is_ok(), "An oversized batch is dropped, not an error");
    // neither message was processed
    assert!(db.fetch_payments(&invoice.id).await.unwrap().is_empty());
    tear_down(db).await;
}

#[tokio::test]
async fn unknown_queues_are_noops() {
    let db = setup_db().await;
    seed_service(&db, "svc").await;
    let invoice = create_open_invoice(&db, "svc", NanoAmount::from_nano(1.0).unwrap(), expiry_in(60)).await;
    let (dispatcher, _sender, _rx) = build_dispatcher(db.clone(), "ws://127.0.0.1:1");
    let message = PipelineMessage {
        queue: "mystery-queue".parse().unwrap(),
        body: MessageBody::send(invoice),
    };
    assert!(dispatcher.dispatch(vec![message]).await.is_ok());
    tear_down(db).await;
}

#[tokio::test]
async fn write_stage_is_idempotent_by_hash() {
    let db = setup_db().await;
    seed_service(&db, "svc").await;
    let invoice = create_open_invoice(&db, "svc", NanoAmount::from_nano(1.0).unwrap(), expiry_in(60)).await;
    let (dispatcher, _sender, _rx) = build_dispatcher(db.clone(), "ws://127.0.0.1:1");

    let payment = make_payment(&invoice, 2, 500_000);
    let message = PipelineMessage {
        queue: QueueName::PaymentWrite,
        body: MessageBody::write(invoice.clone(), payment.clone(), None, Vec::new()),
    };
    // an at-least-once pipeline will redeliver; the second write must not duplicate the row
    dispatcher.dispatch(vec![message.clone()]).await.unwrap();
    dispatcher.dispatch(vec![message]).await.unwrap();
    let stored = db.fetch_payments(&invoice.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0], payment);
    tear_down(db).await;
}

#[tokio::test]
async fn write_stage_requires_its_fields() {
    let db = setup_db().await;
    seed_service(&db, "svc").await;
    let invoice = create_open_invoice(&db, "svc", NanoAmount::from_nano(1.0).unwrap(), expiry_in(60)).await;
    let (dispatcher, _sender, _rx) = build_dispatcher(db.clone(), "ws://127.0.0.1:1");
    // a write message without a payment is fatal for the stage
    let message = PipelineMessage { queue: QueueName::PaymentWrite, body: MessageBody::send(invoice) };
    let result = dispatcher.dispatch(vec![message]).await;
    assert!(matches!(result, Err(PipelineError::MissingField("payment"))));
    tear_down(db).await;
}

#[tokio::test]
async fn write_stage_fans_out_to_active_subscribed_webhooks_only() {
    let db = setup_db().await;
    seed_service(&db, "svc").await;
    let invoice = create_open_invoice(&db, "svc", NanoAmount::from_nano(1.0).unwrap(), expiry_in(60)).await;
    let (dispatcher, _sender, mut rx) = build_dispatcher(db.clone(), "ws://127.0.0.1:1");

    let active = Webhook {
        id: 1,
        service_id: "svc".into(),
        url: "http://127.0.0.1:1/hook".into(),
        secret: Some("s3cret".into()),
        active: true,
        event_types: "invoice.paid".into(),
    };
    let inactive = Webhook { id: 2, active: false, ..active.clone() };
    let wrong_event = Webhook { id: 3, event_types: "invoice.expired".into(), ..active.clone() };

    let payment = make_payment(&invoice, 3, 500_000);
    let message = PipelineMessage {
        queue: QueueName::PaymentWrite,
        body: MessageBody::write(invoice.clone(), payment, None, vec![active, inactive, wrong_event]),
    };
    dispatcher.dispatch(vec![message]).await.unwrap();

    let delivery = rx.try_recv().expect("One webhook delivery should be enqueued");
    assert_eq!(delivery.queue, QueueName::WebhookDelivery);
    assert_eq!(delivery.body.webhook.unwrap().id, 1);
    assert_eq!(delivery.body.webhook_type.as_deref(), Some("invoice.paid"));
    assert!(rx.try_recv().is_err(), "Inactive and unsubscribed webhooks must not be delivered");
    tear_down(db).await;
}

#[tokio::test]
async fn expired_listen_is_classified_as_timeout() {
    let db = setup_db().await;
    seed_service(&db, "svc").await;
    let invoice = create_open_invoice(&db, "svc", NanoAmount::from_nano(1.0).unwrap(), expiry_in(-5)).await;
    let (dispatcher, _sender, _rx) = build_dispatcher(db.clone(), "ws://127.0.0.1:1");
    let message = PipelineMessage {
        queue: QueueName::PaymentListener,
        body: MessageBody::listen(invoice, None, Vec::new()),
    };
    let result = dispatcher.dispatch(vec![message]).await;
    assert!(matches!(result, Err(PipelineError::PaymentTimeout)));
    tear_down(db).await;
}

#[tokio::test]
async fn pump_swallows_timeouts_and_keeps_draining() {
    let db = setup_db().await;
    seed_service(&db, "svc").await;
    let expired = create_open_invoice(&db, "svc", NanoAmount::from_nano(1.0).unwrap(), expiry_in(-5)).await;
    let open = create_open_invoice(&db, "svc", NanoAmount::from_nano(1.0).unwrap(), expiry_in(60)).await;
    let (dispatcher, sender, rx) = build_dispatcher(db.clone(), "ws://127.0.0.1:1");
    let pump = tokio::spawn(run_pipeline(dispatcher, rx, 3));

    // the expired listen is the timeout sentinel: logged, not retried, and the pump moves on
    sender.send(QueueName::PaymentListener, MessageBody::listen(expired, None, Vec::new())).await.unwrap();
    let payment = make_payment(&open, 4, 500_000);
    sender
        .send(QueueName::PaymentWrite, MessageBody::write(open.clone(), payment, None, Vec::new()))
        .await
        .unwrap();

    // the write landing proves the pump survived the timeout ahead of it in the queue
    let mut recorded = Vec::new();
    for _ in 0..50 {
        recorded = db.fetch_payments(&open.id).await.unwrap();
        if !recorded.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert_eq!(recorded.len(), 1);
    drop(sender);
    pump.abort();
    tear_down(db).await;
}
