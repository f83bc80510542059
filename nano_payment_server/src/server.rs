//! Process wiring: the database, pipeline, settlement worker, notifier registry and HTTP server are all
//! constructed here, once, and handed their dependencies explicitly.
use std::{future::Future, pin::Pin, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use log::*;
use nano_payment_engine::{
    events::{EventHandlers, EventHooks},
    node::{NodeRpcClient, WalletFactory},
    notifier::{NotifierConfig, NotifierRegistry},
    pipeline::{run_pipeline, Dispatcher, LogPubSub, PipelineSender, WebhookDeliverer},
    settlement::{SettlementConfig, SettlementWorker},
    SqliteDatabase,
};

use crate::{
    config::ServerConfig,
    errors::ServerError,
    routes::{create_invoice, get_invoice, health, subscribe_payments},
};

/// Everything the request handlers need, created once at startup.
pub struct ApiContext {
    pub db: SqliteDatabase,
    pub wallets: WalletFactory,
    pub sender: PipelineSender,
    pub notifiers: NotifierRegistry<SqliteDatabase>,
    pub config: ServerConfig,
}

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;

    let rpc = NodeRpcClient::new(&config.rpc_urls, &config.work_urls, config.rpc_timeout)
        .map_err(|e| ServerError::ConfigurationError(e.to_string()))?;
    let wallets = WalletFactory::new(config.hot_wallet_seed.clone(), config.representative.clone(), rpc)
        .map_err(|e| ServerError::ConfigurationError(e.to_string()))?;

    let notifier_config = NotifierConfig {
        max_sessions: config.max_sessions_per_notifier,
        retention: config.max_payments_per_invoice,
        subscribe_grace: config.subscribe_grace,
    };
    let notifiers = NotifierRegistry::new(db.clone(), notifier_config);

    let mut hooks = EventHooks::default();
    hooks.on_invoice_paid(|event| {
        Box::pin(async move {
            info!("🎉️ Invoice {} paid in full with {} payments", event.invoice.id, event.payments.len());
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    hooks.on_invoice_expired(|event| {
        Box::pin(async move {
            info!("🕰️ Invoice {} expired unpaid", event.invoice.id);
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    let handlers = EventHandlers::new(16, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let (sender, pipeline_rx) = PipelineSender::channel(256);
    let settlement_config = SettlementConfig {
        min_amount: config.min_invoice_amount,
        max_payments_per_invoice: config.max_payments_per_invoice,
        reaper_ceiling: Duration::from_secs(30),
    };
    let (settlement, _worker) = SettlementWorker::spawn(
        db.clone(),
        &config.node_websocket_url,
        sender.clone(),
        notifiers.clone(),
        producers,
        settlement_config,
    )
    .map_err(|e| ServerError::InitializeError(e.to_string()))?;

    let webhooks = WebhookDeliverer::new(config.webhook_timeout, config.webhook_retry);
    let dispatcher =
        Dispatcher::new(db.clone(), sender.clone(), settlement, notifiers.clone(), wallets.clone(), webhooks, LogPubSub);
    tokio::spawn(run_pipeline(dispatcher, pipeline_rx, config.pipeline_attempts));

    let context = ApiContext { db, wallets, sender, notifiers, config: config.clone() };
    let srv = create_server_instance(&config, context)?;
    srv.await.map_err(|e| ServerError::BackendError(e.to_string()))
}

pub fn create_server_instance(config: &ServerConfig, context: ApiContext) -> Result<Server, ServerError> {
    let data = web::Data::new(context);
    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("npg::access_log"))
            .app_data(data.clone())
            .service(health)
            .service(create_invoice)
            .service(get_invoice)
            .service(subscribe_payments)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
