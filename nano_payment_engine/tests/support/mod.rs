//! Shared scaffolding for the engine integration tests: a throwaway SQLite database per test, seeded registration
//! data, and a mock node websocket that tests can push confirmation frames through.
#![allow(dead_code)] // each test binary uses its own subset of these helpers
use std::net::SocketAddr;

use chrono::{DateTime, Duration, Utc};
use futures_util::{SinkExt, StreamExt};
use log::*;
use nano_payment_engine::{
    db_types::{Invoice, NanoAddress, NewInvoice},
    helpers::{derive_secret_key, AccountKeys},
    InvoiceManagement,
    PaymentGatewayDatabase,
    SqliteDatabase,
};
use npg_common::NanoAmount;
use sqlx::{migrate, migrate::MigrateDatabase, Sqlite};
use tokio::{net::TcpListener, sync::mpsc};
use tokio_tungstenite::tungstenite::Message;

pub const TEST_SEED: &str = "9f0e444c69f77a49bd0be89db92c38fe713e0963165cca12faf5712d7657120f";

pub async fn setup_db() -> SqliteDatabase {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let url = random_db_path();
    let _ = Sqlite::drop_database(&url).await;
    Sqlite::create_database(&url).await.expect("Error creating database");
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error connecting to database");
    migrate!("./src/sqlite/migrations").run(db.pool()).await.expect("Error running DB migrations");
    db
}

pub fn random_db_path() -> String {
    let dir = std::env::temp_dir();
    format!("sqlite://{}/npg_test_{}.db", dir.display(), rand::random::<u64>())
}

pub async fn tear_down(mut db: SqliteDatabase) {
    let url = db.url().to_string();
    if let Err(e) = db.close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    Sqlite::drop_database(&url).await.unwrap();
}

/// A receive address derived from the test seed, as the gateway itself would derive it.
pub fn address_for_index(index: u32) -> NanoAddress {
    let secret = derive_secret_key(TEST_SEED, index).unwrap();
    AccountKeys::from_secret(secret).address().clone()
}

/// An unrelated (but checksum-valid) address for payers and merchants.
pub fn external_address(tag: u32) -> NanoAddress {
    let secret = derive_secret_key(&"ee".repeat(32), tag).unwrap();
    AccountKeys::from_secret(secret).address().clone()
}

pub async fn seed_service(db: &SqliteDatabase, service_id: &str) {
    sqlx::query("INSERT INTO services (id, slug, name) VALUES ($1, $1, 'Test Service')")
        .bind(service_id)
        .execute(db.pool())
        .await
        .expect("Error seeding service");
}

/// Insert an invoice with its pay address patched in, ready for the settlement worker.
pub async fn create_open_invoice(
    db: &SqliteDatabase,
    service_id: &str,
    price: NanoAmount,
    expires_at: DateTime<Utc>,
) -> Invoice {
    let new_invoice = NewInvoice {
        expires_at,
        price,
        currency: "XNO".to_string(),
        recipient_address: external_address(9999),
        title: "Test invoice".to_string(),
        description: None,
        metadata: None,
        redirect_url: None,
        service_id: service_id.to_string(),
    };
    let invoice = db.insert_invoice(new_invoice).await.expect("Error inserting invoice");
    let pay_address = address_for_index(invoice.chain_index);
    db.set_pay_address(&invoice.id, &pay_address).await.expect("Error setting pay address")
}

pub fn expiry_in(seconds: i64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(seconds)
}

/// A confirmation frame as the node would push it for a send block.
pub fn send_frame(from: &NanoAddress, to: &NanoAddress, amount_raw: &str, hash: &str) -> String {
    serde_json::json!({
        "topic": "confirmation",
        "time": Utc::now().timestamp_millis().to_string(),
        "message": {
            "account": from,
            "amount": amount_raw,
            "hash": hash,
            "block": {
                "type": "state",
                "subtype": "send",
                "account": from,
                "link_as_account": to,
            }
        }
    })
    .to_string()
}

/// One XNO expressed in raw, scaled by a micro-nano amount.
pub fn raw_amount(micro_nano: u64) -> String {
    format!("{}{}", micro_nano, "0".repeat(24))
}

/// A mock node websocket endpoint. Accepts connections in sequence and forwards pushed frames to the currently
/// connected client; inbound control frames are logged and dropped.
pub struct MockNode {
    pub url: String,
    pub frames: mpsc::UnboundedSender<String>,
}

pub async fn spawn_mock_node() -> MockNode {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Error binding mock node");
    let addr: SocketAddr = listener.local_addr().unwrap();
    let (frames, mut frame_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            debug!("🧪️ Mock node accepted a connection");
            loop {
                tokio::select! {
                    frame = frame_rx.recv() => match frame {
                        Some(frame) => {
                            if ws.send(Message::Text(frame)).await.is_err() {
                                break;
                            }
                        },
                        None => return,
                    },
                    message = ws.next() => match message {
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(other)) => trace!("🧪️ Mock node received {other:?}"),
                    },
                }
            }
            debug!("🧪️ Mock node connection ended");
        }
    });
    MockNode { url: format!("ws://{addr}"), frames }
}
