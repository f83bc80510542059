use std::{env, time::Duration};

use chrono::Duration as ChronoDuration;
use log::*;
use nano_payment_engine::db_types::NanoAddress;
use npg_common::{helpers::parse_boolean_flag, NanoAmount, Secret};
use rand::RngCore;

const DEFAULT_NPG_HOST: &str = "127.0.0.1";
const DEFAULT_NPG_PORT: u16 = 8370;
const DEFAULT_NODE_WEBSOCKET_URL: &str = "ws://127.0.0.1:7078";
const DEFAULT_RPC_URL: &str = "http://127.0.0.1:7076";
/// A well-known public representative, used only when the operator has not chosen one.
const DEFAULT_REPRESENTATIVE: &str = "nano_3arg3asgtigae3xckabaaewkx3bzsh7nwz7jkmjos79ihyt8fejojgjwh3r9";
const DEFAULT_INVOICE_EXPIRATION_MINUTES: i64 = 10;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// The node's confirmation websocket endpoint.
    pub node_websocket_url: String,
    /// Ordered pool of node RPC endpoints, tried in order on failure.
    pub rpc_urls: Vec<String>,
    /// Ordered pool of work-server endpoints.
    pub work_urls: Vec<String>,
    /// The representative set on every block the hot wallet creates.
    pub representative: NanoAddress,
    /// The seed all per-invoice receive accounts are derived from. **Guard this with your life.**
    pub hot_wallet_seed: Secret<String>,
    /// How long an invoice stays payable after creation.
    pub invoice_expiration: ChronoDuration,
    /// Dust threshold: transfers below this are ignored.
    pub min_invoice_amount: NanoAmount,
    /// Upper bound on the price of a single invoice.
    pub max_invoice_amount: NanoAmount,
    pub max_payments_per_invoice: usize,
    pub max_sessions_per_notifier: usize,
    /// When set, payment-stream subscribers arriving before the settlement worker starts an invoice's notifier
    /// wait this long for the start instead of being rejected immediately.
    pub subscribe_grace: Option<Duration>,
    /// Whether failed webhook deliveries are redelivered by the pipeline. Off by default: webhooks are
    /// best-effort and must not hold up settlement.
    pub webhook_retry: bool,
    pub webhook_timeout: Duration,
    pub rpc_timeout: Duration,
    /// How many times the pipeline redelivers a failed message before dead-lettering it.
    pub pipeline_attempts: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_NPG_HOST.to_string(),
            port: DEFAULT_NPG_PORT,
            database_url: String::default(),
            node_websocket_url: DEFAULT_NODE_WEBSOCKET_URL.to_string(),
            rpc_urls: vec![DEFAULT_RPC_URL.to_string()],
            work_urls: vec![DEFAULT_RPC_URL.to_string()],
            representative: NanoAddress::from(DEFAULT_REPRESENTATIVE),
            hot_wallet_seed: Secret::default(),
            invoice_expiration: ChronoDuration::minutes(DEFAULT_INVOICE_EXPIRATION_MINUTES),
            min_invoice_amount: NanoAmount::from_micro(10),
            max_invoice_amount: NanoAmount::from_micro(1_000_000 * 1_000_000),
            max_payments_per_invoice: 10,
            max_sessions_per_notifier: 10,
            subscribe_grace: None,
            webhook_retry: false,
            webhook_timeout: Duration::from_secs(15),
            rpc_timeout: Duration::from_secs(30),
            pipeline_attempts: 3,
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let defaults = ServerConfig::default();
        let host = env::var("NPG_HOST").ok().unwrap_or_else(|| defaults.host.clone());
        let port = env::var("NPG_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!("🪛️ {s} is not a valid port for NPG_PORT. {e} Using the default, {DEFAULT_NPG_PORT}.");
                    DEFAULT_NPG_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_NPG_PORT);
        let database_url = env::var("NPG_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ NPG_DATABASE_URL is not set. Please set it to the URL for the gateway database.");
            String::default()
        });
        let node_websocket_url =
            env::var("NPG_NODE_WS_URL").ok().unwrap_or_else(|| defaults.node_websocket_url.clone());
        let rpc_urls =
            env::var("NPG_RPC_URLS").map(|s| split_urls(&s)).ok().unwrap_or_else(|| defaults.rpc_urls.clone());
        let work_urls =
            env::var("NPG_WORK_URLS").map(|s| split_urls(&s)).ok().unwrap_or_else(|| defaults.work_urls.clone());
        let representative = env::var("NPG_REPRESENTATIVE")
            .map(NanoAddress::from)
            .ok()
            .unwrap_or_else(|| defaults.representative.clone());
        let hot_wallet_seed = env::var("NPG_HOT_WALLET_SEED").map(Secret::new).ok().unwrap_or_else(|| {
            warn!(
                "🪛️ NPG_HOT_WALLET_SEED is not set. Generating a random seed: derived pay addresses will NOT be \
                 recoverable after a restart. Do not do this in production."
            );
            let mut seed = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut seed);
            Secret::new(hex::encode(seed))
        });
        let invoice_expiration = env::var("NPG_INVOICE_EXPIRATION_SECS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .map(ChronoDuration::seconds)
            .unwrap_or(defaults.invoice_expiration);
        let max_payments_per_invoice = env::var("NPG_MAX_PAYMENTS_PER_INVOICE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_payments_per_invoice);
        let max_sessions_per_notifier = env::var("NPG_MAX_SESSIONS_PER_NOTIFIER")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_sessions_per_notifier);
        let subscribe_grace = env::var("NPG_SUBSCRIBE_GRACE_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);
        let webhook_retry = parse_boolean_flag(env::var("NPG_WEBHOOK_RETRY").ok(), defaults.webhook_retry);
        let pipeline_attempts = env::var("NPG_PIPELINE_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(defaults.pipeline_attempts);
        Self {
            host,
            port,
            database_url,
            node_websocket_url,
            rpc_urls,
            work_urls,
            representative,
            hot_wallet_seed,
            invoice_expiration,
            max_payments_per_invoice,
            max_sessions_per_notifier,
            subscribe_grace,
            webhook_retry,
            pipeline_attempts,
            ..defaults
        }
    }
}

fn split_urls(value: &str) -> Vec<String> {
    value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}
