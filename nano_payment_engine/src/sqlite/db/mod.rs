//! # SQLite database methods
//!
//! "Low-level" SQLite interactions. Each table gets a module of plain functions that accept a
//! `&mut SqliteConnection`, so callers can run them on a pooled connection or inside a transaction without any
//! change to the query code.
use std::env;

use log::info;
use sqlx::{sqlite::SqlitePoolOptions, Error as SqlxError, SqlitePool};

pub mod invoices;
pub mod notifier;
pub mod payments;
pub mod services;
pub mod wallet_state;
pub mod webhook_deliveries;

const SQLITE_DB_URL: &str = "sqlite://data/npg_store.db";

pub fn db_url() -> String {
    let result = env::var("NPG_DATABASE_URL").unwrap_or_else(|_| {
        info!("NPG_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect(url).await?;
    Ok(pool)
}
