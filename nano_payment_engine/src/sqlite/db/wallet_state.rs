use npg_common::RawAmount;
use sqlx::{Row, SqliteConnection};

use crate::{
    db_types::{BlockHash, NanoAddress, WalletState},
    traits::{PaymentGatewayError, UpdateWalletState},
};

/// Load an account's state, defaulting to `{balance: 0, frontier: None}` for an account with no chain yet.
pub async fn fetch_state(
    account: &NanoAddress,
    conn: &mut SqliteConnection,
) -> Result<WalletState, PaymentGatewayError> {
    let row = sqlx::query("SELECT balance, frontier FROM wallet_state WHERE account = $1")
        .bind(account)
        .fetch_optional(conn)
        .await?;
    match row {
        Some(row) => {
            let balance: String = row.get("balance");
            let balance = balance
                .parse::<RawAmount>()
                .map_err(|e| PaymentGatewayError::DatabaseError(format!("Corrupt wallet balance: {e}")))?;
            let frontier: Option<String> = row.get("frontier");
            Ok(WalletState { balance, frontier: frontier.map(BlockHash::from) })
        },
        None => Ok(WalletState::default()),
    }
}

/// Merge a partial update into the stored state in one atomic upsert. Unset fields keep their current value.
pub async fn update_state(
    account: &NanoAddress,
    update: UpdateWalletState,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    sqlx::query(
        r#"
            INSERT INTO wallet_state (account, balance, frontier, updated_at)
            VALUES ($1, COALESCE($2, '0'), $3, CURRENT_TIMESTAMP)
            ON CONFLICT (account) DO UPDATE SET
                balance = COALESCE($2, wallet_state.balance),
                frontier = COALESCE($3, wallet_state.frontier),
                updated_at = CURRENT_TIMESTAMP;
        "#,
    )
    .bind(account)
    .bind(update.balance.map(|b| b.to_string()))
    .bind(update.frontier)
    .execute(conn)
    .await?;
    Ok(())
}
