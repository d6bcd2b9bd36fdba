use sqlx::{Postgres, Row, Transaction};

/// Ledger failures. `InsufficientFunds` and `WalletNotFound` leave the wallet
/// row untouched; the caller decides whether to roll the surrounding
/// transaction back.
#[derive(Debug)]
pub enum LedgerError {
    WalletNotFound,
    InsufficientFunds,
    InvalidAmount,
    Db(sqlx::Error),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::WalletNotFound => write!(f, "wallet not found"),
            LedgerError::InsufficientFunds => write!(f, "insufficient funds"),
            LedgerError::InvalidAmount => write!(f, "invalid amount"),
            LedgerError::Db(e) => write!(f, "database error: {e}"),
        }
    }
}

async fn lock_balance(
    tx: &mut Transaction<'_, Postgres>,
    wallets: &str,
    rider_id: &str,
) -> Result<i64, LedgerError> {
    let row = sqlx::query(&format!(
        "SELECT balance_points FROM {wallets} WHERE rider_id=$1 FOR UPDATE"
    ))
    .bind(rider_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(LedgerError::Db)?
    .ok_or(LedgerError::WalletNotFound)?;
    Ok(row.try_get("balance_points").unwrap_or(0))
}

async fn write_balance(
    tx: &mut Transaction<'_, Postgres>,
    wallets: &str,
    rider_id: &str,
    balance: i64,
) -> Result<(), LedgerError> {
    sqlx::query(&format!(
        "UPDATE {wallets} SET balance_points=$1 WHERE rider_id=$2"
    ))
    .bind(balance)
    .bind(rider_id)
    .execute(&mut **tx)
    .await
    .map_err(LedgerError::Db)?;
    Ok(())
}

/// Subtracts `amount` from the rider's balance and returns the new balance.
/// The row stays locked until the caller's transaction ends, so a concurrent
/// debit cannot pass the balance check on the same funds. Zero is a no-op
/// that still reports the current balance.
pub async fn debit(
    tx: &mut Transaction<'_, Postgres>,
    wallets: &str,
    rider_id: &str,
    amount: i64,
) -> Result<i64, LedgerError> {
    if amount < 0 {
        return Err(LedgerError::InvalidAmount);
    }
    let balance = lock_balance(tx, wallets, rider_id).await?;
    if amount == 0 {
        return Ok(balance);
    }
    if balance < amount {
        return Err(LedgerError::InsufficientFunds);
    }
    let new_balance = balance - amount;
    write_balance(tx, wallets, rider_id, new_balance).await?;
    Ok(new_balance)
}

/// Adds `amount` to the rider's balance and returns the new balance.
pub async fn credit(
    tx: &mut Transaction<'_, Postgres>,
    wallets: &str,
    rider_id: &str,
    amount: i64,
) -> Result<i64, LedgerError> {
    if amount < 0 {
        return Err(LedgerError::InvalidAmount);
    }
    let balance = lock_balance(tx, wallets, rider_id).await?;
    if amount == 0 {
        return Ok(balance);
    }
    let new_balance = balance.checked_add(amount).ok_or(LedgerError::InvalidAmount)?;
    write_balance(tx, wallets, rider_id, new_balance).await?;
    Ok(new_balance)
}
