//! Portfolio transactions of users.
pub mod portfolio;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::clock::Clock;
use crate::database::Database;
use crate::error::{Result, ServerError};

/// USD to BRL rate used when none usable is supplied.
pub const FALLBACK_USD_BRL_RATE: f64 = 5.5;

/// Currency a price was entered in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Usd,
    Brl,
}

/// Rate to use for conversions. Missing, null, negative or non-finite
/// rates fall back to [`FALLBACK_USD_BRL_RATE`].
pub fn effective_rate(rate: Option<f64>) -> f64 {
    match rate {
        Some(rate) if rate.is_finite() && rate > 0.0 => rate,
        _ => FALLBACK_USD_BRL_RATE,
    }
}

/// Convert a unit price to USD.
pub fn normalize_price(price: f64, currency: Currency, rate: Option<f64>) -> f64 {
    match currency {
        Currency::Usd => price,
        Currency::Brl => price / effective_rate(rate),
    }
}

/// Transaction as saved on database. `price_paid` is a USD unit price.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub crypto_symbol: String,
    pub crypto_name: String,
    pub amount: f64,
    pub price_paid: f64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Mutable part of a [`Transaction`].
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionUpdate {
    pub amount: f64,
    pub price_paid: f64,
    pub comment: Option<String>,
}

/// Body to record a transaction.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    #[validate(length(min = 1, max = 20, message = "Symbol is required."))]
    pub crypto_symbol: String,
    #[validate(length(min = 1, max = 100, message = "Name is required."))]
    pub crypto_name: String,
    #[validate(range(exclusive_min = 0.0, message = "Amount must be positive."))]
    pub amount: f64,
    #[validate(range(min = 0.0, message = "Price cannot be negative."))]
    pub price_per_unit: f64,
    pub currency: Currency,
    pub usd_brl_rate: Option<f64>,
    #[validate(length(max = 500, message = "Comment is too long."))]
    pub comment: Option<String>,
}

/// Body to edit a transaction.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EditTransaction {
    #[validate(range(exclusive_min = 0.0, message = "Amount must be positive."))]
    pub amount: f64,
    #[validate(range(min = 0.0, message = "Price cannot be negative."))]
    pub price_per_unit: f64,
    pub currency: Currency,
    pub usd_brl_rate: Option<f64>,
    #[validate(length(max = 500, message = "Comment is too long."))]
    pub comment: Option<String>,
}

fn transaction_not_found() -> ServerError {
    ServerError::field("id", "not_found", "Transaction not found.")
}

fn clean_comment(comment: Option<&str>) -> Option<String> {
    comment
        .map(str::trim)
        .filter(|comment| !comment.is_empty())
        .map(ToOwned::to_owned)
}

/// Record a transaction for `user_id`.
pub async fn create(
    db: &Database,
    clock: &dyn Clock,
    user_id: Uuid,
    body: &NewTransaction,
) -> Result<Transaction> {
    let crypto_symbol = body.crypto_symbol.trim().to_uppercase();
    let crypto_name = body.crypto_name.trim().to_owned();
    if crypto_symbol.is_empty() || crypto_name.is_empty() {
        return Err(ServerError::field(
            "cryptoSymbol",
            "required",
            "Every required field must be filled.",
        ));
    }

    let transaction = Transaction {
        id: Uuid::new_v4(),
        user_id,
        crypto_symbol,
        crypto_name,
        amount: body.amount,
        price_paid: normalize_price(body.price_per_unit, body.currency, body.usd_brl_rate),
        comment: clean_comment(body.comment.as_deref()),
        created_at: clock.now(),
        updated_at: None,
    };

    db.transactions.insert(&transaction).await?;
    tracing::debug!(transaction_id = %transaction.id, %user_id, "transaction recorded");

    Ok(transaction)
}

/// Edit a transaction owned by `user_id`.
pub async fn update(
    db: &Database,
    clock: &dyn Clock,
    user_id: Uuid,
    id: Uuid,
    body: &EditTransaction,
) -> Result<Transaction> {
    let update = TransactionUpdate {
        amount: body.amount,
        price_paid: normalize_price(body.price_per_unit, body.currency, body.usd_brl_rate),
        comment: clean_comment(body.comment.as_deref()),
    };

    db.transactions
        .update(id, user_id, &update, clock.now())
        .await?
        .ok_or_else(transaction_not_found)
}

/// Delete a transaction owned by `user_id`.
pub async fn delete(db: &Database, user_id: Uuid, id: Uuid) -> Result<()> {
    if !db.transactions.delete(id, user_id).await? {
        return Err(transaction_not_found());
    }

    Ok(())
}
