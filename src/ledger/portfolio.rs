//! Portfolio aggregation shown on the dashboard.

use std::collections::HashMap;

use serde::Serialize;

use super::Transaction;

/// Position on a single asset.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub symbol: String,
    pub name: String,
    pub total_amount: f64,
    pub total_invested: f64,
    pub average_price: f64,
    pub current_price: f64,
    pub current_value: f64,
    pub pnl: f64,
    pub pnl_percentage: f64,
}

/// Totals over every holding.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub holdings: Vec<Holding>,
    pub total_invested: f64,
    pub total_current_value: f64,
    pub total_pnl: f64,
    pub total_pnl_percentage: f64,
    pub unique_assets: usize,
    pub transaction_count: usize,
}

fn percentage(pnl: f64, invested: f64) -> f64 {
    if invested > 0.0 { pnl / invested * 100.0 } else { 0.0 }
}

/// Aggregate `transactions` using USD `prices` keyed by lowercase asset
/// name. Unknown assets are valued at 0.
pub fn summarize(transactions: &[Transaction], prices: &HashMap<String, f64>) -> Portfolio {
    let mut holdings: Vec<Holding> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for transaction in transactions {
        let key = transaction.crypto_symbol.to_lowercase();
        let current_price = prices
            .get(&transaction.crypto_name.to_lowercase())
            .copied()
            .unwrap_or_default();

        let position = *index.entry(key).or_insert_with(|| {
            holdings.push(Holding {
                symbol: transaction.crypto_symbol.clone(),
                name: transaction.crypto_name.clone(),
                total_amount: 0.0,
                total_invested: 0.0,
                average_price: 0.0,
                current_price,
                current_value: 0.0,
                pnl: 0.0,
                pnl_percentage: 0.0,
            });
            holdings.len() - 1
        });

        let holding = &mut holdings[position];
        holding.total_amount += transaction.amount;
        holding.total_invested += transaction.amount * transaction.price_paid;
        holding.current_value += transaction.amount * current_price;
    }

    for holding in &mut holdings {
        holding.average_price = if holding.total_amount > 0.0 {
            holding.total_invested / holding.total_amount
        } else {
            0.0
        };
        holding.pnl = holding.current_value - holding.total_invested;
        holding.pnl_percentage = percentage(holding.pnl, holding.total_invested);
    }

    let total_invested: f64 = holdings.iter().map(|h| h.total_invested).sum();
    let total_current_value: f64 = holdings.iter().map(|h| h.current_value).sum();
    let total_pnl = total_current_value - total_invested;

    Portfolio {
        unique_assets: holdings.len(),
        transaction_count: transactions.len(),
        total_pnl_percentage: percentage(total_pnl, total_invested),
        total_invested,
        total_current_value,
        total_pnl,
        holdings,
    }
}
