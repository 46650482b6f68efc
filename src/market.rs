//! Market data: asset prices from CoinGecko and the USD-BRL rate from
//! AwesomeAPI.
//!
//! Upstream failures never reach callers. They are logged and turn into an
//! empty result or the fallback rate.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::Market as MarketConfig;
use crate::ledger::{FALLBACK_USD_BRL_RATE, effective_rate};

const TOP_ASSETS: &str = "200";
const TOP_ASSETS_TTL: Duration = Duration::from_secs(5 * 60);
const PRICES_TTL: Duration = Duration::from_secs(60);
const RATE_TTL: Duration = Duration::from_secs(5 * 60);
/// How long a failed upstream call is remembered.
const FAILURE_TTL: Duration = Duration::from_secs(30);
/// Shorter queries match nothing.
const MIN_SEARCH_LENGTH: usize = 2;

#[derive(thiserror::Error, Debug)]
pub enum MarketError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid exchange rate: {0}")]
    InvalidRate(String),
}

/// Listed asset, as returned by `/coins/markets`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct Asset {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: Option<f64>,
    pub market_cap_rank: Option<u32>,
    pub price_change_percentage_24h: Option<f64>,
    pub image: Option<String>,
}

/// USD quote, as returned by `/simple/price`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub usd: f64,
    pub usd_24h_change: Option<f64>,
}

#[derive(Deserialize)]
struct ExchangeRate {
    #[serde(rename = "USDBRL")]
    usd_brl: Bid,
}

#[derive(Deserialize)]
struct Bid {
    bid: String,
}

/// Port to market data.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Top assets by market capitalization.
    async fn top_assets(&self) -> Vec<Asset>;

    /// Quotes keyed by asset ID.
    async fn prices(&self, ids: &[String]) -> HashMap<String, Quote>;

    /// How many BRL one USD buys.
    async fn usd_brl_rate(&self) -> f64;
}

/// Assets whose name or symbol contains `query`, case-insensitively.
pub fn filter_assets(assets: Vec<Asset>, query: &str) -> Vec<Asset> {
    let query = query.trim().to_lowercase();
    if query.chars().count() < MIN_SEARCH_LENGTH {
        return Vec::new();
    }

    assets
        .into_iter()
        .filter(|asset| {
            asset.name.to_lowercase().contains(&query)
                || asset.symbol.to_lowercase().contains(&query)
        })
        .collect()
}

/// Search among top assets.
pub async fn search(market: &dyn MarketData, query: &str) -> Vec<Asset> {
    if query.trim().chars().count() < MIN_SEARCH_LENGTH {
        return Vec::new();
    }

    filter_assets(market.top_assets().await, query)
}

struct Cached<T> {
    at: Instant,
    ttl: Duration,
    value: T,
}

impl<T: Clone> Cached<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            at: Instant::now(),
            ttl,
            value,
        }
    }

    fn fresh(&self) -> Option<T> {
        (self.at.elapsed() < self.ttl).then(|| self.value.clone())
    }
}

/// HTTP client with in-memory caches.
///
/// Locks only guard the caches, never an upstream call. Concurrent misses
/// may fetch the same data twice; the last answer wins.
pub struct MarketClient {
    client: reqwest::Client,
    coingecko_url: String,
    exchange_rate_url: String,
    top: Mutex<Option<Cached<Vec<Asset>>>>,
    /// `None` marks an ID with no known quote.
    quotes: Mutex<HashMap<String, Cached<Option<Quote>>>>,
    rate: Mutex<Option<Cached<f64>>>,
}

impl MarketClient {
    /// Create a new [`MarketClient`].
    pub fn new(config: &MarketConfig) -> Result<Self, MarketError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .user_agent(concat!("coinfolio/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            coingecko_url: config.coingecko_url.trim_end_matches('/').to_owned(),
            exchange_rate_url: config.exchange_rate_url.clone(),
            top: Mutex::new(None),
            quotes: Mutex::new(HashMap::new()),
            rate: Mutex::new(None),
        })
    }

    async fn fetch_top_assets(&self) -> Result<Vec<Asset>, MarketError> {
        let assets = self
            .client
            .get(format!("{}/coins/markets", self.coingecko_url))
            .query(&[
                ("vs_currency", "usd"),
                ("order", "market_cap_desc"),
                ("per_page", TOP_ASSETS),
                ("page", "1"),
                ("sparkline", "false"),
                ("price_change_percentage", "24h"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(assets)
    }

    async fn fetch_prices(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Quote>, MarketError> {
        let quotes = self
            .client
            .get(format!("{}/simple/price", self.coingecko_url))
            .query(&[
                ("ids", ids.join(",").as_str()),
                ("vs_currencies", "usd"),
                ("include_24hr_change", "true"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(quotes)
    }

    async fn fetch_rate(&self) -> Result<f64, MarketError> {
        let rate: ExchangeRate = self
            .client
            .get(&self.exchange_rate_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match rate.usd_brl.bid.trim().parse::<f64>() {
            Ok(bid) if bid.is_finite() && bid > 0.0 => Ok(bid),
            _ => Err(MarketError::InvalidRate(rate.usd_brl.bid)),
        }
    }
}

#[async_trait]
impl MarketData for MarketClient {
    async fn top_assets(&self) -> Vec<Asset> {
        if let Some(assets) = self.top.lock().await.as_ref().and_then(Cached::fresh) {
            return assets;
        }

        let cached = match self.fetch_top_assets().await {
            Ok(assets) => Cached::new(assets, TOP_ASSETS_TTL),
            Err(err) => {
                tracing::error!(error = %err, "cannot fetch top assets");
                Cached::new(Vec::new(), FAILURE_TTL)
            },
        };

        let assets = cached.value.clone();
        *self.top.lock().await = Some(cached);
        assets
    }

    async fn prices(&self, ids: &[String]) -> HashMap<String, Quote> {
        let mut prices = HashMap::new();
        let mut missing = Vec::new();

        {
            let quotes = self.quotes.lock().await;
            for id in ids {
                match quotes.get(id).and_then(Cached::fresh) {
                    Some(Some(quote)) => {
                        prices.insert(id.clone(), quote);
                    },
                    Some(None) => {},
                    None if !missing.contains(id) => missing.push(id.clone()),
                    None => {},
                }
            }
        }

        if missing.is_empty() {
            return prices;
        }

        let (mut fetched, ttl) = match self.fetch_prices(&missing).await {
            Ok(fetched) => (fetched, PRICES_TTL),
            Err(err) => {
                tracing::error!(error = %err, ids = ?missing, "cannot fetch prices");
                (HashMap::new(), FAILURE_TTL)
            },
        };

        let mut quotes = self.quotes.lock().await;
        for id in missing {
            let quote = fetched.remove(&id);
            if let Some(quote) = quote {
                prices.insert(id.clone(), quote);
            }
            quotes.insert(id, Cached::new(quote, ttl));
        }

        prices
    }

    async fn usd_brl_rate(&self) -> f64 {
        if let Some(value) = self.rate.lock().await.as_ref().and_then(Cached::fresh) {
            return value;
        }

        let cached = match self.fetch_rate().await {
            Ok(value) => Cached::new(effective_rate(Some(value)), RATE_TTL),
            Err(err) => {
                tracing::error!(error = %err, "cannot fetch USD-BRL rate, using fallback");
                Cached::new(FALLBACK_USD_BRL_RATE, FAILURE_TTL)
            },
        };

        let value = cached.value;
        *self.rate.lock().await = Some(cached);
        value
    }
}

/// Fixed market data.
#[cfg(test)]
#[derive(Default)]
pub struct StaticMarket {
    pub assets: Vec<Asset>,
    pub prices: HashMap<String, Quote>,
    pub rate: Option<f64>,
}

#[cfg(test)]
#[async_trait]
impl MarketData for StaticMarket {
    async fn top_assets(&self) -> Vec<Asset> {
        self.assets.clone()
    }

    async fn prices(&self, ids: &[String]) -> HashMap<String, Quote> {
        ids.iter()
            .filter_map(|id| self.prices.get(id).map(|quote| (id.clone(), *quote)))
            .collect()
    }

    async fn usd_brl_rate(&self) -> f64 {
        effective_rate(self.rate)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Json;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;

    pub(crate) fn asset(id: &str, symbol: &str, name: &str) -> Asset {
        Asset {
            id: id.into(),
            symbol: symbol.into(),
            name: name.into(),
            current_price: Some(1.0),
            market_cap_rank: Some(1),
            price_change_percentage_24h: None,
            image: None,
        }
    }

    #[test]
    fn test_filter_assets() {
        let assets = vec![
            asset("bitcoin", "btc", "Bitcoin"),
            asset("bitcoin-cash", "bch", "Bitcoin Cash"),
            asset("ethereum", "eth", "Ethereum"),
        ];

        assert_eq!(filter_assets(assets.clone(), "BIT").len(), 2);
        assert_eq!(filter_assets(assets.clone(), "eth")[0].id, "ethereum");
        assert!(filter_assets(assets.clone(), "b").is_empty());
        assert!(filter_assets(assets, "doge").is_empty());
    }

    #[test]
    fn test_asset_wire_format() {
        let json = r#"{"id":"bitcoin","symbol":"btc","name":"Bitcoin","current_price":67000.5,"market_cap_rank":1,"price_change_percentage_24h":-1.2,"image":null,"total_volume":1}"#;
        let asset: Asset = serde_json::from_str(json).unwrap();
        assert_eq!(asset.current_price, Some(67000.5));

        let out = serde_json::to_value(&asset).unwrap();
        assert_eq!(out["marketCapRank"], 1);
    }

    async fn upstream(hits: Arc<AtomicUsize>) -> String {
        let markets = {
            let hits = Arc::clone(&hits);
            move || {
                hits.fetch_add(1, Ordering::SeqCst);
                async {
                    Json(serde_json::json!([{
                        "id": "bitcoin", "symbol": "btc", "name": "Bitcoin",
                        "current_price": 100.0, "market_cap_rank": 1,
                        "price_change_percentage_24h": 0.5, "image": null
                    }]))
                }
            }
        };
        let prices = || async {
            Json(serde_json::json!({
                "bitcoin": { "usd": 100.0, "usd_24h_change": 0.5 }
            }))
        };

        let router = Router::new()
            .route("/api/v3/coins/markets", get(markets))
            .route("/api/v3/simple/price", get(prices))
            .route("/rate", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_client_caches_and_degrades() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = upstream(Arc::clone(&hits)).await;
        let client = MarketClient::new(&MarketConfig {
            coingecko_url: format!("{base}/api/v3/"),
            exchange_rate_url: format!("{base}/rate"),
            timeout: 2,
        })
        .unwrap();

        assert_eq!(client.top_assets().await.len(), 1);
        assert_eq!(client.top_assets().await.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let prices = client
            .prices(&["bitcoin".to_owned(), "unknown".to_owned()])
            .await;
        assert_eq!(prices["bitcoin"].usd, 100.0);
        assert!(!prices.contains_key("unknown"));

        assert_eq!(client.usd_brl_rate().await, FALLBACK_USD_BRL_RATE);
        assert_eq!(search(&client, "btc").await[0].id, "bitcoin");
    }

    #[tokio::test]
    async fn test_slow_upstream_does_not_queue_callers() {
        let hits = Arc::new(AtomicUsize::new(0));
        let prices = {
            let hits = Arc::clone(&hits);
            move || {
                hits.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    Json(serde_json::json!({}))
                }
            }
        };
        let router = Router::new().route("/simple/price", get(prices));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let client = Arc::new(
            MarketClient::new(&MarketConfig {
                coingecko_url: format!("http://{addr}"),
                exchange_rate_url: format!("http://{addr}/rate"),
                timeout: 1,
            })
            .unwrap(),
        );

        let started = Instant::now();
        let calls: Vec<_> = ["bitcoin", "ethereum", "solana", "cardano"]
            .into_iter()
            .map(|id| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.prices(&[id.to_owned()]).await })
            })
            .collect();
        for call in calls {
            assert!(call.await.unwrap().is_empty());
        }
        assert!(started.elapsed() < Duration::from_millis(2500));
        assert_eq!(hits.load(Ordering::SeqCst), 4);

        // The failure is remembered for a while.
        let started = Instant::now();
        assert!(client.prices(&["bitcoin".to_owned()]).await.is_empty());
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_unreachable_upstream() {
        let client = MarketClient::new(&MarketConfig {
            coingecko_url: "http://127.0.0.1:9".into(),
            exchange_rate_url: "http://127.0.0.1:9".into(),
            timeout: 1,
        })
        .unwrap();

        assert!(client.top_assets().await.is_empty());
        assert!(client.prices(&["bitcoin".to_owned()]).await.is_empty());
        assert_eq!(client.usd_brl_rate().await, FALLBACK_USD_BRL_RATE);
    }
}
