//! User dashboard: portfolio, market and invitations.

use std::collections::{BTreeSet, HashMap};

use axum::Json;
use axum::Router;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use serde::{Deserialize, Serialize};

use crate::access_code::{self, AccessCode};
use crate::ledger::portfolio::{self, Portfolio};
use crate::ledger::{self, EditTransaction, NewTransaction, Transaction};
use crate::market::{self, Asset};
use crate::notification::{self, Notification};
use crate::router::admin::IssueCode;
use crate::router::{IdPath, Valid};
use crate::session::UserSession;
use crate::{AppState, ServerError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub transactions: Vec<Transaction>,
    pub portfolio: Portfolio,
    pub notifications: Vec<Notification>,
    pub codes: Vec<AccessCode>,
    pub codes_created_count: i32,
    pub usd_brl_rate: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct MarketQuery {
    pub search: Option<String>,
}

/// Data backing the new transaction form.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionForm {
    pub assets: Vec<Asset>,
    pub usd_brl_rate: f64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(overview))
        .route("/market", get(market))
        .route("/transactions", post(create_transaction))
        .route(
            "/transactions/{id}",
            patch(update_transaction).delete(delete_transaction),
        )
        .route("/codes", post(issue_code))
        .route("/codes/{id}/deactivate", post(deactivate_code))
}

/// `GET /dashboard`.
pub async fn overview(
    State(state): State<AppState>,
    UserSession(session): UserSession,
) -> Result<Json<Overview>, ServerError> {
    let user = state
        .db
        .principals
        .find_by_id(session.user_id)
        .await?
        .ok_or(ServerError::AccessDenied)?;
    let transactions = state.db.transactions.list_by_user(user.id).await?;

    // Market IDs are lowercase asset names.
    let ids: Vec<String> = transactions
        .iter()
        .map(|transaction| transaction.crypto_name.to_lowercase())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let prices: HashMap<String, f64> = if ids.is_empty() {
        HashMap::new()
    } else {
        state
            .market
            .prices(&ids)
            .await
            .into_iter()
            .map(|(id, quote)| (id, quote.usd))
            .collect()
    };

    Ok(Json(Overview {
        portfolio: portfolio::summarize(&transactions, &prices),
        transactions,
        notifications: notification::for_users(&state.db).await?,
        codes: state.db.codes.list_by_user(user.id).await?,
        codes_created_count: user.codes_created_count,
        usd_brl_rate: state.market.usd_brl_rate().await,
    }))
}

/// `GET /dashboard/market?search=`.
pub async fn market(
    State(state): State<AppState>,
    query: Result<Query<MarketQuery>, QueryRejection>,
) -> Result<Json<Vec<Asset>>, ServerError> {
    let Query(query) = query?;

    let assets = match query.search.as_deref() {
        Some(search) => market::search(state.market.as_ref(), search).await,
        None => state.market.top_assets().await,
    };

    Ok(Json(assets))
}

pub async fn create_transaction(
    State(state): State<AppState>,
    UserSession(session): UserSession,
    Valid(body): Valid<NewTransaction>,
) -> Result<(StatusCode, Json<Transaction>), ServerError> {
    let transaction =
        ledger::create(&state.db, state.clock.as_ref(), session.user_id, &body).await?;

    Ok((StatusCode::CREATED, Json(transaction)))
}

pub async fn update_transaction(
    State(state): State<AppState>,
    UserSession(session): UserSession,
    IdPath(id): IdPath,
    Valid(body): Valid<EditTransaction>,
) -> Result<Json<Transaction>, ServerError> {
    let transaction =
        ledger::update(&state.db, state.clock.as_ref(), session.user_id, id, &body)
            .await?;

    Ok(Json(transaction))
}

pub async fn delete_transaction(
    State(state): State<AppState>,
    UserSession(session): UserSession,
    IdPath(id): IdPath,
) -> Result<StatusCode, ServerError> {
    ledger::delete(&state.db, session.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn issue_code(
    State(state): State<AppState>,
    UserSession(session): UserSession,
    Valid(body): Valid<IssueCode>,
) -> Result<(StatusCode, Json<AccessCode>), ServerError> {
    let code =
        access_code::issue(&state.db, state.clock.as_ref(), &session, body.expires_at)
            .await?;

    Ok((StatusCode::CREATED, Json(code)))
}

pub async fn deactivate_code(
    State(state): State<AppState>,
    UserSession(session): UserSession,
    IdPath(id): IdPath,
) -> Result<StatusCode, ServerError> {
    access_code::deactivate(&state.db, &session, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /contributions/new`.
pub async fn contribution_form(
    State(state): State<AppState>,
    UserSession(_): UserSession,
) -> Json<ContributionForm> {
    Json(ContributionForm {
        assets: state.market.top_assets().await,
        usd_brl_rate: state.market.usd_brl_rate().await,
    })
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::principal::Role;
    use crate::router::tests::{cookie, json, seed, state};
    use crate::*;

    #[tokio::test]
    async fn test_dashboard_requires_user() {
        let state = state();
        let app = app(state.clone());
        let admin = seed(&state, "root", Role::Admin).await;

        let response = make_request(
            app,
            Method::GET,
            "/dashboard",
            Some(&cookie(&state, &admin)),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    }

    #[tokio::test]
    async fn test_portfolio_overview() {
        let state = state();
        let app = app(state.clone());
        let alice = seed(&state, "alice", Role::User).await;
        let cookie = cookie(&state, &alice);

        for (amount, price) in [(1.0, 100.0), (2.0, 200.0)] {
            let response = make_request(
                app.clone(),
                Method::POST,
                "/dashboard/transactions",
                Some(&cookie),
                json!({
                    "cryptoSymbol": "btc",
                    "cryptoName": "Bitcoin",
                    "amount": amount,
                    "pricePerUnit": price,
                    "currency": "USD",
                })
                .to_string(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response =
            make_request(app, Method::GET, "/dashboard", Some(&cookie), String::default())
                .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        assert_eq!(body["transactions"].as_array().unwrap().len(), 2);
        assert_eq!(body["transactions"][0]["cryptoSymbol"], "BTC");
        assert_eq!(body["usdBrlRate"], 5.0);
        assert_eq!(body["codesCreatedCount"], 0);

        let holding = &body["portfolio"]["holdings"][0];
        assert_eq!(holding["totalAmount"], 3.0);
        assert_eq!(holding["totalInvested"], 500.0);
        assert_eq!(holding["currentPrice"], 150.0);
        assert_eq!(holding["currentValue"], 450.0);
        assert_eq!(holding["pnl"], -50.0);
        assert_eq!(body["portfolio"]["uniqueAssets"], 1);
    }

    #[tokio::test]
    async fn test_brl_transaction_edit_and_delete() {
        let state = state();
        let app = app(state.clone());
        let alice = seed(&state, "alice", Role::User).await;
        let bob = seed(&state, "bob", Role::User).await;
        let cookie_alice = cookie(&state, &alice);

        let response = make_request(
            app.clone(),
            Method::POST,
            "/dashboard/transactions",
            Some(&cookie_alice),
            json!({
                "cryptoSymbol": "eth",
                "cryptoName": "Ethereum",
                "amount": 1.0,
                "pricePerUnit": 50.0,
                "currency": "BRL",
                "usdBrlRate": 5.0,
                "comment": "",
            })
            .to_string(),
        )
        .await;
        let transaction = json(response).await;
        assert_eq!(transaction["pricePaid"], 10.0);
        assert!(transaction["comment"].is_null());

        let path = format!("/dashboard/transactions/{}", transaction["id"].as_str().unwrap());
        let edit = json!({
            "amount": 2.0,
            "pricePerUnit": 12.0,
            "currency": "USD",
            "comment": "DCA",
        })
        .to_string();

        // Someone else's transaction is not found.
        let response = make_request(
            app.clone(),
            Method::PATCH,
            &path,
            Some(&cookie(&state, &bob)),
            edit.clone(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response =
            make_request(app.clone(), Method::PATCH, &path, Some(&cookie_alice), edit).await;
        assert_eq!(response.status(), StatusCode::OK);
        let transaction = json(response).await;
        assert_eq!(transaction["amount"], 2.0);
        assert_eq!(transaction["comment"], "DCA");
        assert!(!transaction["updatedAt"].is_null());

        let response = make_request(
            app.clone(),
            Method::DELETE,
            &path,
            Some(&cookie_alice),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response =
            make_request(app, Method::DELETE, &path, Some(&cookie_alice), String::default())
                .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_transaction() {
        let state = state();
        let app = app(state.clone());
        let alice = seed(&state, "alice", Role::User).await;

        let response = make_request(
            app,
            Method::POST,
            "/dashboard/transactions",
            Some(&cookie(&state, &alice)),
            json!({
                "cryptoSymbol": "btc",
                "cryptoName": "Bitcoin",
                "amount": 0.0,
                "pricePerUnit": -1.0,
                "currency": "USD",
            })
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["errors"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_market_search() {
        let state = state();
        let app = app(state.clone());
        let alice = seed(&state, "alice", Role::User).await;
        let cookie = cookie(&state, &alice);

        let response = make_request(
            app.clone(),
            Method::GET,
            "/dashboard/market",
            Some(&cookie),
            String::default(),
        )
        .await;
        assert_eq!(json(response).await.as_array().unwrap().len(), 2);

        let response = make_request(
            app.clone(),
            Method::GET,
            "/dashboard/market?search=ETH",
            Some(&cookie),
            String::default(),
        )
        .await;
        let assets = json(response).await;
        assert_eq!(assets.as_array().unwrap().len(), 1);
        assert_eq!(assets[0]["id"], "ethereum");

        let response = make_request(
            app,
            Method::GET,
            "/dashboard/market?search=e",
            Some(&cookie),
            String::default(),
        )
        .await;
        assert!(json(response).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_codes_quota() {
        let state = state();
        let app = app(state.clone());
        let alice = seed(&state, "alice", Role::User).await;
        let bob = seed(&state, "bob", Role::User).await;
        let cookie_alice = cookie(&state, &alice);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let response = make_request(
                app.clone(),
                Method::POST,
                "/dashboard/codes",
                Some(&cookie_alice),
                json!({}).to_string(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::CREATED);
            ids.push(json(response).await["id"].as_str().unwrap().to_owned());
        }

        let response = make_request(
            app.clone(),
            Method::POST,
            "/dashboard/codes",
            Some(&cookie_alice),
            json!({}).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let path = format!("/dashboard/codes/{}/deactivate", ids[0]);
        let response = make_request(
            app.clone(),
            Method::POST,
            &path,
            Some(&cookie(&state, &bob)),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = make_request(
            app.clone(),
            Method::POST,
            &path,
            Some(&cookie_alice),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response =
            make_request(app, Method::GET, "/dashboard", Some(&cookie_alice), String::default())
                .await;
        let body = json(response).await;
        assert_eq!(body["codesCreatedCount"], 3);
        assert_eq!(body["codes"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_promoted_user_cookie_loses_user_rights() {
        let state = state();
        let app = app(state.clone());
        let admin = seed(&state, "admin", Role::Admin).await;
        let alice = seed(&state, "alice", Role::User).await;
        let alice_cookie = cookie(&state, &alice);

        let promote = format!("/admin/users/{}/promote", alice.id);
        let response = make_request(
            app.clone(),
            Method::POST,
            &promote,
            Some(&cookie(&state, &admin)),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = make_request(
            app,
            Method::POST,
            "/dashboard/codes",
            Some(&alice_cookie),
            json!({}).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_contribution_form() {
        let state = state();
        let app = app(state.clone());
        let alice = seed(&state, "alice", Role::User).await;

        let response = make_request(
            app,
            Method::GET,
            "/contributions/new",
            Some(&cookie(&state, &alice)),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        assert_eq!(body["assets"].as_array().unwrap().len(), 2);
        assert_eq!(body["usdBrlRate"], 5.0);
    }
}
