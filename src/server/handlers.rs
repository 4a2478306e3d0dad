use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use ethers::types::U256;
use serde::Deserialize;

use crate::billing_log::BillingOutcome;
use crate::chain;
use crate::error::BillingError;
use crate::keeper::TickSummary;
use crate::server::AppState;
use crate::subscriptions::NewSubscription;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/plans", get(list_plans))
        .route("/keeper/run", post(run_sweep))
        .route("/checkout/confirm", post(confirm_checkout))
        .route("/subscriptions/{id}", get(get_subscription))
        .route("/subscriptions/{id}/cancel", post(cancel_subscription))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_plans(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, BillingError> {
    let plans = state.plans.list_plans().await?;
    Ok(Json(serde_json::json!({ "plans": plans })))
}

/// Manual sweep trigger for operators; the recurring timer drives the same
/// entry point.
async fn run_sweep(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TickSummary>, BillingError> {
    let summary = state.keeper.run_once().await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmCheckoutRequest {
    pub tx_hash: String,
    pub wallet_address: String,
    pub plan_id: String,
}

/// Checkout confirmation: trust the claimed transaction hash only after the
/// verifier has confirmed it from chain data, then cross-check the decoded
/// amount against the plan quote and create the subscription.
async fn confirm_checkout(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfirmCheckoutRequest>,
) -> Result<Response, BillingError> {
    let plan = state
        .plans
        .get_plan(&payload.plan_id)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("plan {} not found", payload.plan_id)))?;
    let tx_hash = chain::parse_tx_hash(&payload.tx_hash)
        .map_err(|_| BillingError::BadRequest(format!("bad transaction hash: {}", payload.tx_hash)))?;
    let wallet = chain::parse_address(&payload.wallet_address).map_err(|_| {
        BillingError::BadRequest(format!("bad wallet address: {}", payload.wallet_address))
    })?;

    // One payment proof creates at most one subscription.
    let tx_hash_s = format!("{tx_hash:#x}");
    if state.billing_log.tx_hash_seen(&tx_hash_s).await? {
        return Err(BillingError::Conflict("transaction hash already used".into()));
    }

    let result = state
        .verifier
        .verify(tx_hash, wallet, U256::from(plan.onchain_plan_id))
        .await?;
    if !result.verified {
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(result)).into_response());
    }

    let quoted = U256::from(plan.amount);
    if result.amount != Some(quoted) {
        let reason = format!(
            "Amount mismatch: expected {}, got {}",
            quoted,
            result.amount.unwrap_or_default()
        );
        return Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "verified": false, "reason": reason })),
        )
            .into_response());
    }

    let subscription = state
        .subscriptions
        .create_subscription(NewSubscription {
            wallet_address: format!("{wallet:#x}"),
            plan_id: plan.id.clone(),
            token: plan.token,
            amount: plan.amount,
            next_payment_at: Utc::now() + Duration::seconds(plan.billing_interval_secs),
        })
        .await?;
    state
        .billing_log
        .insert_billing_log(&subscription.id, Some(&tx_hash_s), BillingOutcome::Success, None)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "verified": true, "subscription": subscription })),
    )
        .into_response())
}

async fn get_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, BillingError> {
    let subscription = state
        .subscriptions
        .get_subscription(&id)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("subscription {id} not found")))?;
    let billing_log = state.billing_log.list_billing_log(&id).await?;
    Ok(Json(serde_json::json!({
        "subscription": subscription,
        "billingLog": billing_log,
    })))
}

async fn cancel_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, BillingError> {
    let subscription = state.subscriptions.cancel_subscription(&id).await?;
    Ok(Json(serde_json::json!({ "subscription": subscription })))
}
