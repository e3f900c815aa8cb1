//! Payment sidecar: thin HTTP proxies in front of the subscription
//! provider's REST API, plus the signature-verified webhook receiver.
//!
//! Plan gating elsewhere in the app consults these endpoints; the report
//! engine itself never calls them.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Provider REST base, e.g. https://api.stripe.com
    pub api_base: String,
    pub secret_key: String,
    pub webhook_secret: String,
}

impl BillingConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            api_base: std::env::var("PAYMENT_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            secret_key: std::env::var("PAYMENT_SECRET_KEY")?,
            webhook_secret: std::env::var("PAYMENT_WEBHOOK_SECRET")?,
        })
    }
}

#[derive(Clone)]
pub struct BillingState {
    pub http: reqwest::Client,
    pub config: Arc<BillingConfig>,
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{0}")]
    BadRequest(String),

    #[error("provider call failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        match self {
            BillingError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            BillingError::Upstream(e) => {
                warn!("payment provider call failed: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "payment provider request failed",
                        "details": e.to_string()
                    })),
                )
                    .into_response()
            }
            BillingError::Internal(e) => {
                warn!("billing internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "internal error",
                        "details": e.to_string()
                    })),
                )
                    .into_response()
            }
        }
    }
}

pub fn build_router(state: BillingState) -> Router {
    Router::new()
        .route("/create-checkout-session", post(create_checkout_session))
        .route("/cancel-subscription", post(cancel_subscription))
        .route("/get-subscription", get(get_subscription))
        .route("/webhook", post(webhook))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCheckoutRequest {
    price_id: Option<String>,
    success_url: Option<String>,
    cancel_url: Option<String>,
}

async fn create_checkout_session(
    State(state): State<BillingState>,
    Json(body): Json<CreateCheckoutRequest>,
) -> Result<Json<Value>, BillingError> {
    let price_id = body
        .price_id
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| BillingError::BadRequest("missing priceId".to_string()))?;

    let form = [
        ("mode", "subscription".to_string()),
        ("line_items[0][price]", price_id),
        ("line_items[0][quantity]", "1".to_string()),
        (
            "success_url",
            body.success_url
                .unwrap_or_else(|| "https://example.invalid/success".to_string()),
        ),
        (
            "cancel_url",
            body.cancel_url
                .unwrap_or_else(|| "https://example.invalid/cancel".to_string()),
        ),
    ];

    let session: Value = state
        .http
        .post(format!("{}/v1/checkout/sessions", state.config.api_base))
        .basic_auth(&state.config.secret_key, None::<&str>)
        .form(&form)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(Json(json!({
        "url": session.get("url"),
        "sessionId": session.get("id")
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelSubscriptionRequest {
    subscription_id: Option<String>,
    cancel_immediately: Option<bool>,
}

async fn cancel_subscription(
    State(state): State<BillingState>,
    Json(body): Json<CancelSubscriptionRequest>,
) -> Result<Json<Value>, BillingError> {
    let subscription_id = body
        .subscription_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| BillingError::BadRequest("missing subscriptionId".to_string()))?;
    let url = format!(
        "{}/v1/subscriptions/{}",
        state.config.api_base, subscription_id
    );

    let request = if body.cancel_immediately.unwrap_or(false) {
        state.http.delete(url)
    } else {
        state
            .http
            .post(url)
            .form(&[("cancel_at_period_end", "true")])
    };
    let subscription: Value = request
        .basic_auth(&state.config.secret_key, None::<&str>)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(Json(json!({
        "success": true,
        "subscription": {
            "id": subscription.get("id"),
            "status": subscription.get("status"),
            "cancelAtPeriodEnd": subscription.get("cancel_at_period_end"),
            "currentPeriodEnd": subscription.get("current_period_end"),
            "canceledAt": subscription.get("canceled_at")
        }
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetSubscriptionQuery {
    customer_id: Option<String>,
}

async fn get_subscription(
    State(state): State<BillingState>,
    Query(query): Query<GetSubscriptionQuery>,
) -> Result<Json<Value>, BillingError> {
    let customer_id = query
        .customer_id
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| BillingError::BadRequest("missing customerId".to_string()))?;

    let listing: Value = state
        .http
        .get(format!("{}/v1/subscriptions", state.config.api_base))
        .basic_auth(&state.config.secret_key, None::<&str>)
        .query(&[
            ("customer", customer_id.as_str()),
            ("status", "all"),
            ("limit", "10"),
        ])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let empty = Vec::new();
    let subscriptions = listing
        .get("data")
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);
    let active = subscriptions.iter().find(|s| {
        matches!(
            s.get("status").and_then(|v| v.as_str()),
            Some("active") | Some("trialing")
        )
    });

    match active {
        Some(sub) => Ok(Json(json!({
            "hasActiveSubscription": true,
            "planId": sub.pointer("/items/data/0/price/id"),
            "status": sub.get("status"),
            "cancelAtPeriodEnd": sub.get("cancel_at_period_end"),
            "currentPeriodEnd": sub.get("current_period_end")
        }))),
        None => Ok(Json(json!({
            "hasActiveSubscription": false,
            "planId": null,
            "status": subscriptions
                .first()
                .and_then(|s| s.get("status"))
                .cloned()
                .unwrap_or(Value::Null)
        }))),
    }
}

async fn webhook(
    State(state): State<BillingState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, BillingError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| BillingError::BadRequest("missing signature header".to_string()))?;

    if !verify_signature(&body, signature, &state.config.webhook_secret) {
        return Err(BillingError::BadRequest(
            "webhook signature verification failed".to_string(),
        ));
    }

    let event: Value = serde_json::from_str(&body)
        .map_err(|e| BillingError::BadRequest(format!("event did not parse: {}", e)))?;
    let event_type = event
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");

    // TODO: persist entitlement changes for these events; today the daemon's
    // plan gate only reads live subscription status via /get-subscription.
    match event_type {
        "checkout.session.completed" => {
            info!(event = event_type, "checkout completed");
        }
        "customer.subscription.deleted" => {
            info!(event = event_type, "subscription deleted");
        }
        "invoice.payment_succeeded" => {
            info!(event = event_type, "invoice paid");
        }
        "invoice.payment_failed" => {
            warn!(event = event_type, "invoice payment failed");
        }
        other => {
            info!(event = other, "ignoring unhandled event type");
        }
    }

    Ok(Json(json!({ "received": true })))
}

/// Verifies a `t=<unix>,v1=<hex hmac>` style signature header against the
/// shared webhook secret: the signed payload is `"{t}.{body}"`.
pub fn verify_signature(payload: &str, header: &str, secret: &str) -> bool {
    let mut timestamp: Option<&str> = None;
    let mut candidates: Vec<&str> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("v1", v)) => candidates.push(v),
            _ => {}
        }
    }
    let (Some(timestamp), false) = (timestamp, candidates.is_empty()) else {
        return false;
    };

    let signed_payload = format!("{}.{}", timestamp, payload);
    candidates.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(signed_payload.as_bytes());
        mac.verify_slice(&expected).is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn sign(payload: &str, timestamp: &str, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    fn test_state() -> BillingState {
        BillingState {
            http: reqwest::Client::new(),
            config: Arc::new(BillingConfig {
                api_base: "http://127.0.0.1:1".to_string(),
                secret_key: "sk_test_dummy".to_string(),
                webhook_secret: "whsec_test".to_string(),
            }),
        }
    }

    #[test]
    fn signature_round_trip_verifies() {
        let payload = r#"{"type":"invoice.payment_succeeded"}"#;
        let header = sign(payload, "1724544000", "whsec_test");
        assert!(verify_signature(payload, &header, "whsec_test"));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let header = sign(r#"{"a":1}"#, "1724544000", "whsec_test");
        assert!(!verify_signature(r#"{"a":2}"#, &header, "whsec_test"));
        assert!(!verify_signature(r#"{"a":1}"#, &header, "whsec_other"));
        assert!(!verify_signature(r#"{"a":1}"#, "garbage", "whsec_test"));
    }

    #[tokio::test]
    async fn checkout_without_price_id_is_bad_request() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::post("/create-checkout-session")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_subscription_requires_customer_id() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::get("/get-subscription").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_rejects_bad_signature() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::post("/webhook")
                    .header("stripe-signature", "t=1,v1=deadbeef")
                    .body(Body::from(r#"{"type":"checkout.session.completed"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_accepts_valid_signature() {
        let app = build_router(test_state());
        let payload = r#"{"type":"customer.subscription.deleted"}"#;
        let header = sign(payload, "1724544000", "whsec_test");
        let response = app
            .oneshot(
                Request::post("/webhook")
                    .header("stripe-signature", header)
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_method_is_405() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::get("/webhook").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
