use std::collections::HashMap;

use actix_web::{get, post, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use aps::{callback, request, ApsError, Flow, PurchaseOutcome};

use crate::metrics;
use crate::orders::{self, RedirectOutcome};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostedFormRequest {
    pub order_no: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenizationFormRequest {
    pub language: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPurchaseRequest {
    pub order_no: String,
    pub token_name: String,
    pub card_security_code: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplePayPurchaseRequest {
    pub order_no: String,
    pub token: aps::ApplePayToken,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseResponse {
    error: bool,
    status: String,
    order_complete: bool,
    transaction_id: Option<String>,
    message: Option<String>,
    /// 3-D Secure challenge URL when the gateway put the payment on hold.
    redirect_url: Option<String>,
    expiry_date: Option<String>,
}

impl PurchaseResponse {
    fn from_outcome(outcome: &PurchaseOutcome) -> Self {
        PurchaseResponse {
            error: !outcome.is_order_complete(),
            status: outcome.status.clone(),
            order_complete: outcome.is_order_complete(),
            transaction_id: outcome.transaction_id.clone(),
            message: outcome.response_message.clone(),
            redirect_url: outcome.three_ds_url.clone(),
            expiry_date: outcome.expiry_date.clone(),
        }
    }
}

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "aps-storefront",
    }))
}

#[get("/metrics")]
pub async fn metrics_endpoint(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    match &state.metrics_token {
        Some(token) => {
            let authorized = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| aps::security::constant_time_eq(t.as_bytes(), token))
                .unwrap_or(false);

            if !authorized {
                return HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "unauthorized",
                    "message": "Valid Bearer token required for /metrics"
                }));
            }
        }
        None => {
            // No token configured — metrics are protected by default.
            let public_metrics = std::env::var("APS_PUBLIC_METRICS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false);
            if !public_metrics {
                return HttpResponse::Forbidden().json(serde_json::json!({
                    "error": "forbidden",
                    "message": "Set METRICS_TOKEN or APS_PUBLIC_METRICS=true to access /metrics"
                }));
            }
        }
    }
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::metrics_output())
}

/// Signed field set for the hosted payment form. The storefront posts
/// the fields to the gateway URL as a browser form submission.
#[post("/payments/hosted")]
pub async fn hosted_form(
    state: web::Data<AppState>,
    body: web::Json<HostedFormRequest>,
) -> HttpResponse {
    let Some(order) = state.orders.get(&body.order_no) else {
        return order_not_found(&body.order_no);
    };

    match request::hosted_request(state.config(), &order.payment_order()) {
        Ok(fields) => HttpResponse::Ok().json(serde_json::json!({
            "gatewayUrl": state.config().gateway_url,
            "fields": fields,
        })),
        Err(e) => signing_failure(e),
    }
}

/// Signed field set for the card tokenization iframe.
#[post("/payments/tokenization")]
pub async fn tokenization_form(
    state: web::Data<AppState>,
    body: web::Json<TokenizationFormRequest>,
) -> HttpResponse {
    match request::tokenization_request(state.config(), &body.language) {
        Ok(fields) => HttpResponse::Ok().json(serde_json::json!({
            "gatewayUrl": state.config().gateway_url,
            "fields": fields,
        })),
        Err(e) => signing_failure(e),
    }
}

/// Server-to-server purchase with a tokenized card.
#[post("/payments/card")]
pub async fn card_purchase(
    state: web::Data<AppState>,
    body: web::Json<CardPurchaseRequest>,
) -> HttpResponse {
    let Some(order) = state.orders.get(&body.order_no) else {
        return order_not_found(&body.order_no);
    };

    let signed = match request::card_request(
        state.config(),
        &order.payment_order(),
        &body.token_name,
        body.card_security_code.as_deref(),
    ) {
        Ok(signed) => signed,
        Err(e) => return signing_failure(e),
    };

    execute_purchase(&state, &order.order_no, &signed, Flow::Card, "card").await
}

/// Server-to-server Apple Pay purchase.
#[post("/payments/apple-pay")]
pub async fn apple_pay_purchase(
    state: web::Data<AppState>,
    body: web::Json<ApplePayPurchaseRequest>,
) -> HttpResponse {
    let Some(order) = state.orders.get(&body.order_no) else {
        return order_not_found(&body.order_no);
    };

    let signed =
        match request::apple_pay_request(state.config(), &order.payment_order(), &body.token) {
            Ok(signed) => signed,
            Err(e) => return signing_failure(e),
        };

    execute_purchase(&state, &order.order_no, &signed, Flow::ApplePay, "apple_pay").await
}

async fn execute_purchase(
    state: &AppState,
    order_no: &str,
    signed: &aps::SignatureParams,
    flow: Flow,
    flow_label: &str,
) -> HttpResponse {
    let start = std::time::Instant::now();
    let result = state.gateway.purchase(signed, flow).await;
    metrics::PURCHASE_LATENCY
        .with_label_values(&[flow_label])
        .observe(start.elapsed().as_secs_f64());

    match result {
        Ok(outcome) => {
            orders::apply_purchase_outcome(state.orders.as_ref(), order_no, &outcome);
            let label = if outcome.is_order_complete() {
                "success"
            } else {
                "rejected"
            };
            metrics::PURCHASES.with_label_values(&[flow_label, label]).inc();
            HttpResponse::Ok().json(PurchaseResponse::from_outcome(&outcome))
        }
        Err(ApsError::UnsafeCallback(reason)) => {
            metrics::PURCHASES
                .with_label_values(&[flow_label, "unsafe"])
                .inc();
            tracing::warn!(order_no, %reason, "gateway response could not be verified");
            HttpResponse::BadGateway().json(serde_json::json!({
                "error": "gateway response could not be verified"
            }))
        }
        Err(e) => {
            metrics::PURCHASES
                .with_label_values(&[flow_label, "error"])
                .inc();
            tracing::error!(order_no, error = %e, "gateway purchase failed");
            HttpResponse::BadGateway().json(serde_json::json!({
                "error": "gateway purchase failed"
            }))
        }
    }
}

/// Browser redirect back from the hosted form or 3-D Secure step.
/// Always answers with a redirect; unsafe or malformed callbacks send
/// the shopper to the cart without touching any order.
#[post("/payments/return")]
pub async fn handle_return(
    state: web::Data<AppState>,
    form: web::Form<HashMap<String, String>>,
) -> HttpResponse {
    let params = callback::params_from_form(&form);

    let verified = match callback::verify_callback(params, state.config().credentials(Flow::Card))
    {
        Ok(verified) => verified,
        Err(e) => {
            let result = match e {
                ApsError::UnsafeCallback(_) => "unsafe",
                _ => "malformed",
            };
            metrics::CALLBACKS
                .with_label_values(&["redirect", result])
                .inc();
            tracing::warn!(error = %e, "redirect callback rejected");
            return redirect_to(&state.cart_url);
        }
    };
    metrics::CALLBACKS
        .with_label_values(&["redirect", "verified"])
        .inc();

    match orders::reconcile_redirect(state.orders.as_ref(), &verified) {
        RedirectOutcome::Confirmed {
            order_no,
            order_token,
        } => redirect_to(&format!(
            "{}?orderNo={order_no}&token={order_token}",
            state.confirmation_url
        )),
        RedirectOutcome::Failed | RedirectOutcome::Unknown => redirect_to(&state.cart_url),
    }
}

/// Direct server notification (webhook) from the gateway. 204 tells
/// APS the event is consumed; 5xx makes it redeliver.
#[post("/payments/notification")]
pub async fn handle_notification(
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    let params = match callback::params_from_json(&body) {
        Ok(params) => params,
        Err(e) => {
            metrics::CALLBACKS
                .with_label_values(&["notification", "malformed"])
                .inc();
            tracing::warn!(error = %e, "notification body rejected");
            return HttpResponse::BadRequest().json(serde_json::json!({
                "success": false,
                "error": "malformed payload"
            }));
        }
    };

    let verified = match callback::verify_callback(params, state.config().credentials(Flow::Card))
    {
        Ok(verified) => verified,
        Err(ApsError::UnsafeCallback(reason)) => {
            metrics::CALLBACKS
                .with_label_values(&["notification", "unsafe"])
                .inc();
            tracing::warn!(%reason, "unverifiable notification discarded");
            return HttpResponse::Unauthorized().json(serde_json::json!({
                "success": false,
                "error": "notification could not be verified"
            }));
        }
        Err(e) => {
            metrics::CALLBACKS
                .with_label_values(&["notification", "malformed"])
                .inc();
            tracing::warn!(error = %e, "notification rejected");
            return HttpResponse::BadRequest().json(serde_json::json!({
                "success": false,
                "error": "malformed payload"
            }));
        }
    };
    metrics::CALLBACKS
        .with_label_values(&["notification", "verified"])
        .inc();

    let outcome = orders::reconcile_notification(state.orders.as_ref(), &verified);
    if outcome.http_status == 204 {
        HttpResponse::NoContent().finish()
    } else {
        tracing::error!(
            merchant_reference = %verified.merchant_reference,
            error = outcome.error.as_deref().unwrap_or("unknown"),
            "notification reconciliation failed"
        );
        HttpResponse::InternalServerError().json(serde_json::json!({
            "success": false,
            "error": outcome.error,
        }))
    }
}

fn redirect_to(url: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .insert_header(("Location", url))
        .finish()
}

fn order_not_found(order_no: &str) -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({
        "error": format!("order not found: {order_no}")
    }))
}

fn signing_failure(e: ApsError) -> HttpResponse {
    // An unsigned request must never be sent; surface as a hard error.
    tracing::error!(error = %e, "request signing failed");
    HttpResponse::InternalServerError().json(serde_json::json!({
        "error": "request signing failed"
    }))
}
