//! Webhook ingress: signature verification, normalization and idempotent apply

#[path = "../common/mod.rs"]
mod common;

use common::*;

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;

async fn post_webhook(app: &Router, uri: &str, body: &str, headers: &[(&str, String)]) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, value);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();
    into_json(app.clone().oneshot(request).await.unwrap()).await
}

fn global_capture(event_id: &str, capture_id: &str, user_id: &str, item_id: &str, value: &str) -> String {
    json!({
        "id": event_id,
        "event_type": "PAYMENT.CAPTURE.COMPLETED",
        "create_time": chrono::Utc::now().to_rfc3339(),
        "resource": {
            "id": capture_id,
            "status": "COMPLETED",
            "amount": { "value": value, "currency_code": "USD" },
            "custom_id": format!("{}:{}", user_id, item_id)
        }
    })
    .to_string()
}

fn global_refund(event_id: &str, refund_id: &str, capture_id: &str, user_id: &str, item_id: &str, value: &str) -> String {
    json!({
        "id": event_id,
        "event_type": "PAYMENT.CAPTURE.REFUNDED",
        "create_time": chrono::Utc::now().to_rfc3339(),
        "resource": {
            "id": refund_id,
            "status": "COMPLETED",
            "amount": { "value": value, "currency_code": "USD" },
            "custom_id": format!("{}:{}", user_id, item_id),
            "links": [{ "rel": "up", "href": format!("https://api.paypal.test/v2/payments/captures/{}", capture_id) }]
        }
    })
    .to_string()
}

fn net_creator_revenue(state: &AppState, creator_id: &str, currency: &str) -> f64 {
    let conn = state.db.get().unwrap();
    reelpay::ledger::accrued_creator_revenue(&conn, creator_id, currency).unwrap()
}

fn domestic_paid(payment_id: &str, user_id: &str, item_id: &str, total: i64) -> String {
    json!({
        "type": "Transaction.Paid",
        "timestamp": now(),
        "data": {
            "paymentId": payment_id,
            "amount": { "total": total },
            "currency": "KRW",
            "customer": { "id": user_id },
            "customData": { "itemId": item_id }
        }
    })
    .to_string()
}

fn setup() -> (Router, AppState, Marketplace, tempfile::TempDir) {
    let (state, dir) = create_test_app_state();
    let m = {
        let conn = state.db.get().unwrap();
        create_marketplace(&conn)
    };
    (test_app(state.clone()), state, m, dir)
}

// ============ Global provider ============

mod global_tests {
    use super::*;

    #[tokio::test]
    async fn test_signed_capture_is_applied() {
        let (app, state, m, _dir) = setup();
        let body = global_capture("WH-1", "CAP-1", &m.viewer.id, &m.course.id, "100.00");
        let signature = sign_hex(PAYPAL_SECRET, body.as_bytes());

        let (status, json) = post_webhook(&app, "/webhooks/paypal", &body, &[("x-signature", signature)]).await;

        assert_eq!(status, StatusCode::OK, "response: {}", json);
        assert_eq!(json["result"], "applied");
        assert_eq!(json["entitlement_status"], "active");
        assert!(json["transaction_id"].is_string(), "settled into the ledger");

        let conn = state.db.get().unwrap();
        assert_eq!(queries::list_all_transactions(&conn).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_refund_reverses_capture_and_revokes_access() {
        let (app, state, m, _dir) = setup();
        let capture = global_capture("WH-1", "CAP-1", &m.viewer.id, &m.course.id, "100.00");
        let signature = sign_hex(PAYPAL_SECRET, capture.as_bytes());
        let (_, charged) = post_webhook(&app, "/webhooks/paypal", &capture, &[("x-signature", signature)]).await;
        assert!(net_creator_revenue(&state, &m.creator.id, "USD") > 0.0);

        let refund = global_refund("WH-2", "REF-1", "CAP-1", &m.viewer.id, &m.course.id, "100.00");
        let signature = sign_hex(PAYPAL_SECRET, refund.as_bytes());
        let (status, json) = post_webhook(&app, "/webhooks/paypal", &refund, &[("x-signature", signature.clone())]).await;

        assert_eq!(status, StatusCode::OK, "response: {}", json);
        assert_eq!(json["result"], "applied");
        assert_eq!(json["entitlement_status"], "canceled");
        assert_ne!(json["transaction_id"], charged["transaction_id"], "a new reversing entry");
        assert!(net_creator_revenue(&state, &m.creator.id, "USD").abs() < 1e-6, "revenue nets to zero");

        let (_, again) = post_webhook(&app, "/webhooks/paypal", &refund, &[("x-signature", signature)]).await;
        assert_eq!(again["result"], "already_processed");
        let conn = state.db.get().unwrap();
        assert_eq!(queries::list_all_transactions(&conn).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let (app, state, m, _dir) = setup();
        let body = global_capture("WH-1", "CAP-1", &m.viewer.id, &m.course.id, "100.00");
        let signature = sign_hex(PAYPAL_SECRET, body.as_bytes());

        let (_, first) = post_webhook(&app, "/webhooks/paypal", &body, &[("x-signature", signature.clone())]).await;
        let (status, second) = post_webhook(&app, "/webhooks/paypal", &body, &[("x-signature", signature)]).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["result"], "already_processed");
        assert_eq!(first["transaction_id"], second["transaction_id"]);

        let conn = state.db.get().unwrap();
        assert_eq!(queries::list_all_transactions(&conn).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_signature_is_unauthorized() {
        let (app, state, m, _dir) = setup();
        let body = global_capture("WH-1", "CAP-1", &m.viewer.id, &m.course.id, "100.00");
        let signature = sign_hex("some_other_secret", body.as_bytes());

        let (status, _) = post_webhook(&app, "/webhooks/paypal", &body, &[("x-signature", signature)]).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let conn = state.db.get().unwrap();
        assert!(queries::list_all_transactions(&conn).unwrap().is_empty(), "nothing applied");
    }

    #[tokio::test]
    async fn test_tampered_body_is_unauthorized() {
        let (app, _state, m, _dir) = setup();
        let body = global_capture("WH-1", "CAP-1", &m.viewer.id, &m.course.id, "100.00");
        let signature = sign_hex(PAYPAL_SECRET, body.as_bytes());
        let tampered = body.replace("100.00", "1.00");

        let (status, _) = post_webhook(&app, "/webhooks/paypal", &tampered, &[("x-signature", signature)]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_signature_header_is_bad_request() {
        let (app, _state, m, _dir) = setup();
        let body = global_capture("WH-1", "CAP-1", &m.viewer.id, &m.course.id, "100.00");

        let (status, json) = post_webhook(&app, "/webhooks/paypal", &body, &[]).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["details"].as_str().unwrap().contains("x-signature"));
    }

    #[tokio::test]
    async fn test_unhandled_event_type_is_acknowledged() {
        let (app, _state, _m, _dir) = setup();
        let body = json!({ "id": "WH-9", "event_type": "CUSTOMER.DISPUTE.CREATED" }).to_string();
        let signature = sign_hex(PAYPAL_SECRET, body.as_bytes());

        let (status, json) = post_webhook(&app, "/webhooks/paypal", &body, &[("x-signature", signature)]).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["result"], "ignored");
    }

    #[tokio::test]
    async fn test_unknown_status_is_unprocessable() {
        let (app, _state, m, _dir) = setup();
        let body = global_capture("WH-1", "CAP-1", &m.viewer.id, &m.course.id, "100.00")
            .replace("\"COMPLETED\"", "\"PENDING\"");
        let signature = sign_hex(PAYPAL_SECRET, body.as_bytes());

        let (status, _) = post_webhook(&app, "/webhooks/paypal", &body, &[("x-signature", signature)]).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_unknown_user_is_bad_request() {
        let (app, state, m, _dir) = setup();
        let body = global_capture("WH-1", "CAP-1", "rp_usr_ghost", &m.course.id, "100.00");
        let signature = sign_hex(PAYPAL_SECRET, body.as_bytes());

        let (status, _) = post_webhook(&app, "/webhooks/paypal", &body, &[("x-signature", signature)]).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let conn = state.db.get().unwrap();
        let (events, _) = queries::list_payment_events_paginated(&conn, None, 10, 0).unwrap();
        assert!(events.is_empty(), "rejected events are not reserved");
    }
}

// ============ Domestic provider ============

mod domestic_tests {
    use super::*;

    fn standard_headers(body: &str, timestamp: i64) -> Vec<(&'static str, String)> {
        let ts = timestamp.to_string();
        vec![
            ("webhook-id", "msg_1".to_string()),
            ("webhook-signature", sign_standard(PORTONE_SECRET, "msg_1", &ts, body.as_bytes())),
            ("webhook-timestamp", ts),
        ]
    }

    #[tokio::test]
    async fn test_signed_payment_is_applied() {
        let (app, _state, m, _dir) = setup();
        let body = domestic_paid("pay-1", &m.viewer.id, &m.course.id, 12000);

        let (status, json) = post_webhook(&app, "/webhooks/portone", &body, &standard_headers(&body, now())).await;

        assert_eq!(status, StatusCode::OK, "response: {}", json);
        assert_eq!(json["result"], "applied");
        assert_eq!(json["entitlement_status"], "active");
    }

    #[tokio::test]
    async fn test_cancelled_transaction_reverses_payment() {
        let (app, state, m, _dir) = setup();
        let paid = domestic_paid("pay-1", &m.viewer.id, &m.course.id, 12000);
        post_webhook(&app, "/webhooks/portone", &paid, &standard_headers(&paid, now())).await;
        assert!(net_creator_revenue(&state, &m.creator.id, "KRW") > 0.0);

        let cancelled = paid
            .replace("Transaction.Paid", "Transaction.Cancelled")
            .replace("\"paymentId\"", "\"cancellationId\":\"cx-1\",\"paymentId\"");
        let (status, json) =
            post_webhook(&app, "/webhooks/portone", &cancelled, &standard_headers(&cancelled, now())).await;

        assert_eq!(status, StatusCode::OK, "response: {}", json);
        assert_eq!(json["result"], "applied", "not deduplicated against the payment");
        assert_eq!(json["entitlement_status"], "canceled");
        assert!(net_creator_revenue(&state, &m.creator.id, "KRW").abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_stale_timestamp_is_unauthorized() {
        let (app, _state, m, _dir) = setup();
        let body = domestic_paid("pay-1", &m.viewer.id, &m.course.id, 12000);

        let headers = standard_headers(&body, now() - 3600);
        let (status, _) = post_webhook(&app, "/webhooks/portone", &body, &headers).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED, "replayed deliveries are refused");
    }

    #[tokio::test]
    async fn test_missing_webhook_id_is_bad_request() {
        let (app, _state, m, _dir) = setup();
        let body = domestic_paid("pay-1", &m.viewer.id, &m.course.id, 12000);
        let headers: Vec<_> = standard_headers(&body, now())
            .into_iter()
            .filter(|(name, _)| *name != "webhook-id")
            .collect();

        let (status, _) = post_webhook(&app, "/webhooks/portone", &body, &headers).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_global_currency_rejected_for_domestic() {
        let (app, _state, m, _dir) = setup();
        let body = domestic_paid("pay-1", &m.viewer.id, &m.course.id, 12000).replace("KRW", "USD");

        let (status, _) = post_webhook(&app, "/webhooks/portone", &body, &standard_headers(&body, now())).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}

// ============ Payment confirmation ============

mod confirmation_tests {
    use super::*;

    fn confirmation(user_id: &str, item_id: &str) -> String {
        json!({
            "transaction_id": "txn_confirm_1",
            "status": "SUCCESS",
            "user_id": user_id,
            "item_id": item_id,
            "payment_method": "PayPal",
            "amount": 25.0,
            "currency": "USD",
            "timestamp": now()
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_confirmation_with_dedicated_secret() {
        let (app, _state, m, _dir) = setup();
        let body = confirmation(&m.viewer.id, &m.course.id);
        let signature = sign_hex(CONFIRMATION_SECRET, body.as_bytes());

        let (status, json) =
            post_webhook(&app, "/webhooks/payment-confirmation", &body, &[("x-signature", signature)]).await;

        assert_eq!(status, StatusCode::OK, "response: {}", json);
        assert_eq!(json["result"], "applied");
    }

    #[tokio::test]
    async fn test_confirmation_falls_back_to_provider_secret() {
        let (mut state, _dir) = create_test_app_state();
        state.webhook_secrets = Arc::new(WebhookSecrets {
            paypal: Some(PAYPAL_SECRET.to_string()),
            portone: Some(PORTONE_SECRET.to_string()),
            unified: None,
        });
        let m = {
            let conn = state.db.get().unwrap();
            create_marketplace(&conn)
        };
        let app = test_app(state);
        let body = confirmation(&m.viewer.id, &m.course.id);
        let signature = sign_hex(PAYPAL_SECRET, body.as_bytes());

        let (status, _) =
            post_webhook(&app, "/webhooks/payment-confirmation", &body, &[("x-signature", signature)]).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_confirmation_and_provider_webhook_share_key() {
        let (app, state, m, _dir) = setup();
        let body = confirmation(&m.viewer.id, &m.course.id);
        let signature = sign_hex(CONFIRMATION_SECRET, body.as_bytes());
        post_webhook(&app, "/webhooks/payment-confirmation", &body, &[("x-signature", signature)]).await;

        // The provider later reports the same capture.
        let webhook = global_capture("WH-2", "txn_confirm_1", &m.viewer.id, &m.course.id, "25.00");
        let signature = sign_hex(PAYPAL_SECRET, webhook.as_bytes());
        let (status, json) = post_webhook(&app, "/webhooks/paypal", &webhook, &[("x-signature", signature)]).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["result"], "already_processed");
        let conn = state.db.get().unwrap();
        assert_eq!(queries::list_all_transactions(&conn).unwrap().len(), 1);
    }
}

// ============ Secrets ============

mod secret_tests {
    use super::*;

    fn app_without_secrets(dev_mode: bool) -> (Router, Marketplace, tempfile::TempDir) {
        let (mut state, dir) = create_test_app_state();
        state.webhook_secrets = Arc::new(WebhookSecrets::default());
        state.dev_mode = dev_mode;
        let m = {
            let conn = state.db.get().unwrap();
            create_marketplace(&conn)
        };
        (test_app(state), m, dir)
    }

    #[tokio::test]
    async fn test_missing_secret_rejected_outside_dev_mode() {
        let (app, m, _dir) = app_without_secrets(false);
        let body = global_capture("WH-1", "CAP-1", &m.viewer.id, &m.course.id, "100.00");

        let (status, _) = post_webhook(&app, "/webhooks/paypal", &body, &[]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_dev_mode_skips_verification() {
        let (app, m, _dir) = app_without_secrets(true);
        let body = global_capture("WH-1", "CAP-1", &m.viewer.id, &m.course.id, "100.00");

        let (status, json) = post_webhook(&app, "/webhooks/paypal", &body, &[]).await;
        assert_eq!(status, StatusCode::OK, "response: {}", json);
        assert_eq!(json["result"], "applied");
    }
}
