//! Creator API: revenue, balance, payouts and media processing

#[path = "../common/mod.rs"]
mod common;

use common::*;

use std::sync::Arc;

use axum::{Router, http::StatusCode};
use reelpay::pipeline;
use serde_json::json;

struct Fixture {
    app: Router,
    state: AppState,
    m: Marketplace,
    creator_key: String,
    viewer_key: String,
    admin_key: String,
    _dir: tempfile::TempDir,
}

fn fixture_from(state: AppState, dir: tempfile::TempDir) -> Fixture {
    let (m, creator_key, viewer_key, admin_key) = {
        let mut conn = state.db.get().unwrap();
        let m = create_marketplace(&conn);
        let (_, creator_key) = queries::create_api_key(&conn, &m.creator.id, "test").unwrap();
        let (_, viewer_key) = queries::create_api_key(&conn, &m.viewer.id, "test").unwrap();
        let (_, admin_key) = create_test_user_with_key(&conn, "Admin", "US", UserRole::Admin);
        for (i, amount) in [1000.0, 500.0].into_iter().enumerate() {
            let event = purchase(&format!("CAP-{}", i), &m.viewer.id, &m.course.id, amount, now());
            pipeline::process(&mut conn, &event, &test_settings(), now()).unwrap();
        }
        (m, creator_key, viewer_key, admin_key)
    };
    Fixture {
        app: test_app(state.clone()),
        state,
        m,
        creator_key,
        viewer_key,
        admin_key,
        _dir: dir,
    }
}

fn setup() -> Fixture {
    let (state, dir) = create_test_app_state();
    fixture_from(state, dir)
}

fn payout_body(amount: f64) -> serde_json::Value {
    json!({
        "amount": amount,
        "currency": "USD",
        "payment_method": "PayPal",
        "paypal_email": "creator@example.com"
    })
}

// ============ Revenue ============

mod revenue_tests {
    use super::*;

    #[tokio::test]
    async fn test_revenue_summary() {
        let f = setup();
        let uri = format!("/creators/{}/revenue-summary", f.m.creator.id);

        let (status, json) = send(&f.app, "GET", &uri, Some(&f.creator_key), None).await;

        assert_eq!(status, StatusCode::OK, "response: {}", json);
        assert!((json["creator_revenue"].as_f64().unwrap() - 1200.0).abs() < 1e-6);
        assert!((json["platform_revenue"].as_f64().unwrap() - 300.0).abs() < 1e-6);
        assert_eq!(json["by_currency"][0]["currency"], "USD");
    }

    #[tokio::test]
    async fn test_mixed_currency_summary_has_no_single_total() {
        let f = setup();
        {
            let mut conn = f.state.db.get().unwrap();
            let krw = payment(
                PaymentProvider::Domestic,
                "pay-krw",
                &f.m.viewer.id,
                &f.m.course.id,
                100000.0,
                "KRW",
                PaymentKind::OneTimePurchase,
                ObservedStatus::Succeeded,
                ChargeType::Initial,
                now(),
            );
            pipeline::process(&mut conn, &krw, &test_settings(), now()).unwrap();
        }
        let uri = format!("/creators/{}/revenue-summary", f.m.creator.id);

        let (status, json) = send(&f.app, "GET", &uri, Some(&f.creator_key), None).await;
        assert_eq!(status, StatusCode::OK, "response: {}", json);
        assert!(json["creator_revenue"].is_null(), "USD and KRW are not summed: {}", json);
        assert_eq!(json["by_currency"].as_array().unwrap().len(), 2);

        let (_, usd) = send(&f.app, "GET", &format!("{}?currency=USD", uri), Some(&f.creator_key), None).await;
        assert_eq!(usd["currency"], "USD");
        assert!((usd["creator_revenue"].as_f64().unwrap() - 1200.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_revenue_summary_validates_input() {
        let f = setup();
        let base = format!("/creators/{}/revenue-summary", f.m.creator.id);

        let (status, _) = send(&f.app, "GET", &format!("{}?currency=dollars", base), Some(&f.creator_key), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&f.app, "GET", &format!("{}?start=200&end=100", base), Some(&f.creator_key), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_viewer_cannot_read_creator_revenue() {
        let f = setup();
        let uri = format!("/creators/{}/revenue-summary", f.m.creator.id);

        let (status, _) = send(&f.app, "GET", &uri, Some(&f.viewer_key), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&f.app, "GET", &uri, Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::OK, "admins read any creator");
    }

    #[tokio::test]
    async fn test_balance() {
        let f = setup();
        let uri = format!("/creators/{}/balance?currency=usd", f.m.creator.id);

        let (status, json) = send(&f.app, "GET", &uri, Some(&f.creator_key), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["currency"], "USD");
        assert!((json["available"].as_f64().unwrap() - 1200.0).abs() < 1e-6);
    }
}

// ============ Payouts ============

mod payout_tests {
    use super::*;

    #[tokio::test]
    async fn test_payout_lifecycle() {
        let f = setup();
        let uri = format!("/creators/{}/payouts", f.m.creator.id);

        let (status, payout) = send(&f.app, "POST", &uri, Some(&f.creator_key), Some(payout_body(150.0))).await;
        assert_eq!(status, StatusCode::OK, "response: {}", payout);
        assert_eq!(payout["status"], "pending");
        let payout_id = payout["id"].as_str().unwrap().to_string();

        let (status, _) = send(&f.app, "POST", &uri, Some(&f.creator_key), Some(payout_body(1100.0))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "only 1050 left");

        let (status, list) = send(&f.app, "GET", &format!("{}?status=pending", uri), Some(&f.creator_key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["total"], 1);

        let resolve = format!("/payouts/{}", payout_id);
        let (status, json) = send(&f.app, "PATCH", &resolve, Some(&f.admin_key), Some(json!({ "status": "processing" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "processing");

        let (status, json) = send(&f.app, "PATCH", &resolve, Some(&f.admin_key), Some(json!({ "status": "paid" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "paid");

        let (status, _) = send(&f.app, "PATCH", &resolve, Some(&f.admin_key), Some(json!({ "status": "processing" }))).await;
        assert_eq!(status, StatusCode::CONFLICT, "paid is terminal");
    }

    #[tokio::test]
    async fn test_creator_cannot_resolve_own_payout() {
        let f = setup();
        let uri = format!("/creators/{}/payouts", f.m.creator.id);
        let (_, payout) = send(&f.app, "POST", &uri, Some(&f.creator_key), Some(payout_body(10.0))).await;

        let resolve = format!("/payouts/{}", payout["id"].as_str().unwrap());
        let (status, _) = send(&f.app, "PATCH", &resolve, Some(&f.creator_key), Some(json!({ "status": "paid" }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_withdraw_pending_payout() {
        let f = setup();
        let uri = format!("/creators/{}/payouts", f.m.creator.id);
        let (_, payout) = send(&f.app, "POST", &uri, Some(&f.creator_key), Some(payout_body(10.0))).await;
        let item_uri = format!("{}/{}", uri, payout["id"].as_str().unwrap());

        let (status, json) = send(&f.app, "DELETE", &item_uri, Some(&f.creator_key), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "rejected");
        assert_eq!(json["rejection_reason"], "withdrawn_by_creator");

        let (status, _) = send(&f.app, "DELETE", &item_uri, Some(&f.creator_key), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_invalid_payout_requests() {
        let f = setup();
        let uri = format!("/creators/{}/payouts", f.m.creator.id);

        let mut body = payout_body(10.0);
        body["paypal_email"] = serde_json::Value::Null;
        let (status, _) = send(&f.app, "POST", &uri, Some(&f.creator_key), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "destination required");

        let mut body = payout_body(10.0);
        body["payment_method"] = json!("Bitcoin");
        let (status, _) = send(&f.app, "POST", &uri, Some(&f.creator_key), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "unknown payout method");
    }

    #[tokio::test]
    async fn test_payout_audited() {
        let f = setup();
        let uri = format!("/creators/{}/payouts", f.m.creator.id);
        send(&f.app, "POST", &uri, Some(&f.creator_key), Some(payout_body(10.0))).await;

        let (status, logs) = send(&f.app, "GET", "/admin/audit-logs?action=submit_payout", Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(logs["total"], 1);
        assert_eq!(logs["items"][0]["actor_id"], f.m.creator.id.as_str());
    }
}

// ============ Processing ============

mod processing_tests {
    use super::*;

    fn media_setup() -> Fixture {
        let transcoder = Arc::new(MockTranscoder::with_polls(vec![poll_result(
            TranscodeStatus::Completed,
            Some("s3://processed/out.mp4"),
        )]));
        let host = Arc::new(MockVideoHost::default());
        let (state, dir) = create_test_app_state_with(transcoder, host);
        fixture_from(state, dir)
    }

    #[tokio::test]
    async fn test_start_and_poll_processing() {
        let f = media_setup();
        let uri = format!("/catalog/{}/processing", f.m.course.id);
        let body = json!({
            "source_ref": "s3://uploads/raw.mp4",
            "operations": [{ "op": "cut", "start": 0.0, "end": 12.5 }]
        });

        let (status, job) = send(&f.app, "POST", &uri, Some(&f.creator_key), Some(body)).await;
        assert_eq!(status, StatusCode::OK, "response: {}", job);
        assert_eq!(job["status"], "queued");

        let job_uri = format!("{}/{}", uri, job["id"].as_str().unwrap());
        let (status, job) = send(&f.app, "GET", &job_uri, Some(&f.creator_key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["status"], "published");

        let (_, jobs) = send(&f.app, "GET", &uri, Some(&f.creator_key), None).await;
        assert_eq!(jobs.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_processing_hidden_from_non_owners() {
        let f = media_setup();
        let uri = format!("/catalog/{}/processing", f.m.course.id);
        let body = json!({ "source_ref": "s3://uploads/raw.mp4" });

        let (status, _) = send(&f.app, "POST", &uri, Some(&f.viewer_key), Some(body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unconfigured_media_stack_is_unprocessable() {
        let f = setup();
        let uri = format!("/catalog/{}/processing", f.m.course.id);
        let body = json!({ "source_ref": "s3://uploads/raw.mp4" });

        let (status, _) = send(&f.app, "POST", &uri, Some(&f.creator_key), Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
