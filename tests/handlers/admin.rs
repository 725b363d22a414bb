//! Operator API: users, catalog, share ratios, ledger corrections and the
//! payment event queue

#[path = "../common/mod.rs"]
mod common;

use common::*;

use axum::{Router, http::StatusCode};
use reelpay::pipeline;
use serde_json::json;

struct Fixture {
    app: Router,
    state: AppState,
    m: Marketplace,
    viewer_key: String,
    admin_key: String,
    _dir: tempfile::TempDir,
}

fn setup() -> Fixture {
    let (state, dir) = create_test_app_state();
    let (m, viewer_key, admin_key) = {
        let conn = state.db.get().unwrap();
        let m = create_marketplace(&conn);
        let (_, viewer_key) = queries::create_api_key(&conn, &m.viewer.id, "test").unwrap();
        let (_, admin_key) = create_test_user_with_key(&conn, "Admin", "US", UserRole::Admin);
        (m, viewer_key, admin_key)
    };
    Fixture {
        app: test_app(state.clone()),
        state,
        m,
        viewer_key,
        admin_key,
        _dir: dir,
    }
}

fn settle_purchase(f: &Fixture, txn: &str, amount: f64) -> Option<String> {
    let mut conn = f.state.db.get().unwrap();
    let event = purchase(txn, &f.m.viewer.id, &f.m.course.id, amount, now());
    match pipeline::process(&mut conn, &event, &test_settings(), now()) {
        Ok(outcome) => outcome.outcome.transaction_id,
        Err(_) => None,
    }
}

#[tokio::test]
async fn test_non_admin_is_forbidden() {
    let f = setup();
    let (status, json) = send(&f.app, "GET", "/admin/users", Some(&f.viewer_key), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(json["error"].is_string());

    let (status, _) = send(&f.app, "GET", "/admin/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============ Users ============

mod user_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_user_defaults_to_viewer() {
        let f = setup();
        let (status, json) = send(
            &f.app,
            "POST",
            "/admin/users",
            Some(&f.admin_key),
            Some(json!({ "name": "Minji", "country": "KR" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["role"], "viewer");
        assert_eq!(json["country"], "KR");

        let id = json["id"].as_str().unwrap();
        let (status, json) = send(&f.app, "GET", &format!("/admin/users/{}", id), Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "Minji");
    }

    #[tokio::test]
    async fn test_create_user_validation() {
        let f = setup();
        for body in [
            json!({ "name": "  ", "country": "US" }),
            json!({ "name": "Sam", "country": "USA" }),
            json!({ "name": "Sam", "country": "1A" }),
        ] {
            let (status, _) = send(&f.app, "POST", "/admin/users", Some(&f.admin_key), Some(body.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "accepted {}", body);
        }
    }

    #[tokio::test]
    async fn test_list_and_missing_user() {
        let f = setup();
        let (status, json) = send(&f.app, "GET", "/admin/users", Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 3);

        let (status, _) = send(&f.app, "GET", "/admin/users/rp_usr_missing", Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

// ============ Catalog ============

mod catalog_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_plan_and_bundle() {
        let f = setup();
        let (status, plan) = send(
            &f.app,
            "POST",
            "/admin/catalog",
            Some(&f.admin_key),
            Some(json!({
                "kind": "plan",
                "title": "Annual",
                "price": 99.0,
                "currency": "usd",
                "billing_interval": "year",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", plan);
        assert_eq!(plan["kind"], "plan");
        assert!(plan["creator_id"].is_null());

        let (status, bundle) = send(
            &f.app,
            "POST",
            "/admin/catalog",
            Some(&f.admin_key),
            Some(json!({ "kind": "bundle", "title": "Starter pack", "creator_id": f.m.creator.id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", bundle);
        assert_eq!(bundle["creator_id"], f.m.creator.id.as_str());
    }

    #[tokio::test]
    async fn test_create_item_validation() {
        let f = setup();
        let cases = [
            json!({ "kind": "plan", "title": "No interval", "price": 5.0, "currency": "USD" }),
            json!({ "kind": "course", "title": "Interval", "billing_interval": "month" }),
            json!({ "kind": "course", "title": "Half priced", "price": 5.0 }),
            json!({ "kind": "course", "title": "", "creator_id": f.m.creator.id }),
            json!({
                "kind": "plan",
                "title": "Owned plan",
                "creator_id": f.m.creator.id,
                "billing_interval": "month",
            }),
            json!({ "kind": "course", "title": "Viewer owned", "creator_id": f.m.viewer.id }),
        ];
        for body in cases {
            let (status, _) = send(&f.app, "POST", "/admin/catalog", Some(&f.admin_key), Some(body.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "accepted {}", body);
        }
    }

    #[tokio::test]
    async fn test_update_item() {
        let f = setup();
        let uri = format!("/admin/catalog/{}", f.m.course.id);
        let (status, json) = send(
            &f.app,
            "PUT",
            &uri,
            Some(&f.admin_key),
            Some(json!({ "title": "Advanced footwork", "price": 25.0, "currency": "USD" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["title"], "Advanced footwork");
        assert_eq!(json["price"], 25.0);

        let (status, _) = send(
            &f.app,
            "PUT",
            "/admin/catalog/rp_itm_missing",
            Some(&f.admin_key),
            Some(json!({ "title": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_inclusions() {
        let f = setup();
        let (plan, bundle, extras) = {
            let conn = f.state.db.get().unwrap();
            (
                create_test_plan(&conn, 9.99, "USD"),
                create_test_content(&conn, CatalogKind::Bundle, Some(&f.m.creator.id), "Bundle"),
                create_test_content(&conn, CatalogKind::Bundle, Some(&f.m.creator.id), "Extras"),
            )
        };
        let include = |parent: &str, child: &str| {
            (
                format!("/admin/catalog/{}/inclusions", parent),
                json!({ "child_id": child }),
            )
        };

        let (uri, body) = include(&plan.id, &bundle.id);
        let (status, json) = send(&f.app, "POST", &uri, Some(&f.admin_key), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["parent_id"], plan.id.as_str());
        assert_eq!(json["child_id"], bundle.id.as_str());

        let (uri, body) = include(&bundle.id, &f.m.course.id);
        let (status, _) = send(&f.app, "POST", &uri, Some(&f.admin_key), Some(body)).await;
        assert_eq!(status, StatusCode::OK);

        let (uri, body) = include(&bundle.id, &extras.id);
        let (status, _) = send(&f.app, "POST", &uri, Some(&f.admin_key), Some(body)).await;
        assert_eq!(status, StatusCode::OK);

        let (uri, body) = include(&extras.id, &bundle.id);
        let (status, json) = send(&f.app, "POST", &uri, Some(&f.admin_key), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["details"].as_str().unwrap().contains("cycle"));

        let (uri, body) = include(&f.m.course.id, &bundle.id);
        let (status, _) = send(&f.app, "POST", &uri, Some(&f.admin_key), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (uri, body) = include(&bundle.id, &plan.id);
        let (status, json) = send(&f.app, "POST", &uri, Some(&f.admin_key), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["details"].as_str().unwrap().contains("plans"));

        let remove = format!("/admin/catalog/{}/inclusions/{}", bundle.id, f.m.course.id);
        let (status, _) = send(&f.app, "DELETE", &remove, Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&f.app, "DELETE", &remove, Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

// ============ Share ratios ============

mod share_ratio_tests {
    use super::*;

    #[tokio::test]
    async fn test_set_list_clear() {
        let f = setup();
        let uri = format!("/admin/share-ratios/{}", f.m.creator.id);

        let (status, json) = send(&f.app, "PUT", &uri, Some(&f.admin_key), Some(json!({ "creator_share": 0.7 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["creator_share"], 0.7);

        let (status, json) = send(&f.app, "GET", "/admin/share-ratios", Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);

        let txn_id = settle_purchase(&f, "CAP-R1", 100.0).unwrap();
        let (_, txn) = send(&f.app, "GET", &format!("/admin/transactions/{}", txn_id), Some(&f.admin_key), None).await;
        assert!((txn["creator_revenue"].as_f64().unwrap() - 70.0).abs() < 1e-6);
        assert!((txn["platform_revenue"].as_f64().unwrap() - 30.0).abs() < 1e-6);

        let (status, _) = send(&f.app, "DELETE", &uri, Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&f.app, "DELETE", &uri, Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rejects_bad_ratio_or_non_creator() {
        let f = setup();
        let uri = format!("/admin/share-ratios/{}", f.m.creator.id);
        for share in [1.5, -0.1] {
            let (status, _) =
                send(&f.app, "PUT", &uri, Some(&f.admin_key), Some(json!({ "creator_share": share }))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "accepted {}", share);
        }

        let viewer_uri = format!("/admin/share-ratios/{}", f.m.viewer.id);
        let (status, _) =
            send(&f.app, "PUT", &viewer_uri, Some(&f.admin_key), Some(json!({ "creator_share": 0.5 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

// ============ Ledger ============

mod ledger_tests {
    use super::*;

    #[tokio::test]
    async fn test_list_and_reverse_transaction() {
        let f = setup();
        let txn_id = settle_purchase(&f, "CAP-L1", 100.0).unwrap();

        let uri = format!("/admin/transactions?creator_id={}", f.m.creator.id);
        let (status, json) = send(&f.app, "GET", &uri, Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 1);

        let reverse = format!("/admin/transactions/{}/reverse", txn_id);
        let (status, _) = send(&f.app, "POST", &reverse, Some(&f.admin_key), Some(json!({ "reason": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = send(
            &f.app,
            "POST",
            &reverse,
            Some(&f.admin_key),
            Some(json!({ "reason": "chargeback" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["gross_amount"], -100.0);
        assert_eq!(json["reverses_transaction_id"], txn_id.as_str());

        let (status, _) = send(
            &f.app,
            "POST",
            &reverse,
            Some(&f.admin_key),
            Some(json!({ "reason": "again" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, json) = send(&f.app, "GET", "/admin/audit-logs?action=reverse_transaction", Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 1);
    }

    #[tokio::test]
    async fn test_reconcile_clean_ledger() {
        let f = setup();
        settle_purchase(&f, "CAP-C1", 40.0).unwrap();
        settle_purchase(&f, "CAP-C2", 60.0).unwrap();

        let (status, json) = send(&f.app, "POST", "/admin/reconcile", Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["transactions_checked"], 2);
        assert!(json["drift"].as_array().unwrap().is_empty());
        assert!(json["missing_settlements"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_transaction() {
        let f = setup();
        let (status, _) = send(&f.app, "GET", "/admin/transactions/rp_txn_missing", Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

// ============ Payment events ============

mod payment_event_tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_event_is_listed_and_inspectable() {
        let f = setup();
        assert!(settle_purchase(&f, "CAP-NEG", -5.0).is_none());
        settle_purchase(&f, "CAP-OK", 10.0).unwrap();

        let (status, json) = send(&f.app, "GET", "/admin/payment-events?status=failed", Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 1);
        let event_id = json["items"][0]["id"].as_str().unwrap().to_string();
        assert_eq!(json["items"][0]["provider_event_id"], "CAP-NEG");

        let (status, json) = send(
            &f.app,
            "GET",
            &format!("/admin/payment-events/{}", event_id),
            Some(&f.admin_key),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "failed");
        assert!(json["last_error"].is_string());
        assert!(json["event"].is_object());

        // Still invalid, so the redrive halts again
        let (status, _) = send(
            &f.app,
            "POST",
            &format!("/admin/payment-events/{}/redrive", event_id),
            Some(&f.admin_key),
            None,
        )
        .await;
        assert!(status.is_server_error(), "got {}", status);
    }

    #[tokio::test]
    async fn test_redrive_applied_event_conflicts() {
        let f = setup();
        settle_purchase(&f, "CAP-OK", 10.0).unwrap();
        let record = {
            let conn = f.state.db.get().unwrap();
            queries::get_payment_event_by_key(&conn, PaymentProvider::Global, "CAP-OK")
                .unwrap()
                .unwrap()
        };

        let (status, _) = send(
            &f.app,
            "POST",
            &format!("/admin/payment-events/{}/redrive", record.id),
            Some(&f.admin_key),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(&f.app, "GET", "/admin/payment-events/rp_pev_missing", Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

// ============ Payouts ============

#[tokio::test]
async fn test_admin_payout_queue() {
    let f = setup();
    settle_purchase(&f, "CAP-P1", 100.0).unwrap();
    {
        let creator_key = {
            let conn = f.state.db.get().unwrap();
            queries::create_api_key(&conn, &f.m.creator.id, "test").unwrap().1
        };
        let (status, _) = send(
            &f.app,
            "POST",
            &format!("/creators/{}/payouts", f.m.creator.id),
            Some(&creator_key),
            Some(json!({ "amount": 50.0, "currency": "USD", "payment_method": "PayPal", "paypal_email": "c@example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, json) = send(&f.app, "GET", "/admin/payouts?status=pending", Some(&f.admin_key), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["items"][0]["creator_id"], f.m.creator.id.as_str());

    let (_, json) = send(&f.app, "GET", "/admin/payouts?status=paid", Some(&f.admin_key), None).await;
    assert_eq!(json["total"], 0);
}
