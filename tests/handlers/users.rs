//! User-facing API: entitlements, access checks, API keys and catalog browsing

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
    creator_key: String,
    admin_key: String,
    _dir: tempfile::TempDir,
}

fn setup() -> Fixture {
    let (state, dir) = create_test_app_state();
    let (m, viewer_key, creator_key, admin_key) = {
        let conn = state.db.get().unwrap();
        let m = create_marketplace(&conn);
        let (_, viewer_key) = queries::create_api_key(&conn, &m.viewer.id, "test").unwrap();
        let (_, creator_key) = queries::create_api_key(&conn, &m.creator.id, "test").unwrap();
        let (_, admin_key) = create_test_user_with_key(&conn, "Admin", "US", UserRole::Admin);
        (m, viewer_key, creator_key, admin_key)
    };
    Fixture {
        app: test_app(state.clone()),
        state,
        m,
        viewer_key,
        creator_key,
        admin_key,
        _dir: dir,
    }
}

fn grant_purchase(f: &Fixture) {
    let mut conn = f.state.db.get().unwrap();
    let event = purchase("CAP-1", &f.m.viewer.id, &f.m.course.id, 10.0, now());
    pipeline::process(&mut conn, &event, &test_settings(), now()).unwrap();
}

// ============ Authentication ============

mod auth_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_is_unauthorized() {
        let f = setup();
        let (status, _) = send(&f.app, "GET", "/catalog", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_key_is_unauthorized() {
        let f = setup();
        let (status, _) = send(&f.app, "GET", "/catalog", Some("rp_not_a_real_key"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let f = setup();
        let (status, json) = send(&f.app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }
}

// ============ Entitlements ============

mod entitlement_tests {
    use super::*;

    #[tokio::test]
    async fn test_entitlement_reads_inactive_then_active() {
        let f = setup();
        let uri = format!("/users/{}/entitlements/{}", f.m.viewer.id, f.m.course.id);

        let (status, json) = send(&f.app, "GET", &uri, Some(&f.viewer_key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "inactive");

        grant_purchase(&f);
        let (_, json) = send(&f.app, "GET", &uri, Some(&f.viewer_key), None).await;
        assert_eq!(json["status"], "active");
        assert!(json["expires_at"].is_null(), "purchases do not expire");
    }

    #[tokio::test]
    async fn test_other_users_entitlements_look_missing() {
        let f = setup();
        grant_purchase(&f);
        let uri = format!("/users/{}/entitlements", f.m.viewer.id);

        let (status, _) = send(&f.app, "GET", &uri, Some(&f.creator_key), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "same answer as a missing user");

        let (status, _) = send(&f.app, "GET", "/users/rp_usr_nobody/entitlements", Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = send(&f.app, "GET", &uri, Some(&f.admin_key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_entitlement() {
        let f = setup();
        grant_purchase(&f);
        let uri = format!("/users/{}/entitlements/{}/cancel", f.m.viewer.id, f.m.course.id);

        let (status, json) = send(&f.app, "POST", &uri, Some(&f.viewer_key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "canceled");

        let (status, _) = send(
            &f.app,
            "POST",
            &format!("/users/{}/entitlements/rp_item_none/cancel", f.m.viewer.id),
            Some(&f.viewer_key),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    fn subscribe(f: &Fixture) -> CatalogItem {
        let mut conn = f.state.db.get().unwrap();
        let plan = create_test_plan(&conn, 9.99, "USD");
        let event = subscription_charge("SALE-1", &f.m.viewer.id, &plan.id, ObservedStatus::Succeeded, ChargeType::Initial, now());
        pipeline::process(&mut conn, &event, &test_settings(), now()).unwrap();
        plan
    }

    #[tokio::test]
    async fn test_subscription_cancel_defaults_to_period_end() {
        let f = setup();
        let plan = subscribe(&f);
        let uri = format!("/users/{}/entitlements/{}/cancel", f.m.viewer.id, plan.id);

        let (status, json) = send(&f.app, "POST", &uri, Some(&f.viewer_key), None).await;
        assert_eq!(status, StatusCode::OK, "response: {}", json);
        assert_eq!(json["status"], "active", "access runs to the end of the paid period");
        assert!(json["canceled_at"].is_i64());
        assert!(json["expires_at"].as_i64().unwrap() > now());

        let (_, access) = send(&f.app, "GET", &format!("/access/{}", plan.id), Some(&f.viewer_key), None).await;
        assert_eq!(access["decision"], "allowed");

        let (status, json) = send(&f.app, "POST", &format!("{}?at_period_end=false", uri), Some(&f.viewer_key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "canceled");
    }

    #[tokio::test]
    async fn test_upgrade_to_yearly_plan() {
        let f = setup();
        let monthly = subscribe(&f);
        let yearly = {
            let conn = f.state.db.get().unwrap();
            queries::create_catalog_item(
                &conn,
                &CreateCatalogItem {
                    kind: CatalogKind::Plan,
                    title: "Yearly Plan".to_string(),
                    creator_id: None,
                    price: Some(99.0),
                    currency: Some("USD".to_string()),
                    billing_interval: Some(BillingInterval::Year),
                    video_url: None,
                },
            )
            .unwrap()
        };
        let uri = format!("/users/{}/entitlements/{}/upgrade", f.m.viewer.id, monthly.id);

        let (status, json) =
            send(&f.app, "POST", &uri, Some(&f.viewer_key), Some(json!({ "target_plan_id": yearly.id }))).await;
        assert_eq!(status, StatusCode::OK, "response: {}", json);
        assert_eq!(json["upgraded"]["status"], "upgraded");
        let credit = json["credit_amount"].as_f64().unwrap();
        assert!(credit > 0.0 && credit <= 9.99);
        assert!((json["final_amount"].as_f64().unwrap() - (99.0 - credit)).abs() < 1e-6);

        let (status, _) =
            send(&f.app, "POST", &uri, Some(&f.creator_key), Some(json!({ "target_plan_id": yearly.id }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "only the subscriber may upgrade");
    }

    #[tokio::test]
    async fn test_subscription_view() {
        let f = setup();
        let plan = {
            let conn = f.state.db.get().unwrap();
            create_test_plan(&conn, 9.99, "USD")
        };
        let uri = format!("/users/{}/subscription", f.m.viewer.id);

        let (_, json) = send(&f.app, "GET", &uri, Some(&f.viewer_key), None).await;
        assert_eq!(json["status"], "inactive");
        assert!(json["plan_id"].is_null());

        {
            let mut conn = f.state.db.get().unwrap();
            let event = subscription_charge("SALE-1", &f.m.viewer.id, &plan.id, ObservedStatus::Succeeded, ChargeType::Initial, now());
            pipeline::process(&mut conn, &event, &test_settings(), now()).unwrap();
        }
        let (_, json) = send(&f.app, "GET", &uri, Some(&f.viewer_key), None).await;
        assert_eq!(json["status"], "active");
        assert_eq!(json["plan_id"], plan.id.as_str());
    }
}

// ============ Access ============

mod access_tests {
    use super::*;

    #[tokio::test]
    async fn test_access_returns_playback_url_when_entitled() {
        let f = setup();
        grant_purchase(&f);
        let uri = format!("/access/{}", f.m.course.id);

        let (status, json) = send(&f.app, "GET", &uri, Some(&f.viewer_key), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["decision"], "allowed");
        assert_eq!(json["video_url"], f.m.course.video_url.clone().unwrap().as_str());
    }

    #[tokio::test]
    async fn test_every_denial_looks_the_same() {
        let f = setup();

        let (unpaid_status, unpaid) =
            send(&f.app, "GET", &format!("/access/{}", f.m.course.id), Some(&f.viewer_key), None).await;
        let (missing_status, missing) =
            send(&f.app, "GET", "/access/rp_item_does_not_exist", Some(&f.viewer_key), None).await;

        assert_eq!(unpaid_status, StatusCode::FORBIDDEN);
        assert_eq!(missing_status, StatusCode::FORBIDDEN);
        assert_eq!(unpaid, missing, "denial bodies must not reveal which case applied");
    }

    #[tokio::test]
    async fn test_owner_has_access() {
        let f = setup();
        let (status, _) =
            send(&f.app, "GET", &format!("/access/{}", f.m.course.id), Some(&f.creator_key), None).await;
        assert_eq!(status, StatusCode::OK);
    }
}

// ============ API keys ============

mod api_key_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_use_and_revoke_key() {
        let f = setup();
        let uri = format!("/users/{}/api-keys", f.m.viewer.id);

        let (status, created) = send(&f.app, "POST", &uri, Some(&f.viewer_key), Some(json!({ "name": "laptop" }))).await;
        assert_eq!(status, StatusCode::OK);
        let new_key = created["api_key"].as_str().unwrap().to_string();
        let key_id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["name"], "laptop");

        let (status, _) = send(&f.app, "GET", "/catalog", Some(&new_key), None).await;
        assert_eq!(status, StatusCode::OK, "new key authenticates");

        let (status, keys) = send(&f.app, "GET", &uri, Some(&f.viewer_key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(keys.as_array().unwrap().len(), 2);
        assert!(keys[0].get("api_key").is_none(), "listing never shows the secret");

        let (status, _) = send(&f.app, "DELETE", &format!("{}/{}", uri, key_id), Some(&f.viewer_key), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&f.app, "GET", "/catalog", Some(&new_key), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "revoked key no longer works");
    }

    #[tokio::test]
    async fn test_cannot_revoke_someone_elses_key() {
        let f = setup();
        let (viewer_key_row, _) = {
            let conn = f.state.db.get().unwrap();
            queries::create_api_key(&conn, &f.m.viewer.id, "second").unwrap()
        };

        let uri = format!("/users/{}/api-keys/{}", f.m.creator.id, viewer_key_row.id);
        let (status, _) = send(&f.app, "DELETE", &uri, Some(&f.creator_key), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "key belongs to another user");
    }

    #[tokio::test]
    async fn test_cannot_create_key_for_someone_else() {
        let f = setup();
        let uri = format!("/users/{}/api-keys", f.m.creator.id);
        let (status, _) = send(&f.app, "POST", &uri, Some(&f.viewer_key), Some(json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

// ============ Catalog ============

mod catalog_tests {
    use super::*;

    #[tokio::test]
    async fn test_catalog_hides_playback_urls() {
        let f = setup();

        let (status, json) = send(&f.app, "GET", "/catalog?limit=10", Some(&f.viewer_key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["limit"], 10);
        let items = json["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0]["video_url"].is_null(), "playback URLs only come from /access");

        let (status, json) = send(
            &f.app,
            "GET",
            &format!("/catalog/{}", f.m.course.id),
            Some(&f.viewer_key),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["video_url"].is_null());
        assert!(json["includes"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_filter_by_creator() {
        let f = setup();
        {
            let conn = f.state.db.get().unwrap();
            create_test_plan(&conn, 9.99, "USD");
        }

        let (_, all) = send(&f.app, "GET", "/catalog", Some(&f.viewer_key), None).await;
        assert_eq!(all["total"], 2);

        let uri = format!("/catalog?creator_id={}", f.m.creator.id);
        let (_, mine) = send(&f.app, "GET", &uri, Some(&f.viewer_key), None).await;
        assert_eq!(mine["total"], 1);
    }

    #[tokio::test]
    async fn test_unknown_item_is_not_found() {
        let f = setup();
        let (status, _) = send(&f.app, "GET", "/catalog/rp_item_missing", Some(&f.viewer_key), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
