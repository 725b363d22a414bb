use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reelpay::collaborators;
use reelpay::config::Config;
use reelpay::db::{AppState, create_pool, init_audit_db, init_db, queries};
use reelpay::handlers;
use reelpay::ledger;
use reelpay::media;
use reelpay::models::{
    AuditAction, BillingInterval, CatalogKind, CreateCatalogItem, CreateUser, User, UserRole,
};
use reelpay::rate_limit;
use reelpay::repair;
use reelpay::util::AuditLogBuilder;

#[derive(Parser, Debug)]
#[command(name = "reelpay")]
#[command(about = "Payment reconciliation and revenue ledger for video subscriptions")]
struct Cli {
    /// Seed the database with dev data (admin, creator, viewer, plan, course, bundle)
    #[arg(long)]
    seed: bool,

    /// Check every ledger row against its stored split, print the report and exit
    #[arg(long)]
    reconcile: bool,

    /// Run one repair pass (stalled admissions, lapsed subscriptions) and exit
    #[arg(long)]
    repair_once: bool,

    /// Issue a new API key for an existing user and exit
    #[arg(long, value_name = "USER_ID")]
    create_api_key: Option<String>,
}

fn print_banner(title: &str, lines: &[String]) {
    tracing::info!("============================================");
    tracing::info!("{}", title);
    for line in lines {
        tracing::info!("{}", line);
    }
    tracing::info!("============================================");
}

/// Create a user with one API key, audited as a system action.
fn create_user_with_key(state: &AppState, input: &CreateUser, action: AuditAction) -> (User, String) {
    let conn = state.db.get().expect("Failed to get db connection");
    let audit_conn = state.audit.get().expect("Failed to get audit db connection");

    let user = queries::create_user(&conn, input).expect("Failed to create user");
    let (key, api_key) = queries::create_api_key(&conn, &user.id, "bootstrap").expect("Failed to create API key");

    AuditLogBuilder::system(&audit_conn, state.audit_log_enabled)
        .action(action)
        .resource("user", &user.id)
        .details(&serde_json::json!({
            "name": user.name,
            "role": user.role.as_ref(),
            "key_prefix": key.prefix,
        }))
        .save()
        .expect("Failed to write audit log");

    (user, api_key)
}

fn bootstrap_first_admin(state: &AppState, name: &str) {
    let conn = state.db.get().expect("Failed to get db connection for bootstrap");
    let admins = queries::count_users_with_role(&conn, UserRole::Admin).expect("Failed to count admins");
    if admins > 0 {
        tracing::info!("Admins already exist, skipping bootstrap");
        return;
    }

    let input = CreateUser {
        name: name.to_string(),
        country: "US".to_string(),
        role: UserRole::Admin,
    };
    let (admin, api_key) = create_user_with_key(state, &input, AuditAction::BootstrapAdmin);

    print_banner(
        "BOOTSTRAP ADMIN CREATED",
        &[
            format!("User: {} ({})", admin.name, admin.id),
            format!("API Key: {}", api_key),
            "SAVE THIS API KEY - IT WILL NOT BE SHOWN AGAIN".to_string(),
        ],
    );
}

/// Dev data: one admin, one creator, one KR viewer, a monthly plan, a course
/// owned by the creator and a bundle that includes the course.
fn seed_dev_data(state: &AppState) {
    {
        let conn = state.db.get().expect("Failed to get db connection for seeding");
        let (_, users) = queries::list_users_paginated(&conn, 1, 0).expect("Failed to count users");
        if users > 0 {
            tracing::info!("Database already has data, skipping seed");
            return;
        }
    }

    let mut lines = Vec::new();
    let mut creator_id = String::new();
    for (name, country, role) in [
        ("Dev Admin", "US", UserRole::Admin),
        ("Dev Creator", "US", UserRole::Creator),
        ("Dev Viewer", "KR", UserRole::Viewer),
    ] {
        let input = CreateUser {
            name: name.to_string(),
            country: country.to_string(),
            role,
        };
        let (user, api_key) = create_user_with_key(state, &input, AuditAction::CreateUser);
        if role == UserRole::Creator {
            creator_id = user.id.clone();
        }
        lines.push(format!("{} [{}]: {} key={}", name, role.as_ref(), user.id, api_key));
    }

    let conn = state.db.get().expect("Failed to get db connection for seeding");
    let plan = queries::create_catalog_item(
        &conn,
        &CreateCatalogItem {
            kind: CatalogKind::Plan,
            title: "Monthly".to_string(),
            creator_id: None,
            price: Some(9.99),
            currency: Some("USD".to_string()),
            billing_interval: Some(BillingInterval::Month),
            video_url: None,
        },
    )
    .expect("Failed to create plan");
    let course = queries::create_catalog_item(
        &conn,
        &CreateCatalogItem {
            kind: CatalogKind::Course,
            title: "Footwork Fundamentals".to_string(),
            creator_id: Some(creator_id.clone()),
            price: Some(49.0),
            currency: Some("USD".to_string()),
            billing_interval: None,
            video_url: Some("https://videos.example.com/footwork".to_string()),
        },
    )
    .expect("Failed to create course");
    let bundle = queries::create_catalog_item(
        &conn,
        &CreateCatalogItem {
            kind: CatalogKind::Bundle,
            title: "Starter Bundle".to_string(),
            creator_id: Some(creator_id),
            price: Some(79.0),
            currency: Some("USD".to_string()),
            billing_interval: None,
            video_url: None,
        },
    )
    .expect("Failed to create bundle");
    queries::add_catalog_inclusion(&conn, &bundle.id, &course.id).expect("Failed to link bundle");
    queries::add_catalog_inclusion(&conn, &plan.id, &course.id).expect("Failed to link plan");

    lines.push(format!("Plan: {} ({})", plan.title, plan.id));
    lines.push(format!("Course: {} ({})", course.title, course.id));
    lines.push(format!("Bundle: {} ({})", bundle.title, bundle.id));
    print_banner("SEEDED DEV DATA", &lines);
}

fn issue_api_key(state: &AppState, user_id: &str) {
    let conn = state.db.get().expect("Failed to get db connection");
    let audit_conn = state.audit.get().expect("Failed to get audit db connection");

    let Some(user) = queries::get_user_by_id(&conn, user_id).expect("Failed to load user") else {
        eprintln!("User not found: {}", user_id);
        std::process::exit(1);
    };
    let (key, api_key) = queries::create_api_key(&conn, &user.id, "cli").expect("Failed to create API key");

    AuditLogBuilder::system(&audit_conn, state.audit_log_enabled)
        .action(AuditAction::CreateApiKey)
        .resource("api_key", &key.id)
        .details(&serde_json::json!({ "user_id": user.id, "source": "cli" }))
        .save()
        .expect("Failed to write audit log");

    println!("{}", api_key);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reelpay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    let audit_pool =
        create_pool(&config.audit_database_path).expect("Failed to create audit database pool");

    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }
    {
        let conn = audit_pool.get().expect("Failed to get audit connection");
        init_audit_db(&conn).expect("Failed to initialize audit database");
    }

    let (transcoder, video_host) = collaborators::from_config(&config.collaborators);
    let state = AppState {
        db: db_pool,
        audit: audit_pool,
        audit_log_enabled: config.audit_log_enabled,
        dev_mode: config.dev_mode,
        webhook_secrets: Arc::new(config.webhook_secrets.clone()),
        ledger: Arc::new(config.ledger.clone()),
        transcoder,
        video_host,
        processing_timeout_secs: config.collaborators.processing_timeout_secs,
    };

    // One-shot commands
    if let Some(user_id) = &cli.create_api_key {
        issue_api_key(&state, user_id);
        return;
    }
    if cli.reconcile {
        let conn = state.db.get().expect("Failed to get connection");
        let report = ledger::reconcile(&conn).expect("Reconciliation failed");
        println!(
            "{}",
            serde_json::to_string_pretty(&report).expect("Failed to serialize report")
        );
        if !report.is_clean() {
            std::process::exit(2);
        }
        return;
    }
    if cli.repair_once {
        let mut conn = state.db.get().expect("Failed to get connection");
        let report = repair::run_repair_pass(&mut conn, &state.ledger, queries::now())
            .expect("Repair pass failed");
        println!(
            "{}",
            serde_json::to_string_pretty(&report).expect("Failed to serialize report")
        );
        return;
    }

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set REELPAY_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    if let Some(name) = &config.bootstrap_admin_name {
        bootstrap_first_admin(&state, name);
    }

    repair::spawn_repair_task(state.clone(), config.repair_interval_secs);
    media::spawn_media_poller(state.clone(), config.collaborators.poll_interval_secs);

    let mut api = handlers::api_router(state.clone());
    match rate_limit::api_layer(config.rate_limit.api_rpm) {
        Some(layer) => api = api.layer(layer),
        None => tracing::info!("API rate limiting disabled"),
    }

    let app = Router::new()
        .merge(handlers::public_router())
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Reelpay server listening on {}", addr);

    // Connect info feeds the per-IP rate limiter
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
