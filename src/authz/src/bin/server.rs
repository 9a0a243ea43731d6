//! # Fieldguard Demo Server
//!
//! Serves a small sample catalog (users, customers, orders) behind the
//! permission plugin.
//!
//! ## Endpoints
//!
//! - `GET|POST /v1/{resource}` - collection resources
//! - `GET|PATCH|DELETE /v1/{resource}/{id}` - single-object resources
//! - `GET /health` - Health check
//!
//! Requests identify their principal with the `x-principal-id` header and
//! optional comma-separated `x-principal-roles`.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `PORT` - HTTP server port (default: 8080)
//! - `RUST_LOG` - Log level (default: info)
//! - `FIELDGUARD_STRICT` - Refuse resources without permission rules
//! - `FIELDGUARD_REJECT_WRITES` - Reject unauthorized payload keys instead of stripping them

use axum::serve;
use fieldguard::resource::{detail_handlers, list_handlers};
use fieldguard::{
    Api, ApiBuilder, Catalog, DataLayer, EntityType, InMemoryDataLayer, Method,
    PermissionRegistry, PermissionRule, PluginConfig, Predicate, Record, ResourceDefinition,
    SchemaTemplate,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sample catalog: customers own orders, users manage customers
fn sample_catalog() -> fieldguard::Result<Catalog> {
    Catalog::builder()
        .entity(EntityType::new("user").columns(["name", "email", "ssn"]))
        .entity(
            EntityType::new("customer")
                .columns(["name", "email", "account_manager_id"])
                .belongs_to("account_manager", "user", "account_manager_id")
                .has_many("orders", "order", "customer_id"),
        )
        .entity(
            EntityType::new("order")
                .columns(["total", "tax", "subtotal", "customer_id", "owner_id"])
                .json_column("shipping")
                .belongs_to("customer", "customer", "customer_id")
                .requires("total", ["tax", "subtotal"]),
        )
        .schema(SchemaTemplate::new("user", "user").attributes(["name", "email", "ssn"]))
        .schema(
            SchemaTemplate::new("customer", "customer")
                .attributes(["name", "email"])
                .relationship("account_manager", "user")
                .relationship_many("orders", "order"),
        )
        .schema(SchemaTemplate::embedded("shipping").attributes(["street", "city", "country"]))
        .schema(
            SchemaTemplate::new("order", "order")
                .attributes(["total", "tax", "subtotal", "owner_id"])
                .nested("shipping", "shipping")
                .relationship("customer", "customer"),
        )
        .build()
}

fn row(value: serde_json::Value) -> Record {
    value.as_object().cloned().unwrap_or_default()
}

fn seed(data: &InMemoryDataLayer) {
    data.seed(
        "user",
        [
            row(json!({"id": 1, "name": "Alice", "email": "alice@example.com", "ssn": "111-11-1111"})),
            row(json!({"id": 2, "name": "Bob", "email": "bob@example.com", "ssn": "222-22-2222"})),
        ],
    );
    data.seed(
        "customer",
        [
            row(json!({"id": 1, "name": "Acme", "email": "ops@acme.test", "account_manager_id": 1})),
            row(json!({"id": 2, "name": "Globex", "email": "it@globex.test", "account_manager_id": 2})),
        ],
    );
    data.seed(
        "order",
        [
            row(json!({
                "id": 1, "total": 110, "tax": 10, "subtotal": 100,
                "customer_id": 1, "owner_id": "user:alice",
                "shipping": {"street": "1 Main St", "city": "Springfield", "country": "US"}
            })),
            row(json!({
                "id": 2, "total": 55, "tax": 5, "subtotal": 50,
                "customer_id": 2, "owner_id": "user:bob",
                "shipping": {"street": "9 Elm Rd", "city": "Shelbyville", "country": "US"}
            })),
        ],
    );
}

/// Install the sample resources
fn build_api(config: PluginConfig) -> fieldguard::Result<Api> {
    let catalog = Arc::new(sample_catalog()?);
    let memory = Arc::new(InMemoryDataLayer::new());
    seed(&memory);
    let data: Arc<dyn DataLayer> = memory;

    let staff = |rule: PermissionRule| PermissionRule::for_roles(["staff", "admin"], rule);
    let admin = |rule: PermissionRule| PermissionRule::for_roles(["admin"], rule);
    let own_orders = || PermissionRule::row_filter(vec![Predicate::owned_by_principal("owner_id")]);

    let mut builder = ApiBuilder::new(catalog, config);
    builder
        .route(
            ResourceDefinition::list("user_list", "user")
                .at("users")
                .methods([Method::Get])
                .permission(
                    Method::Get,
                    vec![
                        PermissionRule::columns(["name"]),
                        admin(PermissionRule::AllowAll),
                    ],
                ),
            list_handlers(data.clone()),
        )?
        .route(
            ResourceDefinition::detail("user_detail", "user")
                .at("users")
                .methods([Method::Get])
                .permission(
                    Method::Get,
                    vec![
                        PermissionRule::columns(["name", "email"]),
                        admin(PermissionRule::AllowAll),
                    ],
                ),
            detail_handlers(data.clone()),
        )?
        .route(
            ResourceDefinition::list("customer_list", "customer")
                .at("customers")
                .permission(
                    Method::Get,
                    vec![
                        PermissionRule::columns(["name", "orders"]),
                        staff(PermissionRule::AllowAll),
                    ],
                )
                .permission(Method::Post, vec![staff(PermissionRule::columns(["name", "email"]))]),
            list_handlers(data.clone()),
        )?
        .route(
            ResourceDefinition::detail("customer_detail", "customer")
                .at("customers")
                .permission(
                    Method::Get,
                    vec![
                        PermissionRule::columns(["name", "orders"]),
                        staff(PermissionRule::AllowAll),
                    ],
                )
                .permission(Method::Patch, vec![staff(PermissionRule::columns(["name", "email"]))])
                .permission(Method::Delete, vec![admin(PermissionRule::AllowAll)]),
            detail_handlers(data.clone()),
        )?
        .route(
            ResourceDefinition::list("order_list", "order")
                .at("orders")
                .permission(
                    Method::Get,
                    vec![
                        PermissionRule::columns(["total", "shipping.city", "customer"]),
                        own_orders(),
                        staff(PermissionRule::AllowAll),
                    ],
                )
                .permission(
                    Method::Post,
                    vec![PermissionRule::columns(["tax", "subtotal", "total", "customer_id", "owner_id"])],
                ),
            list_handlers(data.clone()),
        )?
        .route(
            ResourceDefinition::detail("order_detail", "order")
                .at("orders")
                .permission(
                    Method::Get,
                    vec![
                        PermissionRule::columns(["total", "tax", "subtotal", "shipping", "customer"]),
                        own_orders(),
                    ],
                )
                .permission(
                    Method::Patch,
                    vec![PermissionRule::columns(["shipping"]), own_orders()],
                )
                .permission(Method::Delete, vec![admin(PermissionRule::AllowAll)]),
            detail_handlers(data),
        )?;

    Ok(builder.build())
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

/// Main server entrypoint
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Fieldguard demo server v{}", fieldguard::VERSION);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let config = PluginConfig::from_env();

    info!("Configuration:");
    info!("  Port: {}", port);
    info!("  Strict: {}", config.strict);
    info!("  Reject unauthorized writes: {}", config.reject_unauthorized_writes);

    let api = Arc::new(build_api(config)?);
    PermissionRegistry::install_global(api.registry().clone())?;

    let app = fieldguard::http::router(api);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind HTTP server: {}", e);
        e
    })?;

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}
