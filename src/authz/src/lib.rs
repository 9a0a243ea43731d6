//! # Fieldguard
//!
//! Field- and row-level authorization for resource-oriented REST APIs.
//!
//! ## Features
//!
//! - **Permission registry** of declarative rules per (operation, entity type)
//! - **Request-scoped resolver** computing memoized access descriptors
//! - **Schema pruning** so responses only serialize readable fields
//! - **Query rewriting** of projections, row filters and includes
//! - **Route interception** wrapping resource handlers in permission middleware
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use fieldguard::{
//!     Api, ApiBuilder, Catalog, EntityType, InMemoryDataLayer, Method, PermissionRule,
//!     PluginConfig, Predicate, Principal, Request, ResourceDefinition, SchemaTemplate,
//! };
//! use fieldguard::resource::list_handlers;
//!
//! # fn main() -> fieldguard::Result<()> {
//! let catalog = Arc::new(
//!     Catalog::builder()
//!         .entity(EntityType::new("order").columns(["total", "owner_id"]))
//!         .schema(SchemaTemplate::new("order", "order").attributes(["total", "owner_id"]))
//!         .build()?,
//! );
//! let data = Arc::new(InMemoryDataLayer::new());
//!
//! let mut builder = ApiBuilder::new(catalog, PluginConfig::default());
//! builder.route(
//!     ResourceDefinition::list("orders", "order").permission(
//!         Method::Get,
//!         vec![
//!             PermissionRule::columns(["total"]),
//!             PermissionRule::row_filter(vec![Predicate::owned_by_principal("owner_id")]),
//!         ],
//!     ),
//!     list_handlers(data),
//! )?;
//! let api: Api = builder.build();
//!
//! let response = api.dispatch(
//!     "orders",
//!     Method::Get,
//!     Request::new().with_principal(Principal::new("user:alice")),
//! )?;
//! assert_eq!(response.status, 200);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod catalog;
pub mod config;
pub mod datalayer;
pub mod error;
pub mod http;
pub mod path;
pub mod plugin;
pub mod query;
pub mod registry;
pub mod resolver;
pub mod resource;
pub mod rules;
pub mod schema;
pub mod types;

// Re-export commonly used types
pub use api::{Api, ApiBuilder, HandlerSet, Request, RequestContext, ResourceDefinition, Response};
pub use catalog::{Catalog, EntityType};
pub use config::PluginConfig;
pub use datalayer::{DataLayer, InMemoryDataLayer};
pub use error::{AuthzError, CatalogError, Result};
pub use plugin::PermissionPlugin;
pub use query::{Query, QueryRewriter, QueryString};
pub use registry::{PermissionRegistry, RegistryBuilder};
pub use resolver::{AccessDescriptor, FieldAccess, PermissionResolver};
pub use rules::{AccessGrant, JoinSpec, PermissionRule, Predicate};
pub use schema::{Schema, SchemaTemplate};
pub use types::{Method, OperationKind, Principal, Record, ResourceKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
