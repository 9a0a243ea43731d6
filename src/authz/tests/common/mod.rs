//! Shared shop fixture for the integration suites

#![allow(dead_code)]

use fieldguard::resource::{detail_handlers, list_handlers};
use fieldguard::{
    Api, ApiBuilder, Catalog, DataLayer, EntityType, InMemoryDataLayer, Method, PluginConfig,
    Principal, Record, Request, ResourceDefinition, ResourceKind, SchemaTemplate,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

/// users, groups, customers and orders
///
/// `order.total` requires `tax` and `subtotal`; `order.meta` is a JSON blob.
pub fn shop_catalog() -> Catalog {
    Catalog::builder()
        .entity(EntityType::new("user").columns(["name", "ssn"]))
        .entity(EntityType::new("group").column("name"))
        .entity(
            EntityType::new("customer")
                .columns(["name", "email", "group_id"])
                .belongs_to("group", "group", "group_id")
                .has_many("orders", "order", "customer_id"),
        )
        .entity(
            EntityType::new("order")
                .columns(["total", "tax", "subtotal", "customer_id", "owner_id"])
                .json_column("meta")
                .belongs_to("customer", "customer", "customer_id")
                .requires("total", ["tax", "subtotal"]),
        )
        .schema(SchemaTemplate::new("user", "user").attributes(["name", "ssn"]))
        .schema(SchemaTemplate::new("group", "group").attribute("name"))
        .schema(
            SchemaTemplate::new("customer", "customer")
                .attributes(["name", "email"])
                .relationship("group", "group")
                .relationship_many("orders", "order"),
        )
        .schema(SchemaTemplate::embedded("order_meta").attributes(["note", "priority"]))
        .schema(
            SchemaTemplate::new("order", "order")
                .attributes(["total", "tax", "subtotal", "owner_id"])
                .nested("meta", "order_meta")
                .relationship("customer", "customer"),
        )
        .build()
        .unwrap()
}

pub fn seeded_store() -> Arc<InMemoryDataLayer> {
    let store = InMemoryDataLayer::new();
    store.seed(
        "user",
        [
            record(json!({"id": 1, "name": "Alice", "ssn": "111-11-1111"})),
            record(json!({"id": 2, "name": "Bob", "ssn": "222-22-2222"})),
        ],
    );
    store.seed(
        "group",
        [
            record(json!({"id": 1, "name": "retail"})),
            record(json!({"id": 2, "name": "wholesale"})),
        ],
    );
    store.seed(
        "customer",
        [
            record(json!({"id": 1, "name": "Acme", "email": "ops@acme.test", "group_id": 1})),
            record(json!({"id": 2, "name": "Globex", "email": "it@globex.test", "group_id": 2})),
        ],
    );
    store.seed(
        "order",
        [
            record(json!({
                "id": 1, "total": 110, "tax": 10, "subtotal": 100,
                "customer_id": 1, "owner_id": "user:alice",
                "meta": {"note": "leave at door", "priority": "high"}
            })),
            record(json!({
                "id": 2, "total": 55, "tax": 5, "subtotal": 50,
                "customer_id": 2, "owner_id": "user:bob",
                "meta": {"note": "fragile", "priority": "low"}
            })),
            record(json!({
                "id": 3, "total": 22, "tax": 2, "subtotal": 20,
                "customer_id": 1, "owner_id": "user:alice",
                "meta": {"note": "", "priority": "low"}
            })),
        ],
    );
    Arc::new(store)
}

/// Install each definition with the reference handlers for its kind
pub fn shop_api(
    config: PluginConfig,
    store: Arc<InMemoryDataLayer>,
    definitions: Vec<ResourceDefinition>,
) -> fieldguard::Result<Api> {
    let data: Arc<dyn DataLayer> = store;
    let mut builder = ApiBuilder::new(Arc::new(shop_catalog()), config);
    for definition in definitions {
        let handlers = match definition.kind {
            ResourceKind::List => list_handlers(data.clone()),
            ResourceKind::Detail => detail_handlers(data.clone()),
        };
        builder.route(definition, handlers)?;
    }
    Ok(builder.build())
}

pub fn alice() -> Principal {
    Principal::new("user:alice")
}

pub fn bob() -> Principal {
    Principal::new("user:bob")
}

pub fn get_list(api: &Api, resource: &str, principal: Principal, query: &str) -> Value {
    api.dispatch(
        resource,
        Method::Get,
        Request::new().with_principal(principal).with_query(query),
    )
    .unwrap()
    .body
}

pub fn get_one(api: &Api, resource: &str, id: &str, principal: Principal, query: &str) -> Value {
    api.dispatch(
        resource,
        Method::Get,
        Request::new()
            .with_principal(principal)
            .with_query(query)
            .with_id(id),
    )
    .unwrap()
    .body
}

/// Attribute names of a resource object
pub fn attribute_names(object: &Value) -> Vec<String> {
    let mut names: Vec<String> = object["attributes"]
        .as_object()
        .map(|attrs| attrs.keys().cloned().collect())
        .unwrap_or_default();
    names.sort();
    names
}
