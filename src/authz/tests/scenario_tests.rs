//! End-to-end request scenarios
//!
//! Requests go through `Api::dispatch`: the permission middleware, the
//! reference CRUD handlers, the in-memory data layer and the reference
//! serializer.

mod common;

use common::*;
use fieldguard::{
    AuthzError, DataLayer, Method, PermissionRule, PluginConfig, Predicate, Principal, Request,
    ResourceDefinition,
};
use serde_json::{json, Value};

fn owned_orders() -> PermissionRule {
    PermissionRule::row_filter(vec![Predicate::owned_by_principal("owner_id")])
}

fn ids(body: &Value) -> Vec<String> {
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|object| object["id"].as_str().unwrap().to_string())
        .collect()
}

// ============================================================================
// READS
// ============================================================================

#[test]
fn test_unregistered_rules_leave_everything_visible() {
    let api = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![ResourceDefinition::list("users", "user")],
    )
    .unwrap();

    let body = get_list(&api, "users", alice(), "");
    let data = body["data"].as_array().unwrap();

    assert_eq!(data.len(), 2);
    for object in data {
        assert_eq!(attribute_names(object), vec!["name", "ssn"]);
    }
}

#[test]
fn test_scenario_field_selection_intersects_grant() {
    let api = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![ResourceDefinition::detail("user", "user")
            .permission(Method::Get, vec![PermissionRule::columns(["id", "name"])])],
    )
    .unwrap();

    let body = get_one(&api, "user", "1", alice(), "fields[user]=ssn,name");

    assert_eq!(body["data"]["id"], "1");
    assert_eq!(body["data"]["attributes"], json!({"name": "Alice"}));

    let unselected = get_one(&api, "user", "2", alice(), "");
    assert_eq!(unselected["data"]["attributes"], json!({"name": "Bob"}));
}

#[test]
fn test_scenario_include_with_hidden_related_attributes() {
    let api = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![
            ResourceDefinition::detail("order", "order"),
            ResourceDefinition::detail("customer", "customer")
                .permission(Method::Get, vec![PermissionRule::columns(["id"])]),
        ],
    )
    .unwrap();

    let body = get_one(&api, "order", "1", alice(), "include=customer");

    assert_eq!(
        body["data"]["relationships"]["customer"]["data"],
        json!({"type": "customer", "id": "1"})
    );
    let included = body["included"].as_array().unwrap();
    assert_eq!(included.len(), 1);
    assert_eq!(included[0]["id"], "1");
    assert_eq!(included[0]["attributes"], json!({}));
    assert!(included[0]["attributes"].get("email").is_none());
}

#[test]
fn test_scenario_required_fields_are_loaded() {
    let store = seeded_store();
    let api = shop_api(
        PluginConfig::default(),
        store,
        vec![ResourceDefinition::list("orders", "order")
            .permission(Method::Get, vec![PermissionRule::columns(["total"])])],
    )
    .unwrap();

    let body = get_list(&api, "orders", alice(), "");
    let data = body["data"].as_array().unwrap();

    assert_eq!(data.len(), 3);
    // tax and subtotal are loaded for `total` but never serialized
    for object in data {
        assert_eq!(attribute_names(object), vec!["total"]);
    }
}

#[test]
fn test_inaccessible_include_is_dropped_silently() {
    let api = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![ResourceDefinition::list("orders", "order")
            .permission(Method::Get, vec![PermissionRule::columns(["total"])])],
    )
    .unwrap();

    let body = get_list(
        &api,
        "orders",
        alice(),
        "include=customer.group&fields[customer]=email",
    );

    assert!(body.get("included").is_none());
    for object in body["data"].as_array().unwrap() {
        assert!(object.get("relationships").is_none());
        assert_eq!(attribute_names(object), vec!["total"]);
    }
}

#[test]
fn test_grant_of_only_relationship_paths_hides_every_attribute() {
    let api = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![
            ResourceDefinition::list("orders", "order")
                .permission(Method::Get, vec![PermissionRule::columns(["customer.email"])]),
            ResourceDefinition::detail("customer", "customer")
                .permission(Method::Get, vec![PermissionRule::columns(["name"])]),
        ],
    )
    .unwrap();

    let body = get_list(&api, "orders", alice(), "include=customer");
    let data = body["data"].as_array().unwrap();

    assert_eq!(data.len(), 3);
    assert!(body.get("included").is_none());
    for object in data {
        assert!(attribute_names(object).is_empty());
        assert!(object.get("relationships").is_none());
    }
}

#[test]
fn test_related_grant_disjoint_from_declared_sub_paths_drops_include() {
    let api = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![
            ResourceDefinition::list("orders", "order").permission(
                Method::Get,
                vec![PermissionRule::columns(["total", "customer.email"])],
            ),
            ResourceDefinition::detail("customer", "customer")
                .permission(Method::Get, vec![PermissionRule::columns(["name"])]),
        ],
    )
    .unwrap();

    let body = get_list(&api, "orders", alice(), "include=customer");

    assert!(body.get("included").is_none());
    for object in body["data"].as_array().unwrap() {
        assert_eq!(attribute_names(object), vec!["total"]);
        assert!(object.get("relationships").is_none());
    }
}

#[test]
fn test_nested_include_stops_at_hidden_segment() {
    let api = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![
            ResourceDefinition::detail("order", "order"),
            ResourceDefinition::detail("customer", "customer")
                .permission(Method::Get, vec![PermissionRule::columns(["name"])]),
        ],
    )
    .unwrap();

    let body = get_one(&api, "order", "2", alice(), "include=customer.group");

    let included = body["included"].as_array().unwrap();
    assert_eq!(included.len(), 1, "group must not be included");
    assert_eq!(included[0]["type"], "customer");
    assert_eq!(included[0]["attributes"], json!({"name": "Globex"}));
    assert!(included[0].get("relationships").is_none());
}

#[test]
fn test_nested_json_paths_are_pruned() {
    let api = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![ResourceDefinition::detail("order", "order").permission(
            Method::Get,
            vec![PermissionRule::columns(["total", "meta.priority"])],
        )],
    )
    .unwrap();

    let body = get_one(&api, "order", "1", alice(), "");

    assert_eq!(attribute_names(&body["data"]), vec!["meta", "total"]);
    assert_eq!(body["data"]["attributes"]["meta"], json!({"priority": "high"}));
}

#[test]
fn test_row_filters_restrict_rows_per_principal() {
    let api = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![ResourceDefinition::list("orders", "order")
            .permission(Method::Get, vec![PermissionRule::columns(["total"]), owned_orders()])],
    )
    .unwrap();

    let mine = get_list(&api, "orders", alice(), "");
    let theirs = get_list(&api, "orders", bob(), "");

    assert_eq!(ids(&mine), vec!["1", "3"]);
    assert_eq!(ids(&theirs), vec!["2"]);
}

#[test]
fn test_row_filter_hides_single_object() {
    let api = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![ResourceDefinition::detail("order", "order")
            .permission(Method::Get, vec![owned_orders()])],
    )
    .unwrap();

    let result = api.dispatch(
        "order",
        Method::Get,
        Request::new().with_principal(bob()).with_id("1"),
    );
    assert!(matches!(result, Err(AuthzError::ObjectNotFound { .. })));
}

#[test]
fn test_role_gated_columns() {
    let api = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![ResourceDefinition::list("users", "user").permission(
            Method::Get,
            vec![
                PermissionRule::columns(["name"]),
                PermissionRule::for_roles(["admin"], PermissionRule::AllowAll),
            ],
        )],
    )
    .unwrap();

    let plain = get_list(&api, "users", alice(), "");
    let admin = get_list(&api, "users", Principal::new("user:root").with_role("admin"), "");

    assert_eq!(attribute_names(&plain["data"][0]), vec!["name"]);
    assert_eq!(attribute_names(&admin["data"][0]), vec!["name", "ssn"]);
}

#[test]
fn test_no_matching_rule_hides_rows_and_attributes() {
    let api = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![ResourceDefinition::list("users", "user").permission(
            Method::Get,
            vec![PermissionRule::for_roles(["admin"], PermissionRule::AllowAll)],
        )],
    )
    .unwrap();

    let body = get_list(&api, "users", alice(), "");
    assert_eq!(body["data"], json!([]));
}

#[test]
fn test_unknown_include_is_client_error() {
    let api = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![ResourceDefinition::list("orders", "order")],
    )
    .unwrap();

    let unknown = api
        .dispatch(
            "orders",
            Method::Get,
            Request::new().with_principal(alice()).with_query("include=shipment"),
        )
        .unwrap_err();
    assert!(unknown.is_client_error());
    assert!(matches!(unknown, AuthzError::InvalidInclude { ref path, .. } if path == "shipment"));

    let attribute = api
        .dispatch(
            "orders",
            Method::Get,
            Request::new().with_principal(alice()).with_query("include=customer.name"),
        )
        .unwrap_err();
    assert!(matches!(attribute, AuthzError::InvalidInclude { ref path, .. } if path == "customer.name"));
}

// ============================================================================
// WRITES
// ============================================================================

#[test]
fn test_create_strips_unauthorized_keys() {
    let store = seeded_store();
    let api = shop_api(
        PluginConfig::default(),
        store.clone(),
        vec![ResourceDefinition::list("orders", "order").permission(
            Method::Post,
            vec![PermissionRule::columns(["total", "tax", "subtotal", "owner_id"])],
        )],
    )
    .unwrap();

    let response = api
        .dispatch(
            "orders",
            Method::Post,
            Request::new().with_principal(alice()).with_payload(record(json!({
                "total": 11, "tax": 1, "subtotal": 10,
                "owner_id": "user:alice", "customer_id": 2
            }))),
        )
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.body["data"]["id"], "4");

    let catalog = shop_catalog();
    let stored = store
        .fetch(catalog.entity("order").unwrap(), &json!(4))
        .unwrap()
        .unwrap();
    assert_eq!(stored.get("total"), Some(&json!(11)));
    assert!(stored.get("customer_id").is_none());
}

#[test]
fn test_create_rejects_unauthorized_keys_when_configured() {
    let store = seeded_store();
    let config = PluginConfig {
        reject_unauthorized_writes: true,
        ..PluginConfig::default()
    };
    let api = shop_api(
        config,
        store.clone(),
        vec![ResourceDefinition::list("orders", "order")
            .permission(Method::Post, vec![PermissionRule::columns(["total"])])],
    )
    .unwrap();

    let result = api.dispatch(
        "orders",
        Method::Post,
        Request::new()
            .with_principal(alice())
            .with_payload(record(json!({"total": 1, "owner_id": "user:mallory"}))),
    );

    assert!(matches!(result, Err(AuthzError::Forbidden(ref msg)) if msg.contains("owner_id")));
    assert_eq!(store.count("order"), 3);
}

#[test]
fn test_update_checks_stored_row() {
    let store = seeded_store();
    let api = shop_api(
        PluginConfig::default(),
        store.clone(),
        vec![ResourceDefinition::detail("order", "order").permission(
            Method::Patch,
            vec![PermissionRule::columns(["meta.note"]), owned_orders()],
        )],
    )
    .unwrap();

    let patch = |principal: Principal| {
        api.dispatch(
            "order",
            Method::Patch,
            Request::new()
                .with_principal(principal)
                .with_id("1")
                .with_payload(record(json!({
                    "total": 0,
                    "meta": {"note": "ring twice", "priority": "low"}
                }))),
        )
    };

    assert!(matches!(patch(bob()), Err(AuthzError::Forbidden(_))));

    let response = patch(alice()).unwrap();
    assert_eq!(response.status, 200);

    let catalog = shop_catalog();
    let stored = store
        .fetch(catalog.entity("order").unwrap(), &json!(1))
        .unwrap()
        .unwrap();
    assert_eq!(stored["total"], json!(110), "total is not writable");
    assert_eq!(stored["meta"], json!({"note": "ring twice"}));
}

#[test]
fn test_update_response_is_limited_to_read_grant() {
    let store = seeded_store();
    let api = shop_api(
        PluginConfig::default(),
        store.clone(),
        vec![
            ResourceDefinition::detail("order", "order")
                .permission(Method::Get, vec![PermissionRule::columns(["customer.email"])]),
            ResourceDefinition::detail("customer", "customer")
                .permission(Method::Get, vec![PermissionRule::columns(["name"])]),
        ],
    )
    .unwrap();

    let response = api
        .dispatch(
            "order",
            Method::Patch,
            Request::new()
                .with_principal(bob())
                .with_id("2")
                .with_query("include=customer")
                .with_payload(record(json!({"total": 56}))),
        )
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body["data"]["id"], "2");
    assert_eq!(response.body["data"]["attributes"], json!({}));
    assert!(response.body["data"].get("relationships").is_none());

    let catalog = shop_catalog();
    let stored = store
        .fetch(catalog.entity("order").unwrap(), &json!(2))
        .unwrap()
        .unwrap();
    assert_eq!(stored["total"], json!(56));
}

#[test]
fn test_create_response_omits_unreadable_columns() {
    let api = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![ResourceDefinition::list("orders", "order")
            .permission(Method::Get, vec![PermissionRule::columns(["total"])])],
    )
    .unwrap();

    let response = api
        .dispatch(
            "orders",
            Method::Post,
            Request::new()
                .with_principal(alice())
                .with_query("include=customer")
                .with_payload(record(json!({
                    "total": 11, "tax": 1, "subtotal": 10,
                    "owner_id": "user:alice", "customer_id": 1,
                    "meta": {"note": "secret", "priority": "high"}
                }))),
        )
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.body["data"]["attributes"], json!({"total": 11}));
    assert!(response.body["data"].get("relationships").is_none());
}

#[test]
fn test_update_with_reject_mode_accepts_permitted_attributes() {
    let store = seeded_store();
    let config = PluginConfig {
        reject_unauthorized_writes: true,
        ..PluginConfig::default()
    };
    let api = shop_api(
        config,
        store.clone(),
        vec![ResourceDefinition::detail("order", "order")
            .permission(Method::Patch, vec![PermissionRule::columns(["total"])])],
    )
    .unwrap();

    let response = api
        .dispatch(
            "order",
            Method::Patch,
            Request::new()
                .with_principal(alice())
                .with_id("1")
                .with_payload(record(json!({"total": 120}))),
        )
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body["data"]["attributes"]["total"], json!(120));
}

#[test]
fn test_delete_requires_grant_and_row() {
    let store = seeded_store();
    let api = shop_api(
        PluginConfig::default(),
        store.clone(),
        vec![ResourceDefinition::detail("order", "order").permission(Method::Delete, vec![owned_orders()])],
    )
    .unwrap();

    let delete = |principal: Principal, id: &str| {
        api.dispatch(
            "order",
            Method::Delete,
            Request::new().with_principal(principal).with_id(id),
        )
    };

    assert!(matches!(delete(bob(), "1"), Err(AuthzError::Forbidden(_))));
    assert_eq!(store.count("order"), 3);

    assert_eq!(delete(alice(), "1").unwrap().status, 204);
    assert_eq!(store.count("order"), 2);

    assert!(matches!(
        delete(alice(), "1"),
        Err(AuthzError::ObjectNotFound { .. })
    ));
}

#[test]
fn test_write_without_any_grant_is_forbidden() {
    let store = seeded_store();
    let api = shop_api(
        PluginConfig::default(),
        store.clone(),
        vec![ResourceDefinition::list("users", "user").permission(
            Method::Post,
            vec![PermissionRule::for_roles(["admin"], PermissionRule::AllowAll)],
        )],
    )
    .unwrap();

    let result = api.dispatch(
        "users",
        Method::Post,
        Request::new()
            .with_principal(alice())
            .with_payload(record(json!({"name": "Eve"}))),
    );

    assert!(matches!(result, Err(AuthzError::Forbidden(_))));
    assert_eq!(store.count("user"), 2);
}
