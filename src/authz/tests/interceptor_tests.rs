//! Route interceptor wiring: idempotent installation, strict mode, disabled
//! methods, middleware order and the sealed registry

mod common;

use common::*;
use fieldguard::api::{Handler, Middleware};
use fieldguard::resource::list_handlers;
use fieldguard::{
    ApiBuilder, AuthzError, DataLayer, HandlerSet, Method, OperationKind, PermissionRegistry,
    PermissionRule, PluginConfig, Predicate, Request, RequestContext, ResourceDefinition, Response,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

fn orders_definition() -> ResourceDefinition {
    ResourceDefinition::list("orders", "order")
        .permission(Method::Get, vec![PermissionRule::columns(["total"])])
        .permission(Method::Post, vec![PermissionRule::AllowAll])
}

// ============================================================================
// INSTALLATION
// ============================================================================

#[test]
fn test_installing_twice_is_a_no_op() {
    let data: Arc<dyn DataLayer> = seeded_store();
    let mut builder = ApiBuilder::new(Arc::new(shop_catalog()), PluginConfig::default());

    builder
        .route(orders_definition(), list_handlers(data.clone()))
        .unwrap();
    let first = builder.installed("orders").unwrap().handler(Method::Get).unwrap().clone();
    let rules_before = builder.registry().rules(OperationKind::GetList, "order").len();

    builder
        .route(orders_definition(), list_handlers(data))
        .unwrap();
    let second = builder.installed("orders").unwrap().handler(Method::Get).unwrap().clone();

    assert!(Arc::ptr_eq(&first, &second), "handler must not be wrapped again");
    assert_eq!(
        builder.registry().rules(OperationKind::GetList, "order").len(),
        rules_before,
        "rules must not be registered twice"
    );
}

#[test]
fn test_strict_mode_fails_fast() {
    let result = shop_api(
        PluginConfig::strict(),
        seeded_store(),
        vec![ResourceDefinition::list("orders", "order")
            .permission(Method::Get, vec![PermissionRule::columns(["total"])])],
    );

    match result {
        Err(AuthzError::Configuration(msg)) => {
            assert!(msg.contains("order"));
            assert!(msg.contains("post"));
        }
        other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_strict_mode_accepts_complete_rules() {
    let api = shop_api(
        PluginConfig::strict(),
        seeded_store(),
        vec![
            orders_definition(),
            ResourceDefinition::detail("order", "order")
                .methods([Method::Get])
                .permission(Method::Get, vec![PermissionRule::AllowAll]),
        ],
    )
    .unwrap();

    assert!(api.route("orders").is_some());
    assert!(api.route("order").is_some());
}

#[test]
fn test_unknown_schema_is_configuration_error() {
    let result = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![ResourceDefinition::list("invoices", "invoice")],
    );
    assert!(result.is_err());
}

#[test]
fn test_invalid_rule_is_rejected_at_install() {
    let result = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![ResourceDefinition::list("orders", "order")
            .permission(Method::Get, vec![PermissionRule::row_filter(Vec::new())])],
    );
    assert!(matches!(result, Err(AuthzError::Configuration(_))));
}

// ============================================================================
// DISPATCH
// ============================================================================

#[test]
fn test_disabled_method_is_refused() {
    let api = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![ResourceDefinition::list("orders", "order").methods([Method::Get])],
    )
    .unwrap();

    let post = api
        .dispatch("orders", Method::Post, Request::new().with_principal(alice()))
        .unwrap_err();
    assert!(matches!(post, AuthzError::MethodDisabled { method: Method::Post, .. }));

    let patch = api
        .dispatch("orders", Method::Patch, Request::new().with_principal(alice()))
        .unwrap_err();
    assert!(matches!(patch, AuthzError::MethodDisabled { method: Method::Patch, .. }));
}

#[test]
fn test_missing_principal_is_internal_error() {
    let api = shop_api(PluginConfig::default(), seeded_store(), vec![orders_definition()]).unwrap();

    let err = api.dispatch("orders", Method::Get, Request::new()).unwrap_err();
    assert!(matches!(err, AuthzError::MissingPrincipal));
    assert!(!err.is_client_error());
}

#[test]
fn test_decorators_wrap_the_permission_layer() {
    let calls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let tracing_decorator = |label: &'static str, calls: Arc<Mutex<Vec<String>>>| -> Middleware {
        Arc::new(move |inner: Handler| -> Handler {
            let calls = calls.clone();
            Arc::new(move |ctx: &mut RequestContext| {
                calls.lock().push(format!("{} resolver={}", label, ctx.has_resolver()));
                inner(ctx)
            })
        })
    };

    let mut builder = ApiBuilder::new(Arc::new(shop_catalog()), PluginConfig::default());
    builder
        .route(
            ResourceDefinition::list("orders", "order")
                .decorator(tracing_decorator("first", calls.clone()))
                .decorator(tracing_decorator("second", calls.clone())),
            HandlerSet::new().on(Method::Get, |ctx| {
                let id = ctx.resolver()?.request_id();
                Ok(Response::ok(Value::String(id.to_string())))
            }),
        )
        .unwrap();
    let api = builder.build();

    let response = api
        .dispatch("orders", Method::Get, Request::new().with_principal(alice()))
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(
        *calls.lock(),
        vec!["second resolver=false".to_string(), "first resolver=false".to_string()]
    );
}

#[test]
fn test_each_request_gets_its_own_resolver() {
    let mut builder = ApiBuilder::new(Arc::new(shop_catalog()), PluginConfig::default());
    builder
        .route(
            ResourceDefinition::list("orders", "order"),
            HandlerSet::new().on(Method::Get, |ctx| {
                let resolver = ctx.resolver()?;
                resolver.permission_for_get("order");
                resolver.permission_for_get("order");
                Ok(Response::ok(serde_json::json!({
                    "request_id": resolver.request_id().to_string(),
                    "cached": resolver.cached(),
                })))
            }),
        )
        .unwrap();
    let api = builder.build();

    let first = api
        .dispatch("orders", Method::Get, Request::new().with_principal(alice()))
        .unwrap();
    let second = api
        .dispatch("orders", Method::Get, Request::new().with_principal(alice()))
        .unwrap();

    assert_eq!(first.body["cached"], 1, "descriptors are memoized per request");
    assert_ne!(first.body["request_id"], second.body["request_id"]);
}

#[test]
fn test_concurrent_requests_share_the_sealed_registry() {
    let api = shop_api(
        PluginConfig::default(),
        seeded_store(),
        vec![ResourceDefinition::list("orders", "order").permission(
            Method::Get,
            vec![PermissionRule::row_filter(vec![Predicate::owned_by_principal("owner_id")])],
        )],
    )
    .unwrap();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let api = &api;
                scope.spawn(move || {
                    let (principal, expected) = if i % 2 == 0 { (alice(), 2) } else { (bob(), 1) };
                    let body = get_list(api, "orders", principal, "");
                    assert_eq!(body["data"].as_array().unwrap().len(), expected);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    });
}

#[test]
fn test_global_registry_installs_once() {
    let api = shop_api(PluginConfig::default(), seeded_store(), vec![orders_definition()]).unwrap();

    PermissionRegistry::install_global(api.registry().clone()).unwrap();
    let global = PermissionRegistry::global().unwrap();
    assert!(Arc::ptr_eq(&global, api.registry()));
    assert_eq!(global.rules(OperationKind::GetList, "order").map(<[_]>::len), Some(1));

    let again = PermissionRegistry::install_global(api.registry().clone());
    assert!(matches!(again, Err(AuthzError::Configuration(_))));
}
