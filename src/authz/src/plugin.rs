//! Permission plugin
//!
//! Hook points the resource framework calls while routing and serving
//! requests. `after_route` runs once per resource at startup and builds the
//! permission middleware; every other hook runs per request and needs the
//! resolver that middleware bound to the [`RequestContext`].

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::api::{Handler, HandlerSet, RequestContext, ResourceDefinition};
use crate::config::PluginConfig;
use crate::error::{AuthzError, Result};
use crate::query::{load_set, Query, QueryRewriter};
use crate::registry::RegistryBuilder;
use crate::resolver::PermissionResolver;
use crate::rules::RowLookup;
use crate::schema::{prune, Schema};
use crate::types::{Method, OperationKind, Record, ResourceKind};

/// Field- and row-level permission plugin
#[derive(Debug, Clone, Default)]
pub struct PermissionPlugin {
    config: PluginConfig,
}

impl PermissionPlugin {
    pub fn new(config: PluginConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Register a resource's rules and wrap its handlers
    ///
    /// Methods the resource does not implement are skipped. Implemented but
    /// disabled methods are routed to a handler that always fails with
    /// [`AuthzError::MethodDisabled`]. In strict mode an enabled method with
    /// no rules is a configuration error.
    pub fn after_route(
        &self,
        definition: &ResourceDefinition,
        entity: &str,
        handlers: &HandlerSet,
        registry: &mut RegistryBuilder,
    ) -> Result<HashMap<Method, Handler>> {
        let mut table = HashMap::new();
        let many = definition.kind == ResourceKind::List;

        for &method in definition.kind.supported_methods() {
            let Some(handler) = handlers.get(method) else {
                continue;
            };
            let operation = definition.kind.operation(method);
            let rules = definition
                .permissions
                .get(&method)
                .cloned()
                .unwrap_or_default();
            let enabled = definition.is_enabled(method);

            if self.config.strict && enabled && !definition.event && rules.is_empty() {
                return Err(AuthzError::Configuration(format!(
                    "No permission rule for {} {}",
                    entity, operation
                )));
            }
            registry.register(operation, entity, rules)?;

            let wrapped = if enabled {
                let mut wrapped = with_permissions(handler.clone(), operation, many);
                for decorator in &definition.decorators {
                    wrapped = decorator(wrapped);
                }
                wrapped
            } else {
                debug!("{} {} disabled", definition.name, method);
                method_disabled(definition.name.clone(), method)
            };
            table.insert(method, wrapped);
        }

        Ok(table)
    }

    /// Prune a freshly built schema to what the principal may read
    pub fn after_init_schema(&self, schema: &mut Schema, ctx: &mut RequestContext) -> Result<()> {
        let catalog = ctx.catalog.clone();
        let resolver = ctx.resolver()?;
        match resolver.response_field_paths(&catalog, schema)? {
            Some(paths) => prune(schema, &catalog, &paths),
            None => {
                debug!(
                    "[{}] Every attribute of {} hidden",
                    resolver.request_id(),
                    schema.type_name()
                );
                schema.hide_all_attributes();
                Ok(())
            }
        }
    }

    /// Sanitize a create payload with the `post` grant
    pub fn before_create_query_clean(
        &self,
        payload: Record,
        ctx: &mut RequestContext,
    ) -> Result<Record> {
        let entity = ctx.entity.clone();
        let reject = self.config.reject_unauthorized_writes;
        ctx.resolver()?
            .sanitize_payload(OperationKind::Post, &entity, payload, reject)
    }

    /// Check the stored row and sanitize an update payload with the `patch` grant
    pub fn before_update_query_clean(
        &self,
        payload: Record,
        existing: &Record,
        lookup: &dyn RowLookup,
        ctx: &mut RequestContext,
    ) -> Result<Record> {
        let entity = ctx.entity.clone();
        let reject = self.config.reject_unauthorized_writes;
        let resolver = ctx.resolver()?;
        resolver.check_row(OperationKind::Patch, &entity, existing, lookup)?;
        resolver.sanitize_payload(OperationKind::Patch, &entity, payload, reject)
    }

    /// Check the stored row with the `delete` grant
    pub fn before_delete(
        &self,
        record: &Record,
        lookup: &dyn RowLookup,
        ctx: &mut RequestContext,
    ) -> Result<()> {
        let entity = ctx.entity.clone();
        ctx.resolver()?
            .check_row(OperationKind::Delete, &entity, record, lookup)
    }

    /// Project a written row down to what the principal may read back
    ///
    /// Keeps the primary key and the read load set; relationship data is
    /// never part of a written row.
    pub fn after_write(&self, record: Record, ctx: &mut RequestContext) -> Result<Record> {
        let catalog = ctx.catalog.clone();
        let entity = catalog.entity(&ctx.entity)?;
        let resolver = ctx.resolver()?;
        let descriptor = resolver.permission_for_get(&entity.name);
        let load = load_set(&catalog, entity, &descriptor, None)?;
        debug!(
            "[{}] Written {} projected to {:?}",
            resolver.request_id(),
            entity.name,
            load
        );

        Ok(record
            .into_iter()
            .filter(|(name, _)| *name == entity.primary_key || load.contains(name))
            .collect())
    }

    pub fn after_build_list_query(&self, query: Query, ctx: &mut RequestContext) -> Result<Query> {
        self.rewrite_query(query, ctx)
    }

    pub fn after_build_get_query(&self, query: Query, ctx: &mut RequestContext) -> Result<Query> {
        self.rewrite_query(query, ctx)
    }

    fn rewrite_query(&self, query: Query, ctx: &mut RequestContext) -> Result<Query> {
        let catalog = ctx.catalog.clone();
        let template = catalog.schema(&ctx.schema)?;

        let mut qs = std::mem::take(&mut ctx.request.query);
        let rewritten = match ctx.resolver() {
            Ok(resolver) => QueryRewriter::new(&catalog).rewrite(query, &template, &mut qs, resolver),
            Err(err) => Err(err),
        };
        ctx.request.query = qs;

        // the rewritten eager loads replace the unrestricted include loader
        ctx.eager_load_includes = false;
        rewritten
    }
}

/// Bind a fresh resolver for the request, then run the handler
fn with_permissions(handler: Handler, operation: OperationKind, many: bool) -> Handler {
    Arc::new(move |ctx: &mut RequestContext| {
        let principal = ctx
            .request
            .principal
            .clone()
            .ok_or(AuthzError::MissingPrincipal)?;
        let resolver = PermissionResolver::new(ctx.registry.clone(), principal, operation, many);
        ctx.set_resolver(resolver);
        handler(ctx)
    })
}

fn method_disabled(resource: String, method: Method) -> Handler {
    Arc::new(move |_: &mut RequestContext| {
        Err(AuthzError::MethodDisabled {
            resource: resource.clone(),
            method,
        })
    })
}
