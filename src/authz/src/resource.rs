//! Reference CRUD handlers
//!
//! Collection and single-object handlers over a [`DataLayer`], calling the
//! permission hooks at the points the resource framework defines: after the
//! base query is built, after the response schema is instantiated, before
//! and after writes, and before deletes.

use std::sync::Arc;

use crate::api::{HandlerSet, RequestContext, Response};
use crate::datalayer::{eager_load_includes, parse_id, DataLayer};
use crate::error::{AuthzError, Result};
use crate::query::Query;
use crate::schema::{dump_many, dump_one, Schema};
use crate::types::{Method, Record};

/// Handlers for a collection resource: GET (list) and POST
pub fn list_handlers(data: Arc<dyn DataLayer>) -> HandlerSet {
    let reader = data.clone();
    HandlerSet::new()
        .on(Method::Get, move |ctx| get_list(reader.as_ref(), ctx))
        .on(Method::Post, move |ctx| create(data.as_ref(), ctx))
}

/// Handlers for a single-object resource: GET, PATCH and DELETE
pub fn detail_handlers(data: Arc<dyn DataLayer>) -> HandlerSet {
    let reader = data.clone();
    let writer = data.clone();
    HandlerSet::new()
        .on(Method::Get, move |ctx| get_one(reader.as_ref(), ctx))
        .on(Method::Patch, move |ctx| update(writer.as_ref(), ctx))
        .on(Method::Delete, move |ctx| delete(data.as_ref(), ctx))
}

/// Response schema for the request, pruned for the principal
fn response_schema(ctx: &mut RequestContext) -> Result<Schema> {
    let plugin = ctx.plugin.clone();
    let mut schema = Schema::for_request(&ctx.catalog, &ctx.schema, &ctx.request.query)?;
    plugin.after_init_schema(&mut schema, ctx)?;
    Ok(schema)
}

fn object_id(ctx: &RequestContext) -> Result<String> {
    ctx.request
        .id
        .clone()
        .ok_or_else(|| AuthzError::Internal(format!("{} called without an object id", ctx.resource)))
}

fn get_list(data: &dyn DataLayer, ctx: &mut RequestContext) -> Result<Response> {
    let plugin = ctx.plugin.clone();
    let catalog = ctx.catalog.clone();

    let mut query = plugin.after_build_list_query(Query::new(ctx.entity.as_str()), ctx)?;
    if ctx.eager_load_includes {
        eager_load_includes(&catalog, &mut query, &ctx.request.query.include())?;
    }

    let schema = response_schema(ctx)?;
    let rows = data.execute(&catalog, &query)?;
    Ok(Response::ok(dump_many(&schema, &catalog, &rows)?))
}

fn get_one(data: &dyn DataLayer, ctx: &mut RequestContext) -> Result<Response> {
    let plugin = ctx.plugin.clone();
    let catalog = ctx.catalog.clone();
    let id = object_id(ctx)?;
    let entity = catalog.entity(&ctx.entity)?;

    let base = Query::by_id(entity.name.as_str(), &entity.primary_key, parse_id(&id));
    let mut query = plugin.after_build_get_query(base, ctx)?;
    if ctx.eager_load_includes {
        eager_load_includes(&catalog, &mut query, &ctx.request.query.include())?;
    }

    let schema = response_schema(ctx)?;
    let row = data
        .execute(&catalog, &query)?
        .into_iter()
        .next()
        .ok_or_else(|| AuthzError::ObjectNotFound {
            entity: entity.name.clone(),
            id,
        })?;
    Ok(Response::ok(dump_one(&schema, &catalog, &row)?))
}

fn create(data: &dyn DataLayer, ctx: &mut RequestContext) -> Result<Response> {
    let plugin = ctx.plugin.clone();
    let catalog = ctx.catalog.clone();
    let entity = catalog.entity(&ctx.entity)?;

    let payload = ctx.request.payload.take().unwrap_or_default();
    let payload = plugin.before_create_query_clean(payload, ctx)?;
    let created = data.insert(entity, payload)?;
    let created = plugin.after_write(created, ctx)?;

    let schema = response_schema(ctx)?;
    Ok(Response::created(dump_one(&schema, &catalog, &created)?))
}

fn update(data: &dyn DataLayer, ctx: &mut RequestContext) -> Result<Response> {
    let plugin = ctx.plugin.clone();
    let catalog = ctx.catalog.clone();
    let entity = catalog.entity(&ctx.entity)?;
    let id = object_id(ctx)?;
    let key = parse_id(&id);

    let existing = data
        .fetch(entity, &key)?
        .ok_or_else(|| AuthzError::ObjectNotFound {
            entity: entity.name.clone(),
            id: id.clone(),
        })?;
    let payload: Record = ctx.request.payload.take().unwrap_or_default();
    let changes = plugin.before_update_query_clean(payload, &existing, data.lookup(), ctx)?;
    let updated = data.update(entity, &key, changes)?;
    let updated = plugin.after_write(updated, ctx)?;

    let schema = response_schema(ctx)?;
    Ok(Response::ok(dump_one(&schema, &catalog, &updated)?))
}

fn delete(data: &dyn DataLayer, ctx: &mut RequestContext) -> Result<Response> {
    let plugin = ctx.plugin.clone();
    let catalog = ctx.catalog.clone();
    let entity = catalog.entity(&ctx.entity)?;
    let id = object_id(ctx)?;
    let key = parse_id(&id);

    let existing = data
        .fetch(entity, &key)?
        .ok_or(AuthzError::ObjectNotFound {
            entity: entity.name.clone(),
            id,
        })?;
    plugin.before_delete(&existing, data.lookup(), ctx)?;
    data.delete(entity, &key)?;
    Ok(Response::no_content())
}
