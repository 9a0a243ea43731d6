//! Query rewriting
//!
//! Applies a principal's read access to a base query in one pass: row
//! filters and joins, the column projection (with required-field closure) and
//! one restricted eager load per accessible include segment. Include segments
//! the principal cannot see are dropped silently and the query string is
//! rewritten so the serializer never expects them.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use super::{EagerLoad, Query, QueryString};
use crate::catalog::{Catalog, EntityType};
use crate::error::{AuthzError, CatalogError, Result};
use crate::path;
use crate::resolver::{AccessDescriptor, PermissionResolver};
use crate::schema::{FieldKind, SchemaTemplate};

/// Columns to load for one entity
///
/// Allowed top-level names, narrowed to the requested names when a selection
/// was made, narrowed to real columns, then widened by the required-field
/// closure. The primary key is always loaded and is not part of the set.
pub fn load_set(
    catalog: &Catalog,
    entity: &EntityType,
    descriptor: &AccessDescriptor,
    requested: Option<&BTreeSet<String>>,
) -> Result<BTreeSet<String>> {
    let mut visible = match descriptor.top_level_names() {
        None => entity.column_set(),
        Some(names) => names,
    };
    if let Some(requested) = requested {
        visible.retain(|name| requested.contains(name));
    }
    visible.retain(|name| entity.is_column(name));

    let mut load = catalog.with_required(&entity.name, &visible)?;
    load.remove(&entity.primary_key);
    Ok(load)
}

/// One relationship step of an include path
#[derive(Debug, Clone)]
struct Hop {
    name: String,
    parent_entity: String,
    parent_type: String,
    related_entity: String,
    related_schema: Arc<SchemaTemplate>,
}

/// Include whose traversal stopped at an inaccessible segment
#[derive(Debug)]
struct Dropped {
    parent_type: String,
    relationship: String,
    /// Types of the stopping segment and every segment below it
    unreached_types: Vec<String>,
}

/// Rewrites read queries for a principal
#[derive(Debug, Clone, Copy)]
pub struct QueryRewriter<'a> {
    catalog: &'a Catalog,
}

impl<'a> QueryRewriter<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Rewrite `query` for the resolver's principal
    ///
    /// `schema` is the primary resource schema. The `fields[...]` and
    /// `include` parameters of `qs` are read and rewritten in place.
    pub fn rewrite(
        &self,
        mut query: Query,
        schema: &Arc<SchemaTemplate>,
        qs: &mut QueryString,
        resolver: &mut PermissionResolver,
    ) -> Result<Query> {
        let entity = self.catalog.entity(query.entity())?;
        let descriptor = resolver.permission_for_get(&entity.name);

        // row-level security applies regardless of the selection
        for join in descriptor.joins() {
            query.join(join.clone());
        }
        for filter in descriptor.filters() {
            query.filter(filter.clone());
        }

        let requested = qs.requested_fields(&schema.type_name);
        let load = load_set(self.catalog, entity, &descriptor, requested.as_ref())?;
        debug!(
            "[{}] Load set for {}: {:?}",
            resolver.request_id(),
            entity.name,
            load
        );
        query.set_load_only(load);

        let mut kept: Vec<String> = Vec::new();
        let mut used_types: BTreeSet<String> = BTreeSet::new();
        used_types.insert(schema.type_name.clone());
        let mut dropped: Vec<Dropped> = Vec::new();

        for include in qs.include() {
            let hops = self.resolve_include(schema, &include)?;
            let reached = self.eager_load_hops(&mut query, &hops, qs, resolver)?;

            for hop in &hops[..reached] {
                used_types.insert(hop.related_schema.type_name.clone());
            }
            if reached == hops.len() {
                kept.push(include);
                continue;
            }

            let stop = &hops[reached];
            debug!(
                "[{}] Dropping include '{}' at '{}'",
                resolver.request_id(),
                include,
                stop.name
            );
            dropped.push(Dropped {
                parent_type: stop.parent_type.clone(),
                relationship: stop.name.clone(),
                unreached_types: hops[reached..]
                    .iter()
                    .map(|h| h.related_schema.type_name.clone())
                    .collect(),
            });
            if reached > 0 {
                let prefix: Vec<&str> = hops[..reached].iter().map(|h| h.name.as_str()).collect();
                let separator = path::SEPARATOR.to_string();
                kept.push(prefix.join(separator.as_str()));
            }
        }

        qs.set_include(&kept);
        for drop in dropped {
            if let Some(mut selection) = qs.requested_fields(&drop.parent_type) {
                if selection.remove(&drop.relationship) {
                    qs.set_fields(&drop.parent_type, &selection);
                }
            }
            for type_name in &drop.unreached_types {
                if !used_types.contains(type_name) {
                    qs.remove_fields(type_name);
                }
            }
        }

        Ok(query)
    }

    /// Validate an include path against schemas and relationships
    fn resolve_include(&self, root: &Arc<SchemaTemplate>, include: &str) -> Result<Vec<Hop>> {
        let mut template = root.clone();
        let mut entity = template.entity.clone().ok_or_else(|| {
            AuthzError::Internal(format!("Schema {} is not bound to an entity", root.type_name))
        })?;

        let mut hops = Vec::new();
        for segment in include.split(path::SEPARATOR) {
            let field = template.get_field(segment).ok_or_else(|| {
                AuthzError::invalid_include(
                    include,
                    CatalogError::UnknownAttribute {
                        owner: template.type_name.clone(),
                        attribute: segment.to_string(),
                    },
                )
            })?;
            let FieldKind::Relationship { schema } = &field.kind else {
                return Err(AuthzError::invalid_include(
                    include,
                    CatalogError::NotARelationship {
                        owner: template.type_name.clone(),
                        attribute: segment.to_string(),
                    },
                ));
            };

            let target = self
                .catalog
                .entity(&entity)
                .and_then(|e| e.get_relationship(segment))
                .map(|rel| rel.target.clone())
                .map_err(|e| AuthzError::invalid_include(include, e))?;
            let related_schema = self
                .catalog
                .schema(schema)
                .map_err(|e| AuthzError::invalid_include(include, e))?;

            hops.push(Hop {
                name: segment.to_string(),
                parent_entity: entity.clone(),
                parent_type: template.type_name.clone(),
                related_entity: target.clone(),
                related_schema: related_schema.clone(),
            });
            entity = target;
            template = related_schema;
        }
        Ok(hops)
    }

    /// Eager-load accessible hops; returns how many were loaded
    fn eager_load_hops(
        &self,
        query: &mut Query,
        hops: &[Hop],
        qs: &mut QueryString,
        resolver: &mut PermissionResolver,
    ) -> Result<usize> {
        let mut parent: Vec<String> = Vec::new();

        for (index, hop) in hops.iter().enumerate() {
            if !resolver.permission_for_get(&hop.parent_entity).allows(&hop.name) {
                return Ok(index);
            }
            let descriptor = resolver.permission_for_get(&hop.related_entity);
            if descriptor.hides_everything() {
                return Ok(index);
            }

            let accessible: BTreeSet<String> = match descriptor.top_level_names() {
                None => hop.related_schema.field_names().cloned().collect(),
                Some(names) => hop
                    .related_schema
                    .field_names()
                    .filter(|name| names.contains(*name))
                    .cloned()
                    .collect(),
            };
            let type_name = &hop.related_schema.type_name;
            let selection: BTreeSet<String> = match qs.requested_fields(type_name) {
                Some(requested) => requested.intersection(&accessible).cloned().collect(),
                None => accessible,
            };
            qs.set_fields(type_name, &selection);

            let related = self.catalog.entity(&hop.related_entity)?;
            let columns = load_set(self.catalog, related, &descriptor, Some(&selection))?;
            let load = EagerLoad::new(&hop.name, &hop.related_entity)
                .load_only(columns)
                .with_access(descriptor.joins(), descriptor.filters());
            if !query.add_eager_load(&parent, load) {
                return Err(AuthzError::Internal(format!(
                    "Eager load chain broken at {}",
                    hop.name
                )));
            }
            parent.push(hop.name.clone());
        }

        Ok(hops.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryBuilder;
    use crate::rules::{PermissionRule, Predicate};
    use crate::types::{OperationKind, Principal};

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn catalog() -> Catalog {
        Catalog::builder()
            .entity(
                EntityType::new("order")
                    .columns(["total", "tax", "subtotal", "note", "customer_id"])
                    .belongs_to("customer", "customer", "customer_id")
                    .requires("total", ["tax", "subtotal"]),
            )
            .entity(
                EntityType::new("customer")
                    .columns(["email", "group_id"])
                    .belongs_to("group", "group", "group_id"),
            )
            .entity(EntityType::new("group").column("name"))
            .schema(
                SchemaTemplate::new("order", "order")
                    .attributes(["total", "tax", "subtotal", "note"])
                    .relationship("customer", "customer"),
            )
            .schema(
                SchemaTemplate::new("customer", "customer")
                    .attribute("email")
                    .relationship("group", "group"),
            )
            .schema(SchemaTemplate::new("group", "group").attribute("name"))
            .build()
            .unwrap()
    }

    fn resolver(rules: Vec<(OperationKind, &str, PermissionRule)>) -> PermissionResolver {
        let mut builder = RegistryBuilder::new();
        for (op, entity, rule) in rules {
            builder.register(op, entity, vec![rule]).unwrap();
        }
        PermissionResolver::new(
            Arc::new(builder.seal()),
            Principal::new("user:alice"),
            OperationKind::GetList,
            true,
        )
    }

    #[test]
    fn test_required_closure_in_load_set() {
        let catalog = catalog();
        let mut resolver = resolver(vec![(
            OperationKind::GetList,
            "order",
            PermissionRule::columns(["total"]),
        )]);
        let mut qs = QueryString::default();
        let schema = catalog.schema("order").unwrap();

        let query = QueryRewriter::new(&catalog)
            .rewrite(Query::new("order"), &schema, &mut qs, &mut resolver)
            .unwrap();
        assert_eq!(query.load_only(), Some(&set(&["subtotal", "tax", "total"])));
    }

    #[test]
    fn test_requested_fields_narrow_load_set() {
        let catalog = catalog();
        let mut resolver = resolver(vec![(
            OperationKind::GetList,
            "order",
            PermissionRule::columns(["note", "tax"]),
        )]);
        let mut qs = QueryString::parse("fields[order]=tax,total");
        let schema = catalog.schema("order").unwrap();

        let query = QueryRewriter::new(&catalog)
            .rewrite(Query::new("order"), &schema, &mut qs, &mut resolver)
            .unwrap();
        assert_eq!(query.load_only(), Some(&set(&["tax"])));
    }

    #[test]
    fn test_row_filters_always_applied() {
        let catalog = catalog();
        let mut resolver = resolver(vec![(
            OperationKind::GetList,
            "order",
            PermissionRule::row_filter(vec![Predicate::owned_by_principal("customer_id")]),
        )]);
        let mut qs = QueryString::parse("fields[order]=note");
        let schema = catalog.schema("order").unwrap();

        let query = QueryRewriter::new(&catalog)
            .rewrite(Query::new("order"), &schema, &mut qs, &mut resolver)
            .unwrap();
        assert_eq!(query.filters(), &[Predicate::eq("customer_id", "user:alice")]);
        assert_eq!(query.load_only(), Some(&set(&["note"])));
    }

    #[test]
    fn test_include_eager_loads_restricted_columns() {
        let catalog = catalog();
        let mut resolver = resolver(vec![(
            OperationKind::Get,
            "customer",
            PermissionRule::columns(["id", "group", "group_id"]),
        )]);
        let mut qs = QueryString::parse("include=customer.group");
        let schema = catalog.schema("order").unwrap();

        let query = QueryRewriter::new(&catalog)
            .rewrite(Query::new("order"), &schema, &mut qs, &mut resolver)
            .unwrap();

        let customer = query.eager_load("customer").unwrap();
        assert_eq!(customer.load_only, Some(BTreeSet::new()));
        assert_eq!(query.eager_load("customer.group").unwrap().load_only, Some(set(&["name"])));
        assert_eq!(qs.include(), vec!["customer.group".to_string()]);
        assert_eq!(qs.requested_fields("customer"), Some(set(&["group"])));
    }

    #[test]
    fn test_inaccessible_segment_drops_deeper_includes() {
        let catalog = catalog();
        let mut resolver = resolver(vec![(
            OperationKind::GetList,
            "customer",
            PermissionRule::columns(["email"]),
        )]);
        let mut qs = QueryString::parse("include=customer.group&fields[group]=name");
        let schema = catalog.schema("order").unwrap();

        let query = QueryRewriter::new(&catalog)
            .rewrite(Query::new("order"), &schema, &mut qs, &mut resolver)
            .unwrap();

        assert!(query.eager_load("customer").is_some());
        assert!(query.eager_load("customer.group").is_none());
        assert_eq!(qs.include(), vec!["customer".to_string()]);
        assert_eq!(qs.requested_fields("group"), None);
    }

    #[test]
    fn test_hidden_relationship_drops_include_and_selection() {
        let catalog = catalog();
        let mut resolver = resolver(vec![(
            OperationKind::GetList,
            "order",
            PermissionRule::columns(["total"]),
        )]);
        let mut qs = QueryString::parse("include=customer&fields[order]=total,customer");
        let schema = catalog.schema("order").unwrap();

        let query = QueryRewriter::new(&catalog)
            .rewrite(Query::new("order"), &schema, &mut qs, &mut resolver)
            .unwrap();

        assert!(query.eager_loads().is_empty());
        assert!(qs.include().is_empty());
        assert_eq!(qs.requested_fields("order"), Some(set(&["total"])));
    }

    #[test]
    fn test_invalid_include_errors() {
        let catalog = catalog();
        let mut resolver = resolver(vec![]);
        let schema = catalog.schema("order").unwrap();

        let mut qs = QueryString::parse("include=customer.nope");
        let err = QueryRewriter::new(&catalog)
            .rewrite(Query::new("order"), &schema, &mut qs, &mut resolver)
            .unwrap_err();
        assert!(matches!(err, AuthzError::InvalidInclude { .. }));

        let mut qs = QueryString::parse("include=total");
        let err = QueryRewriter::new(&catalog)
            .rewrite(Query::new("order"), &schema, &mut qs, &mut resolver)
            .unwrap_err();
        assert!(matches!(
            err,
            AuthzError::InvalidInclude {
                source: Some(CatalogError::NotARelationship { .. }),
                ..
            }
        ));
    }
}
