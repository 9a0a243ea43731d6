//! Per-request permission resolution
//!
//! A [`PermissionResolver`] is created for every request by the route
//! interceptor. It evaluates the sealed registry for the request's principal
//! and memoizes one [`AccessDescriptor`] per (operation, entity type) for the
//! rest of the request. Resolvers are never shared between requests.

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::error::{AuthzError, Result};
use crate::path;
use crate::registry::PermissionRegistry;
use crate::rules::{row_satisfies, AccessGrant, ColumnGrant, JoinSpec, Predicate, RowLookup};
use crate::schema::Schema;
use crate::types::{OperationKind, Principal, Record};

/// Allowed field paths of a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldAccess {
    /// Every field, at every depth
    All,
    /// Only these dotted paths (and everything below them)
    Only(BTreeSet<String>),
}

/// Resolved access for one entity type and one principal
///
/// Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessDescriptor {
    entity: String,
    operation: OperationKind,
    granted: bool,
    fields: FieldAccess,
    joins: Vec<JoinSpec>,
    filters: Vec<Predicate>,
}

impl AccessDescriptor {
    /// Turn a merged grant into a descriptor
    ///
    /// A grant that no rule contributed to hides every field; for reads it
    /// also matches no rows.
    pub fn from_grant(entity: impl Into<String>, operation: OperationKind, grant: AccessGrant) -> Self {
        let entity = entity.into();
        if !grant.granted {
            let filters = if operation.is_read() {
                vec![Predicate::Never]
            } else {
                Vec::new()
            };
            return Self {
                entity,
                operation,
                granted: false,
                fields: FieldAccess::Only(BTreeSet::new()),
                joins: Vec::new(),
                filters,
            };
        }

        let fields = match grant.columns {
            ColumnGrant::Unspecified | ColumnGrant::All => FieldAccess::All,
            ColumnGrant::Only(paths) => FieldAccess::Only(paths),
        };
        Self {
            entity,
            operation,
            granted: true,
            fields,
            joins: grant.joins,
            filters: grant.filters,
        }
    }

    /// Descriptor with no restriction at all
    pub fn unrestricted(entity: impl Into<String>, operation: OperationKind) -> Self {
        Self::from_grant(entity, operation, AccessGrant::unrestricted())
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    /// Whether any rule granted access
    pub fn is_granted(&self) -> bool {
        self.granted
    }

    pub fn fields(&self) -> &FieldAccess {
        &self.fields
    }

    /// Allowed paths, `None` when unrestricted
    pub fn field_paths(&self) -> Option<&BTreeSet<String>> {
        match &self.fields {
            FieldAccess::All => None,
            FieldAccess::Only(paths) => Some(paths),
        }
    }

    /// Allowed top-level names, `None` when unrestricted
    pub fn top_level_names(&self) -> Option<BTreeSet<String>> {
        self.field_paths().map(|paths| path::names_under(paths, ""))
    }

    /// Whether the top-level attribute or relationship `name` is visible
    pub fn allows(&self, name: &str) -> bool {
        match &self.fields {
            FieldAccess::All => true,
            FieldAccess::Only(paths) => paths
                .iter()
                .any(|p| p == name || path::head(p) == name),
        }
    }

    /// Whether every visible attribute is hidden
    pub fn hides_everything(&self) -> bool {
        matches!(self.top_level_names(), Some(names) if names.is_empty())
    }

    pub fn joins(&self) -> &[JoinSpec] {
        &self.joins
    }

    pub fn filters(&self) -> &[Predicate] {
        &self.filters
    }

    /// Whether a stored row passes the descriptor's row filters
    pub fn permits_row(&self, row: &Record, lookup: &dyn RowLookup) -> bool {
        row_satisfies(row, &self.joins, &self.filters, lookup)
    }
}

/// Request-scoped permission resolver
#[derive(Debug)]
pub struct PermissionResolver {
    request_id: Uuid,
    principal: Principal,
    registry: Arc<PermissionRegistry>,
    read_operation: OperationKind,
    descriptors: HashMap<(OperationKind, String), Arc<AccessDescriptor>>,
}

impl PermissionResolver {
    /// Create a resolver for one request
    ///
    /// `operation` is the request's own operation kind. Collection requests
    /// (`get_list`, and `post` on a collection) read related entities with
    /// `get_list` rules, all other requests with `get` rules.
    pub fn new(
        registry: Arc<PermissionRegistry>,
        principal: Principal,
        operation: OperationKind,
        many: bool,
    ) -> Self {
        let read_operation = match operation {
            OperationKind::GetList => OperationKind::GetList,
            OperationKind::Get => OperationKind::Get,
            _ if many => OperationKind::GetList,
            _ => OperationKind::Get,
        };
        let request_id = Uuid::new_v4();
        debug!(
            "[{}] Resolver created for {} ({})",
            request_id, principal.id, read_operation
        );

        Self {
            request_id,
            principal,
            registry,
            read_operation,
            descriptors: HashMap::new(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Read kind used for response schemas and includes
    pub fn read_operation(&self) -> OperationKind {
        self.read_operation
    }

    /// Number of memoized descriptors
    pub fn cached(&self) -> usize {
        self.descriptors.len()
    }

    /// Read descriptor for an entity type
    pub fn permission_for_get(&mut self, entity: &str) -> Arc<AccessDescriptor> {
        self.permission_for(self.read_operation, entity)
    }

    /// Descriptor for an (operation, entity) pair, computed once per request
    pub fn permission_for(&mut self, operation: OperationKind, entity: &str) -> Arc<AccessDescriptor> {
        if let Some(found) = self.descriptors.get(&(operation, entity.to_string())) {
            return found.clone();
        }

        let grant = self.registry.resolve(operation, entity, &self.principal);
        let descriptor = Arc::new(AccessDescriptor::from_grant(entity, operation, grant));
        debug!(
            "[{}] {} {} -> granted={} fields={:?} filters={}",
            self.request_id,
            operation,
            entity,
            descriptor.is_granted(),
            descriptor.fields(),
            descriptor.filters().len()
        );
        self.descriptors
            .insert((operation, entity.to_string()), descriptor.clone());
        descriptor
    }

    /// Flat allowed-path set for a whole response tree
    ///
    /// Walks the schema's includes and prefixes each related entity's allowed
    /// paths with the include name. Returns `None` when the primary entity
    /// hides every attribute, including when the only visible names were
    /// includes that had to be dropped. Related entities that hide everything
    /// are removed from the parent's names so the pruner drops their include.
    pub fn response_field_paths(
        &mut self,
        catalog: &Catalog,
        schema: &Schema,
    ) -> Result<Option<BTreeSet<String>>> {
        let entity = schema.entity().ok_or_else(|| {
            AuthzError::Internal(format!("Schema {} is not bound to an entity", schema.type_name()))
        })?;
        let descriptor = self.permission_for_get(entity);

        let mut paths: BTreeSet<String> = match descriptor.field_paths() {
            None => schema.template().field_names().cloned().collect(),
            Some(paths) => paths.clone(),
        };
        if path::names_under(&paths, "").is_empty() {
            return Ok(None);
        }

        for include in schema.include_data() {
            if !descriptor.allows(include) {
                continue;
            }
            let child = match schema.child(include) {
                Some(child) => child.clone(),
                None => schema.instantiate_child(catalog, include)?,
            };

            // deeper restrictions declared on the parent for this include
            let declared = path::strip_prefix(&paths, include);
            let lead = format!("{}{}", include, path::SEPARATOR);
            paths.retain(|p| !p.starts_with(&lead));

            let Some(mut child_paths) = self.response_field_paths(catalog, &child)? else {
                debug!("[{}] Include {} hidden entirely", self.request_id, include);
                paths.remove(include);
                continue;
            };
            if !declared.is_empty() {
                let heads = path::names_under(&declared, "");
                child_paths.retain(|p| heads.contains(path::head(p)));
                if child_paths.is_empty() {
                    paths.remove(include);
                    continue;
                }
            }
            paths.extend(child_paths.iter().map(|p| path::join(include, p)));
        }

        // dropping includes may leave nothing visible, which is not the same as no restriction
        if path::names_under(&paths, "").is_empty() {
            debug!(
                "[{}] Nothing left visible on {} after dropping includes",
                self.request_id,
                schema.type_name()
            );
            return Ok(None);
        }
        Ok(Some(paths))
    }

    /// Sanitize a create or update payload
    ///
    /// Keys outside the grant are stripped, or rejected when `reject` is set.
    /// JSON blob values are filtered down to their allowed inner paths.
    pub fn sanitize_payload(
        &mut self,
        operation: OperationKind,
        entity: &str,
        payload: Record,
        reject: bool,
    ) -> Result<Record> {
        let descriptor = self.permission_for(operation, entity);
        if !descriptor.is_granted() {
            return Err(AuthzError::Forbidden(format!(
                "{} on {} is not permitted",
                operation, entity
            )));
        }
        let Some(paths) = descriptor.field_paths() else {
            return Ok(payload);
        };

        let mut rejected = Vec::new();
        let sanitized = filter_record(payload, paths, "", &mut rejected);

        if !rejected.is_empty() {
            if reject {
                return Err(AuthzError::Forbidden(format!(
                    "Not allowed to write {} on {}",
                    rejected.join(", "),
                    entity
                )));
            }
            debug!(
                "[{}] Stripped {} from {} payload",
                self.request_id,
                rejected.join(", "),
                entity
            );
            if sanitized.is_empty() {
                warn!(
                    "[{}] {} payload for {} is empty after sanitization",
                    self.request_id, operation, entity
                );
            }
        }
        Ok(sanitized)
    }

    /// Check that an existing row may be modified or deleted
    pub fn check_row(
        &mut self,
        operation: OperationKind,
        entity: &str,
        row: &Record,
        lookup: &dyn RowLookup,
    ) -> Result<()> {
        let descriptor = self.permission_for(operation, entity);
        if !descriptor.is_granted() {
            return Err(AuthzError::Forbidden(format!(
                "{} on {} is not permitted",
                operation, entity
            )));
        }
        if !descriptor.permits_row(row, lookup) {
            let id = row.get("id").map(render_id).unwrap_or_default();
            return Err(AuthzError::Forbidden(format!(
                "{} on {} '{}' is not permitted",
                operation, entity, id
            )));
        }
        Ok(())
    }
}

fn render_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn filter_record(
    record: Record,
    paths: &BTreeSet<String>,
    prefix: &str,
    rejected: &mut Vec<String>,
) -> Record {
    let names = path::names_under(paths, prefix);
    let mut out = Record::new();
    for (key, value) in record {
        let full = path::join(prefix, &key);
        if !names.contains(&key) {
            rejected.push(full);
            continue;
        }
        // a path that stops at this key allows the whole value
        let whole = paths.contains(&full);
        let value = match value {
            Value::Object(inner) if !whole => {
                Value::Object(filter_record(inner, paths, &full, rejected))
            }
            other => other,
        };
        out.insert(key, value);
    }
    out
}
