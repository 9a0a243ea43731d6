//! Data access
//!
//! [`DataLayer`] is the storage seam the CRUD handlers talk to. The
//! [`InMemoryDataLayer`] executes rewritten queries against rows held in
//! memory: row filters and joins, column projection and nested eager loads.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::catalog::{Catalog, EntityType};
use crate::error::{AuthzError, Result};
use crate::path;
use crate::query::{EagerLoad, Query};
use crate::rules::{row_satisfies, RowLookup};
use crate::types::Record;

/// Storage backend used by the CRUD handlers
pub trait DataLayer: Send + Sync {
    /// Run a read query, returning projected rows with eager loads attached
    fn execute(&self, catalog: &Catalog, query: &Query) -> Result<Vec<Record>>;

    /// Stored row by primary key, unprojected
    fn fetch(&self, entity: &EntityType, id: &Value) -> Result<Option<Record>>;

    /// Store a new row; a missing primary key is assigned
    fn insert(&self, entity: &EntityType, record: Record) -> Result<Record>;

    /// Merge `changes` into a stored row
    fn update(&self, entity: &EntityType, id: &Value, changes: Record) -> Result<Record>;

    /// Remove a stored row
    fn delete(&self, entity: &EntityType, id: &Value) -> Result<()>;

    /// Row source used to evaluate joined row filters
    fn lookup(&self) -> &dyn RowLookup;
}

/// Parse a path identifier: integers become numbers, anything else a string
pub fn parse_id(raw: &str) -> Value {
    raw.parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn same_value(left: &Value, right: &Value) -> bool {
    if left.is_null() || right.is_null() {
        return false;
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

/// Unrestricted eager loads for every include path
///
/// This is the general-purpose loader used when no permission layer has
/// rewritten the query. The permission hooks switch it off per request.
pub fn eager_load_includes(
    catalog: &Catalog,
    query: &mut Query,
    includes: &[String],
) -> Result<()> {
    for include in includes {
        let mut entity = catalog.entity(query.entity())?.name.clone();
        let mut parent: Vec<String> = Vec::new();
        for segment in include.split(path::SEPARATOR) {
            let target = catalog
                .entity(&entity)
                .and_then(|e| e.get_relationship(segment))
                .map(|rel| rel.target.clone())
                .map_err(|e| AuthzError::invalid_include(include.as_str(), e))?;
            query.add_eager_load(&parent, EagerLoad::new(segment, target.as_str()));
            parent.push(segment.to_string());
            entity = target;
        }
    }
    Ok(())
}

/// Rows kept in memory, one table per entity type
#[derive(Debug, Default)]
pub struct InMemoryDataLayer {
    tables: RwLock<HashMap<String, Vec<Record>>>,
}

impl InMemoryDataLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store rows as-is
    pub fn seed(&self, entity: &str, rows: impl IntoIterator<Item = Record>) {
        self.tables
            .write()
            .entry(entity.to_string())
            .or_default()
            .extend(rows);
    }

    /// Number of stored rows of an entity type
    pub fn count(&self, entity: &str) -> usize {
        self.tables.read().get(entity).map(Vec::len).unwrap_or(0)
    }

    fn project(entity: &EntityType, row: &Record, load_only: Option<&BTreeSet<String>>) -> Record {
        let mut out = Record::new();
        if let Some(id) = row.get(&entity.primary_key) {
            out.insert(entity.primary_key.clone(), id.clone());
        }
        for name in entity.column_names() {
            let wanted = load_only.map_or(true, |only| only.contains(name));
            if wanted {
                if let Some(value) = row.get(name) {
                    out.insert(name.clone(), value.clone());
                }
            }
        }
        out
    }

    fn attach(
        &self,
        catalog: &Catalog,
        entity: &EntityType,
        source: &Record,
        target: &mut Record,
        loads: &[EagerLoad],
    ) -> Result<()> {
        for load in loads {
            let rel = entity.get_relationship(&load.relationship)?;
            let related = catalog.entity(&rel.target)?;
            let Some(key) = source.get(&rel.local_key) else {
                target.insert(load.relationship.clone(), Value::Null);
                continue;
            };

            let mut matches = Vec::new();
            for candidate in self.rows(&rel.target) {
                let linked = candidate
                    .get(&rel.remote_key)
                    .map_or(false, |remote| same_value(key, remote));
                if !linked || !row_satisfies(&candidate, &load.joins, &load.filters, self) {
                    continue;
                }
                let mut projected = Self::project(related, &candidate, load.load_only.as_ref());
                self.attach(catalog, related, &candidate, &mut projected, &load.children)?;
                matches.push(Value::Object(projected));
            }

            let value = if rel.many {
                Value::Array(matches)
            } else {
                matches.into_iter().next().unwrap_or(Value::Null)
            };
            target.insert(load.relationship.clone(), value);
        }
        Ok(())
    }

    fn position(rows: &[Record], primary_key: &str, id: &Value) -> Option<usize> {
        rows.iter()
            .position(|row| row.get(primary_key).map_or(false, |v| same_value(v, id)))
    }
}

impl RowLookup for InMemoryDataLayer {
    fn rows(&self, entity: &str) -> Vec<Record> {
        self.tables.read().get(entity).cloned().unwrap_or_default()
    }
}

impl DataLayer for InMemoryDataLayer {
    fn execute(&self, catalog: &Catalog, query: &Query) -> Result<Vec<Record>> {
        let entity = catalog.entity(query.entity())?;
        debug!("Executing {}", query);

        let mut out = Vec::new();
        for row in self.rows(query.entity()) {
            if !row_satisfies(&row, query.joins(), query.filters(), self) {
                continue;
            }
            let mut projected = Self::project(entity, &row, query.load_only());
            self.attach(catalog, entity, &row, &mut projected, query.eager_loads())?;
            out.push(projected);
        }
        Ok(out)
    }

    fn fetch(&self, entity: &EntityType, id: &Value) -> Result<Option<Record>> {
        let tables = self.tables.read();
        Ok(tables.get(&entity.name).and_then(|rows| {
            Self::position(rows, &entity.primary_key, id).map(|index| rows[index].clone())
        }))
    }

    fn insert(&self, entity: &EntityType, mut record: Record) -> Result<Record> {
        let mut tables = self.tables.write();
        let rows = tables.entry(entity.name.clone()).or_default();

        let given = record
            .get(&entity.primary_key)
            .filter(|id| !id.is_null())
            .cloned();
        match given {
            Some(id) => {
                if Self::position(rows, &entity.primary_key, &id).is_some() {
                    return Err(AuthzError::Forbidden(format!(
                        "{} '{}' already exists",
                        entity.name, id
                    )));
                }
            }
            None => {
                let next = rows
                    .iter()
                    .filter_map(|row| row.get(&entity.primary_key).and_then(Value::as_i64))
                    .max()
                    .unwrap_or(0)
                    + 1;
                record.insert(entity.primary_key.clone(), Value::from(next));
            }
        }

        rows.push(record.clone());
        Ok(record)
    }

    fn update(&self, entity: &EntityType, id: &Value, changes: Record) -> Result<Record> {
        let mut tables = self.tables.write();
        let rows = tables.entry(entity.name.clone()).or_default();
        let index = Self::position(rows, &entity.primary_key, id).ok_or_else(|| {
            AuthzError::ObjectNotFound {
                entity: entity.name.clone(),
                id: id.to_string(),
            }
        })?;

        let row = &mut rows[index];
        for (key, value) in changes {
            if key != entity.primary_key {
                row.insert(key, value);
            }
        }
        Ok(row.clone())
    }

    fn delete(&self, entity: &EntityType, id: &Value) -> Result<()> {
        let mut tables = self.tables.write();
        let rows = tables.entry(entity.name.clone()).or_default();
        let index = Self::position(rows, &entity.primary_key, id).ok_or_else(|| {
            AuthzError::ObjectNotFound {
                entity: entity.name.clone(),
                id: id.to_string(),
            }
        })?;
        rows.remove(index);
        Ok(())
    }

    fn lookup(&self) -> &dyn RowLookup {
        self
    }
}
