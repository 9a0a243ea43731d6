//! Relational query description
//!
//! A [`Query`] is built by the data-access handler, rewritten by the
//! permission layer and executed by a [`DataLayer`](crate::datalayer::DataLayer).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::rules::{JoinSpec, Predicate};

/// Eager load of a relationship with its own column restriction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EagerLoad {
    /// Relationship attribute on the parent entity
    pub relationship: String,
    /// Target entity type
    pub entity: String,
    /// Columns to load; `None` loads every column
    pub load_only: Option<BTreeSet<String>>,
    pub joins: Vec<JoinSpec>,
    pub filters: Vec<Predicate>,
    pub children: Vec<EagerLoad>,
}

impl EagerLoad {
    /// Unrestricted eager load
    pub fn new(relationship: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            relationship: relationship.into(),
            entity: entity.into(),
            load_only: None,
            joins: Vec::new(),
            filters: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn load_only(mut self, columns: BTreeSet<String>) -> Self {
        self.load_only = Some(columns);
        self
    }

    pub fn with_access(mut self, joins: &[JoinSpec], filters: &[Predicate]) -> Self {
        self.joins = joins.to_vec();
        self.filters = filters.to_vec();
        self
    }

    fn absorb(&mut self, other: EagerLoad) {
        self.load_only = match (self.load_only.take(), other.load_only) {
            (Some(mut a), Some(b)) => {
                a.extend(b);
                Some(a)
            }
            _ => None,
        };
        for join in other.joins {
            if !self.joins.contains(&join) {
                self.joins.push(join);
            }
        }
        for filter in other.filters {
            if !self.filters.contains(&filter) {
                self.filters.push(filter);
            }
        }
        for child in other.children {
            merge_into(&mut self.children, child);
        }
    }
}

fn merge_into(loads: &mut Vec<EagerLoad>, load: EagerLoad) {
    match loads.iter_mut().find(|l| l.relationship == load.relationship) {
        Some(existing) => existing.absorb(load),
        None => loads.push(load),
    }
}

/// Query against one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    entity: String,
    load_only: Option<BTreeSet<String>>,
    joins: Vec<JoinSpec>,
    filters: Vec<Predicate>,
    eager_loads: Vec<EagerLoad>,
}

impl Query {
    /// Unrestricted query over every row of `entity`
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            load_only: None,
            joins: Vec::new(),
            filters: Vec::new(),
            eager_loads: Vec::new(),
        }
    }

    /// Query for one row by primary key
    pub fn by_id(entity: impl Into<String>, primary_key: &str, id: impl Into<Value>) -> Self {
        let mut query = Self::new(entity);
        query.filter(Predicate::eq(primary_key, id));
        query
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Add an inner join; identical joins are added once
    pub fn join(&mut self, join: JoinSpec) {
        if !self.joins.contains(&join) {
            self.joins.push(join);
        }
    }

    pub fn filter(&mut self, predicate: Predicate) {
        self.filters.push(predicate);
    }

    /// Restrict loaded columns; the primary key is always loaded
    pub fn set_load_only(&mut self, columns: BTreeSet<String>) {
        self.load_only = Some(columns);
    }

    pub fn load_only(&self) -> Option<&BTreeSet<String>> {
        self.load_only.as_ref()
    }

    pub fn joins(&self) -> &[JoinSpec] {
        &self.joins
    }

    pub fn filters(&self) -> &[Predicate] {
        &self.filters
    }

    pub fn eager_loads(&self) -> &[EagerLoad] {
        &self.eager_loads
    }

    /// Add an eager load below the relationship chain `parent`
    ///
    /// Loads for the same relationship are merged. Returns `false` if the
    /// parent chain has not been eager-loaded.
    pub fn add_eager_load(&mut self, parent: &[String], load: EagerLoad) -> bool {
        let mut level = &mut self.eager_loads;
        for name in parent {
            match level.iter_mut().find(|l| &l.relationship == name) {
                Some(found) => level = &mut found.children,
                None => return false,
            }
        }
        merge_into(level, load);
        true
    }

    /// Eager load at a dotted relationship path
    pub fn eager_load(&self, path: &str) -> Option<&EagerLoad> {
        let mut level = &self.eager_loads;
        let mut found = None;
        for name in path.split(crate::path::SEPARATOR) {
            let load = level.iter().find(|l| l.relationship == name)?;
            level = &load.children;
            found = Some(load);
        }
        found
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.load_only {
            Some(columns) => write!(
                f,
                "SELECT {} FROM {}",
                columns.iter().cloned().collect::<Vec<_>>().join(", "),
                self.entity
            )?,
            None => write!(f, "SELECT * FROM {}", self.entity)?,
        }
        for join in &self.joins {
            write!(f, " JOIN {}", join.entity)?;
        }
        if !self.filters.is_empty() {
            write!(f, " WHERE <{} filter(s)>", self.filters.len())?;
        }
        for load in &self.eager_loads {
            write!(f, " LOAD {}", load.relationship)?;
        }
        Ok(())
    }
}
