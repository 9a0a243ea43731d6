//! Entity type declarations

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::CatalogError;

/// Storage shape of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Plain value
    Scalar,
    /// JSON blob whose inner attributes are addressed by dotted paths
    Json,
}

/// Declared column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

/// Relationship edge to another entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Attribute name on the owning entity
    pub name: String,

    /// Target entity type
    pub target: String,

    /// Column on the owning entity used for the join
    pub local_key: String,

    /// Column on the target entity used for the join
    pub remote_key: String,

    /// Whether the relationship yields a collection
    pub many: bool,
}

/// Relational record kind exposed through the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    /// Stable type name
    pub name: String,

    /// Primary key column, always loaded
    pub primary_key: String,

    columns: IndexMap<String, Column>,

    relationships: IndexMap<String, Relationship>,

    /// Column -> columns it needs loaded to compute its value
    #[serde(default)]
    pub required_fields: HashMap<String, Vec<String>>,
}

impl EntityType {
    /// Create an entity type with an `id` primary key column
    pub fn new(name: impl Into<String>) -> Self {
        let mut columns = IndexMap::new();
        columns.insert(
            "id".to_string(),
            Column {
                name: "id".to_string(),
                kind: ColumnKind::Scalar,
            },
        );

        Self {
            name: name.into(),
            primary_key: "id".to_string(),
            columns,
            relationships: IndexMap::new(),
            required_fields: HashMap::new(),
        }
    }

    /// Declare a scalar column
    pub fn column(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.columns.insert(
            name.clone(),
            Column {
                name,
                kind: ColumnKind::Scalar,
            },
        );
        self
    }

    /// Declare several scalar columns
    pub fn columns<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(self, |entity, name| entity.column(name))
    }

    /// Declare a JSON blob column
    pub fn json_column(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.columns.insert(
            name.clone(),
            Column {
                name,
                kind: ColumnKind::Json,
            },
        );
        self
    }

    /// Declare a to-one relationship through a foreign key on this entity
    pub fn belongs_to(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relationship(Relationship {
            name: name.into(),
            target: target.into(),
            local_key: foreign_key.into(),
            remote_key: "id".to_string(),
            many: false,
        })
    }

    /// Declare a to-many relationship through a foreign key on the target
    pub fn has_many(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        remote_key: impl Into<String>,
    ) -> Self {
        let local_key = self.primary_key.clone();
        self.relationship(Relationship {
            name: name.into(),
            target: target.into(),
            local_key,
            remote_key: remote_key.into(),
            many: true,
        })
    }

    /// Declare an arbitrary relationship
    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships
            .insert(relationship.name.clone(), relationship);
        self
    }

    /// Declare that loading `field` requires `deps` to be loaded too
    pub fn requires<I, S>(mut self, field: impl Into<String>, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields
            .insert(field.into(), deps.into_iter().map(Into::into).collect());
        self
    }

    /// Table columns (scalar and JSON), in declaration order
    pub fn column_names(&self) -> impl Iterator<Item = &String> {
        self.columns.keys()
    }

    /// Table columns as a set
    pub fn column_set(&self) -> BTreeSet<String> {
        self.columns.keys().cloned().collect()
    }

    /// Column declaration by name
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Whether `name` is a table column
    pub fn is_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Relationships in declaration order
    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    /// Relationship by attribute name
    pub fn get_relationship(&self, name: &str) -> Result<&Relationship, CatalogError> {
        match self.relationships.get(name) {
            Some(rel) => Ok(rel),
            None if self.is_column(name) => Err(CatalogError::NotARelationship {
                owner: self.name.clone(),
                attribute: name.to_string(),
            }),
            None => Err(CatalogError::UnknownAttribute {
                owner: self.name.clone(),
                attribute: name.to_string(),
            }),
        }
    }

    /// Whether `name` is a relationship attribute
    pub fn is_relationship(&self, name: &str) -> bool {
        self.relationships.contains_key(name)
    }
}
