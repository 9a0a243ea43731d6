//! Serialization schema templates
//!
//! Templates are declared once, registered in the catalog and never mutated
//! afterwards. Requests work on [`Schema`](super::Schema) instances built
//! from them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// What a schema field serializes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Plain attribute
    Attribute,
    /// Embedded document stored in a JSON column, serialized by `schema`
    Nested { schema: String },
    /// Related entity, serialized by `schema` when included
    Relationship { schema: String },
}

/// Declared schema field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub kind: FieldKind,

    /// Whether the field holds a collection
    #[serde(default)]
    pub many: bool,

    /// Field-level restriction on nested/related sub-schema fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only: Option<Vec<String>>,
}

impl SchemaField {
    /// Name of the sub-schema for nested and relationship fields
    pub fn sub_schema(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Attribute => None,
            FieldKind::Nested { schema } | FieldKind::Relationship { schema } => Some(schema),
        }
    }

    pub fn is_relationship(&self) -> bool {
        matches!(self.kind, FieldKind::Relationship { .. })
    }

    pub fn is_nested(&self) -> bool {
        matches!(self.kind, FieldKind::Nested { .. })
    }
}

/// Immutable schema declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTemplate {
    /// Resource type name used in `fields[<type>]`
    pub type_name: String,

    /// Entity type this schema serializes; `None` for embedded documents
    pub entity: Option<String>,

    /// Attribute emitted as the resource identifier
    pub id_field: String,

    fields: IndexMap<String, SchemaField>,
}

impl SchemaTemplate {
    /// Top-level schema for an entity type
    pub fn new(type_name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            entity: Some(entity.into()),
            id_field: "id".to_string(),
            fields: IndexMap::new(),
        }
    }

    /// Schema of an embedded document (JSON column)
    pub fn embedded(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            entity: None,
            id_field: "id".to_string(),
            fields: IndexMap::new(),
        }
    }

    /// Declare a plain attribute
    pub fn attribute(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Attribute, false)
    }

    /// Declare several plain attributes
    pub fn attributes<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(self, |schema, name| schema.attribute(name))
    }

    /// Declare an embedded document field
    pub fn nested(self, name: impl Into<String>, schema: impl Into<String>) -> Self {
        self.field(
            name,
            FieldKind::Nested {
                schema: schema.into(),
            },
            false,
        )
    }

    /// Declare a to-one relationship field
    pub fn relationship(self, name: impl Into<String>, schema: impl Into<String>) -> Self {
        self.field(
            name,
            FieldKind::Relationship {
                schema: schema.into(),
            },
            false,
        )
    }

    /// Declare a to-many relationship field
    pub fn relationship_many(self, name: impl Into<String>, schema: impl Into<String>) -> Self {
        self.field(
            name,
            FieldKind::Relationship {
                schema: schema.into(),
            },
            true,
        )
    }

    /// Restrict the sub-schema of an already declared field
    pub fn with_field_only<I, S>(mut self, name: &str, only: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(field) = self.fields.get_mut(name) {
            field.only = Some(only.into_iter().map(Into::into).collect());
        }
        self
    }

    fn field(mut self, name: impl Into<String>, kind: FieldKind, many: bool) -> Self {
        let name = name.into();
        self.fields.insert(
            name.clone(),
            SchemaField {
                name,
                kind,
                many,
                only: None,
            },
        );
        self
    }

    /// Declared fields in declaration order
    pub fn fields(&self) -> impl Iterator<Item = &SchemaField> {
        self.fields.values()
    }

    /// Declared field by name
    pub fn get_field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.get(name)
    }

    /// Declared field names
    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}
