//! Entity catalog
//!
//! Declares the entity types exposed through the API together with their
//! serialization schemas. The catalog is validated once when built and is
//! read-only afterwards, so it can be shared across requests behind an `Arc`.
//!
//! # Validation
//!
//! - **Relationships**: every target entity must be declared
//! - **Schemas**: every nested/related schema reference must resolve, and a
//!   relationship field must match a relationship on the schema's entity
//! - **Required fields**: dependencies must name columns and the dependency
//!   graph must be acyclic

pub mod entity;
pub mod required;

pub use entity::{Column, ColumnKind, EntityType, Relationship};
pub use required::{GraphError, RequiredFieldGraph};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::error::{AuthzError, CatalogError, Result};
use crate::schema::{FieldKind, SchemaTemplate};

/// Builder for a validated [`Catalog`]
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    entities: Vec<EntityType>,
    schemas: Vec<SchemaTemplate>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity type
    pub fn entity(mut self, entity: EntityType) -> Self {
        self.entities.push(entity);
        self
    }

    /// Add a schema template
    pub fn schema(mut self, schema: SchemaTemplate) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Validate declarations and freeze them
    pub fn build(self) -> Result<Catalog> {
        let mut entities = HashMap::new();
        let mut graphs = HashMap::new();

        for entity in self.entities {
            if entities.contains_key(&entity.name) {
                return Err(AuthzError::Configuration(format!(
                    "Duplicate entity type: {}",
                    entity.name
                )));
            }
            graphs.insert(
                entity.name.clone(),
                RequiredFieldGraph::new(entity.name.clone(), &entity.required_fields),
            );
            entities.insert(entity.name.clone(), entity);
        }

        for entity in entities.values() {
            for rel in entity.relationships() {
                let target = entities.get(&rel.target).ok_or_else(|| {
                    AuthzError::Configuration(format!(
                        "Relationship {}.{} targets unknown entity '{}'",
                        entity.name, rel.name, rel.target
                    ))
                })?;
                if !entity.is_column(&rel.local_key) || !target.is_column(&rel.remote_key) {
                    return Err(AuthzError::Configuration(format!(
                        "Relationship {}.{} joins on undeclared columns {} = {}.{}",
                        entity.name, rel.name, rel.local_key, rel.target, rel.remote_key
                    )));
                }
            }

            for (field, deps) in &entity.required_fields {
                if let Some(missing) = deps.iter().find(|dep| !entity.is_column(dep)) {
                    return Err(AuthzError::Configuration(format!(
                        "Required field '{}' of {}.{} is not a column",
                        missing, entity.name, field
                    )));
                }
            }
        }

        for graph in graphs.values() {
            graph
                .check_acyclic()
                .map_err(|e| AuthzError::Configuration(e.to_string()))?;
        }

        let mut schemas: HashMap<String, Arc<SchemaTemplate>> = HashMap::new();
        let mut schema_by_entity = HashMap::new();
        for schema in self.schemas {
            if schemas.contains_key(&schema.type_name) {
                return Err(AuthzError::Configuration(format!(
                    "Duplicate schema: {}",
                    schema.type_name
                )));
            }
            if let Some(entity) = &schema.entity {
                if !entities.contains_key(entity) {
                    return Err(AuthzError::Configuration(format!(
                        "Schema {} serializes unknown entity '{}'",
                        schema.type_name, entity
                    )));
                }
                schema_by_entity
                    .entry(entity.clone())
                    .or_insert_with(|| schema.type_name.clone());
            }
            schemas.insert(schema.type_name.clone(), Arc::new(schema));
        }

        for schema in schemas.values() {
            for field in schema.fields() {
                let Some(sub) = field.sub_schema() else {
                    continue;
                };
                let sub_template = schemas.get(sub).ok_or_else(|| {
                    AuthzError::Configuration(format!(
                        "Field {}.{} references unknown schema '{}'",
                        schema.type_name, field.name, sub
                    ))
                })?;

                if let FieldKind::Relationship { .. } = field.kind {
                    let owner = schema.entity.as_ref().and_then(|e| entities.get(e));
                    let rel = owner.and_then(|e| e.get_relationship(&field.name).ok());
                    match (rel, &sub_template.entity) {
                        (Some(rel), Some(target)) if &rel.target == target => {}
                        _ => {
                            return Err(AuthzError::Configuration(format!(
                                "Relationship field {}.{} does not match a relationship to {}",
                                schema.type_name, field.name, sub
                            )))
                        }
                    }
                }
            }
        }

        debug!(
            "Catalog built: {} entities, {} schemas",
            entities.len(),
            schemas.len()
        );

        Ok(Catalog {
            entities,
            schemas,
            schema_by_entity,
            graphs,
        })
    }
}

/// Validated, read-only entity and schema declarations
#[derive(Debug)]
pub struct Catalog {
    entities: HashMap<String, EntityType>,
    schemas: HashMap<String, Arc<SchemaTemplate>>,
    schema_by_entity: HashMap<String, String>,
    graphs: HashMap<String, RequiredFieldGraph>,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    /// Entity type by name
    pub fn entity(&self, name: &str) -> std::result::Result<&EntityType, CatalogError> {
        self.entities
            .get(name)
            .ok_or_else(|| CatalogError::UnknownEntity(name.to_string()))
    }

    /// Schema template by type name
    pub fn schema(&self, type_name: &str) -> std::result::Result<Arc<SchemaTemplate>, CatalogError> {
        self.schemas
            .get(type_name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownSchema(type_name.to_string()))
    }

    /// First schema registered for an entity type
    pub fn schema_for_entity(
        &self,
        entity: &str,
    ) -> std::result::Result<Arc<SchemaTemplate>, CatalogError> {
        let type_name = self
            .schema_by_entity
            .get(entity)
            .ok_or_else(|| CatalogError::UnknownSchema(format!("<schema for {}>", entity)))?;
        self.schema(type_name)
    }

    /// Entity reached from `model` through the dotted relationship path
    ///
    /// Every segment must be a relationship on the mapper reached so far.
    pub fn related_entity(
        &self,
        model: &str,
        relationship_path: &str,
    ) -> std::result::Result<&EntityType, CatalogError> {
        let mut mapper = self.entity(model)?;
        for segment in relationship_path.split(crate::path::SEPARATOR) {
            let rel = mapper.get_relationship(segment)?;
            mapper = self.entity(&rel.target)?;
        }
        Ok(mapper)
    }

    /// Fields transitively required by `names`
    pub fn required_closure(
        &self,
        entity: &str,
        names: &BTreeSet<String>,
    ) -> std::result::Result<BTreeSet<String>, CatalogError> {
        self.graphs
            .get(entity)
            .map(|graph| graph.closure(names))
            .ok_or_else(|| CatalogError::UnknownEntity(entity.to_string()))
    }

    /// `names` together with their required-field closure
    pub fn with_required(
        &self,
        entity: &str,
        names: &BTreeSet<String>,
    ) -> std::result::Result<BTreeSet<String>, CatalogError> {
        let mut all = names.clone();
        all.extend(self.required_closure(entity, names)?);
        Ok(all)
    }

    /// Names of all declared entity types
    pub fn entity_names(&self) -> impl Iterator<Item = &String> {
        self.entities.keys()
    }
}
