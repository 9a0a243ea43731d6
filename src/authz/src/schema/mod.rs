//! Serialization schemas
//!
//! A [`SchemaTemplate`] is the shared, immutable declaration. A [`Schema`]
//! is a per-request instance built from it: it owns its visible field set,
//! its `only` restriction, its include list and its instantiated sub-schemas.
//! Pruning one instance never affects another, so two requests for different
//! principals cannot observe each other's field sets.

pub mod dump;
pub mod prune;
pub mod template;

pub use dump::{dump_many, dump_one, dump_resource};
pub use prune::prune;
pub use template::{FieldKind, SchemaField, SchemaTemplate};

use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::error::{AuthzError, CatalogError, Result};
use crate::path;
use crate::query::QueryString;

/// Per-request schema instance
#[derive(Debug, Clone)]
pub struct Schema {
    template: Arc<SchemaTemplate>,
    fields: IndexMap<String, SchemaField>,
    only: Option<BTreeSet<String>>,
    include_data: Vec<String>,
    children: BTreeMap<String, Schema>,
}

impl Schema {
    /// Instance with every declared field visible
    pub fn new(template: Arc<SchemaTemplate>) -> Self {
        Self::with_only(template, None)
    }

    /// Instance restricted to `only` (unknown names are ignored)
    pub fn with_only(template: Arc<SchemaTemplate>, only: Option<BTreeSet<String>>) -> Self {
        let fields = template
            .fields()
            .filter(|f| only.as_ref().map_or(true, |only| only.contains(&f.name)))
            .map(|f| (f.name.clone(), f.clone()))
            .collect();

        Self {
            template,
            fields,
            only,
            include_data: Vec::new(),
            children: BTreeMap::new(),
        }
    }

    /// Instance for a request: `fields[<type>]` becomes `only`, `include`
    /// paths become include lists on this schema and its related children
    pub fn for_request(catalog: &Catalog, type_name: &str, qs: &QueryString) -> Result<Self> {
        let template = catalog.schema(type_name)?;
        let includes = qs.include();
        Self::for_includes(catalog, template, &includes, qs, "")
    }

    fn for_includes(
        catalog: &Catalog,
        template: Arc<SchemaTemplate>,
        includes: &[String],
        qs: &QueryString,
        prefix: &str,
    ) -> Result<Self> {
        let mut heads: Vec<String> = Vec::new();
        for include in includes {
            let head = path::head(include).to_string();
            if !heads.contains(&head) {
                heads.push(head);
            }
        }

        for head in &heads {
            match template.get_field(head) {
                Some(field) if field.is_relationship() => {}
                Some(_) => {
                    return Err(AuthzError::invalid_include(
                        path::join(prefix, head),
                        CatalogError::NotARelationship {
                            owner: template.type_name.clone(),
                            attribute: head.clone(),
                        },
                    ))
                }
                None => {
                    return Err(AuthzError::invalid_include(
                        path::join(prefix, head),
                        CatalogError::UnknownAttribute {
                            owner: template.type_name.clone(),
                            attribute: head.clone(),
                        },
                    ))
                }
            }
        }

        // included relationships are always part of `only`
        let only = qs.requested_fields(&template.type_name).map(|mut only| {
            only.extend(heads.iter().cloned());
            only
        });

        let mut schema = Self::with_only(template.clone(), only);
        schema.include_data = heads.clone();

        for head in heads {
            let rest: Vec<String> = includes
                .iter()
                .filter_map(|i| i.strip_prefix(&format!("{}{}", head, path::SEPARATOR)))
                .map(str::to_string)
                .collect();
            let sub = template
                .get_field(&head)
                .and_then(|f| f.sub_schema())
                .map(str::to_string)
                .unwrap_or_default();
            let child_template = catalog.schema(&sub)?;
            let child = Self::for_includes(
                catalog,
                child_template,
                &rest,
                qs,
                &path::join(prefix, &head),
            )?;
            schema.children.insert(head, child);
        }

        Ok(schema)
    }

    pub fn template(&self) -> &Arc<SchemaTemplate> {
        &self.template
    }

    /// Resource type name
    pub fn type_name(&self) -> &str {
        &self.template.type_name
    }

    /// Entity type serialized by this schema
    pub fn entity(&self) -> Option<&str> {
        self.template.entity.as_deref()
    }

    /// Visible fields, in declaration order
    pub fn fields(&self) -> impl Iterator<Item = &SchemaField> {
        self.fields.values()
    }

    /// Visible field names
    pub fn field_names(&self) -> BTreeSet<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn only(&self) -> Option<&BTreeSet<String>> {
        self.only.as_ref()
    }

    pub fn include_data(&self) -> &[String] {
        &self.include_data
    }

    /// Instantiated sub-schema for a nested or relationship field
    pub fn child(&self, name: &str) -> Option<&Schema> {
        self.children.get(name)
    }

    pub(crate) fn child_mut(&mut self, name: &str) -> Option<&mut Schema> {
        self.children.get_mut(name)
    }

    /// Fresh instance of a field's sub-schema, honouring the field's own `only`
    pub(crate) fn instantiate_child(&self, catalog: &Catalog, name: &str) -> Result<Schema> {
        let field = self.template.get_field(name).ok_or_else(|| {
            AuthzError::Catalog(CatalogError::UnknownAttribute {
                owner: self.template.type_name.clone(),
                attribute: name.to_string(),
            })
        })?;
        let sub = field.sub_schema().ok_or_else(|| {
            AuthzError::Internal(format!(
                "Field {}.{} has no sub-schema",
                self.template.type_name, name
            ))
        })?;
        let only = field
            .only
            .as_ref()
            .map(|names| names.iter().cloned().collect());
        Ok(Schema::with_only(catalog.schema(sub)?, only))
    }

    /// Replace a sub-schema instance
    pub(crate) fn set_child(&mut self, name: &str, child: Schema) {
        self.children.insert(name.to_string(), child);
    }

    /// Narrow the visible fields and record the restriction as `only`
    pub(crate) fn restrict(&mut self, only: BTreeSet<String>) {
        self.fields.retain(|name, _| only.contains(name));
        self.include_data.retain(|name| only.contains(name));
        self.children.retain(|name, _| only.contains(name));
        self.only = Some(only);
    }

    /// Hide every attribute; the resource identifier stays
    pub fn hide_all_attributes(&mut self) {
        self.restrict(BTreeSet::new());
    }
}
