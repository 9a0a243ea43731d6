//! Reference serializer
//!
//! Dumps loaded records through a pruned [`Schema`] as JSON:API-style
//! documents. Only fields still visible on the schema instance are emitted;
//! related records loaded by the data layer under a relationship name are
//! emitted as linkage plus `included` resource objects.

use serde_json::{json, Map, Value};
use std::collections::HashSet;

use super::{FieldKind, Schema};
use crate::catalog::Catalog;
use crate::error::Result;
use crate::types::Record;

/// Collects `included` resource objects without duplicates
#[derive(Debug, Default)]
struct Included {
    seen: HashSet<(String, String)>,
    items: Vec<Value>,
}

impl Included {
    fn push(&mut self, object: Value) {
        let key = (
            object["type"].as_str().unwrap_or_default().to_string(),
            object["id"].as_str().unwrap_or_default().to_string(),
        );
        if self.seen.insert(key) {
            self.items.push(object);
        }
    }
}

/// Single resource object `{type, id, attributes, relationships}`
pub fn dump_resource(schema: &Schema, catalog: &Catalog, record: &Record) -> Result<Value> {
    dump_object(schema, catalog, record, &mut Included::default())
}

/// Document for a single record
pub fn dump_one(schema: &Schema, catalog: &Catalog, record: &Record) -> Result<Value> {
    let mut included = Included::default();
    let data = dump_object(schema, catalog, record, &mut included)?;
    Ok(document(data, included))
}

/// Document for a collection
pub fn dump_many(schema: &Schema, catalog: &Catalog, records: &[Record]) -> Result<Value> {
    let mut included = Included::default();
    let data = records
        .iter()
        .map(|record| dump_object(schema, catalog, record, &mut included))
        .collect::<Result<Vec<_>>>()?;
    Ok(document(Value::Array(data), included))
}

fn document(data: Value, included: Included) -> Value {
    let mut doc = json!({ "data": data });
    if !included.items.is_empty() {
        doc["included"] = Value::Array(included.items);
    }
    doc
}

fn render_id(value: Option<&Value>) -> Value {
    match value {
        Some(Value::String(s)) => Value::String(s.clone()),
        Some(Value::Null) | None => Value::Null,
        Some(other) => Value::String(other.to_string()),
    }
}

fn dump_object(
    schema: &Schema,
    catalog: &Catalog,
    record: &Record,
    included: &mut Included,
) -> Result<Value> {
    let mut attributes = Map::new();
    let mut relationships = Map::new();

    for field in schema.fields() {
        match &field.kind {
            FieldKind::Attribute => {
                let value = record.get(&field.name).cloned().unwrap_or(Value::Null);
                attributes.insert(field.name.clone(), value);
            }
            FieldKind::Nested { .. } => {
                let child = match schema.child(&field.name) {
                    Some(child) => child.clone(),
                    None => schema.instantiate_child(catalog, &field.name)?,
                };
                let value = match record.get(&field.name) {
                    Some(Value::Object(inner)) => dump_embedded(&child, catalog, inner)?,
                    Some(Value::Array(items)) => Value::Array(
                        items
                            .iter()
                            .map(|item| match item {
                                Value::Object(inner) => dump_embedded(&child, catalog, inner),
                                other => Ok(other.clone()),
                            })
                            .collect::<Result<Vec<_>>>()?,
                    ),
                    Some(other) => other.clone(),
                    None => Value::Null,
                };
                attributes.insert(field.name.clone(), value);
            }
            FieldKind::Relationship { .. } => {
                // relationships are only emitted when the data layer loaded them
                let Some(loaded) = record.get(&field.name) else {
                    continue;
                };
                let child = match schema.child(&field.name) {
                    Some(child) => child.clone(),
                    None => schema.instantiate_child(catalog, &field.name)?,
                };
                let is_included = schema.include_data().contains(&field.name);
                let data = match loaded {
                    Value::Array(items) => {
                        let mut linkage = Vec::with_capacity(items.len());
                        for item in items {
                            if let Value::Object(related) = item {
                                linkage.push(link(&child, related));
                                if is_included {
                                    let object = dump_object(&child, catalog, related, included)?;
                                    included.push(object);
                                }
                            }
                        }
                        Value::Array(linkage)
                    }
                    Value::Object(related) => {
                        if is_included {
                            let object = dump_object(&child, catalog, related, included)?;
                            included.push(object);
                        }
                        link(&child, related)
                    }
                    _ => Value::Null,
                };
                relationships.insert(field.name.clone(), json!({ "data": data }));
            }
        }
    }

    let mut object = json!({
        "type": schema.type_name(),
        "id": render_id(record.get(&schema.template().id_field)),
        "attributes": attributes,
    });
    if !relationships.is_empty() {
        object["relationships"] = Value::Object(relationships);
    }
    Ok(object)
}

fn link(schema: &Schema, record: &Record) -> Value {
    json!({
        "type": schema.type_name(),
        "id": render_id(record.get(&schema.template().id_field)),
    })
}

fn dump_embedded(schema: &Schema, catalog: &Catalog, record: &Record) -> Result<Value> {
    let mut out = Map::new();
    for field in schema.fields() {
        let Some(value) = record.get(&field.name) else {
            continue;
        };
        let value = match (&field.kind, value) {
            (FieldKind::Nested { .. }, Value::Object(inner)) => {
                let child = match schema.child(&field.name) {
                    Some(child) => child.clone(),
                    None => schema.instantiate_child(catalog, &field.name)?,
                };
                dump_embedded(&child, catalog, inner)?
            }
            (_, other) => other.clone(),
        };
        out.insert(field.name.clone(), value);
    }
    Ok(Value::Object(out))
}
