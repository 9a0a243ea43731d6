//! Schema pruning
//!
//! Trims a per-request [`Schema`] tree down to a flat set of allowed dotted
//! paths computed for the whole response. At each level the paths below the
//! current prefix yield the allowed names for that level. An empty name set
//! leaves the level untouched: no restriction was declared for it.

use std::collections::BTreeSet;
use tracing::debug;

use super::Schema;
use crate::catalog::Catalog;
use crate::error::Result;
use crate::path;

/// Prune `schema` in place to `allowed` dotted paths
pub fn prune(schema: &mut Schema, catalog: &Catalog, allowed: &BTreeSet<String>) -> Result<()> {
    if allowed.is_empty() {
        return Ok(());
    }
    prune_level(schema, catalog, "", allowed, false)
}

fn prune_level(
    schema: &mut Schema,
    catalog: &Catalog,
    prefix: &str,
    allowed: &BTreeSet<String>,
    embedded: bool,
) -> Result<()> {
    let names = path::names_under(allowed, prefix);
    if names.is_empty() {
        return Ok(());
    }

    let declared: BTreeSet<String> = schema
        .template()
        .field_names()
        .filter(|name| names.contains(*name))
        .cloned()
        .collect();
    let only: BTreeSet<String> = match schema.only() {
        Some(only) => only.intersection(&declared).cloned().collect(),
        None => declared,
    };
    debug!(
        "Pruning {} at '{}' to {:?}",
        schema.type_name(),
        prefix,
        only
    );
    schema.restrict(only);

    // embedded documents are rebuilt from their template before descending
    let nested: Vec<String> = schema
        .fields()
        .filter(|f| f.is_nested())
        .map(|f| f.name.clone())
        .collect();
    for name in nested {
        let mut child = match schema.child(&name) {
            Some(existing) => existing.clone(),
            None => schema.instantiate_child(catalog, &name)?,
        };
        prune_level(&mut child, catalog, &path::join(prefix, &name), allowed, true)?;
        schema.set_child(&name, child);
    }

    if embedded {
        return Ok(());
    }

    let includes: Vec<String> = schema.include_data().to_vec();
    for include in includes {
        if schema.child(&include).is_none() {
            let child = schema.instantiate_child(catalog, &include)?;
            schema.set_child(&include, child);
        }
        if let Some(child) = schema.child_mut(&include) {
            prune_level(child, catalog, &path::join(prefix, &include), allowed, false)?;
        }
    }

    Ok(())
}
