//! Required-field dependency graph
//!
//! Some columns need other columns loaded to compute a derived value
//! (`total` needs `tax` and `subtotal`). This module:
//! 1. Detects circular declarations with a DFS, reporting the full path
//! 2. Computes the transitive closure of a set of requested columns

use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// Graph-related errors
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    /// Circular dependency detected between required-field declarations
    #[error("Circular required-field dependency on {entity}: {path}")]
    CircularDependency { entity: String, path: String },
}

/// Visit state during DFS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// On the current DFS stack
    Visiting,
    /// Fully explored
    Done,
}

/// Required-field declarations of one entity type
#[derive(Debug, Clone, Default)]
pub struct RequiredFieldGraph {
    entity: String,
    edges: BTreeMap<String, Vec<String>>,
}

impl RequiredFieldGraph {
    /// Build the graph from an entity's declarations
    pub fn new(entity: impl Into<String>, declarations: &HashMap<String, Vec<String>>) -> Self {
        let edges = declarations
            .iter()
            .map(|(field, deps)| (field.clone(), deps.clone()))
            .collect();

        Self {
            entity: entity.into(),
            edges,
        }
    }

    /// Fail with the first cycle found, if any
    pub fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();

        for start in self.edges.keys() {
            if !marks.contains_key(start.as_str()) {
                self.visit(start, &mut marks, &mut path)?;
            }
        }

        Ok(())
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), GraphError> {
        match marks.get(node) {
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                let cycle: Vec<&str> = path[start..]
                    .iter()
                    .copied()
                    .chain(std::iter::once(node))
                    .collect();
                return Err(GraphError::CircularDependency {
                    entity: self.entity.clone(),
                    path: cycle.join(" -> "),
                });
            }
            Some(Mark::Done) => return Ok(()),
            None => {}
        }

        marks.insert(node, Mark::Visiting);
        path.push(node);

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                self.visit(dep, marks, path)?;
            }
        }

        marks.insert(node, Mark::Done);
        path.pop();

        Ok(())
    }

    /// Columns transitively required by `names`, excluding `names` themselves
    /// unless another requested column requires them
    pub fn closure<'a, I>(&self, names: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut found = BTreeSet::new();
        let mut pending: Vec<&str> = names.into_iter().map(String::as_str).collect();

        while let Some(name) = pending.pop() {
            if let Some(deps) = self.edges.get(name) {
                for dep in deps {
                    if found.insert(dep.clone()) {
                        pending.push(dep);
                    }
                }
            }
        }

        found
    }

    /// Whether any declarations exist
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
