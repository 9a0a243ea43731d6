//! Permission registry
//!
//! Maps (operation kind, entity type) to the ordered list of rules registered
//! for it. The registry has a two-phase lifecycle:
//!
//! 1. [`RegistryBuilder`]: mutable, append-only, owned by the route
//!    installation code at startup
//! 2. [`PermissionRegistry`]: produced by [`RegistryBuilder::seal`],
//!    immutable and therefore safe for unsynchronized concurrent reads
//!
//! A sealed registry can be published process-wide once with
//! [`PermissionRegistry::install_global`].

use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AuthzError, Result};
use crate::rules::{AccessGrant, PermissionRule, RuleContext};
use crate::types::{OperationKind, Principal};

static GLOBAL: OnceCell<Arc<PermissionRegistry>> = OnceCell::new();

type Key = (OperationKind, String);

/// Startup-phase registry
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: HashMap<Key, Vec<PermissionRule>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rules for an (operation, entity) pair
    ///
    /// An empty list still marks the pair as registered.
    pub fn register(
        &mut self,
        operation: OperationKind,
        entity: impl Into<String>,
        rules: Vec<PermissionRule>,
    ) -> Result<()> {
        for rule in &rules {
            rule.validate()?;
        }
        let entity = entity.into();
        debug!(
            "Registering {} rule(s) for {} {}",
            rules.len(),
            operation,
            entity
        );
        self.entries
            .entry((operation, entity))
            .or_default()
            .extend(rules);
        Ok(())
    }

    /// Rules registered so far for a pair
    pub fn rules(&self, operation: OperationKind, entity: &str) -> &[PermissionRule] {
        self.entries
            .get(&(operation, entity.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Freeze the registry
    pub fn seal(self) -> PermissionRegistry {
        info!("Permission registry sealed with {} entries", self.entries.len());
        PermissionRegistry {
            entries: self.entries,
        }
    }
}

/// Sealed, read-only registry
#[derive(Debug, Default)]
pub struct PermissionRegistry {
    entries: HashMap<Key, Vec<PermissionRule>>,
}

impl PermissionRegistry {
    /// Rules registered for a pair, `None` if the pair was never registered
    pub fn rules(&self, operation: OperationKind, entity: &str) -> Option<&[PermissionRule]> {
        self.entries
            .get(&(operation, entity.to_string()))
            .map(Vec::as_slice)
    }

    /// Number of registered (operation, entity) pairs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evaluate the registered rules for a principal
    ///
    /// Read operations with nothing registered fall back to the sibling read
    /// kind (`get` <-> `get_list`). With no rules at all the grant is
    /// unrestricted.
    pub fn resolve(
        &self,
        operation: OperationKind,
        entity: &str,
        principal: &Principal,
    ) -> AccessGrant {
        let rules = self.rules(operation, entity).or_else(|| {
            operation
                .sibling_read()
                .and_then(|sibling| self.rules(sibling, entity))
        });

        let rules = match rules {
            Some(rules) if !rules.is_empty() => rules,
            _ => {
                debug!("No rules for {} {}, access unrestricted", operation, entity);
                return AccessGrant::unrestricted();
            }
        };

        let ctx = RuleContext {
            principal,
            entity,
            operation,
        };
        rules
            .iter()
            .fold(AccessGrant::none(), |acc, rule| acc.merge(rule.evaluate(&ctx)))
    }

    /// Publish a sealed registry process-wide; only the first call succeeds
    pub fn install_global(registry: Arc<PermissionRegistry>) -> Result<()> {
        GLOBAL.set(registry).map_err(|_| {
            AuthzError::Configuration("Global permission registry already installed".to_string())
        })
    }

    /// The process-wide registry, if one was installed
    pub fn global() -> Option<Arc<PermissionRegistry>> {
        GLOBAL.get().cloned()
    }
}
