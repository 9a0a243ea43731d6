//! Permission rule definitions

use serde::{Deserialize, Serialize};

use super::grant::{AccessGrant, ColumnGrant};
use super::predicate::{JoinSpec, Predicate};
use crate::error::{AuthzError, Result};
use crate::path;
use crate::types::{OperationKind, Principal};

/// Inputs a rule is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub principal: &'a Principal,
    pub entity: &'a str,
    pub operation: OperationKind,
}

/// Permission rule
///
/// Rules are pure functions of (principal, entity type, operation) to a
/// partial [`AccessGrant`]. Several rules for the same pair are combined in
/// registration order with [`AccessGrant::merge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PermissionRule {
    /// Every column, every row
    AllowAll,

    /// Only these field paths (`name`, `settings.theme`, `customer.id`)
    Columns { columns: Vec<String> },

    /// Restrict rows; no opinion on columns
    RowFilter {
        #[serde(default)]
        joins: Vec<JoinSpec>,
        filters: Vec<Predicate>,
    },

    /// Several rules combined as one
    Composite { rules: Vec<PermissionRule> },

    /// Apply `rule` only when the principal holds one of `roles`
    ///
    /// Role patterns support wildcards: `*`, `prefix:*`, `*:suffix`.
    ForRoles {
        roles: Vec<String>,
        rule: Box<PermissionRule>,
    },
}

impl PermissionRule {
    /// Column allowlist rule
    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Columns {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Row filter rule without joins
    pub fn row_filter(filters: Vec<Predicate>) -> Self {
        Self::RowFilter {
            joins: Vec::new(),
            filters,
        }
    }

    /// Row filter rule with joins
    pub fn row_filter_with_joins(joins: Vec<JoinSpec>, filters: Vec<Predicate>) -> Self {
        Self::RowFilter { joins, filters }
    }

    /// Composite rule
    pub fn composite(rules: Vec<PermissionRule>) -> Self {
        Self::Composite { rules }
    }

    /// Role-gated rule
    pub fn for_roles<I, S>(roles: I, rule: PermissionRule) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::ForRoles {
            roles: roles.into_iter().map(Into::into).collect(),
            rule: Box::new(rule),
        }
    }

    /// Check the rule definition
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::AllowAll => Ok(()),
            Self::Columns { columns } => {
                if let Some(bad) = columns.iter().find(|c| !path::is_valid(c)) {
                    return Err(AuthzError::Configuration(format!(
                        "Invalid field path in column rule: '{}'",
                        bad
                    )));
                }
                Ok(())
            }
            Self::RowFilter { filters, .. } => {
                if filters.is_empty() {
                    return Err(AuthzError::Configuration(
                        "Row filter rule must have at least one filter".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Composite { rules } => rules.iter().try_for_each(PermissionRule::validate),
            Self::ForRoles { roles, rule } => {
                if roles.is_empty() || roles.iter().any(|r| r.is_empty()) {
                    return Err(AuthzError::Configuration(
                        "Role-gated rule needs non-empty role patterns".to_string(),
                    ));
                }
                rule.validate()
            }
        }
    }

    /// Evaluate the rule for a principal
    ///
    /// Principal operands in row filters are bound here, so the returned
    /// grant only holds literal comparisons.
    pub fn evaluate(&self, ctx: &RuleContext<'_>) -> AccessGrant {
        match self {
            Self::AllowAll => AccessGrant::unrestricted(),
            Self::Columns { columns } => AccessGrant {
                granted: true,
                columns: ColumnGrant::Only(columns.iter().cloned().collect()),
                joins: Vec::new(),
                filters: Vec::new(),
            },
            Self::RowFilter { joins, filters } => AccessGrant {
                granted: true,
                columns: ColumnGrant::Unspecified,
                joins: joins.clone(),
                filters: filters.iter().map(|f| f.bind(ctx.principal)).collect(),
            },
            Self::Composite { rules } => rules
                .iter()
                .fold(AccessGrant::none(), |acc, rule| acc.merge(rule.evaluate(ctx))),
            Self::ForRoles { roles, rule } => {
                let applies = roles.iter().any(|pattern| {
                    ctx.principal
                        .roles
                        .iter()
                        .any(|role| matches_pattern(role, pattern))
                });
                if applies {
                    rule.evaluate(ctx)
                } else {
                    AccessGrant::none()
                }
            }
        }
    }
}

/// Match a role against a pattern (supports wildcards)
fn matches_pattern(role: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    // Prefix wildcard: "admin:*"
    if let Some(prefix) = pattern.strip_suffix(":*") {
        return role.starts_with(&format!("{}:", prefix));
    }

    // Suffix wildcard: "*:viewer"
    if let Some(suffix) = pattern.strip_prefix("*:") {
        return role.ends_with(&format!(":{}", suffix));
    }

    role == pattern
}
