//! Partial access grants and their combination

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::predicate::{JoinSpec, Predicate};

/// Column dimension of a grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnGrant {
    /// The rule expresses no opinion on columns
    Unspecified,
    /// Every column
    All,
    /// Exactly these field paths
    Only(BTreeSet<String>),
}

impl ColumnGrant {
    /// Union; `All` absorbs, `Unspecified` is the identity
    pub fn union(self, other: ColumnGrant) -> ColumnGrant {
        match (self, other) {
            (ColumnGrant::All, _) | (_, ColumnGrant::All) => ColumnGrant::All,
            (ColumnGrant::Unspecified, other) | (other, ColumnGrant::Unspecified) => other,
            (ColumnGrant::Only(mut a), ColumnGrant::Only(b)) => {
                a.extend(b);
                ColumnGrant::Only(a)
            }
        }
    }
}

/// Result of evaluating one or more rules for a principal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessGrant {
    /// Whether any rule applied to the principal
    pub granted: bool,
    pub columns: ColumnGrant,
    pub joins: Vec<JoinSpec>,
    pub filters: Vec<Predicate>,
}

impl AccessGrant {
    /// Grant of nothing; identity for [`AccessGrant::merge`]
    pub fn none() -> Self {
        Self {
            granted: false,
            columns: ColumnGrant::Unspecified,
            joins: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Unrestricted grant
    pub fn unrestricted() -> Self {
        Self {
            granted: true,
            columns: ColumnGrant::All,
            joins: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Combine with a grant from a later rule
    ///
    /// `granted` is OR-ed, columns are unioned, joins are appended without
    /// duplicates and filters are appended (conjunction). Order follows rule
    /// registration order.
    pub fn merge(mut self, other: AccessGrant) -> Self {
        self.granted |= other.granted;
        self.columns = self.columns.union(other.columns);
        for join in other.joins {
            if !self.joins.contains(&join) {
                self.joins.push(join);
            }
        }
        self.filters.extend(other.filters);
        self
    }
}

impl Default for AccessGrant {
    fn default() -> Self {
        Self::none()
    }
}
