//! Row filters and joins
//!
//! A row filter compares a column against an operand. Operands that refer to
//! the principal are bound to literals when a grant is computed, so a bound
//! predicate is a plain value that can be evaluated against rows or handed to
//! a query.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::types::{Principal, Record};

/// Column reference; `entity: None` addresses the entity being filtered
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    pub column: String,
}

impl ColumnRef {
    /// Column on the filtered entity itself
    pub fn own(column: impl Into<String>) -> Self {
        Self {
            entity: None,
            column: column.into(),
        }
    }

    /// Column on a joined entity
    pub fn on(entity: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            entity: Some(entity.into()),
            column: column.into(),
        }
    }
}

/// Inner join required by a row filter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Entity being joined
    pub entity: String,
    /// Column on an already present entity
    pub left: ColumnRef,
    /// Column on the joined entity
    pub right: String,
}

impl JoinSpec {
    pub fn new(entity: impl Into<String>, left: ColumnRef, right: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            left,
            right: right.into(),
        }
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Operand must be an array
    In,
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Operand {
    Literal(Value),
    Column(ColumnRef),
    PrincipalId,
    PrincipalAttribute(String),
}

/// Row filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    Compare {
        column: ColumnRef,
        op: CompareOp,
        operand: Operand,
    },
    /// Matches no row; used when no rule grants read access
    Never,
}

impl Predicate {
    pub fn compare(column: ColumnRef, op: CompareOp, operand: Operand) -> Self {
        Self::Compare {
            column,
            op,
            operand,
        }
    }

    /// `column = literal` on the filtered entity
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(
            ColumnRef::own(column),
            CompareOp::Eq,
            Operand::Literal(value.into()),
        )
    }

    /// `column = <principal id>` on the filtered entity
    pub fn owned_by_principal(column: impl Into<String>) -> Self {
        Self::compare(ColumnRef::own(column), CompareOp::Eq, Operand::PrincipalId)
    }

    /// Replace principal operands with the principal's values
    ///
    /// A missing attribute binds to `null`, which compares unequal to
    /// everything.
    pub fn bind(&self, principal: &Principal) -> Self {
        match self {
            Self::Compare {
                column,
                op,
                operand,
            } => {
                let operand = match operand {
                    Operand::PrincipalId => Operand::Literal(Value::String(principal.id.clone())),
                    Operand::PrincipalAttribute(key) => {
                        Operand::Literal(principal.attribute(key).unwrap_or(Value::Null))
                    }
                    other => other.clone(),
                };
                Self::compare(column.clone(), *op, operand)
            }
            Self::Never => Self::Never,
        }
    }

    /// Evaluate against a joined row
    pub fn evaluate(&self, row: &JoinedRow<'_>) -> bool {
        match self {
            Self::Never => false,
            Self::Compare {
                column,
                op,
                operand,
            } => {
                let Some(left) = row.get(column) else {
                    return false;
                };
                let right = match operand {
                    Operand::Literal(v) => v,
                    Operand::Column(c) => match row.get(c) {
                        Some(v) => v,
                        None => return false,
                    },
                    // unbound principal operands never match
                    Operand::PrincipalId | Operand::PrincipalAttribute(_) => return false,
                };
                compare(left, *op, right)
            }
        }
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    if left.is_null() || right.is_null() {
        return false;
    }
    match op {
        CompareOp::Eq => loosely_equal(left, right),
        CompareOp::Ne => !loosely_equal(left, right),
        CompareOp::In => right
            .as_array()
            .map(|items| items.iter().any(|item| loosely_equal(left, item)))
            .unwrap_or(false),
        CompareOp::Lt => order(left, right) == Some(Ordering::Less),
        CompareOp::Lte => matches!(order(left, right), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => order(left, right) == Some(Ordering::Greater),
        CompareOp::Gte => matches!(
            order(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// Source of rows for resolving joins
pub trait RowLookup {
    /// All stored rows of an entity type
    fn rows(&self, entity: &str) -> Vec<Record>;
}

/// Lookup with no rows; joins never resolve
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRows;

impl RowLookup for NoRows {
    fn rows(&self, _entity: &str) -> Vec<Record> {
        Vec::new()
    }
}

/// A primary row together with the rows it was joined to
#[derive(Debug, Clone)]
pub struct JoinedRow<'a> {
    primary: &'a Record,
    joined: HashMap<String, Record>,
}

impl<'a> JoinedRow<'a> {
    pub fn new(primary: &'a Record) -> Self {
        Self {
            primary,
            joined: HashMap::new(),
        }
    }

    fn get(&self, column: &ColumnRef) -> Option<&Value> {
        match &column.entity {
            None => self.primary.get(&column.column),
            Some(entity) => self.joined.get(entity)?.get(&column.column),
        }
    }

    fn with(&self, entity: &str, row: Record) -> Self {
        let mut next = self.clone();
        next.joined.insert(entity.to_string(), row);
        next
    }
}

/// Whether `row` satisfies all `filters` for some combination of `joins`
///
/// Joins are inner joins: a row with no partner for a join is excluded.
pub fn row_satisfies(
    row: &Record,
    joins: &[JoinSpec],
    filters: &[Predicate],
    lookup: &dyn RowLookup,
) -> bool {
    fn search(
        current: JoinedRow<'_>,
        joins: &[JoinSpec],
        filters: &[Predicate],
        lookup: &dyn RowLookup,
    ) -> bool {
        let Some((join, rest)) = joins.split_first() else {
            return filters.iter().all(|f| f.evaluate(&current));
        };
        let Some(left) = current.get(&join.left).cloned() else {
            return false;
        };
        lookup
            .rows(&join.entity)
            .into_iter()
            .filter(|candidate| {
                candidate
                    .get(&join.right)
                    .map(|right| loosely_equal(&left, right))
                    .unwrap_or(false)
            })
            .any(|candidate| search(current.with(&join.entity, candidate), rest, filters, lookup))
    }

    search(JoinedRow::new(row), joins, filters, lookup)
}
