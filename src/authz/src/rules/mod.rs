//! Permission rules
//!
//! Rules are modelled as a tagged variant with a single evaluation entry
//! point, [`PermissionRule::evaluate`], returning a partial [`AccessGrant`].

pub mod grant;
pub mod predicate;
pub mod rule;

pub use grant::{AccessGrant, ColumnGrant};
pub use predicate::{
    row_satisfies, ColumnRef, CompareOp, JoinSpec, JoinedRow, NoRows, Operand, Predicate,
    RowLookup,
};
pub use rule::{PermissionRule, RuleContext};
