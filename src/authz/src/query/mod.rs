//! Query construction and permission-aware rewriting

pub mod query;
pub mod querystring;
pub mod rewrite;

pub use query::{EagerLoad, Query};
pub use querystring::QueryString;
pub use rewrite::{load_set, QueryRewriter};
