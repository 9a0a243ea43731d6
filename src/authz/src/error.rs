//! Error types for the authorization engine

use thiserror::Error;

use crate::types::Method;

/// Lookup failures against the entity catalog
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// Entity type is not declared
    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),

    /// Schema type is not declared
    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    /// Attribute is not declared on the entity or schema
    #[error("Unknown attribute '{attribute}' on {owner}")]
    UnknownAttribute { owner: String, attribute: String },

    /// Attribute exists but is not a relationship
    #[error("Attribute '{attribute}' on {owner} is not a relationship")]
    NotARelationship { owner: String, attribute: String },
}

/// Authorization engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Invalid setup detected while installing routes or building the catalog
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Request reached the permission layer without a principal
    #[error("No principal bound to the request")]
    MissingPrincipal,

    /// Hook invoked without the request's permission resolver
    #[error("No permission resolver bound to the request")]
    MissingResolver,

    /// Include path does not resolve to an accessible relationship chain
    #[error("Invalid include '{path}'")]
    InvalidInclude {
        path: String,
        #[source]
        source: Option<CatalogError>,
    },

    /// Request body could not be understood
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Operation not in the resource's method set
    #[error("Method {method} is not allowed on {resource}")]
    MethodDisabled { resource: String, method: Method },

    /// Write or delete refused by the access grant
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Single-object lookup returned nothing
    #[error("{entity} '{id}' not found")]
    ObjectNotFound { entity: String, id: String },

    /// Catalog lookup failed outside of include handling
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthzError {
    /// Build an invalid-include error that wraps a catalog lookup failure
    pub fn invalid_include(path: impl Into<String>, source: CatalogError) -> Self {
        Self::InvalidInclude {
            path: path.into(),
            source: Some(source),
        }
    }

    /// Whether this error is caused by the client request rather than the server
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInclude { .. }
                | Self::BadRequest(_)
                | Self::MethodDisabled { .. }
                | Self::Forbidden(_)
                | Self::ObjectNotFound { .. }
        )
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
