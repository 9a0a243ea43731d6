//! Core authorization types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A stored or loaded row, keyed by attribute name
pub type Record = serde_json::Map<String, Value>;

/// Principal (user, service account) on whose behalf a request runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier (e.g., "user:alice@example.com")
    pub id: String,

    /// Principal type (user, service, ...)
    #[serde(rename = "type")]
    pub principal_type: String,

    /// Roles held by the principal
    #[serde(default)]
    pub roles: Vec<String>,

    /// Additional attributes usable as row-filter operands
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl Principal {
    /// Create a new principal from an ID string
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let principal_type = if id.contains(':') {
            id.split(':').next().unwrap_or("user").to_string()
        } else {
            "user".to_string()
        };

        Self {
            id,
            principal_type,
            roles: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    /// Add a role to the principal
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Add an attribute to the principal
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Look up an attribute; `id` and `type` resolve to the principal's own fields
    pub fn attribute(&self, key: &str) -> Option<Value> {
        match key {
            "id" => Some(Value::String(self.id.clone())),
            "type" => Some(Value::String(self.principal_type.clone())),
            _ => self.attributes.get(key).cloned(),
        }
    }
}

/// Operation kind a permission rule is registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Single-object fetch
    Get,
    /// Collection fetch
    GetList,
    /// Create
    Post,
    /// Update
    Patch,
    /// Delete
    Delete,
}

impl OperationKind {
    /// Whether this operation reads data
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Get | Self::GetList)
    }

    /// The other read kind, used as a fallback for related entities
    pub fn sibling_read(&self) -> Option<Self> {
        match self {
            Self::Get => Some(Self::GetList),
            Self::GetList => Some(Self::Get),
            _ => None,
        }
    }

    /// Stable name, as used in log lines and configuration errors
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::GetList => "get_list",
            Self::Post => "post",
            Self::Patch => "patch",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP method of a resource entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unsupported method '{}'", other)),
        }
    }
}

/// Shape of a resource: collection endpoint or single-object endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    List,
    Detail,
}

impl ResourceKind {
    /// Methods the resource kind can serve
    pub fn supported_methods(&self) -> &'static [Method] {
        match self {
            Self::List => &[Method::Get, Method::Post],
            Self::Detail => &[Method::Get, Method::Patch, Method::Delete],
        }
    }

    /// Operation kind that a method maps to on this resource kind
    pub fn operation(&self, method: Method) -> OperationKind {
        match (self, method) {
            (Self::List, Method::Get) => OperationKind::GetList,
            (Self::Detail, Method::Get) => OperationKind::Get,
            (_, Method::Post) => OperationKind::Post,
            (_, Method::Patch) => OperationKind::Patch,
            (_, Method::Delete) => OperationKind::Delete,
        }
    }
}
