//! Resource routing and request dispatch
//!
//! Resources are declared with a [`ResourceDefinition`] and installed once on
//! an [`ApiBuilder`]. Installation registers the resource's permission rules
//! and composes each handler into a middleware chain:
//!
//! ```text
//! decorators (last declared outermost) -> permission layer -> handler
//! ```
//!
//! [`ApiBuilder::build`] seals the registry and freezes the handler table
//! into an [`Api`], which only reads shared state while serving requests.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::config::PluginConfig;
use crate::error::{AuthzError, Result};
use crate::plugin::PermissionPlugin;
use crate::query::QueryString;
use crate::registry::{PermissionRegistry, RegistryBuilder};
use crate::resolver::PermissionResolver;
use crate::rules::PermissionRule;
use crate::types::{Method, OperationKind, Principal, Record, ResourceKind};

/// Request handler
pub type Handler = Arc<dyn Fn(&mut RequestContext) -> Result<Response> + Send + Sync>;

/// Handler-wrapping function
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Incoming request, already parsed by the transport
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub principal: Option<Principal>,
    pub query: QueryString,
    /// Object identifier for detail resources
    pub id: Option<String>,
    pub payload: Option<Record>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_query(mut self, raw: &str) -> Self {
        self.query = QueryString::parse(raw);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: Record) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Handler result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn created(body: Value) -> Self {
        Self { status: 201, body }
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            body: Value::Null,
        }
    }
}

/// Per-request state threaded through the middleware chain
pub struct RequestContext {
    /// Resource name
    pub resource: String,
    pub kind: ResourceKind,
    /// Entity type served by the resource
    pub entity: String,
    /// Schema type name of the resource
    pub schema: String,
    pub method: Method,
    pub operation: OperationKind,
    pub request: Request,
    pub catalog: Arc<Catalog>,
    pub registry: Arc<PermissionRegistry>,
    pub plugin: Arc<PermissionPlugin>,
    /// Whether the data layer's general-purpose include loader may run
    pub eager_load_includes: bool,
    resolver: Option<PermissionResolver>,
}

impl RequestContext {
    /// The request's permission resolver
    pub fn resolver(&mut self) -> Result<&mut PermissionResolver> {
        self.resolver.as_mut().ok_or(AuthzError::MissingResolver)
    }

    pub fn has_resolver(&self) -> bool {
        self.resolver.is_some()
    }

    pub fn set_resolver(&mut self, resolver: PermissionResolver) {
        self.resolver = Some(resolver);
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("resource", &self.resource)
            .field("method", &self.method)
            .field("operation", &self.operation)
            .field("request", &self.request)
            .field("eager_load_includes", &self.eager_load_includes)
            .field("resolver", &self.resolver)
            .finish()
    }
}

/// Handlers a resource implements
#[derive(Clone, Default)]
pub struct HandlerSet {
    handlers: HashMap<Method, Handler>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, method: Method, handler: F) -> Self
    where
        F: Fn(&mut RequestContext) -> Result<Response> + Send + Sync + 'static,
    {
        self.handlers.insert(method, Arc::new(handler));
        self
    }

    pub fn get(&self, method: Method) -> Option<&Handler> {
        self.handlers.get(&method)
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.handlers.keys().collect();
        methods.sort();
        f.debug_struct("HandlerSet").field("methods", &methods).finish()
    }
}

/// Declaration of a routed resource
#[derive(Clone)]
pub struct ResourceDefinition {
    /// Unique resource name
    pub name: String,
    /// Collection path segment the resource is served under
    pub path: String,
    pub kind: ResourceKind,
    /// Schema type name
    pub schema: String,
    /// Enabled methods; `None` enables every method of the kind
    pub methods: Option<BTreeSet<Method>>,
    /// Rules per method
    pub permissions: HashMap<Method, Vec<PermissionRule>>,
    /// Extra middleware, applied around the permission layer
    pub decorators: Vec<Middleware>,
    /// Event endpoints secure themselves and are exempt from strict mode
    pub event: bool,
}

impl ResourceDefinition {
    fn new(name: impl Into<String>, kind: ResourceKind, schema: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            kind,
            schema: schema.into(),
            methods: None,
            permissions: HashMap::new(),
            decorators: Vec::new(),
            event: false,
        }
    }

    /// Collection resource (GET list, POST)
    pub fn list(name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self::new(name, ResourceKind::List, schema)
    }

    /// Single-object resource (GET, PATCH, DELETE)
    pub fn detail(name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self::new(name, ResourceKind::Detail, schema)
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn methods<I: IntoIterator<Item = Method>>(mut self, methods: I) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    pub fn permission(mut self, method: Method, rules: Vec<PermissionRule>) -> Self {
        self.permissions.entry(method).or_default().extend(rules);
        self
    }

    pub fn decorator(mut self, decorator: Middleware) -> Self {
        self.decorators.push(decorator);
        self
    }

    pub fn event(mut self) -> Self {
        self.event = true;
        self
    }

    /// Whether a method is enabled on this resource
    pub fn is_enabled(&self, method: Method) -> bool {
        match &self.methods {
            Some(methods) => methods.contains(&method),
            None => self.kind.supported_methods().contains(&method),
        }
    }
}

impl fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDefinition")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("schema", &self.schema)
            .field("methods", &self.methods)
            .field("permissions", &self.permissions)
            .field("decorators", &self.decorators.len())
            .field("event", &self.event)
            .finish()
    }
}

/// Installed resource
#[derive(Clone)]
pub struct Route {
    pub definition: Arc<ResourceDefinition>,
    /// Entity type behind the resource schema
    pub entity: String,
    handlers: HashMap<Method, Handler>,
}

impl Route {
    pub fn handler(&self, method: Method) -> Option<&Handler> {
        self.handlers.get(&method)
    }
}

/// Startup-phase API assembly
pub struct ApiBuilder {
    catalog: Arc<Catalog>,
    plugin: Arc<PermissionPlugin>,
    registry: RegistryBuilder,
    routes: HashMap<String, Route>,
    installed: HashSet<String>,
}

impl ApiBuilder {
    pub fn new(catalog: Arc<Catalog>, config: PluginConfig) -> Self {
        Self {
            catalog,
            plugin: Arc::new(PermissionPlugin::new(config)),
            registry: RegistryBuilder::new(),
            routes: HashMap::new(),
            installed: HashSet::new(),
        }
    }

    /// Install a resource; installing the same resource again is a no-op
    pub fn route(&mut self, definition: ResourceDefinition, handlers: HandlerSet) -> Result<&mut Self> {
        if self.installed.contains(&definition.name) {
            debug!("Resource {} already installed", definition.name);
            return Ok(self);
        }

        let template = self.catalog.schema(&definition.schema)?;
        let entity = template.entity.clone().ok_or_else(|| {
            AuthzError::Configuration(format!(
                "Schema {} of resource {} is not bound to an entity",
                definition.schema, definition.name
            ))
        })?;

        let table = self
            .plugin
            .after_route(&definition, &entity, &handlers, &mut self.registry)?;
        info!(
            "Installed resource {} ({:?}) with {} handler(s)",
            definition.name,
            definition.kind,
            table.len()
        );

        self.installed.insert(definition.name.clone());
        self.routes.insert(
            definition.name.clone(),
            Route {
                definition: Arc::new(definition),
                entity,
                handlers: table,
            },
        );
        Ok(self)
    }

    /// Installed route, for inspection
    pub fn installed(&self, name: &str) -> Option<&Route> {
        self.routes.get(name)
    }

    /// Rules registered so far
    pub fn registry(&self) -> &RegistryBuilder {
        &self.registry
    }

    /// Seal the registry and freeze the handler table
    pub fn build(self) -> Api {
        Api {
            catalog: self.catalog,
            plugin: self.plugin,
            registry: Arc::new(self.registry.seal()),
            routes: self.routes,
        }
    }
}

/// Serving-phase API; read-only
#[derive(Clone)]
pub struct Api {
    catalog: Arc<Catalog>,
    plugin: Arc<PermissionPlugin>,
    registry: Arc<PermissionRegistry>,
    routes: HashMap<String, Route>,
}

impl Api {
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<PermissionRegistry> {
        &self.registry
    }

    pub fn route(&self, name: &str) -> Option<&Route> {
        self.routes.get(name)
    }

    /// Resource served under a path segment for a resource kind
    pub fn resource_at(&self, path: &str, kind: ResourceKind) -> Option<&str> {
        self.routes
            .values()
            .find(|r| r.definition.path == path && r.definition.kind == kind)
            .map(|r| r.definition.name.as_str())
    }

    /// Run a request through the resource's middleware chain
    pub fn dispatch(&self, resource: &str, method: Method, request: Request) -> Result<Response> {
        let route = self.routes.get(resource).ok_or_else(|| AuthzError::ObjectNotFound {
            entity: "resource".to_string(),
            id: resource.to_string(),
        })?;
        let definition = &route.definition;
        let handler = route
            .handler(method)
            .ok_or_else(|| AuthzError::MethodDisabled {
                resource: definition.name.clone(),
                method,
            })?
            .clone();

        let mut ctx = RequestContext {
            resource: definition.name.clone(),
            kind: definition.kind,
            entity: route.entity.clone(),
            schema: definition.schema.clone(),
            method,
            operation: definition.kind.operation(method),
            request,
            catalog: self.catalog.clone(),
            registry: self.registry.clone(),
            plugin: self.plugin.clone(),
            eager_load_includes: true,
            resolver: None,
        };
        handler(&mut ctx)
    }
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.routes.keys().collect();
        names.sort();
        f.debug_struct("Api")
            .field("routes", &names)
            .field("registry", &self.registry.len())
            .finish()
    }
}
