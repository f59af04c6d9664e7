//! Service registry and route table.
//!
//! Services are declared with a [`ServiceDescriptor`]; middleware and
//! handlers are attached to them through the [`Registry`]. Registration is
//! lenient: names are only checked when [`Registry::build`] resolves every
//! declared method into an immutable [`RouteTable`].
//!
//! Each method's chain is, in order:
//!
//! ```text
//! global middleware -> service middleware -> method middleware -> handler
//! ```
//!
//! # Example
//!
//! ```rust
//! use thales_middleware::{chain, from_fn, handler_fn};
//! use thales_server::{Registry, ServiceDescriptor};
//!
//! let routes = Registry::new()
//!     .service(ServiceDescriptor::new("helloworld.Greeter").unary("SayHello"))
//!     .use_global(from_fn(|ctx, next| Box::pin(async move { next.run(ctx).await })))
//!     .use_method("sayHello", chain![handler_fn(|ctx| Box::pin(async move {
//!         ctx.set_response(serde_json::json!({ "message": "hi" }));
//!         Ok(())
//!     }))])
//!     .build()
//!     .unwrap();
//!
//! assert!(routes.get("helloworld.Greeter", "SayHello").is_some());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use thales_core::{CallType, MethodDescriptor};
use thales_middleware::{compose, Chain, ComposedChain};
use thiserror::Error;

/// Errors raised while resolving registrations into routes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No service was declared.
    #[error("no services declared")]
    NoServices,

    /// The same service was declared twice.
    #[error("service {0} declared more than once")]
    DuplicateService(String),

    /// A registration names a service that was not declared.
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// A registration names a method the service does not declare.
    #[error("unknown method {method} on service {service}")]
    UnknownMethod {
        /// Resolved service name.
        service: String,
        /// Method name as registered.
        method: String,
    },

    /// A name matches more than one declared service, or a method was
    /// registered without a service while several are declared.
    #[error("ambiguous registration for {name}: matches {candidates:?}")]
    Ambiguous {
        /// The name as registered.
        name: String,
        /// Services it could refer to.
        candidates: Vec<String>,
    },

    /// A method was registered with no middleware and no handler.
    #[error("empty chain registered for {service}/{method}")]
    EmptyChain {
        /// Resolved service name.
        service: String,
        /// Declared method name.
        method: String,
    },

    /// A method was registered twice.
    #[error("handler for {service}/{method} registered more than once")]
    DuplicateHandler {
        /// Resolved service name.
        service: String,
        /// Declared method name.
        method: String,
    },
}

/// A declared service and its methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    /// Declares a service by its fully qualified name (e.g. `helloworld.Greeter`).
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Declares a method.
    #[must_use]
    pub fn method(mut self, name: impl Into<String>, call_type: CallType) -> Self {
        self.methods.push(MethodDescriptor {
            service: self.name.clone(),
            method: name.into(),
            call_type,
        });
        self
    }

    /// Declares a unary method.
    #[must_use]
    pub fn unary(self, name: impl Into<String>) -> Self {
        self.method(name, CallType::Unary)
    }

    /// Declares a client-streaming method.
    #[must_use]
    pub fn request_stream(self, name: impl Into<String>) -> Self {
        self.method(name, CallType::RequestStream)
    }

    /// Declares a server-streaming method.
    #[must_use]
    pub fn response_stream(self, name: impl Into<String>) -> Self {
        self.method(name, CallType::ResponseStream)
    }

    /// Declares a bidirectional streaming method.
    #[must_use]
    pub fn duplex(self, name: impl Into<String>) -> Self {
        self.method(name, CallType::Duplex)
    }

    /// Returns the fully qualified service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the unqualified service name (`Greeter` for `helloworld.Greeter`).
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// Returns the declared methods.
    #[must_use]
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    fn position(&self, method: &str) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| m.method == method || lower_camel(&m.method) == method)
    }
}

/// Handlers for several services at once.
///
/// Maps service name to method name to chain.
///
/// # Example
///
/// ```rust
/// use thales_middleware::{chain, handler_fn, IntoMiddleware};
/// use thales_server::ServiceMap;
///
/// let hello = handler_fn(|_ctx| Box::pin(async { Ok(()) })).into_middleware();
/// let map = ServiceMap::new()
///     .method("Greeter4", "sayGoodbye", chain![hello.clone()])
///     .method("Greeter4", "sayHello", chain![hello]);
/// assert_eq!(map.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ServiceMap {
    services: IndexMap<String, IndexMap<String, Chain>>,
}

impl ServiceMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method chain. A later entry for the same method replaces the
    /// earlier one.
    #[must_use]
    pub fn method(
        mut self,
        service: impl Into<String>,
        method: impl Into<String>,
        chain: impl Into<Chain>,
    ) -> Self {
        self.services
            .entry(service.into())
            .or_default()
            .insert(method.into(), chain.into());
        self
    }

    /// Returns the number of method entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.values().map(IndexMap::len).sum()
    }

    /// Returns `true` if the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct MethodRegistration {
    service: Option<String>,
    method: String,
    chain: Chain,
}

/// Collects service declarations, middleware and handlers.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    services: Vec<ServiceDescriptor>,
    global: Chain,
    service_middleware: Vec<(String, Chain)>,
    methods: Vec<MethodRegistration>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a service.
    #[must_use]
    pub fn service(mut self, service: ServiceDescriptor) -> Self {
        self.services.push(service);
        self
    }

    /// Adds middleware to every method of every service.
    ///
    /// Global middleware runs first, in registration order, regardless of
    /// when the method handlers were registered.
    #[must_use]
    pub fn use_global(mut self, middleware: impl Into<Chain>) -> Self {
        self.global.extend(middleware.into());
        self
    }

    /// Adds middleware to every method of one service.
    ///
    /// `service` may be the fully qualified or the unqualified name.
    #[must_use]
    pub fn use_service(mut self, service: impl Into<String>, middleware: impl Into<Chain>) -> Self {
        self.service_middleware.push((service.into(), middleware.into()));
        self
    }

    /// Registers a method chain on the only declared service.
    ///
    /// The method may be named as declared (`SayHello`) or in lower camel
    /// case (`sayHello`).
    #[must_use]
    pub fn use_method(mut self, method: impl Into<String>, chain: impl Into<Chain>) -> Self {
        self.methods.push(MethodRegistration {
            service: None,
            method: method.into(),
            chain: chain.into(),
        });
        self
    }

    /// Registers a method chain on a named service.
    #[must_use]
    pub fn use_service_method(
        mut self,
        service: impl Into<String>,
        method: impl Into<String>,
        chain: impl Into<Chain>,
    ) -> Self {
        self.methods.push(MethodRegistration {
            service: Some(service.into()),
            method: method.into(),
            chain: chain.into(),
        });
        self
    }

    /// Registers every entry of a [`ServiceMap`].
    #[must_use]
    pub fn use_map(mut self, map: ServiceMap) -> Self {
        for (service, methods) in map.services {
            for (method, chain) in methods {
                self.methods.push(MethodRegistration {
                    service: Some(service.clone()),
                    method,
                    chain,
                });
            }
        }
        self
    }

    /// Returns the declared services.
    #[must_use]
    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    /// Resolves every registration and composes one chain per method.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] for unknown or ambiguous names, empty
    /// chains, and duplicate registrations.
    pub fn build(self) -> Result<RouteTable, RegistryError> {
        if self.services.is_empty() {
            return Err(RegistryError::NoServices);
        }

        let mut seen = Vec::with_capacity(self.services.len());
        for service in &self.services {
            if seen.contains(&service.name()) {
                return Err(RegistryError::DuplicateService(service.name().to_string()));
            }
            seen.push(service.name());
        }

        let mut service_chains: HashMap<usize, Chain> = HashMap::new();
        for (name, chain) in &self.service_middleware {
            let index = self.resolve_service(name)?;
            service_chains.entry(index).or_default().extend(chain.clone());
        }

        let mut method_chains: HashMap<(usize, usize), Chain> = HashMap::new();
        for registration in &self.methods {
            let service_index = match &registration.service {
                Some(name) => self.resolve_service(name)?,
                None if self.services.len() == 1 => 0,
                None => {
                    return Err(RegistryError::Ambiguous {
                        name: registration.method.clone(),
                        candidates: self.services.iter().map(|s| s.name.clone()).collect(),
                    })
                }
            };
            let service = &self.services[service_index];
            let method_index = service
                .position(&registration.method)
                .ok_or_else(|| RegistryError::UnknownMethod {
                    service: service.name.clone(),
                    method: registration.method.clone(),
                })?;
            let declared = &service.methods[method_index].method;

            if registration.chain.is_empty() {
                return Err(RegistryError::EmptyChain {
                    service: service.name.clone(),
                    method: declared.clone(),
                });
            }
            if method_chains
                .insert((service_index, method_index), registration.chain.clone())
                .is_some()
            {
                return Err(RegistryError::DuplicateHandler {
                    service: service.name.clone(),
                    method: declared.clone(),
                });
            }
        }

        let mut routes = HashMap::new();
        let mut descriptors = Vec::new();
        for (service_index, service) in self.services.iter().enumerate() {
            for (method_index, descriptor) in service.methods.iter().enumerate() {
                let chain = match method_chains.remove(&(service_index, method_index)) {
                    Some(method_chain) => {
                        let mut full = self.global.clone();
                        if let Some(service_chain) = service_chains.get(&service_index) {
                            full.extend(service_chain.clone());
                        }
                        full.extend(method_chain);
                        let composed = compose(full).map_err(|_| RegistryError::EmptyChain {
                            service: service.name.clone(),
                            method: descriptor.method.clone(),
                        })?;
                        Some(composed)
                    }
                    None => {
                        tracing::warn!(
                            service = %service.name,
                            method = %descriptor.method,
                            "no handler registered, calls will be answered with UNIMPLEMENTED"
                        );
                        None
                    }
                };

                let route = Arc::new(Route {
                    descriptor: descriptor.clone(),
                    chain,
                });
                tracing::debug!(
                    service = %service.name,
                    method = %descriptor.method,
                    call_type = %descriptor.call_type,
                    stack = ?route.chain.as_ref().map(ComposedChain::names),
                    "route registered"
                );
                routes.insert(
                    (service.name.clone(), descriptor.method.clone()),
                    Arc::clone(&route),
                );
                routes
                    .entry((service.name.clone(), lower_camel(&descriptor.method)))
                    .or_insert(route);
                descriptors.push(descriptor.clone());
            }
        }

        Ok(RouteTable {
            routes,
            descriptors,
        })
    }

    fn resolve_service(&self, name: &str) -> Result<usize, RegistryError> {
        if let Some(index) = self.services.iter().position(|s| s.name == name) {
            return Ok(index);
        }

        let matches: Vec<usize> = self
            .services
            .iter()
            .enumerate()
            .filter(|(_, s)| s.short_name() == name)
            .map(|(index, _)| index)
            .collect();

        match matches.as_slice() {
            [index] => Ok(*index),
            [] => Err(RegistryError::UnknownService(name.to_string())),
            _ => Err(RegistryError::Ambiguous {
                name: name.to_string(),
                candidates: matches
                    .iter()
                    .map(|&i| self.services[i].name.clone())
                    .collect(),
            }),
        }
    }
}

/// A resolved method and its composed chain.
#[derive(Debug)]
pub struct Route {
    descriptor: MethodDescriptor,
    chain: Option<ComposedChain>,
}

impl Route {
    /// Returns the method descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    /// Returns the call shape.
    #[must_use]
    pub fn call_type(&self) -> CallType {
        self.descriptor.call_type
    }

    /// Returns the composed chain, or `None` if no handler was registered.
    #[must_use]
    pub fn chain(&self) -> Option<&ComposedChain> {
        self.chain.as_ref()
    }
}

/// Immutable mapping of (service, method) to [`Route`].
///
/// Shared by every call; never mutated after [`Registry::build`].
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<(String, String), Arc<Route>>,
    descriptors: Vec<MethodDescriptor>,
}

impl RouteTable {
    /// Looks up a route by service and method name.
    #[must_use]
    pub fn get(&self, service: &str, method: &str) -> Option<&Arc<Route>> {
        self.routes.get(&(service.to_string(), method.to_string()))
    }

    /// Returns every declared method, in declaration order.
    #[must_use]
    pub fn descriptors(&self) -> &[MethodDescriptor] {
        &self.descriptors
    }

    /// Returns the number of declared methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns `true` if no method is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// `SayHello` -> `sayHello`.
fn lower_camel(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
