//! Application-wide, call-independent information.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only application information shared by every call.
///
/// Built once at startup and handed to each [`Context`](crate::Context)
/// behind an `Arc`. Typed state is stored by type, one value per type.
///
/// # Example
///
/// ```
/// use thales_core::AppInfo;
///
/// struct Greeting(&'static str);
///
/// let app = AppInfo::new("greeter")
///     .with_environment("test")
///     .with_state(Greeting("hello"));
///
/// assert_eq!(app.name(), "greeter");
/// assert_eq!(app.state::<Greeting>().map(|g| g.0), Some("hello"));
/// ```
#[derive(Default)]
pub struct AppInfo {
    name: String,
    environment: String,
    state: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl AppInfo {
    /// Creates application info with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            environment: "development".to_string(),
            state: HashMap::new(),
        }
    }

    /// Sets the environment name.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Stores a shared state value, replacing any value of the same type.
    #[must_use]
    pub fn with_state<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.state.insert(TypeId::of::<T>(), Arc::new(value));
        self
    }

    /// Returns the application name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the environment name.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Returns the shared state value of type `T`.
    #[must_use]
    pub fn state<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.state
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }
}

impl std::fmt::Debug for AppInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppInfo")
            .field("name", &self.name)
            .field("environment", &self.environment)
            .field("state_entries", &self.state.len())
            .finish()
    }
}
