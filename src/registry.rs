//! Explicit mapping from scope names to resource loaders
//!
//! Scopes are resolved through a registry built once at startup, rather than
//! through anything generated or ambient. An unregistered scope is a
//! configuration fault of the deployment, not of the request.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::braids::{ScopeName, ScopeNameRef, Uid, UidRef};
use crate::error::{self, StoreError, UnknownScope};

/// An authenticatable principal
///
/// Implemented by the application's own resource types; the core only ever
/// needs the identifier clients present in the `uid` header.
pub trait Resource: Send + Sync + fmt::Debug {
    /// The identifier presented by clients in the `uid` header
    fn uid(&self) -> Uid;
}

/// Locates resources for a single scope
#[async_trait]
pub trait ResourceLoader: Send + Sync + fmt::Debug {
    /// Finds the resource identified by `uid`, if it exists
    async fn find(&self, uid: &UidRef) -> Result<Option<Arc<dyn Resource>>, StoreError>;
}

/// The scope-to-loader mapping, resolved once at startup
#[derive(Default)]
pub struct ScopeRegistry {
    loaders: HashMap<ScopeName, Arc<dyn ResourceLoader>>,
}

impl fmt::Debug for ScopeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ScopeRegistry")
            .field(
                "scopes",
                &self.loaders.keys().map(|s| s.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ScopeRegistry {
    /// Constructs an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `loader` for `scope`
    pub fn with_scope(
        mut self,
        scope: impl Into<ScopeName>,
        loader: impl ResourceLoader + 'static,
    ) -> Self {
        self.loaders.insert(scope.into(), Arc::new(loader));
        self
    }

    /// Resolves the loader for `scope`
    ///
    /// # Errors
    ///
    /// The scope was never registered.
    pub fn resolve(&self, scope: &ScopeNameRef) -> Result<&Arc<dyn ResourceLoader>, UnknownScope> {
        self.loaders
            .get(scope)
            .ok_or_else(|| error::unknown_scope(scope.to_owned()))
    }

    /// Whether `scope` has a registered loader
    pub fn contains(&self, scope: &ScopeNameRef) -> bool {
        self.loaders.contains_key(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct StaticUser(Uid);

    impl Resource for StaticUser {
        fn uid(&self) -> Uid {
            self.0.clone()
        }
    }

    #[derive(Debug)]
    struct StaticLoader;

    #[async_trait]
    impl ResourceLoader for StaticLoader {
        async fn find(&self, uid: &UidRef) -> Result<Option<Arc<dyn Resource>>, StoreError> {
            if uid.as_str() == "present@example.com" {
                Ok(Some(Arc::new(StaticUser(uid.to_owned()))))
            } else {
                Ok(None)
            }
        }
    }

    #[tokio::test]
    async fn resolves_registered_scopes() {
        let registry = ScopeRegistry::new().with_scope(ScopeName::from_static("user"), StaticLoader);

        assert!(registry.contains(&ScopeName::from_static("user")));
        let loader = registry.resolve(&ScopeName::from_static("user")).unwrap();
        let found = loader
            .find(&Uid::from_static("present@example.com"))
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn unregistered_scope_is_a_configuration_error() {
        let registry = ScopeRegistry::new();
        let err = registry
            .resolve(&ScopeName::from_static("admin"))
            .unwrap_err();
        assert_eq!(err.scope().as_str(), "admin");
    }
}
