//! Token validation with batch-window tolerance

use std::fmt;
use std::sync::Arc;

use crate::braids::ScopeNameRef;
use crate::clock::{Clock, System};
use crate::config::AuthConfig;
use crate::data::AuthorizerData;
use crate::error::{self, AuthenticateError};
use crate::registry::{Resource, ScopeRegistry};
use crate::store::{with_deadline, SessionKey, SessionStore};
use crate::token::{TokenDigester, TokenMatch};

/// Validates presented credentials against stored session records
///
/// One authorizer is built at startup and shared across requests; all
/// per-request state lives in the [`AuthorizerData`] passed in.
pub struct TokenAuthorizer<C = System> {
    registry: Arc<ScopeRegistry>,
    store: Arc<dyn SessionStore>,
    digester: Arc<TokenDigester>,
    config: AuthConfig,
    clock: C,
}

impl<C> fmt::Debug for TokenAuthorizer<C>
where
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenAuthorizer")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish()
    }
}

impl TokenAuthorizer<System> {
    /// Constructs an authorizer over the given registry and store
    pub fn new(
        registry: Arc<ScopeRegistry>,
        store: Arc<dyn SessionStore>,
        digester: Arc<TokenDigester>,
        config: AuthConfig,
    ) -> Self {
        Self {
            registry,
            store,
            digester,
            config,
            clock: System,
        }
    }
}

impl<C> TokenAuthorizer<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenAuthorizer<D> {
        TokenAuthorizer {
            registry: self.registry,
            store: self.store,
            digester: self.digester,
            config: self.config,
            clock,
        }
    }
}

impl<C: Clock> TokenAuthorizer<C> {
    /// Authenticates the request's credentials for `scope`
    ///
    /// On success the resource is recorded in `data` for later retrieval and
    /// for the header policy. A token that was rotated out within the batch
    /// window still authenticates; this is what keeps concurrent requests
    /// from the same client from being wrongly rejected mid-rotation.
    ///
    /// # Errors
    ///
    /// [`Unauthorized`][error::Unauthorized] when no live token matches,
    /// [`UnknownScope`][error::UnknownScope] when the scope was never
    /// registered, and [`StoreError`][error::StoreError] when the store
    /// fails or times out (retryable; says nothing about the credentials).
    pub async fn authenticate(
        &self,
        scope: &ScopeNameRef,
        data: &mut AuthorizerData,
    ) -> Result<Arc<dyn Resource>, AuthenticateError> {
        let loader = self.registry.resolve(scope)?;

        let credentials = match data.credentials() {
            Some(credentials) => credentials.clone(),
            None => return Err(error::unauthorized().into()),
        };

        let key = SessionKey {
            scope: scope.to_owned(),
            uid: credentials.uid().to_owned(),
            client_id: credentials.client_id().to_owned(),
        };

        let session = with_deadline(self.config.store_deadline(), self.store.load(&key))
            .await?
            .ok_or_else(error::unauthorized)?;

        let now = self.clock.now();
        let matched = session.match_token(
            &self.digester,
            credentials.access_token(),
            now,
            self.config.batch_window(),
        );
        match matched {
            TokenMatch::Current => data.note_token_match(false),
            TokenMatch::Previous => data.note_token_match(true),
            TokenMatch::Rejected => {
                tracing::debug!(scope = %scope, client = %key.client_id, "presented token matched nothing live");
                return Err(error::unauthorized().into());
            }
        }

        let resource = with_deadline(
            self.config.store_deadline(),
            loader.find(credentials.uid()),
        )
        .await?
        .ok_or_else(error::unauthorized)?;

        tracing::debug!(
            scope = %scope,
            client = %key.client_id,
            batch = matches!(matched, TokenMatch::Previous),
            "authenticated with token"
        );
        data.store_resource(Arc::clone(&resource), scope.to_owned());
        Ok(resource)
    }

    /// The resource already authenticated for `scope` during this request
    pub fn current_resource<'d>(
        &self,
        scope: &ScopeNameRef,
        data: &'d AuthorizerData,
    ) -> Option<&'d Arc<dyn Resource>> {
        data.fetch_stored_resource(scope)
    }
}
