//! Per-request authentication context
//!
//! Nothing here is ambient or process-wide: one [`AuthorizerData`] is built
//! at the start of each request, threaded through authentication and header
//! construction, and dropped when the response goes out.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::braids::{
    AccessToken, AccessTokenRef, ClientId, ClientIdRef, ScopeName, ScopeNameRef, Uid, UidRef,
};
use crate::headers;
use crate::registry::Resource;

/// The credential triple a client presents with a request
///
/// A request either carries all three fields or is treated as carrying none.
#[derive(Clone, Debug)]
pub struct RequestCredentials {
    access_token: AccessToken,
    client_id: ClientId,
    uid: Uid,
}

impl RequestCredentials {
    /// Constructs credentials from already-extracted parts
    pub fn new(
        access_token: impl Into<AccessToken>,
        client_id: impl Into<ClientId>,
        uid: impl Into<Uid>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            client_id: client_id.into(),
            uid: uid.into(),
        }
    }

    /// Extracts credentials via a header lookup
    ///
    /// Returns `None` when any of `access-token`, `client`, or `uid` is
    /// absent; that is the unauthenticated flow, not an error.
    pub fn from_lookup<'a, F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let access_token = lookup(headers::ACCESS_TOKEN_HEADER)?;
        let client_id = lookup(headers::CLIENT_HEADER)?;
        let uid = lookup(headers::UID_HEADER)?;
        Some(Self::new(access_token, client_id, uid))
    }

    /// The presented token
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// The presenting device
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }

    /// The claimed resource identifier
    pub fn uid(&self) -> &UidRef {
        &self.uid
    }
}

/// Per-request context binding credentials to authenticated resources
///
/// Holds at most one authenticated resource per scope, plus the flags the
/// header policy consults after the request body has run.
pub struct AuthorizerData {
    credentials: Option<RequestCredentials>,
    resources: HashMap<ScopeName, Arc<dyn Resource>>,
    first_authenticated: Option<ScopeName>,
    authed_with_token: bool,
    matched_previous_token: bool,
    skip_auth_headers: bool,
}

impl fmt::Debug for AuthorizerData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AuthorizerData")
            .field("credentials", &self.credentials)
            .field(
                "resources",
                &self.resources.keys().map(|s| s.as_str()).collect::<Vec<_>>(),
            )
            .field("authed_with_token", &self.authed_with_token)
            .field("matched_previous_token", &self.matched_previous_token)
            .field("skip_auth_headers", &self.skip_auth_headers)
            .finish()
    }
}

impl AuthorizerData {
    /// Builds the context for a request presenting `credentials`
    pub fn new(credentials: Option<RequestCredentials>) -> Self {
        Self {
            credentials,
            resources: HashMap::new(),
            first_authenticated: None,
            authed_with_token: false,
            matched_previous_token: false,
            skip_auth_headers: false,
        }
    }

    /// Builds the context by extracting credentials from a header lookup
    pub fn from_lookup<'a, F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        Self::new(RequestCredentials::from_lookup(lookup))
    }

    /// The presented credentials, if the request carried a complete triple
    pub fn credentials(&self) -> Option<&RequestCredentials> {
        self.credentials.as_ref()
    }

    /// The presented token, if any
    pub fn token(&self) -> Option<&AccessTokenRef> {
        self.credentials.as_ref().map(|c| c.access_token())
    }

    /// The presenting device, if any
    pub fn client_id(&self) -> Option<&ClientIdRef> {
        self.credentials.as_ref().map(|c| c.client_id())
    }

    /// The claimed resource identifier, if any
    pub fn uid(&self) -> Option<&UidRef> {
        self.credentials.as_ref().map(|c| c.uid())
    }

    /// The resource previously stored for `scope`, if any
    ///
    /// Idempotent and purely in-memory; storage happens through
    /// [`store_resource`][Self::store_resource].
    pub fn fetch_stored_resource(&self, scope: &ScopeNameRef) -> Option<&Arc<dyn Resource>> {
        self.resources.get(scope)
    }

    /// Whether a resource has been authenticated for `scope`
    pub fn authenticated(&self, scope: &ScopeNameRef) -> bool {
        self.resources.contains_key(scope)
    }

    /// Records `resource` as authenticated for `scope`
    pub fn store_resource(&mut self, resource: Arc<dyn Resource>, scope: ScopeName) {
        if self.first_authenticated.is_none() {
            self.first_authenticated = Some(scope.clone());
        }
        self.resources.insert(scope, resource);
    }

    /// The first resource authenticated during this request, with its scope
    pub fn first_authenticated_resource(&self) -> Option<(&ScopeNameRef, &Arc<dyn Resource>)> {
        let scope = self.first_authenticated.as_deref()?;
        let resource = self.resources.get(scope)?;
        Some((scope, resource))
    }

    /// Whether this request authenticated by presenting a token
    pub fn authed_with_token(&self) -> bool {
        self.authed_with_token
    }

    /// Whether the accepted token was the previously rotated-out one
    pub fn matched_previous_token(&self) -> bool {
        self.matched_previous_token
    }

    pub(crate) fn note_token_match(&mut self, matched_previous: bool) {
        self.authed_with_token = true;
        self.matched_previous_token = matched_previous;
    }

    /// Whether header emission is suppressed for this request
    pub fn skip_auth_headers(&self) -> bool {
        self.skip_auth_headers
    }

    /// Suppresses (or re-enables) header emission for this request
    pub fn set_skip_auth_headers(&mut self, skip: bool) {
        self.skip_auth_headers = skip;
    }
}
