//! Response credential headers and the rotation policy
//!
//! After the request body has run, [`AuthenticationHeader`] inspects the
//! per-request context and decides between three outcomes: emit nothing,
//! re-emit the credentials the client already holds, or rotate the client's
//! token and emit the fresh set.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ring::rand::SystemRandom;

use crate::braids::{AccessToken, ClientId, ScopeName, Uid, UidRef};
use crate::clock::{Clock, System, UnixTime};
use crate::config::AuthConfig;
use crate::data::AuthorizerData;
use crate::error::HeaderError;
use crate::registry::Resource;
use crate::store::{with_deadline, SessionKey, SessionStore};
use crate::token::{ClientSession, Token, TokenDigester, TokenMatch};

/// Request and response header carrying the raw token
pub const ACCESS_TOKEN_HEADER: &str = "access-token";
/// Response header carrying the token type literal
pub const TOKEN_TYPE_HEADER: &str = "token-type";
/// Request and response header carrying the client identifier
pub const CLIENT_HEADER: &str = "client";
/// Response header carrying the token expiry in epoch seconds
pub const EXPIRY_HEADER: &str = "expiry";
/// Request and response header carrying the resource identifier
pub const UID_HEADER: &str = "uid";

/// The token type literal emitted with every credential set
pub const TOKEN_TYPE: &str = "Bearer";

/// The credential header set returned to a client
///
/// Either empty (nothing to emit) or the full five-header set; no partial
/// sets exist.
#[derive(Clone, Debug, Default)]
pub struct AuthHeaders(Option<CredentialSet>);

#[derive(Clone, Debug)]
struct CredentialSet {
    access_token: AccessToken,
    client_id: ClientId,
    uid: Uid,
    expiry: UnixTime,
}

impl AuthHeaders {
    /// A header set that emits nothing
    pub fn empty() -> Self {
        Self(None)
    }

    /// Builds the full header set directly from a freshly issued token
    ///
    /// This is the initial issuance path (registration, sign-in): no session
    /// state is consulted because the token has just been created.
    pub fn for_token(token: &Token, uid: impl Into<Uid>) -> Self {
        Self(Some(CredentialSet {
            access_token: token.access_token().to_owned(),
            client_id: token.client_id().clone(),
            uid: uid.into(),
            expiry: token.expiry(),
        }))
    }

    fn reissue(access_token: AccessToken, client_id: ClientId, uid: Uid, expiry: UnixTime) -> Self {
        Self(Some(CredentialSet {
            access_token,
            client_id,
            uid,
            expiry,
        }))
    }

    /// Whether there is nothing to emit
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// The token carried by this set, if any
    pub fn access_token(&self) -> Option<&AccessToken> {
        self.0.as_ref().map(|c| &c.access_token)
    }

    /// The client identifier carried by this set, if any
    pub fn client_id(&self) -> Option<&ClientId> {
        self.0.as_ref().map(|c| &c.client_id)
    }

    /// The expiry carried by this set, if any
    pub fn expiry(&self) -> Option<UnixTime> {
        self.0.as_ref().map(|c| c.expiry)
    }

    /// Renders the set as header name/value pairs
    ///
    /// Empty sets render as an empty map; full sets carry all five headers.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        if let Some(c) = &self.0 {
            map.insert(
                ACCESS_TOKEN_HEADER.to_owned(),
                c.access_token.as_str().to_owned(),
            );
            map.insert(TOKEN_TYPE_HEADER.to_owned(), TOKEN_TYPE.to_owned());
            map.insert(CLIENT_HEADER.to_owned(), c.client_id.as_str().to_owned());
            map.insert(EXPIRY_HEADER.to_owned(), c.expiry.0.to_string());
            map.insert(UID_HEADER.to_owned(), c.uid.as_str().to_owned());
        }
        map
    }
}

/// Decides whether a completed request belongs to an in-flight batch
///
/// A batch is a burst of requests a client fired together against one token.
/// Exactly what counts as a batch is policy, not a fixed rule, so it hangs
/// off this trait.
pub trait BatchClassifier: Send + Sync {
    /// Whether the request described by `data` and `session` is part of a
    /// batch
    fn is_batch(&self, data: &AuthorizerData, session: &ClientSession, now: UnixTime) -> bool;
}

/// Classifies nothing as a batch, so every request rotates
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverBatch;

impl BatchClassifier for NeverBatch {
    #[inline]
    fn is_batch(&self, _: &AuthorizerData, _: &ClientSession, _: UnixTime) -> bool {
        false
    }
}

/// The default rule: a request is part of a batch when it authenticated with
/// the token that a rotation just replaced
///
/// A request carrying the rotated-out token can only have been fired before
/// its sibling's response arrived, which is exactly the concurrent-burst
/// signature. The window check already happened at match time.
#[derive(Clone, Copy, Debug, Default)]
pub struct PreviousTokenBatch;

impl BatchClassifier for PreviousTokenBatch {
    #[inline]
    fn is_batch(&self, data: &AuthorizerData, _: &ClientSession, _: UnixTime) -> bool {
        data.matched_previous_token()
    }
}

/// Applies the post-request rotation and emission policy
pub struct AuthenticationHeader<C = System> {
    store: Arc<dyn SessionStore>,
    digester: Arc<TokenDigester>,
    classifier: Arc<dyn BatchClassifier>,
    config: AuthConfig,
    rng: SystemRandom,
    clock: C,
}

impl<C> fmt::Debug for AuthenticationHeader<C>
where
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AuthenticationHeader")
            .field("digester", &self.digester)
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish()
    }
}

impl AuthenticationHeader<System> {
    /// Constructs the header policy over `store` and `digester`
    ///
    /// Uses the system clock and the [`PreviousTokenBatch`] classifier.
    pub fn new(
        store: Arc<dyn SessionStore>,
        digester: Arc<TokenDigester>,
        config: AuthConfig,
    ) -> Self {
        Self {
            store,
            digester,
            classifier: Arc::new(PreviousTokenBatch),
            config,
            rng: SystemRandom::new(),
            clock: System,
        }
    }
}

impl<C> AuthenticationHeader<C> {
    /// Replaces the batch classification rule
    pub fn with_batch_classifier(mut self, classifier: impl BatchClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> AuthenticationHeader<D> {
        AuthenticationHeader {
            store: self.store,
            digester: self.digester,
            classifier: self.classifier,
            config: self.config,
            rng: self.rng,
            clock,
        }
    }
}

impl<C: Clock> AuthenticationHeader<C> {
    /// Decides what credentials, if any, to emit for the completed request
    ///
    /// Missing context never errors; it degrades to an empty set. Store
    /// failures surface so that no partial header set goes out.
    ///
    /// # Errors
    ///
    /// The session store failed or timed out, or token generation failed.
    pub async fn headers(&self, data: &AuthorizerData) -> Result<AuthHeaders, HeaderError> {
        let (scope, resource) = match data.first_authenticated_resource() {
            Some(found) => found,
            None => return Ok(AuthHeaders::empty()),
        };

        if data.skip_auth_headers() {
            return Ok(AuthHeaders::empty());
        }

        let client_id = match data.client_id() {
            Some(client_id) => client_id.to_owned(),
            None => return Ok(AuthHeaders::empty()),
        };

        let uid = resource.uid();
        let key = SessionKey {
            scope: scope.to_owned(),
            uid: uid.clone(),
            client_id: client_id.clone(),
        };
        let now = self.clock.now();

        let session = with_deadline(self.config.store_deadline(), self.store.load(&key)).await?;

        if !self.config.change_headers_on_each_request() {
            if let Some(headers) = self.reusable_headers(data, session.as_ref(), &uid, now) {
                tracing::trace!(client = %key.client_id, "re-emitting unrotated credentials");
                return Ok(headers);
            }
        }

        if let Some(mut session) = session {
            if data.authed_with_token() && self.classifier.is_batch(data, &session, now) {
                session.prune_previous(now, self.config.batch_window());
                session.extend_batch(now);
                with_deadline(self.config.store_deadline(), self.store.save(&key, session))
                    .await?;
                tracing::debug!(client = %key.client_id, "batch request; extended buffer without rotating");
                return Ok(AuthHeaders::empty());
            }

            return self.rotate(key, session, uid, now).await;
        }

        // Resource authenticated without a stored session (e.g. first
        // request after a non-token sign-in); issue a fresh one.
        let token = Token::issue(
            &self.rng,
            Some(key.client_id.clone()),
            now,
            self.config.token_lifespan(),
        )?;
        let session = ClientSession::new(
            self.digester.digest(token.access_token()),
            now,
            self.config.token_lifespan(),
        );
        with_deadline(self.config.store_deadline(), self.store.save(&key, session)).await?;
        tracing::debug!(scope = %key.scope, client = %key.client_id, "issued session for freshly authenticated resource");
        Ok(AuthHeaders::for_token(&token, uid))
    }

    /// Issues the first token for a client and persists its session
    ///
    /// The registration and sign-in path: rotation logic does not apply
    /// because there is nothing to rotate yet. When `client_id` is `None` a
    /// fresh identifier is generated.
    ///
    /// # Errors
    ///
    /// The session store failed or timed out, or token generation failed.
    pub async fn issue_session(
        &self,
        scope: impl Into<ScopeName>,
        resource: &dyn Resource,
        client_id: Option<ClientId>,
    ) -> Result<(Token, AuthHeaders), HeaderError> {
        let now = self.clock.now();
        let uid = resource.uid();
        let token = Token::issue(&self.rng, client_id, now, self.config.token_lifespan())?;
        let key = SessionKey {
            scope: scope.into(),
            uid: uid.clone(),
            client_id: token.client_id().clone(),
        };
        let session = ClientSession::new(
            self.digester.digest(token.access_token()),
            now,
            self.config.token_lifespan(),
        );
        with_deadline(self.config.store_deadline(), self.store.save(&key, session)).await?;
        tracing::debug!(scope = %key.scope, client = %key.client_id, "issued initial session");
        let headers = AuthHeaders::for_token(&token, uid);
        Ok((token, headers))
    }

    /// Removes a single client's session (sign-out)
    ///
    /// # Errors
    ///
    /// The session store failed or timed out.
    pub async fn revoke_session(&self, key: &SessionKey) -> Result<(), HeaderError> {
        with_deadline(self.config.store_deadline(), self.store.remove(key)).await?;
        tracing::debug!(scope = %key.scope, client = %key.client_id, "revoked session");
        Ok(())
    }

    fn reusable_headers(
        &self,
        data: &AuthorizerData,
        session: Option<&ClientSession>,
        uid: &UidRef,
        now: UnixTime,
    ) -> Option<AuthHeaders> {
        let session = session?;
        let token = data.token()?;
        let matched = session.match_token(
            &self.digester,
            token,
            now,
            self.config.batch_window(),
        );
        if matched == TokenMatch::Current {
            Some(AuthHeaders::reissue(
                token.to_owned(),
                data.client_id()?.to_owned(),
                uid.to_owned(),
                session.expires_at(),
            ))
        } else {
            None
        }
    }

    async fn rotate(
        &self,
        key: SessionKey,
        mut session: ClientSession,
        uid: Uid,
        now: UnixTime,
    ) -> Result<AuthHeaders, HeaderError> {
        let token = Token::issue(
            &self.rng,
            Some(key.client_id.clone()),
            now,
            self.config.token_lifespan(),
        )?;
        session.rotate(
            self.digester.digest(token.access_token()),
            now,
            self.config.token_lifespan(),
        );
        with_deadline(self.config.store_deadline(), self.store.save(&key, session)).await?;
        tracing::debug!(scope = %key.scope, client = %key.client_id, "rotated token");
        Ok(AuthHeaders::for_token(&token, uid))
    }
}
