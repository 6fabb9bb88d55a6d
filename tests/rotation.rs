//! End-to-end rotation behavior across the authorizer and header policy

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rotoken::clock::{DurationSecs, TestClock, UnixTime};
use rotoken::error::StoreError;
use rotoken::registry::{Resource, ResourceLoader, ScopeRegistry};
use rotoken::store::{MemorySessionStore, SessionKey, SessionStore};
use rotoken::{
    AuthConfig, AuthHeaders, AuthenticationHeader, AuthorizerData, BatchClassifier,
    CachingKeyGenerator, ClientId, ClientSession, KeyGenerator, PreviousTokenBatch, ScopeName,
    TokenAuthorizer, TokenDigester, Uid,
};

const UID: &str = "user@example.com";

#[derive(Debug)]
struct TestUser(Uid);

impl Resource for TestUser {
    fn uid(&self) -> Uid {
        self.0.clone()
    }
}

#[derive(Debug)]
struct SingleUserLoader(Uid);

#[async_trait]
impl ResourceLoader for SingleUserLoader {
    async fn find(
        &self,
        uid: &rotoken::UidRef,
    ) -> Result<Option<Arc<dyn Resource>>, StoreError> {
        if uid == &*self.0 {
            Ok(Some(Arc::new(TestUser(self.0.clone()))))
        } else {
            Ok(None)
        }
    }
}

struct Harness {
    authorizer: TokenAuthorizer<TestClock>,
    headers: AuthenticationHeader<TestClock>,
    clock: TestClock,
}

fn harness(config: AuthConfig) -> Harness {
    harness_with(config, PreviousTokenBatch)
}

fn harness_with(config: AuthConfig, classifier: impl BatchClassifier + 'static) -> Harness {
    let keys = CachingKeyGenerator::new(KeyGenerator::new("s3cr3t").unwrap());
    let digester = Arc::new(TokenDigester::new(&keys).unwrap());
    let store = Arc::new(MemorySessionStore::new());
    let registry = Arc::new(
        ScopeRegistry::new().with_scope(
            ScopeName::from_static("user"),
            SingleUserLoader(Uid::from_static(UID)),
        ),
    );
    let clock = TestClock::new(UnixTime(1_000_000));

    let authorizer = TokenAuthorizer::new(
        Arc::clone(&registry),
        store.clone() as Arc<dyn SessionStore>,
        Arc::clone(&digester),
        config.clone(),
    )
    .with_clock(clock.clone());
    let headers = AuthenticationHeader::new(
        store.clone() as Arc<dyn SessionStore>,
        digester,
        config,
    )
    .with_batch_classifier(classifier)
    .with_clock(clock.clone());

    Harness {
        authorizer,
        headers,
        clock,
    }
}

fn scope() -> ScopeName {
    ScopeName::from_static("user")
}

fn data_for(credentials: &HashMap<String, String>) -> AuthorizerData {
    AuthorizerData::from_lookup(|name| credentials.get(name).map(|v| v.as_str()))
}

async fn sign_in(h: &Harness) -> HashMap<String, String> {
    let user = TestUser(Uid::from_static(UID));
    let (_, headers) = h
        .headers
        .issue_session(scope(), &user, None)
        .await
        .unwrap();
    assert!(!headers.is_empty());
    headers.to_map()
}

/// Runs one authenticated request to completion and returns the emitted
/// headers alongside the credentials to use next (fresh ones if rotation
/// happened, the old ones otherwise).
async fn complete_request(
    h: &Harness,
    credentials: &HashMap<String, String>,
) -> (AuthHeaders, HashMap<String, String>) {
    let mut data = data_for(credentials);
    h.authorizer
        .authenticate(&scope(), &mut data)
        .await
        .expect("request should authenticate");
    let emitted = h.headers.headers(&data).await.unwrap();
    let next = if emitted.is_empty() {
        credentials.clone()
    } else {
        emitted.to_map()
    };
    (emitted, next)
}

#[tokio::test]
async fn issued_credentials_authenticate_until_expiry() {
    let h = harness(AuthConfig::default().with_token_lifespan(DurationSecs(3600)));
    let creds = sign_in(&h).await;

    let mut data = data_for(&creds);
    let resource = h.authorizer.authenticate(&scope(), &mut data).await.unwrap();
    assert_eq!(resource.uid().as_str(), UID);
    assert!(data.authed_with_token());

    h.clock.advance(3600);
    let mut data = data_for(&creds);
    let err = h
        .authorizer
        .authenticate(&scope(), &mut data)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
}

#[tokio::test]
async fn rotation_keeps_the_old_token_alive_inside_the_window() {
    let h = harness(AuthConfig::default());
    let old_creds = sign_in(&h).await;

    let (emitted, new_creds) = complete_request(&h, &old_creds).await;
    assert!(!emitted.is_empty());
    assert_ne!(
        new_creds["access-token"], old_creds["access-token"],
        "completed request should have rotated the token"
    );

    // A sibling request fired before the response above landed.
    h.clock.advance(2);
    let mut data = data_for(&old_creds);
    assert!(h.authorizer.authenticate(&scope(), &mut data).await.is_ok());
    assert!(data.matched_previous_token());

    // Outside the window the old token is gone for good.
    h.clock.advance(10);
    let mut data = data_for(&old_creds);
    let err = h
        .authorizer
        .authenticate(&scope(), &mut data)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());

    let mut data = data_for(&new_creds);
    assert!(h.authorizer.authenticate(&scope(), &mut data).await.is_ok());
}

#[tokio::test]
async fn a_batch_of_requests_rotates_exactly_once() {
    let h = harness(AuthConfig::default());
    let old_creds = sign_in(&h).await;

    // First of the burst: rotates.
    let (first, new_creds) = complete_request(&h, &old_creds).await;
    assert!(!first.is_empty());

    // Second of the burst, still carrying the pre-rotation token: extends
    // the batch buffer instead of rotating again.
    h.clock.advance(1);
    let (second, _) = complete_request(&h, &old_creds).await;
    assert!(second.is_empty());

    // Both tokens remain mutually valid at completion.
    let mut data = data_for(&new_creds);
    assert!(h.authorizer.authenticate(&scope(), &mut data).await.is_ok());
    let mut data = data_for(&old_creds);
    assert!(h.authorizer.authenticate(&scope(), &mut data).await.is_ok());
}

#[tokio::test]
async fn batch_extension_refreshes_the_window() {
    let h = harness(AuthConfig::default());
    let old_creds = sign_in(&h).await;
    let (_, _new) = complete_request(&h, &old_creds).await;

    // Each in-window request with the old token pushes the window forward.
    h.clock.advance(4);
    let (emitted, _) = complete_request(&h, &old_creds).await;
    assert!(emitted.is_empty());

    // 8s after rotation, but only 4s after the extension.
    h.clock.advance(4);
    let mut data = data_for(&old_creds);
    assert!(h.authorizer.authenticate(&scope(), &mut data).await.is_ok());
}

/// A classifier under application control, so a test can force the batch
/// path for requests the default rule would rotate.
#[derive(Clone, Debug)]
struct SwitchedBatch(Arc<AtomicBool>);

impl BatchClassifier for SwitchedBatch {
    fn is_batch(&self, _: &AuthorizerData, _: &ClientSession, _: UnixTime) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[tokio::test]
async fn batch_extension_does_not_revive_a_lapsed_token() {
    let switch = Arc::new(AtomicBool::new(false));
    let h = harness_with(AuthConfig::default(), SwitchedBatch(Arc::clone(&switch)));
    let old_creds = sign_in(&h).await;

    // One ordinary rotation, then let the batch window lapse.
    let (_, new_creds) = complete_request(&h, &old_creds).await;
    h.clock.advance(6);

    // A request with the current token that the policy calls a batch. The
    // extension it triggers refreshes the window, but the pre-rotation
    // digest lapsed before it and must stay gone.
    switch.store(true, Ordering::Relaxed);
    let (emitted, _) = complete_request(&h, &new_creds).await;
    assert!(emitted.is_empty());

    let mut data = data_for(&old_creds);
    let err = h
        .authorizer
        .authenticate(&scope(), &mut data)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
}

#[tokio::test]
async fn skip_auth_headers_suppresses_emission() {
    let h = harness(AuthConfig::default());
    let creds = sign_in(&h).await;

    let mut data = data_for(&creds);
    h.authorizer.authenticate(&scope(), &mut data).await.unwrap();
    data.set_skip_auth_headers(true);

    let emitted = h.headers.headers(&data).await.unwrap();
    assert!(emitted.is_empty());
}

#[tokio::test]
async fn missing_client_id_degrades_to_empty_headers() {
    let h = harness(AuthConfig::default());

    // A resource authenticated by some non-token means, with no credential
    // triple on the request.
    let mut data = AuthorizerData::new(None);
    data.store_resource(Arc::new(TestUser(Uid::from_static(UID))), scope());

    let emitted = h.headers.headers(&data).await.unwrap();
    assert!(emitted.is_empty());
}

#[tokio::test]
async fn stable_header_mode_reuses_the_current_token() {
    let h = harness(AuthConfig::default().with_change_headers_on_each_request(false));
    let creds = sign_in(&h).await;

    let (emitted, next) = complete_request(&h, &creds).await;
    assert!(!emitted.is_empty());
    assert_eq!(next["access-token"], creds["access-token"]);

    // No rotation happened, so the same token keeps working indefinitely
    // within its lifespan.
    h.clock.advance(60);
    let mut data = data_for(&creds);
    assert!(h.authorizer.authenticate(&scope(), &mut data).await.is_ok());
}

#[tokio::test]
async fn unknown_scope_is_not_unauthorized() {
    let h = harness(AuthConfig::default());
    let creds = sign_in(&h).await;

    let mut data = data_for(&creds);
    let err = h
        .authorizer
        .authenticate(&ScopeName::from_static("ghost"), &mut data)
        .await
        .unwrap_err();
    assert!(!err.is_unauthorized());
}

#[tokio::test]
async fn revocation_ends_the_session() {
    let h = harness(AuthConfig::default());
    let creds = sign_in(&h).await;

    let key = SessionKey {
        scope: scope(),
        uid: Uid::from_static(UID),
        client_id: ClientId::new(creds["client"].clone()),
    };
    h.headers.revoke_session(&key).await.unwrap();

    let mut data = data_for(&creds);
    let err = h
        .authorizer
        .authenticate(&scope(), &mut data)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
}

/// A store that never answers, for exercising the deadline path.
#[derive(Debug)]
struct StalledStore;

#[async_trait]
impl SessionStore for StalledStore {
    async fn load(&self, _: &SessionKey) -> Result<Option<ClientSession>, StoreError> {
        std::future::pending().await
    }

    async fn save(&self, _: &SessionKey, _: ClientSession) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn remove(&self, _: &SessionKey) -> Result<(), StoreError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn store_timeouts_are_transient_not_unauthorized() {
    let keys = CachingKeyGenerator::new(KeyGenerator::new("s3cr3t").unwrap());
    let digester = Arc::new(TokenDigester::new(&keys).unwrap());
    let registry = Arc::new(ScopeRegistry::new().with_scope(
        ScopeName::from_static("user"),
        SingleUserLoader(Uid::from_static(UID)),
    ));
    let authorizer = TokenAuthorizer::new(
        registry,
        Arc::new(StalledStore),
        digester,
        AuthConfig::default(),
    );

    let mut credentials = HashMap::new();
    credentials.insert("access-token".to_owned(), "tok".to_owned());
    credentials.insert("client".to_owned(), "dev1".to_owned());
    credentials.insert("uid".to_owned(), UID.to_owned());

    let mut data = data_for(&credentials);
    let err = authorizer
        .authenticate(&ScopeName::from_static("user"), &mut data)
        .await
        .unwrap_err();
    assert!(!err.is_unauthorized());
    assert!(matches!(
        err,
        rotoken::error::AuthenticateError::Store(StoreError::Timeout)
    ));
}
