//! Token material, digests, and the per-client session record

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ring::rand::SecureRandom;
use serde::{Deserialize, Serialize};

use crate::braids::{AccessToken, AccessTokenRef, ClientId, TokenHash, TokenHashRef};
use crate::clock::{DurationSecs, UnixTime};
use crate::error::{self, InvalidKeyParameters, Unexpected};
use crate::key::CachingKeyGenerator;

/// Salt under which the token digest key is derived from the application
/// secret. Changing it invalidates every outstanding session.
const DIGEST_KEY_SALT: &[u8] = b"token digest";

const DIGEST_KEY_SIZE: usize = 32;

const TOKEN_BYTES: usize = 32;
const CLIENT_ID_BYTES: usize = 16;

/// Computes and verifies keyed token digests
///
/// The HMAC key comes from the derived-key layer rather than the raw
/// application secret, so token digests are separated from any other use of
/// the secret.
pub struct TokenDigester {
    key: ring::hmac::Key,
}

impl fmt::Debug for TokenDigester {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("TokenDigester { key }")
    }
}

impl TokenDigester {
    /// Builds a digester whose key is derived via `keys`
    ///
    /// # Errors
    ///
    /// The underlying generator rejected its parameters.
    pub fn new(keys: &CachingKeyGenerator) -> Result<Self, InvalidKeyParameters> {
        let key = keys.generate_key(DIGEST_KEY_SALT, DIGEST_KEY_SIZE)?;
        Ok(Self {
            key: ring::hmac::Key::new(ring::hmac::HMAC_SHA256, &key),
        })
    }

    /// The digest of `token`, as stored at rest
    pub fn digest(&self, token: &AccessTokenRef) -> TokenHash {
        let tag = ring::hmac::sign(&self.key, token.as_str().as_bytes());
        TokenHash::new(URL_SAFE_NO_PAD.encode(tag.as_ref()))
    }

    /// Whether `token` digests to `hash`, in constant time
    pub fn verify(&self, token: &AccessTokenRef, hash: &TokenHashRef) -> bool {
        let expected = match URL_SAFE_NO_PAD.decode(hash.as_str()) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        ring::hmac::verify(&self.key, token.as_str().as_bytes(), &expected).is_ok()
    }
}

fn random_urlsafe(rng: &dyn SecureRandom, len: usize) -> Result<String, Unexpected> {
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes)
        .map_err(|_| error::unexpected("random number generator failure"))?;
    Ok(URL_SAFE_NO_PAD.encode(&bytes))
}

/// A freshly issued token, bound to the client it was issued for
#[derive(Debug)]
pub struct Token {
    access_token: AccessToken,
    client_id: ClientId,
    expiry: UnixTime,
}

impl Token {
    /// Issues a new token for `client_id`, generating a client identifier
    /// when the request did not carry one
    ///
    /// # Errors
    ///
    /// The random number generator failed.
    pub fn issue(
        rng: &dyn SecureRandom,
        client_id: Option<ClientId>,
        now: UnixTime,
        lifespan: DurationSecs,
    ) -> Result<Self, Unexpected> {
        let client_id = match client_id {
            Some(id) => id,
            None => ClientId::new(random_urlsafe(rng, CLIENT_ID_BYTES)?),
        };
        Ok(Self {
            access_token: AccessToken::new(random_urlsafe(rng, TOKEN_BYTES)?),
            client_id,
            expiry: now + lifespan,
        })
    }

    /// The raw token to hand back to the client
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// The client this token was issued for
    #[inline]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// When this token stops being accepted
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }
}

/// How a presented token relates to a session record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenMatch {
    /// Matched the current token
    Current,
    /// Matched the token rotated out within the batch window
    Previous,
    /// Matched nothing still honored
    Rejected,
}

/// The persistent record for one `(resource, client)` pair
///
/// Holds the current token's digest and, for the duration of the batch
/// window, the digest it replaced. The two-digest shape is what lets
/// concurrent requests race a rotation without being rejected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientSession {
    token_hash: TokenHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous_token_hash: Option<TokenHash>,
    rotated_at: UnixTime,
    expires_at: UnixTime,
}

impl ClientSession {
    /// A fresh session for a newly issued token
    pub fn new(token_hash: TokenHash, now: UnixTime, lifespan: DurationSecs) -> Self {
        Self {
            token_hash,
            previous_token_hash: None,
            rotated_at: now,
            expires_at: now + lifespan,
        }
    }

    /// The digest of the current token
    pub fn token_hash(&self) -> &TokenHashRef {
        &self.token_hash
    }

    /// When the current token was installed or the batch buffer last extended
    pub fn rotated_at(&self) -> UnixTime {
        self.rotated_at
    }

    /// When this session stops being honored
    pub fn expires_at(&self) -> UnixTime {
        self.expires_at
    }

    /// Whether the session has passed its expiry
    #[inline]
    pub fn expired(&self, now: UnixTime) -> bool {
        now >= self.expires_at
    }

    /// Classifies `presented` against this record
    ///
    /// The previous token is honored only inside the batch window; an expired
    /// session rejects everything. Digest comparisons are constant-time.
    pub fn match_token(
        &self,
        digester: &TokenDigester,
        presented: &AccessTokenRef,
        now: UnixTime,
        batch_window: DurationSecs,
    ) -> TokenMatch {
        if self.expired(now) {
            return TokenMatch::Rejected;
        }
        if digester.verify(presented, &self.token_hash) {
            return TokenMatch::Current;
        }
        if let Some(previous) = &self.previous_token_hash {
            if now.since(self.rotated_at) < batch_window && digester.verify(presented, previous) {
                return TokenMatch::Previous;
            }
        }
        TokenMatch::Rejected
    }

    /// Installs a new token digest, retaining the old one for the batch window
    pub fn rotate(&mut self, new_hash: TokenHash, now: UnixTime, lifespan: DurationSecs) {
        self.previous_token_hash = Some(std::mem::replace(&mut self.token_hash, new_hash));
        self.rotated_at = now;
        self.expires_at = now + lifespan;
    }

    /// Refreshes the batch window without issuing a new token
    ///
    /// Used when a request is classified as part of an in-flight batch: the
    /// client's outstanding requests keep their tolerance, but no rotation
    /// happens.
    pub fn extend_batch(&mut self, now: UnixTime) {
        self.rotated_at = now;
    }

    /// Drops the previous digest once the batch window has lapsed
    pub fn prune_previous(&mut self, now: UnixTime, batch_window: DurationSecs) {
        if now.since(self.rotated_at) >= batch_window {
            self.previous_token_hash = None;
        }
    }
}
