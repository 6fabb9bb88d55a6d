use aliri_braid::braid;
use std::fmt;

/// A named category of authenticatable principal (e.g. `user`, `admin`)
#[braid(serde)]
pub struct ScopeName;

/// An opaque per-device client identifier
#[braid(serde)]
pub struct ClientId;

/// The resource identifier a client presents in the `uid` header
#[braid(serde)]
pub struct Uid;

/// A raw access token as exchanged with clients
///
/// Token material never appears in `Debug` or `Display` output.
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

impl fmt::Debug for AccessTokenRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("***ACCESS TOKEN***")
    }
}

impl fmt::Display for AccessTokenRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("***ACCESS TOKEN***")
    }
}

/// The keyed digest of an access token, as held at rest
///
/// Only digests are ever persisted; the raw token exists solely in transit.
#[braid(serde)]
pub struct TokenHash;
