//! Per-device token issuance, rotation, and validation
//!
//! A resource (a user, or any authenticatable principal) is reached
//! concurrently from several independent clients: devices, browser tabs,
//! background jobs. Each client holds its own short-lived token, and every
//! successful request may rotate that token. The hard part is doing this
//! without punishing clients that race themselves: a burst of requests fired
//! against one token must all succeed even though the first of them to
//! complete rotates the token out from under the rest.
//!
//! The crate is built around three pieces:
//!
//! * a key-derivation layer ([`KeyGenerator`], [`CachingKeyGenerator`]) that
//!   stretches one application secret into purpose-specific keys, memoized
//!   per salt;
//! * a token lifecycle engine ([`ClientSession`], [`TokenAuthorizer`]) whose
//!   session records keep both the current token digest and, for a short
//!   batch window, the digest it replaced, so requests racing a rotation are
//!   still honored;
//! * a header policy ([`AuthenticationHeader`]) that decides after each
//!   request whether to emit nothing, re-emit the credentials the client
//!   already holds, or rotate and emit a fresh set.
//!
//! Persistence is behind the [`SessionStore`][store::SessionStore] trait, and
//! applications map scope names to their own resource types through
//! [`ScopeRegistry`][registry::ScopeRegistry]. Raw tokens are never stored
//! and never appear in logs; only keyed digests are held at rest.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use rotoken::store::MemorySessionStore;
//! use rotoken::{AuthConfig, CachingKeyGenerator, KeyGenerator, TokenDigester};
//!
//! # fn main() -> Result<(), rotoken::error::InvalidKeyParameters> {
//! let keys = CachingKeyGenerator::new(KeyGenerator::new("app secret")?);
//! let digester = Arc::new(TokenDigester::new(&keys)?);
//! let store = Arc::new(MemorySessionStore::new());
//! let config = AuthConfig::default();
//!
//! let headers = rotoken::AuthenticationHeader::new(store, digester, config);
//! # let _ = headers;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod authorizer;
mod braids;
pub mod clock;
mod config;
mod data;
pub mod error;
mod headers;
mod key;
pub mod registry;
pub mod store;
mod token;

pub use authorizer::TokenAuthorizer;
pub use braids::*;
pub use config::AuthConfig;
pub use data::{AuthorizerData, RequestCredentials};
pub use headers::{
    AuthHeaders, AuthenticationHeader, BatchClassifier, NeverBatch, PreviousTokenBatch,
    ACCESS_TOKEN_HEADER, CLIENT_HEADER, EXPIRY_HEADER, TOKEN_TYPE, TOKEN_TYPE_HEADER, UID_HEADER,
};
pub use key::{CachingKeyGenerator, KeyGenerator};
pub use token::{ClientSession, Token, TokenDigester, TokenMatch};
