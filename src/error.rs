//! Common errors

#![allow(missing_copy_implementations)]

use std::error::Error as StdError;

use thiserror::Error;

use crate::braids::ScopeName;

/// No matching, unexpired token was found for the presented credentials
///
/// Deliberately carries no detail about which check failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("no valid token for the presented credentials")]
pub struct Unauthorized {
    _p: (),
}

pub(crate) const fn unauthorized() -> Unauthorized {
    Unauthorized { _p: () }
}

/// The requested scope has no registered resource loader
///
/// This indicates a deployment misconfiguration, not a bad credential.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("scope '{scope}' is not registered")]
pub struct UnknownScope {
    scope: ScopeName,
}

impl UnknownScope {
    /// The scope that could not be resolved
    pub fn scope(&self) -> &ScopeName {
        &self.scope
    }
}

pub(crate) fn unknown_scope(scope: ScopeName) -> UnknownScope {
    UnknownScope { scope }
}

/// The key generator was invoked with malformed parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("invalid key parameters: {reason}")]
pub struct InvalidKeyParameters {
    reason: &'static str,
}

pub(crate) const fn empty_secret() -> InvalidKeyParameters {
    InvalidKeyParameters {
        reason: "secret must not be empty",
    }
}

pub(crate) const fn empty_salt() -> InvalidKeyParameters {
    InvalidKeyParameters {
        reason: "salt must not be empty",
    }
}

pub(crate) const fn zero_key_size() -> InvalidKeyParameters {
    InvalidKeyParameters {
        reason: "key size must be positive",
    }
}

/// An unexpected failure in an underlying primitive
#[derive(Clone, Copy, Debug, Error)]
#[error("unexpected error: {message}")]
pub struct Unexpected {
    message: &'static str,
}

pub(crate) const fn unexpected(message: &'static str) -> Unexpected {
    Unexpected { message }
}

/// A session store failure
///
/// Always transient from the caller's perspective: it says nothing about
/// whether the presented credentials were valid, so it must never be
/// collapsed into [`Unauthorized`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store did not respond within the allowed deadline
    #[error("session store operation timed out")]
    Timeout,
    /// The store backend reported a failure
    #[error("session store backend failure")]
    Backend(#[source] Box<dyn StdError + Send + Sync + 'static>),
}

impl StoreError {
    /// Wraps a backend failure
    pub fn backend(err: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        StoreError::Backend(err.into())
    }
}

/// The ways an authentication attempt can fail
#[derive(Debug, Error)]
pub enum AuthenticateError {
    /// The credentials did not match a live token
    #[error(transparent)]
    Unauthorized(#[from] Unauthorized),
    /// The requested scope is not registered
    #[error(transparent)]
    UnknownScope(#[from] UnknownScope),
    /// The session store failed; safe to retry
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthenticateError {
    /// Whether this failure reflects rejected credentials rather than an
    /// operational fault
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AuthenticateError::Unauthorized(_))
    }
}

/// The ways header construction can fail
///
/// Missing or absent request data is not an error; it degrades to an empty
/// header set instead.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// The session store failed; safe to retry
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An underlying primitive failed
    #[error(transparent)]
    Unexpected(#[from] Unexpected),
}
