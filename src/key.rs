//! Derivation of secret-dependent keys with memoization
//!
//! A deployment holds a single application secret. [`KeyGenerator`] stretches
//! that secret into purpose-specific keys, one per salt, so the secret is
//! never reused directly across incompatible contexts. [`CachingKeyGenerator`]
//! memoizes derivations so the deliberately slow stretch is paid once per
//! `(salt, size)` pair for the life of the process.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::{Arc, RwLock};

use ring::pbkdf2;

use crate::error::{self, InvalidKeyParameters};

const DEFAULT_ITERATIONS: NonZeroU32 = match NonZeroU32::new(1 << 16) {
    Some(n) => n,
    None => panic!("iteration count is non-zero"),
};

/// Derives reproducible keys from a single application secret
///
/// Uses PBKDF2-HMAC-SHA256. The default iteration count (65536) is higher
/// than key separation alone requires, on the off chance someone points this
/// at password storage.
pub struct KeyGenerator {
    secret: Vec<u8>,
    iterations: NonZeroU32,
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyGenerator")
            .field("secret", &"***")
            .field("iterations", &self.iterations)
            .finish()
    }
}

impl KeyGenerator {
    /// Constructs a generator over `secret` with the default iteration count
    ///
    /// # Errors
    ///
    /// The secret is empty.
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, InvalidKeyParameters> {
        Self::with_iterations(secret, DEFAULT_ITERATIONS)
    }

    /// Constructs a generator with an explicit iteration count
    ///
    /// # Errors
    ///
    /// The secret is empty.
    pub fn with_iterations(
        secret: impl Into<Vec<u8>>,
        iterations: NonZeroU32,
    ) -> Result<Self, InvalidKeyParameters> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(error::empty_secret());
        }
        Ok(Self { secret, iterations })
    }

    /// Returns a derived key of `key_size` bytes for `salt`
    ///
    /// Deterministic: identical `(secret, salt, key_size, iterations)` always
    /// yields identical bytes.
    ///
    /// # Errors
    ///
    /// The salt is empty or the requested size is zero.
    pub fn generate_key(
        &self,
        salt: &[u8],
        key_size: usize,
    ) -> Result<Arc<[u8]>, InvalidKeyParameters> {
        if salt.is_empty() {
            return Err(error::empty_salt());
        }
        if key_size == 0 {
            return Err(error::zero_key_size());
        }

        let mut out = vec![0u8; key_size];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            salt,
            &self.secret,
            &mut out,
        );
        Ok(out.into())
    }
}

/// Cache key: exact salt bytes, size-separated so distinct `(salt, size)`
/// pairs can never collide.
#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    salt: Box<[u8]>,
    key_size: usize,
}

/// A [`KeyGenerator`] that memoizes derived keys by `(salt, size)`
///
/// The cache never evicts; it is bounded by the finite set of salts a
/// deployment actually uses. Safe for concurrent use from any number of
/// threads. Two racing misses for the same pair may both run the derivation,
/// but both converge on one stored value; the derivation is deterministic, so
/// neither caller can observe a divergent key.
pub struct CachingKeyGenerator {
    inner: KeyGenerator,
    cache: RwLock<HashMap<CacheKey, Arc<[u8]>>>,
}

impl fmt::Debug for CachingKeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let cached = self.cache.read().map(|c| c.len()).unwrap_or(0);
        f.debug_struct("CachingKeyGenerator")
            .field("inner", &self.inner)
            .field("cached_keys", &cached)
            .finish()
    }
}

impl CachingKeyGenerator {
    /// Wraps `inner` with a process-wide memo
    pub fn new(inner: KeyGenerator) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the derived key for `(salt, key_size)`, deriving it at most
    /// when it has not been seen before
    ///
    /// # Errors
    ///
    /// Same conditions as [`KeyGenerator::generate_key`].
    pub fn generate_key(
        &self,
        salt: &[u8],
        key_size: usize,
    ) -> Result<Arc<[u8]>, InvalidKeyParameters> {
        let key = CacheKey {
            salt: salt.into(),
            key_size,
        };

        if let Some(found) = self.lookup(&key) {
            return Ok(found);
        }

        // Derive outside the lock; the write below keeps whichever value
        // landed first, so racing derivations cannot diverge.
        let derived = self.inner.generate_key(salt, key_size)?;
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        let stored = cache.entry(key).or_insert(derived);
        Ok(Arc::clone(stored))
    }

    fn lookup(&self, key: &CacheKey) -> Option<Arc<[u8]>> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache.get(key).map(Arc::clone)
    }
}
