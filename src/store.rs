//! Persistence seam for session records

use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use crate::braids::{ClientId, ScopeName, Uid};
use crate::error::StoreError;
use crate::token::ClientSession;

/// Storage key for one session record
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// The scope the resource authenticated under
    pub scope: ScopeName,
    /// The resource identifier
    pub uid: Uid,
    /// The device the session belongs to
    pub client_id: ClientId,
}

/// An asynchronous store of per-client session records
///
/// The storage engine is an external collaborator; anything from a local map
/// to a relational table works. Implementations must apply `save` as a single
/// write per key: a concurrent `load` observes the record before or after the
/// write, never a partially rotated one.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads the record for `key`, if one exists
    async fn load(&self, key: &SessionKey) -> Result<Option<ClientSession>, StoreError>;

    /// Persists `session` under `key`, replacing any prior record
    async fn save(&self, key: &SessionKey, session: ClientSession) -> Result<(), StoreError>;

    /// Removes the record for `key`; removing an absent record is not an error
    async fn remove(&self, key: &SessionKey) -> Result<(), StoreError>;
}

/// Runs a store operation under a bounded deadline
///
/// A store that does not answer in time yields [`StoreError::Timeout`], a
/// transient failure the caller may retry. Credentials are never judged on
/// the basis of a store that failed to answer.
pub(crate) async fn with_deadline<T, F>(deadline: Duration, op: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(deadline, op).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(deadline_ms = deadline.as_millis() as u64, "session store deadline lapsed");
            Err(StoreError::Timeout)
        }
    }
}

/// An in-process session store
///
/// Suitable for tests and single-process deployments. Writes swap whole
/// records under one lock acquisition, which satisfies the atomicity the
/// trait asks for.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, ClientSession>>,
}

impl MemorySessionStore {
    /// Constructs an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<ClientSession>, StoreError> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        Ok(sessions.get(key).cloned())
    }

    async fn save(&self, key: &SessionKey, session: ClientSession) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(key.clone(), session);
        Ok(())
    }

    async fn remove(&self, key: &SessionKey) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(key);
        Ok(())
    }
}
