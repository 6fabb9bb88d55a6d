//! Runtime configuration shared by the authorizer and the header builder

use std::time::Duration;

use crate::clock::DurationSecs;

/// Tunable behavior for token rotation and validation
///
/// Key-derivation iteration counts are configured on
/// [`KeyGenerator::with_iterations`][crate::KeyGenerator::with_iterations];
/// everything else the core consumes lives here.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    batch_window: DurationSecs,
    token_lifespan: DurationSecs,
    change_headers_on_each_request: bool,
    store_deadline: Duration,
}

impl Default for AuthConfig {
    /// A 5 second batch window, a two week token lifespan, rotation on every
    /// request, and a 10 second store deadline
    fn default() -> Self {
        Self {
            batch_window: DurationSecs(5),
            token_lifespan: DurationSecs(14 * 24 * 60 * 60),
            change_headers_on_each_request: true,
            store_deadline: Duration::from_secs(10),
        }
    }
}

impl AuthConfig {
    /// How long a rotated-out token is still honored
    pub fn batch_window(&self) -> DurationSecs {
        self.batch_window
    }

    /// How long an issued token lives
    pub fn token_lifespan(&self) -> DurationSecs {
        self.token_lifespan
    }

    /// Whether each completed request rotates the client's token
    ///
    /// When `false`, a still-valid token is re-emitted unchanged so
    /// long-lived clients are not forced to rotate on every call.
    pub fn change_headers_on_each_request(&self) -> bool {
        self.change_headers_on_each_request
    }

    /// How long a session store operation may take before the request fails
    /// with a transient error
    pub fn store_deadline(&self) -> Duration {
        self.store_deadline
    }

    /// Sets the batch window
    pub fn with_batch_window(mut self, window: DurationSecs) -> Self {
        self.batch_window = window;
        self
    }

    /// Sets the token lifespan
    pub fn with_token_lifespan(mut self, lifespan: DurationSecs) -> Self {
        self.token_lifespan = lifespan;
        self
    }

    /// Sets whether each request rotates the token
    pub fn with_change_headers_on_each_request(mut self, change: bool) -> Self {
        self.change_headers_on_each_request = change;
        self
    }

    /// Sets the store deadline
    pub fn with_store_deadline(mut self, deadline: Duration) -> Self {
        self.store_deadline = deadline;
        self
    }
}
