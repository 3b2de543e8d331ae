//! Token issuance seam for the `auth.user` handler.
//!
//! Token *generation* is outside the core — real deployments inject a
//! JWT signer here. The core only defines the seam and threads the
//! resulting token into the login reply.

use meshpoint_types::Result;

/// Provides a fresh authentication token for a user id.
pub trait TokenIssuer: Send + Sync {
    /// Issues a new token for the given user node id.
    fn new_token(&self, user_id: &str) -> Result<String>;
}

/// Opaque random tokens; the default when no signer is injected.
pub struct UuidTokener;

impl TokenIssuer for UuidTokener {
    fn new_token(&self, _user_id: &str) -> Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }
}
