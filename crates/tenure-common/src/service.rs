//! Lock service contract
//!
//! Implemented by the leader's lock service and by client-side routers that
//! forward to one. Transports are synchronous from the caller's point of view:
//! a blocking lock call returns only once the request is granted or refused.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{HeldLocksToken, LockClient, LockRequest, LockResponse};

#[async_trait]
pub trait RemoteLockService: Send + Sync {
    async fn lock_anonymously(&self, request: LockRequest) -> Result<LockResponse>;

    async fn lock_with_client(&self, client_id: &str, request: LockRequest)
    -> Result<LockResponse>;

    /// Returns `false` when the token is unknown, already released or from a
    /// previous leadership term.
    async fn unlock(&self, token: &HeldLocksToken) -> Result<bool>;

    /// Extends the lease of every live token and returns the refreshed subset.
    async fn refresh(&self, tokens: &[HeldLocksToken]) -> Result<Vec<HeldLocksToken>>;
}

/// Issues `request` on `service` under the given identity.
pub async fn dispatch_lock(
    service: &dyn RemoteLockService,
    client: &LockClient,
    request: LockRequest,
) -> Result<LockResponse> {
    match client {
        LockClient::Anonymous => service.lock_anonymously(request).await,
        LockClient::Named(client_id) => service.lock_with_client(client_id, request).await,
    }
}
