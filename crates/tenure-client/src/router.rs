//! Blocking / non-blocking lock traffic split
//!
//! A slow blocking acquire must never occupy the connection a refresh or
//! unlock needs, so the router holds two downstream handles and decides per
//! call which one serves it.

use std::sync::Arc;

use async_trait::async_trait;
use tenure_common::{
    BlockingMode, HeldLocksToken, LockClient, LockGroupBehavior, LockRequest, LockResponse,
    RemoteLockService, Result, dispatch_lock,
};
use tracing::debug;

/// Where a lock request goes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// `DoNotBlock` requests go straight to the non-blocking handle.
    NonBlocking,
    /// All-or-none blocking requests first try a non-blocking probe and only
    /// fall back to the blocking handle when the probe does not succeed.
    ProbeThenBlocking,
    Blocking,
}

pub fn route(request: &LockRequest) -> Route {
    match (request.blocking_mode(), request.lock_group_behavior()) {
        (BlockingMode::DoNotBlock, _) => Route::NonBlocking,
        (BlockingMode::BlockIndefinitelyThenRelease, _) => Route::Blocking,
        (_, LockGroupBehavior::LockAllOrNone) => Route::ProbeThenBlocking,
        (_, LockGroupBehavior::LockAsManyAsPossible) => Route::Blocking,
    }
}

pub struct LockRequestRouter {
    blocking: Arc<dyn RemoteLockService>,
    non_blocking: Arc<dyn RemoteLockService>,
}

impl LockRequestRouter {
    pub fn new(
        blocking: Arc<dyn RemoteLockService>,
        non_blocking: Arc<dyn RemoteLockService>,
    ) -> Self {
        Self {
            blocking,
            non_blocking,
        }
    }

    async fn lock(&self, client: LockClient, request: LockRequest) -> Result<LockResponse> {
        match route(&request) {
            Route::NonBlocking => dispatch_lock(self.non_blocking.as_ref(), &client, request).await,
            Route::Blocking => dispatch_lock(self.blocking.as_ref(), &client, request).await,
            Route::ProbeThenBlocking => {
                match dispatch_lock(self.non_blocking.as_ref(), &client, request.as_non_blocking())
                    .await
                {
                    Ok(response) if response.success() => return Ok(response),
                    Ok(_) => debug!(client = %client, "Non-blocking probe refused, blocking"),
                    Err(e) => debug!(client = %client, "Non-blocking probe failed: {}", e),
                }
                dispatch_lock(self.blocking.as_ref(), &client, request).await
            }
        }
    }
}

#[async_trait]
impl RemoteLockService for LockRequestRouter {
    async fn lock_anonymously(&self, request: LockRequest) -> Result<LockResponse> {
        self.lock(LockClient::Anonymous, request).await
    }

    async fn lock_with_client(&self, client_id: &str, request: LockRequest) -> Result<LockResponse> {
        self.lock(LockClient::of(client_id), request).await
    }

    async fn unlock(&self, token: &HeldLocksToken) -> Result<bool> {
        self.non_blocking.unlock(token).await
    }

    async fn refresh(&self, tokens: &[HeldLocksToken]) -> Result<Vec<HeldLocksToken>> {
        self.non_blocking.refresh(tokens).await
    }
}
