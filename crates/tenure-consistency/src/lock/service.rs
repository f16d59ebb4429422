//! Leader-side lock service
//!
//! Serves `RemoteLockService` while this node leads. Lock state belongs to a
//! single leadership term: when the term changes the table is discarded and
//! everything waiting on it fails with `LeadershipLost`, so a deposed leader
//! can never hand out a lock the new leader does not know about.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::gauge;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tenure_common::{
    BlockingMode, HeldLocksToken, LeadershipToken, LockClient, LockRequest, LockResponse,
    RemoteLockService, RequestId, Result, TenureError,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::acquirer::LockAcquirer;
use super::async_lock::AsyncLock;
use super::table::LockTable;

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_MAINTENANCE_INTERVAL_MS: u64 = 1000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockServiceConfig {
    /// Lease granted to a token and restored by every refresh
    pub default_lock_timeout_ms: u64,
    pub maintenance_interval_ms: u64,
}

impl Default for LockServiceConfig {
    fn default() -> Self {
        Self {
            default_lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            maintenance_interval_ms: DEFAULT_MAINTENANCE_INTERVAL_MS,
        }
    }
}

/// What the lock service needs to know about leadership.
pub trait LeadershipView: Send + Sync {
    /// Token of the current term, `None` unless this node leads.
    fn current_token(&self) -> Option<LeadershipToken>;

    fn suspected_leader(&self) -> Option<String>;
}

struct HeldLocks {
    token: HeldLocksToken,
    request_id: RequestId,
    locks: Vec<Arc<AsyncLock>>,
}

impl HeldLocks {
    fn release(&self) {
        for lock in &self.locks {
            lock.unlock(self.request_id);
        }
    }
}

struct LockTerm {
    table: LockTable,
    held: DashMap<Uuid, HeldLocks>,
}

impl LockTerm {
    fn new(epoch: LeadershipToken) -> Self {
        Self {
            table: LockTable::new(epoch),
            held: DashMap::new(),
        }
    }

    fn epoch(&self) -> &LeadershipToken {
        self.table.epoch()
    }

    fn invalidate(&self) {
        self.held.clear();
        self.table.invalidate();
    }
}

pub struct LeaderLockService {
    leadership: Arc<dyn LeadershipView>,
    config: LockServiceConfig,
    term: RwLock<Option<Arc<LockTerm>>>,
}

impl LeaderLockService {
    pub fn new(leadership: Arc<dyn LeadershipView>, config: LockServiceConfig) -> Self {
        Self {
            leadership,
            config,
            term: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &LockServiceConfig {
        &self.config
    }

    /// Number of live tokens in the current term
    pub fn held_token_count(&self) -> usize {
        self.term.read().as_ref().map_or(0, |term| term.held.len())
    }

    /// Term of the current leadership, started fresh when the token changed.
    fn current_term(&self) -> Result<Arc<LockTerm>> {
        let Some(epoch) = self.leadership.current_token() else {
            return Err(TenureError::NotCurrentLeader {
                suspected_leader: self.leadership.suspected_leader(),
            });
        };

        if let Some(term) = self.term.read().as_ref()
            && term.epoch() == &epoch
        {
            return Ok(term.clone());
        }

        let mut slot = self.term.write();
        if let Some(term) = slot.as_ref()
            && term.epoch() == &epoch
        {
            return Ok(term.clone());
        }
        let fresh = Arc::new(LockTerm::new(epoch));
        if let Some(previous) = slot.replace(fresh.clone()) {
            info!(from = %previous.epoch(), to = %fresh.epoch(), "Leadership term changed");
            previous.invalidate();
        }
        Ok(fresh)
    }

    fn still_current(&self, term: &LockTerm) -> bool {
        self.leadership.current_token().as_ref() == Some(term.epoch())
    }

    fn lease_expiry(&self, now_ms: i64) -> i64 {
        let lease_ms = i64::try_from(self.config.default_lock_timeout_ms).unwrap_or(i64::MAX);
        now_ms.saturating_add(lease_ms)
    }

    async fn lock(&self, client: LockClient, request: LockRequest) -> Result<LockResponse> {
        let term = self.current_term()?;
        let request_id = RequestId::new();
        let blocking_mode = request.blocking_mode();
        let locks = term.table.get_all(request.descriptors());

        debug!(
            %request_id,
            client = %client,
            descriptors = request.descriptors().len(),
            ?blocking_mode,
            "Lock requested"
        );

        let attempt = LockAcquirer::acquire(
            request_id,
            locks,
            blocking_mode,
            request.lock_group_behavior(),
        );
        let acquisition = match request.lock_timeout() {
            Some(limit) if blocking_mode != BlockingMode::DoNotBlock => {
                match tokio::time::timeout(limit, attempt).await {
                    Ok(result) => result?,
                    Err(_) => {
                        debug!(
                            %request_id,
                            timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                            "Lock request timed out"
                        );
                        return Ok(LockResponse::refused(request.descriptors().clone()));
                    }
                }
            }
            _ => attempt.await?,
        };

        // Leadership may have moved while we were blocked.
        if !self.still_current(&term) {
            acquisition.release(request_id);
            return Err(TenureError::LeadershipLost);
        }

        if blocking_mode == BlockingMode::BlockIndefinitelyThenRelease {
            acquisition.release(request_id);
            let mut response = LockResponse::released_after_block();
            response.failed = acquisition.failed;
            return Ok(response);
        }

        if acquisition.acquired.is_empty() {
            return Ok(LockResponse::refused(acquisition.failed));
        }

        let token = HeldLocksToken {
            token_id: Uuid::new_v4(),
            client,
            descriptors: acquisition
                .acquired
                .iter()
                .map(|lock| lock.descriptor().clone())
                .collect(),
            version_id: request.version_id(),
            epoch: term.epoch().clone(),
            lease_ms: self.config.default_lock_timeout_ms,
            expires_at_ms: self.lease_expiry(chrono::Utc::now().timestamp_millis()),
        };
        term.held.insert(
            token.token_id,
            HeldLocks {
                token: token.clone(),
                request_id,
                locks: acquisition.acquired,
            },
        );
        debug!(%request_id, token_id = %token.token_id, "Locks granted");
        Ok(LockResponse::granted(token, acquisition.failed))
    }

    fn release_token(&self, token: &HeldLocksToken) -> Result<bool> {
        let term = self.current_term()?;
        if &token.epoch != term.epoch() {
            debug!(token_id = %token.token_id, epoch = %token.epoch, "Unlock with stale token");
            return Ok(false);
        }
        match term.held.remove(&token.token_id) {
            Some((_, held)) => {
                held.release();
                debug!(token_id = %token.token_id, "Locks released");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn refresh_tokens(&self, tokens: &[HeldLocksToken]) -> Result<Vec<HeldLocksToken>> {
        let term = self.current_term()?;
        let expires_at_ms = self.lease_expiry(chrono::Utc::now().timestamp_millis());

        let refreshed = tokens
            .iter()
            .filter(|token| &token.epoch == term.epoch())
            .filter_map(|token| {
                let mut held = term.held.get_mut(&token.token_id)?;
                held.token.expires_at_ms = expires_at_ms;
                Some(held.token.clone())
            })
            .collect::<Vec<_>>();
        debug!(requested = tokens.len(), refreshed = refreshed.len(), "Tokens refreshed");
        Ok(refreshed)
    }

    /// One maintenance sweep: drops the term once leadership moved on,
    /// releases tokens whose lease expired and prunes idle locks. Returns the
    /// number of tokens reaped.
    pub fn run_maintenance(&self) -> usize {
        self.run_maintenance_at(chrono::Utc::now().timestamp_millis())
    }

    fn run_maintenance_at(&self, now_ms: i64) -> usize {
        let term = self.term.read().clone();
        let Some(term) = term else {
            gauge!("tenure_held_lock_tokens").set(0.0);
            return 0;
        };

        if !self.still_current(&term) {
            let mut slot = self.term.write();
            if slot.as_ref().is_some_and(|t| Arc::ptr_eq(t, &term)) {
                *slot = None;
                drop(slot);
                info!(epoch = %term.epoch(), "Leadership lost, discarding lock term");
                term.invalidate();
            }
            gauge!("tenure_held_lock_tokens").set(0.0);
            return 0;
        }

        let expired: Vec<Uuid> = term
            .held
            .iter()
            .filter(|entry| entry.token.expires_at_ms <= now_ms)
            .map(|entry| *entry.key())
            .collect();
        let mut reaped = 0;
        for token_id in expired {
            if let Some((_, held)) = term
                .held
                .remove_if(&token_id, |_, held| held.token.expires_at_ms <= now_ms)
            {
                warn!(%token_id, client = %held.token.client, "Lock lease expired");
                held.release();
                reaped += 1;
            }
        }

        let pruned = term.table.prune_idle();
        if reaped > 0 || pruned > 0 {
            debug!(reaped, pruned, "Lock maintenance finished");
        }
        gauge!("tenure_held_lock_tokens").set(term.held.len() as f64);
        reaped
    }

    /// Runs `run_maintenance` every `maintenance_interval_ms` until `shutdown`
    /// fires.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let service = self.clone();
        let period = Duration::from_millis(self.config.maintenance_interval_ms.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        service.run_maintenance();
                    }
                    _ = shutdown.recv() => {
                        info!("Lock maintenance stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl RemoteLockService for LeaderLockService {
    async fn lock_anonymously(&self, request: LockRequest) -> Result<LockResponse> {
        self.lock(LockClient::Anonymous, request).await
    }

    async fn lock_with_client(&self, client_id: &str, request: LockRequest) -> Result<LockResponse> {
        self.lock(LockClient::of(client_id), request).await
    }

    async fn unlock(&self, token: &HeldLocksToken) -> Result<bool> {
        self.release_token(token)
    }

    async fn refresh(&self, tokens: &[HeldLocksToken]) -> Result<Vec<HeldLocksToken>> {
        self.refresh_tokens(tokens)
    }
}
