//! Lock data model
//!
//! Descriptors, request ids and the immutable lock request/response records
//! exchanged between clients, routers and the leader's lock service.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TenureError};

/// Opaque, byte-comparable name of a lockable resource.
///
/// Ordering is byte-wise; multi-descriptor requests are acquired in this order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LockDescriptor(Vec<u8>);

impl LockDescriptor {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for LockDescriptor {
    fn from(name: &str) -> Self {
        Self(name.as_bytes().to_vec())
    }
}

impl From<String> for LockDescriptor {
    fn from(name: String) -> Self {
        Self(name.into_bytes())
    }
}

impl fmt::Display for LockDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for LockDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockDescriptor({})", self)
    }
}

/// Correlates the lock/wait/unlock/timeout calls of one lock attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity a lock is taken under
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockClient {
    Anonymous,
    Named(String),
}

impl LockClient {
    /// An empty id maps to the anonymous client.
    pub fn of(client_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        if client_id.is_empty() {
            Self::Anonymous
        } else {
            Self::Named(client_id)
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    pub fn client_id(&self) -> &str {
        match self {
            Self::Anonymous => "",
            Self::Named(id) => id,
        }
    }
}

impl fmt::Display for LockClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "<anonymous>"),
            Self::Named(id) => write!(f, "{}", id),
        }
    }
}

/// Whether a lock call waits for contention to clear
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockingMode {
    DoNotBlock,
    BlockIndefinitely,
    /// Wait until every descriptor could be acquired, then release them at once.
    BlockIndefinitelyThenRelease,
}

/// Whether a multi-descriptor request needs every descriptor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockGroupBehavior {
    LockAllOrNone,
    LockAsManyAsPossible,
}

/// Immutable lock request. Build with [`LockRequest::builder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRequest {
    descriptors: BTreeSet<LockDescriptor>,
    blocking_mode: BlockingMode,
    lock_group_behavior: LockGroupBehavior,
    lock_timeout: Option<Duration>,
    version_id: Option<u64>,
}

impl LockRequest {
    pub fn builder(descriptors: impl IntoIterator<Item = LockDescriptor>) -> LockRequestBuilder {
        LockRequestBuilder {
            descriptors: descriptors.into_iter().collect(),
            blocking_mode: BlockingMode::BlockIndefinitely,
            lock_group_behavior: LockGroupBehavior::LockAllOrNone,
            lock_timeout: None,
            version_id: None,
        }
    }

    /// Descriptors in canonical (ascending) order.
    pub fn descriptors(&self) -> &BTreeSet<LockDescriptor> {
        &self.descriptors
    }

    pub fn blocking_mode(&self) -> BlockingMode {
        self.blocking_mode
    }

    pub fn lock_group_behavior(&self) -> LockGroupBehavior {
        self.lock_group_behavior
    }

    /// Upper bound on how long a blocking acquisition may wait before the
    /// request is refused. Does not affect the lease of granted locks, which
    /// the lock service sets.
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }

    pub fn version_id(&self) -> Option<u64> {
        self.version_id
    }

    /// The same request with its blocking mode forced to `DoNotBlock`.
    pub fn as_non_blocking(&self) -> LockRequest {
        LockRequest {
            blocking_mode: BlockingMode::DoNotBlock,
            ..self.clone()
        }
    }
}

pub struct LockRequestBuilder {
    descriptors: BTreeSet<LockDescriptor>,
    blocking_mode: BlockingMode,
    lock_group_behavior: LockGroupBehavior,
    lock_timeout: Option<Duration>,
    version_id: Option<u64>,
}

impl LockRequestBuilder {
    pub fn do_not_block(mut self) -> Self {
        self.blocking_mode = BlockingMode::DoNotBlock;
        self
    }

    pub fn block_indefinitely_then_release(mut self) -> Self {
        self.blocking_mode = BlockingMode::BlockIndefinitelyThenRelease;
        self
    }

    pub fn blocking_mode(mut self, blocking_mode: BlockingMode) -> Self {
        self.blocking_mode = blocking_mode;
        self
    }

    pub fn lock_as_many_as_possible(mut self) -> Self {
        self.lock_group_behavior = LockGroupBehavior::LockAsManyAsPossible;
        self
    }

    pub fn timeout_after(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = Some(lock_timeout);
        self
    }

    pub fn with_locked_in_version_id(mut self, version_id: u64) -> Self {
        self.version_id = Some(version_id);
        self
    }

    pub fn build(self) -> Result<LockRequest> {
        if self.descriptors.is_empty() {
            return Err(TenureError::illegal_argument(
                "a lock request needs at least one descriptor",
            ));
        }
        Ok(LockRequest {
            descriptors: self.descriptors,
            blocking_mode: self.blocking_mode,
            lock_group_behavior: self.lock_group_behavior,
            lock_timeout: self.lock_timeout,
            version_id: self.version_id,
        })
    }
}

/// Opaque identity of a leadership term.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadershipToken {
    pub leader_id: String,
    pub round: u64,
}

impl fmt::Display for LeadershipToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.leader_id, self.round)
    }
}

/// Proof of a granted lock set. Identity is the token id alone; the lease
/// fields change on every refresh.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeldLocksToken {
    pub token_id: Uuid,
    pub client: LockClient,
    pub descriptors: Vec<LockDescriptor>,
    pub version_id: Option<u64>,
    /// Term the locks were granted in
    pub epoch: LeadershipToken,
    pub lease_ms: u64,
    /// Unix millis
    pub expires_at_ms: i64,
}

impl PartialEq for HeldLocksToken {
    fn eq(&self, other: &Self) -> bool {
        self.token_id == other.token_id
    }
}

impl Eq for HeldLocksToken {}

impl Hash for HeldLocksToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token_id.hash(state);
    }
}

/// Outcome of a lock call
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockResponse {
    pub token: Option<HeldLocksToken>,
    /// Descriptors that could not be granted
    #[serde(default)]
    pub failed: BTreeSet<LockDescriptor>,
    /// Set for `BlockIndefinitelyThenRelease` requests, which hold nothing afterwards.
    #[serde(default)]
    pub block_and_release: bool,
}

impl LockResponse {
    pub fn granted(token: HeldLocksToken, failed: BTreeSet<LockDescriptor>) -> Self {
        Self {
            token: Some(token),
            failed,
            block_and_release: false,
        }
    }

    pub fn refused(failed: BTreeSet<LockDescriptor>) -> Self {
        Self {
            token: None,
            failed,
            block_and_release: false,
        }
    }

    pub fn released_after_block() -> Self {
        Self {
            token: None,
            failed: BTreeSet::new(),
            block_and_release: true,
        }
    }

    pub fn success(&self) -> bool {
        if self.block_and_release {
            self.failed.is_empty()
        } else {
            self.token.is_some()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptors(names: &[&str]) -> Vec<LockDescriptor> {
        names.iter().map(|n| LockDescriptor::from(*n)).collect()
    }

    #[test]
    fn test_builder_defaults() {
        let request = LockRequest::builder(descriptors(&["a"])).build().unwrap();
        assert_eq!(request.blocking_mode(), BlockingMode::BlockIndefinitely);
        assert_eq!(
            request.lock_group_behavior(),
            LockGroupBehavior::LockAllOrNone
        );
        assert_eq!(request.lock_timeout(), None);
        assert_eq!(request.version_id(), None);
    }

    #[test]
    fn test_builder_rejects_empty_descriptor_set() {
        let err = LockRequest::builder(Vec::new()).build().unwrap_err();
        assert!(matches!(err, TenureError::IllegalArgument(_)));
    }

    #[test]
    fn test_descriptors_are_canonically_ordered() {
        let request = LockRequest::builder(descriptors(&["c", "a", "b", "a"]))
            .build()
            .unwrap();
        let ordered: Vec<String> = request.descriptors().iter().map(|d| d.to_string()).collect();
        assert_eq!(ordered, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_as_non_blocking_keeps_everything_else() {
        let request = LockRequest::builder(descriptors(&["a", "b"]))
            .timeout_after(Duration::from_secs(5))
            .with_locked_in_version_id(42)
            .build()
            .unwrap();
        let probe = request.as_non_blocking();
        assert_eq!(probe.blocking_mode(), BlockingMode::DoNotBlock);
        assert_eq!(probe.descriptors(), request.descriptors());
        assert_eq!(probe.lock_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(probe.version_id(), Some(42));
        assert_eq!(probe.lock_group_behavior(), request.lock_group_behavior());
    }

    #[test]
    fn test_lock_client_of() {
        assert_eq!(LockClient::of(""), LockClient::Anonymous);
        assert_eq!(LockClient::of("svc"), LockClient::Named("svc".to_string()));
        assert_eq!(LockClient::of("svc").client_id(), "svc");
        assert!(LockClient::Anonymous.is_anonymous());
    }

    #[test]
    fn test_response_success() {
        let token = HeldLocksToken {
            token_id: Uuid::new_v4(),
            client: LockClient::Anonymous,
            descriptors: descriptors(&["a"]),
            version_id: None,
            epoch: LeadershipToken {
                leader_id: "node-1".to_string(),
                round: 1,
            },
            lease_ms: 1000,
            expires_at_ms: 0,
        };
        assert!(LockResponse::granted(token, BTreeSet::new()).success());
        assert!(!LockResponse::refused(descriptors(&["a"]).into_iter().collect()).success());
        assert!(LockResponse::released_after_block().success());
    }

    #[test]
    fn test_token_identity_ignores_lease() {
        let token = HeldLocksToken {
            token_id: Uuid::new_v4(),
            client: LockClient::of("svc"),
            descriptors: descriptors(&["a"]),
            version_id: None,
            epoch: LeadershipToken {
                leader_id: "node-1".to_string(),
                round: 3,
            },
            lease_ms: 1000,
            expires_at_ms: 10,
        };
        let mut refreshed = token.clone();
        refreshed.expires_at_ms = 20;
        assert_eq!(token, refreshed);
    }

    #[test]
    fn test_request_serde() {
        let request = LockRequest::builder(descriptors(&["a"]))
            .do_not_block()
            .build()
            .unwrap();
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("DO_NOT_BLOCK"));
        let parsed: LockRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }
}
