//! Claims and state mirroring for distributed crawls

use crate::config::DistributedConfig;
use crate::distributed::{CoordinationResult, LockStore};
use crate::http::Request;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of claiming a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// This engine owns the request and should dispatch it
    Acquired,
    /// Another engine claimed it within the lease window
    Contended,
}

/// Per-engine view of the shared lock store
///
/// Keys look like `{prefix}:{spider}:{lock|queued|running}:{fingerprint}`.
/// The lock key is never deleted: its lease doubles as the de-duplication
/// window for that fingerprint.
pub struct DistributedCoordinator {
    store: Arc<dyn LockStore>,
    base: String,
    lease: Duration,
    mirror_state: bool,
    owner: String,
}

impl DistributedCoordinator {
    pub fn new(store: Arc<dyn LockStore>, config: &DistributedConfig, spider_name: &str) -> Self {
        let owner = format!(
            "{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );

        Self {
            store,
            base: format!("{}:{}", config.key_prefix, spider_name),
            lease: Duration::from_secs(config.lock_lease_secs),
            mirror_state: config.mirror_state,
            owner,
        }
    }

    /// Identifier written as the lock value
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn lock_key(&self, request: &Request) -> String {
        format!("{}:lock:{}", self.base, request.content_hash())
    }

    pub fn queued_key(&self, request: &Request) -> String {
        format!("{}:queued:{}", self.base, request.content_hash())
    }

    pub fn running_key(&self, request: &Request) -> String {
        format!("{}:running:{}", self.base, request.content_hash())
    }

    /// Claims a request before dispatch
    ///
    /// Only the lock itself can fail the call; mirroring is best-effort. The
    /// queued marker is cleared either way, since a contended request is
    /// dropped by this engine.
    pub async fn claim(&self, request: &Request) -> CoordinationResult<Claim> {
        let acquired = self
            .store
            .try_acquire(&self.lock_key(request), &self.owner, self.lease)
            .await?;

        if self.mirror_state {
            if acquired {
                if let Err(e) = self
                    .store
                    .put(&self.running_key(request), &request.to_json())
                    .await
                {
                    tracing::warn!("Failed to mirror running request {}: {}", request, e);
                }
            }
            if let Err(e) = self.store.remove(&self.queued_key(request)).await {
                tracing::warn!("Failed to clear queued request {}: {}", request, e);
            }
        }

        if !acquired {
            tracing::debug!("Lock held elsewhere, skipping {}", request);
            return Ok(Claim::Contended);
        }

        Ok(Claim::Acquired)
    }

    /// Records a request as queued (best-effort)
    pub async fn mirror_queued(&self, request: &Request) {
        if !self.mirror_state {
            return;
        }
        if let Err(e) = self
            .store
            .put(&self.queued_key(request), &request.to_json())
            .await
        {
            tracing::warn!("Failed to mirror queued request {}: {}", request, e);
        }
    }

    /// Clears the running marker once a request has been handled (best-effort)
    pub async fn release(&self, request: &Request) {
        if !self.mirror_state {
            return;
        }
        tracing::trace!("Releasing {}", request);
        if let Err(e) = self.store.remove(&self.running_key(request)).await {
            tracing::warn!("Failed to clear running request {}: {}", request, e);
        }
    }
}
