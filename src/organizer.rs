//! Header organization.
//!
//! The organizer is the single writer over the pool and the candidate
//! index. One submission runs: context-free check, high-priority write
//! lock, branch construction, contextual accept, work comparison, then
//! either reorganization or pooling. The lock is released on every path
//! before the outcome reaches the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::BlockHash;
use tracing::{debug, error, trace, warn};

use crate::chain::{ChainIndex, ChainStateSnapshot, HeaderMetadata, HeaderPool, PoolStats};
use crate::config::{NetworkParams, OrganizerConfig};
use crate::error::{ChainResult, OrganizeError, OrganizeResult};
use crate::lock::PrioritizedRwLock;
use crate::populate::ChainStatePopulator;
use crate::types::{HashedHeader, OrganizerStats};
use crate::validation::HeaderValidator;

/// Shared mutable state guarded by the prioritized lock: the pool, the
/// write-once header metadata, and the counters.
pub struct OrganizerState {
    pub pool: HeaderPool,
    pub metadata: HashMap<BlockHash, HeaderMetadata>,
    pub stats: OrganizerStats,
}

impl OrganizerState {
    fn new(config: &OrganizerConfig) -> Self {
        Self {
            pool: HeaderPool::new(config.max_pool_size),
            metadata: HashMap::new(),
            stats: OrganizerStats::default(),
        }
    }
}

pub struct HeaderOrganizer<C> {
    chain: Arc<C>,
    state: Arc<PrioritizedRwLock<OrganizerState>>,
    validator: HeaderValidator,
    populator: ChainStatePopulator<C>,
    params: NetworkParams,
    stopped: AtomicBool,
}

impl<C: ChainIndex> HeaderOrganizer<C> {
    pub fn new(chain: Arc<C>, params: NetworkParams, config: OrganizerConfig) -> Self {
        Self {
            validator: HeaderValidator::new(params.clone()),
            populator: ChainStatePopulator::new(chain.clone(), params.clone()),
            state: Arc::new(PrioritizedRwLock::new(OrganizerState::new(&config))),
            chain,
            params,
            stopped: AtomicBool::new(true),
        }
    }

    pub fn start(&self) {
        self.stopped.store(false, Ordering::Release);
    }

    /// In-flight calls observe the stop at their next suspension point and
    /// finish with [`OrganizeError::Stopped`].
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// The lock guarding the organizer state. Bulk background jobs take its
    /// low-priority writer class so they never delay header organization.
    pub fn state_lock(&self) -> Arc<PrioritizedRwLock<OrganizerState>> {
        self.state.clone()
    }

    /// Organize one header into the candidate chain.
    pub async fn organize(&self, header: Arc<HashedHeader>) -> OrganizeResult<()> {
        if self.stopped() {
            return Err(OrganizeError::Stopped);
        }

        // Context-free checks run before the lock is ever taken.
        self.validator.check(&header, unix_now())?;

        trace!(hash = %header.hash(), "organizing header");

        // Critical section. The guard is dropped on every path before the
        // outcome is surfaced.
        let mut state = self.state.write_high().await;
        let result = self.organize_locked(&mut state, header).await;
        drop(state);

        result
    }

    /// Organize with the outcome delivered through a callback, invoked
    /// exactly once from a task that does not hold the write lock.
    pub fn organize_with<F>(self: Arc<Self>, header: Arc<HashedHeader>, handler: F)
    where
        C: 'static,
        F: FnOnce(OrganizeResult<()>) + Send + 'static,
    {
        tokio::spawn(async move {
            handler(self.organize(header).await);
        });
    }

    async fn organize_locked(
        &self,
        state: &mut OrganizerState,
        header: Arc<HashedHeader>,
    ) -> OrganizeResult<()> {
        if self.stopped() {
            return Err(OrganizeError::Stopped);
        }

        // The pool is safe for the branch-building filter only under the
        // write lock.
        let branch = state
            .pool
            .get_branch(header.clone(), self.chain.as_ref())
            .await
            .map_err(OrganizeError::OperationFailed)?;

        if branch.is_empty() {
            state.stats.duplicates += 1;
            trace!(hash = %header.hash(), "duplicate header");
            return Err(OrganizeError::DuplicateHeader);
        }

        if !branch.is_anchored() {
            state.pool.add(header.clone(), None);
            state.stats.orphans += 1;
            debug!(hash = %header.hash(), "pooled orphan header");
            return Err(OrganizeError::OrphanHeader);
        }

        self.validator
            .accept(&branch, &self.populator, &mut state.metadata)
            .await?;

        if self.stopped() {
            return Err(OrganizeError::Stopped);
        }

        let fork = match branch.fork_point() {
            Some(fork) => *fork,
            // Anchored branches always carry a fork point.
            None => unreachable!("anchored branch without fork point"),
        };

        // An accepted top that is meanwhile indexed is a duplicate slipping
        // through; count it so the rate stays visible.
        if self
            .chain
            .get_height(header.hash(), true)
            .await
            .map_err(OrganizeError::OperationFailed)?
            .is_some()
        {
            state.stats.duplicate_accepts += 1;
            debug!(hash = %header.hash(), "duplicate detected at accept stage");
            return Err(OrganizeError::DuplicateHeader);
        }

        let work = branch.work();
        let required = self
            .chain
            .get_work(&work, fork.height, true)
            .await
            .map_err(OrganizeError::OperationFailed)?;

        // Strictly more work is required; equal work never displaces the
        // incumbent chain.
        if work <= required {
            let top = header;
            let top_height = branch.top_height();
            state.pool.add(top.clone(), top_height);
            state.stats.insufficient_work += 1;
            debug!(
                hash = %top.hash(),
                height = ?top_height,
                "branch lacks work, pooled"
            );
            return Err(OrganizeError::InsufficientWork);
        }

        if let Some(snapshot) = state
            .metadata
            .get(header.hash())
            .and_then(|meta| meta.state.as_deref())
        {
            if snapshot.is_stale(unix_now(), self.params.stale_secs) {
                debug!(height = snapshot.height, "extending a stale chain tip");
            }
        }

        let (_, headers) = branch.into_parts();
        let detached = match self.chain.reorganize(&fork, &headers).await {
            Ok(detached) => detached,
            Err(e) => {
                error!(
                    error = %e,
                    fork_height = fork.height,
                    "reorganization failed, candidate index may be corrupted"
                );
                return Err(OrganizeError::StoreCorrupted(e));
            }
        };

        // Branch headers are now indexed; displaced candidate headers go
        // back to the pool at their former heights.
        for absorbed in &headers {
            state.pool.remove(absorbed.hash());
        }
        for (offset, displaced) in detached.iter().enumerate() {
            state
                .pool
                .add(Arc::new(*displaced), Some(fork.height + 1 + offset as u32));
        }

        state.stats.organized += 1;
        if !detached.is_empty() {
            state.stats.reorganizations += 1;
            warn!(
                fork_height = fork.height,
                displaced = detached.len(),
                attached = headers.len(),
                "candidate chain reorganized"
            );
        }

        Ok(())
    }

    /// Snapshot for the top of the candidate or confirmed chain.
    pub async fn populate_chain_state_top(&self, candidate: bool) -> ChainResult<ChainStateSnapshot> {
        let _read = self.state.read().await;
        self.populator.populate_top(candidate).await
    }

    /// Snapshot for the indexed header at `height`.
    pub async fn populate_chain_state_at(
        &self,
        height: u32,
        candidate: bool,
    ) -> ChainResult<ChainStateSnapshot> {
        let _read = self.state.read().await;
        self.populator.populate_height(height, candidate).await
    }

    /// Snapshot for an arbitrary header as if indexed at `height`.
    pub async fn populate_chain_state_for(
        &self,
        header: &HashedHeader,
        height: u32,
        candidate: bool,
    ) -> ChainResult<ChainStateSnapshot> {
        let _read = self.state.read().await;
        self.populator.populate_header(header, height, candidate).await
    }

    /// Record that full-block validation covered a header. Write-once,
    /// published under the write lock.
    pub async fn mark_validated(&self, hash: &BlockHash) {
        let mut state = self.state.write_high().await;
        state.metadata.entry(*hash).or_default().validated = true;
    }

    pub async fn stats(&self) -> OrganizerStats {
        self.state.read().await.stats
    }

    pub async fn pool_stats(&self) -> PoolStats {
        self.state.read().await.pool.stats()
    }
}

/// Seconds since the Unix epoch, saturating at zero on clock failure.
fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "organizer_test.rs"]
mod organizer_test;
