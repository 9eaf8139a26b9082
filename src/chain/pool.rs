//! Pool of pending headers awaiting organization.
//!
//! Headers land here when they arrive before their parents or when their
//! branch does not yet carry enough work. The pool reconstructs branches by
//! walking parent links back to the candidate index. Mutation and the
//! branch-building filter both require the organizer's write lock; the
//! filter is not safe against concurrent mutation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bitcoin::BlockHash;
use tracing::{debug, trace};

use crate::chain::{ChainIndex, HeaderBranch};
use crate::error::ChainResult;
use crate::types::{ForkPoint, HashedHeader};

/// A pooled header with its candidate height, when known.
#[derive(Debug, Clone)]
struct PooledHeader {
    header: Arc<HashedHeader>,
    /// Height the header would occupy; unset for unanchored orphans.
    height: Option<u32>,
}

/// Pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub unique_parents: usize,
}

/// Bounded header pool keyed by hash with a parent-hash child index.
pub struct HeaderPool {
    by_hash: HashMap<BlockHash, PooledHeader>,
    /// Children of each referenced parent hash.
    by_prev: HashMap<BlockHash, Vec<BlockHash>>,
    /// Insertion order, oldest first.
    eviction_queue: VecDeque<BlockHash>,
    max_size: usize,
}

impl HeaderPool {
    pub fn new(max_size: usize) -> Self {
        Self {
            by_hash: HashMap::new(),
            by_prev: HashMap::new(),
            eviction_queue: VecDeque::new(),
            max_size,
        }
    }

    /// Insert a header at its candidate height. No-op when already pooled;
    /// the oldest entries are evicted once the pool is full.
    pub fn add(&mut self, header: Arc<HashedHeader>, height: Option<u32>) -> bool {
        let hash = *header.hash();
        if self.by_hash.contains_key(&hash) {
            trace!("header {} already pooled", hash);
            return false;
        }

        while self.by_hash.len() >= self.max_size {
            if let Some(oldest) = self.eviction_queue.pop_front() {
                self.remove(&oldest);
                debug!("evicted oldest pooled header {}", oldest);
            } else {
                break;
            }
        }

        self.by_prev.entry(*header.prev_hash()).or_default().push(hash);
        self.by_hash.insert(hash, PooledHeader { header, height });
        self.eviction_queue.push_back(hash);
        trace!("pooled header {} at height {:?}", hash, height);
        true
    }

    /// Remove a header, returning it if present.
    pub fn remove(&mut self, hash: &BlockHash) -> Option<Arc<HashedHeader>> {
        let entry = self.by_hash.remove(hash)?;

        if let Some(children) = self.by_prev.get_mut(entry.header.prev_hash()) {
            children.retain(|child| child != hash);
            if children.is_empty() {
                self.by_prev.remove(entry.header.prev_hash());
            }
        }
        self.eviction_queue.retain(|queued| queued != hash);

        Some(entry.header)
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Candidate height recorded for a pooled header.
    pub fn height_of(&self, hash: &BlockHash) -> Option<u32> {
        self.by_hash.get(hash).and_then(|entry| entry.height)
    }

    /// Pooled children of a parent hash.
    pub fn children_of(&self, parent: &BlockHash) -> Vec<Arc<HashedHeader>> {
        self.by_prev
            .get(parent)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|hash| self.by_hash.get(hash))
                    .map(|entry| entry.header.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.by_hash.len(),
            unique_parents: self.by_prev.len(),
        }
    }

    pub fn clear(&mut self) {
        self.by_hash.clear();
        self.by_prev.clear();
        self.eviction_queue.clear();
    }

    /// Build the branch from `header` back to the first ancestor present in
    /// the candidate index.
    ///
    /// Returns the empty branch when the header is already pooled or
    /// indexed, and an unanchored branch when the parentage runs out of both
    /// pool and index. The traversal is bounded by the pool size, so a
    /// corrupt parent graph cannot loop.
    pub async fn get_branch<C: ChainIndex + ?Sized>(
        &self,
        header: Arc<HashedHeader>,
        index: &C,
    ) -> ChainResult<HeaderBranch> {
        if self.by_hash.contains_key(header.hash())
            || index.get_height(header.hash(), true).await?.is_some()
        {
            return Ok(HeaderBranch::duplicate());
        }

        let mut headers = vec![header];
        let mut remaining = self.by_hash.len();
        loop {
            let parent = *headers[headers.len() - 1].prev_hash();
            match self.by_hash.get(&parent) {
                Some(entry) if remaining > 0 => {
                    remaining -= 1;
                    headers.push(entry.header.clone());
                }
                _ => break,
            }
        }
        headers.reverse();

        let anchor = *headers[0].prev_hash();
        match index.get_height(&anchor, true).await? {
            Some(height) => Ok(HeaderBranch::anchored(
                ForkPoint {
                    hash: anchor,
                    height,
                },
                headers,
            )),
            None => Ok(HeaderBranch::orphan(headers)),
        }
    }
}
