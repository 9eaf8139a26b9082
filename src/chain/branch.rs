//! Branches of pending headers anchored to the candidate index.

use std::sync::Arc;

use crate::chain::ChainWork;
use crate::types::{ForkPoint, HashedHeader};

/// An ordered, parent-linked run of headers whose first entry extends an
/// indexed ancestor (the fork point).
///
/// An empty branch signals a duplicate submission. A branch without a fork
/// point could not be anchored; its top is an orphan.
#[derive(Debug, Clone)]
pub struct HeaderBranch {
    fork_point: Option<ForkPoint>,
    headers: Vec<Arc<HashedHeader>>,
}

impl HeaderBranch {
    /// The duplicate signal.
    pub fn duplicate() -> Self {
        Self {
            fork_point: None,
            headers: Vec::new(),
        }
    }

    /// A branch extending `fork_point`, ordered lowest height first.
    pub fn anchored(fork_point: ForkPoint, headers: Vec<Arc<HashedHeader>>) -> Self {
        debug_assert!(!headers.is_empty(), "anchored branches carry headers");
        debug_assert!(
            *headers[0].prev_hash() == fork_point.hash,
            "first branch header must extend the fork point"
        );
        Self {
            fork_point: Some(fork_point),
            headers,
        }
    }

    /// A branch whose parentage left both pool and index.
    pub fn orphan(headers: Vec<Arc<HashedHeader>>) -> Self {
        debug_assert!(!headers.is_empty(), "orphan branches carry headers");
        Self {
            fork_point: None,
            headers,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn is_anchored(&self) -> bool {
        self.fork_point.is_some()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn fork_point(&self) -> Option<&ForkPoint> {
        self.fork_point.as_ref()
    }

    /// Height of the indexed ancestor.
    pub fn fork_height(&self) -> Option<u32> {
        self.fork_point.map(|fork| fork.height)
    }

    pub fn headers(&self) -> &[Arc<HashedHeader>] {
        &self.headers
    }

    pub fn top(&self) -> Option<&Arc<HashedHeader>> {
        self.headers.last()
    }

    /// Height of the branch's top header, once anchored.
    pub fn top_height(&self) -> Option<u32> {
        self.fork_point
            .map(|fork| fork.height + self.headers.len() as u32)
    }

    /// Height of the branch entry at `index`, once anchored.
    pub fn height_at(&self, index: usize) -> Option<u32> {
        if index >= self.headers.len() {
            return None;
        }
        self.fork_point.map(|fork| fork.height + index as u32 + 1)
    }

    /// Position of `height` within the branch, if it lies above the fork
    /// point and at or below the top.
    pub fn index_of_height(&self, height: u32) -> Option<usize> {
        let fork = self.fork_point?;
        if height <= fork.height {
            return None;
        }
        let index = (height - fork.height - 1) as usize;
        (index < self.headers.len()).then_some(index)
    }

    /// Cumulative work over the branch headers.
    pub fn work(&self) -> ChainWork {
        self.headers
            .iter()
            .fold(ChainWork::zero(), |acc, header| acc.add_header(header.header()))
    }

    /// Consume the branch into its fork point and headers.
    pub fn into_parts(self) -> (Option<ForkPoint>, Vec<Arc<HashedHeader>>) {
        (self.fork_point, self.headers)
    }
}
