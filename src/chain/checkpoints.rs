//! Checkpoints pin known-good header hashes at fixed heights.

use bitcoin::BlockHash;

/// A pinned `(height, hash)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub height: u32,
    pub hash: BlockHash,
}

impl Checkpoint {
    pub fn new(height: u32, hash: BlockHash) -> Self {
        Self { height, hash }
    }
}

/// Checkpoint list sorted by height, lowest first.
#[derive(Debug, Clone, Default)]
pub struct CheckpointList {
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointList {
    /// The input must be sorted by height in ascending order.
    pub fn new(checkpoints: Vec<Checkpoint>) -> Self {
        debug_assert!(
            checkpoints.windows(2).all(|pair| pair[0].height < pair[1].height),
            "checkpoints must be sorted by height in strictly ascending order"
        );
        Self { checkpoints }
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// Expected hash at a height, if that height is checkpointed.
    pub fn hash_at(&self, height: u32) -> Option<&BlockHash> {
        self.checkpoints
            .binary_search_by_key(&height, |checkpoint| checkpoint.height)
            .ok()
            .map(|index| &self.checkpoints[index].hash)
    }

    /// Whether a header at `height` matches the checkpoint there, or is not
    /// checkpointed at all.
    pub fn matches(&self, height: u32, hash: &BlockHash) -> bool {
        match self.hash_at(height) {
            Some(expected) => expected == hash,
            None => true,
        }
    }

    /// Highest checkpointed height, if any.
    pub fn top_height(&self) -> Option<u32> {
        self.checkpoints.last().map(|checkpoint| checkpoint.height)
    }

    /// Whether a height lies at or below the last checkpoint.
    pub fn is_under_checkpoints(&self, height: u32) -> bool {
        self.top_height().is_some_and(|top| height <= top)
    }
}
