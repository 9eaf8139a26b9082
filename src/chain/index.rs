//! Fast access to the indexed header chains.
//!
//! The candidate chain is the headers-only speculative best chain; the
//! confirmed chain is its fully validated prefix. The organizer consumes
//! this interface, it does not own the implementation — `MemoryChainIndex`
//! exists so the core can run and be tested without a durable store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{BlockHash, CompactTarget, Target};
use tokio::sync::RwLock;

use crate::chain::ChainWork;
use crate::error::{ChainError, ChainResult};
use crate::types::{ForkPoint, HashedHeader};

/// Indexed-chain queries and the atomic reorganization primitive.
///
/// Field accessors exist so window sampling never materializes whole
/// headers; implementations with columnar storage can serve them directly.
#[async_trait]
pub trait ChainIndex: Send + Sync {
    /// Header at `height` on the candidate or confirmed chain. Fails when
    /// the height exceeds that chain's top.
    async fn get_header(&self, height: u32, candidate: bool) -> ChainResult<HashedHeader>;

    /// Top height of the selected chain.
    async fn get_top_height(&self, candidate: bool) -> ChainResult<u32>;

    /// Height of an indexed header, if the hash is indexed on the selected
    /// chain.
    async fn get_height(&self, hash: &BlockHash, candidate: bool) -> ChainResult<Option<u32>>;

    async fn get_bits(&self, height: u32, candidate: bool) -> ChainResult<CompactTarget> {
        Ok(self.get_header(height, candidate).await?.header().bits)
    }

    async fn get_version(&self, height: u32, candidate: bool) -> ChainResult<i32> {
        Ok(self
            .get_header(height, candidate)
            .await?
            .header()
            .version
            .to_consensus())
    }

    async fn get_timestamp(&self, height: u32, candidate: bool) -> ChainResult<u32> {
        Ok(self.get_header(height, candidate).await?.header().time)
    }

    async fn get_hash(&self, height: u32, candidate: bool) -> ChainResult<BlockHash> {
        Ok(*self.get_header(height, candidate).await?.hash())
    }

    /// Work of the successors of `fork_height`, accumulated until it
    /// exceeds `maximum` or the top is reached. This is the required work a
    /// competing branch must strictly beat.
    async fn get_work(
        &self,
        maximum: &ChainWork,
        fork_height: u32,
        candidate: bool,
    ) -> ChainResult<ChainWork> {
        let top = self.get_top_height(candidate).await?;
        let mut accumulated = ChainWork::zero();
        let mut height = fork_height + 1;

        while height <= top && accumulated <= *maximum {
            let bits = self.get_bits(height, candidate).await?;
            accumulated = accumulated + ChainWork::from_target(Target::from_compact(bits));
            height += 1;
        }

        Ok(accumulated)
    }

    /// Atomically truncate the candidate chain above `fork_point` and append
    /// `branch`. Returns the detached headers, top-most last. On failure the
    /// index is either unchanged or corrupt; callers must treat an error as
    /// fatal.
    async fn reorganize(
        &self,
        fork_point: &ForkPoint,
        branch: &[Arc<HashedHeader>],
    ) -> ChainResult<Vec<HashedHeader>>;
}

struct IndexInner {
    /// Candidate chain, position == height.
    headers: Vec<HashedHeader>,
    /// Reverse lookup over the candidate chain.
    heights: HashMap<BlockHash, u32>,
    /// Top of the confirmed prefix.
    confirmed_height: u32,
}

/// In-memory candidate/confirmed index.
///
/// All mutation happens under one `RwLock` write guard, so concurrent
/// readers observe either the pre- or post-reorganization chain, never a
/// partial splice.
pub struct MemoryChainIndex {
    inner: RwLock<IndexInner>,
}

impl MemoryChainIndex {
    /// An index holding only the genesis header, confirmed.
    pub fn new(genesis: HashedHeader) -> Self {
        let mut heights = HashMap::new();
        heights.insert(*genesis.hash(), 0);
        Self {
            inner: RwLock::new(IndexInner {
                headers: vec![genesis],
                heights,
                confirmed_height: 0,
            }),
        }
    }

    /// Append a header extending the candidate top. Seeding helper for
    /// callers that bypass the organizer.
    pub async fn append(&self, header: HashedHeader) -> ChainResult<()> {
        let mut inner = self.inner.write().await;
        let top = &inner.headers[inner.headers.len() - 1];
        if header.prev_hash() != top.hash() {
            return Err(ChainError::InconsistentState(format!(
                "header {} does not extend candidate top {}",
                header.hash(),
                top.hash()
            )));
        }

        let height = inner.headers.len() as u32;
        inner.heights.insert(*header.hash(), height);
        inner.headers.push(header);
        Ok(())
    }

    /// Advance the confirmed prefix to `height`.
    pub async fn confirm_to(&self, height: u32) -> ChainResult<()> {
        let mut inner = self.inner.write().await;
        if height as usize >= inner.headers.len() {
            return Err(ChainError::NotFound { height });
        }
        inner.confirmed_height = height;
        Ok(())
    }

    /// Candidate `(height, hash)` tip as one consistent pair.
    pub async fn top(&self) -> (u32, BlockHash) {
        let inner = self.inner.read().await;
        let height = (inner.headers.len() - 1) as u32;
        (height, *inner.headers[height as usize].hash())
    }
}

impl IndexInner {
    fn top_height(&self, candidate: bool) -> u32 {
        if candidate {
            (self.headers.len() - 1) as u32
        } else {
            self.confirmed_height
        }
    }
}

#[async_trait]
impl ChainIndex for MemoryChainIndex {
    async fn get_header(&self, height: u32, candidate: bool) -> ChainResult<HashedHeader> {
        let inner = self.inner.read().await;
        if height > inner.top_height(candidate) {
            return Err(ChainError::NotFound { height });
        }
        Ok(inner.headers[height as usize])
    }

    async fn get_top_height(&self, candidate: bool) -> ChainResult<u32> {
        Ok(self.inner.read().await.top_height(candidate))
    }

    async fn get_height(&self, hash: &BlockHash, candidate: bool) -> ChainResult<Option<u32>> {
        let inner = self.inner.read().await;
        Ok(inner
            .heights
            .get(hash)
            .copied()
            .filter(|&height| height <= inner.top_height(candidate)))
    }

    async fn reorganize(
        &self,
        fork_point: &ForkPoint,
        branch: &[Arc<HashedHeader>],
    ) -> ChainResult<Vec<HashedHeader>> {
        let mut inner = self.inner.write().await;

        let fork_index = fork_point.height as usize;
        if fork_index >= inner.headers.len()
            || inner.headers[fork_index].hash() != &fork_point.hash
        {
            return Err(ChainError::Corruption(format!(
                "fork point {} at height {} is not indexed",
                fork_point.hash, fork_point.height
            )));
        }
        if fork_point.height < inner.confirmed_height {
            return Err(ChainError::InconsistentState(format!(
                "reorganization below confirmed height {}",
                inner.confirmed_height
            )));
        }
        match branch.first() {
            Some(first) if *first.prev_hash() == fork_point.hash => {}
            _ => {
                return Err(ChainError::InconsistentState(
                    "branch does not extend the fork point".to_string(),
                ))
            }
        }

        let detached = inner.headers.split_off(fork_index + 1);
        for header in &detached {
            inner.heights.remove(header.hash());
        }
        for header in branch {
            let height = inner.headers.len() as u32;
            inner.heights.insert(*header.hash(), height);
            inner.headers.push(**header);
        }

        tracing::debug!(
            fork_height = fork_point.height,
            detached = detached.len(),
            attached = branch.len(),
            "candidate chain reorganized"
        );

        Ok(detached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::block::Version;
    use bitcoin::hashes::Hash;
    use bitcoin::TxMerkleNode;

    fn header(previous: BlockHash, nonce: u32) -> HashedHeader {
        HashedHeader::from(bitcoin::block::Header {
            version: Version::from_consensus(1),
            prev_blockhash: previous,
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1296688602 + nonce,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce,
        })
    }

    fn genesis() -> HashedHeader {
        header(BlockHash::all_zeros(), 0)
    }

    async fn seeded(length: u32) -> (MemoryChainIndex, Vec<HashedHeader>) {
        let genesis = genesis();
        let index = MemoryChainIndex::new(genesis);
        let mut chain = vec![genesis];
        for nonce in 1..=length {
            let next = header(*chain[chain.len() - 1].hash(), nonce);
            index.append(next).await.unwrap();
            chain.push(next);
        }
        (index, chain)
    }

    #[tokio::test]
    async fn test_candidate_and_confirmed_tops() {
        let (index, chain) = seeded(3).await;

        assert_eq!(index.get_top_height(true).await.unwrap(), 3);
        assert_eq!(index.get_top_height(false).await.unwrap(), 0);

        index.confirm_to(2).await.unwrap();
        assert_eq!(index.get_top_height(false).await.unwrap(), 2);

        // Confirmed reads stop at the confirmed prefix.
        assert!(index.get_header(3, false).await.is_err());
        assert_eq!(
            index.get_header(3, true).await.unwrap().hash(),
            chain[3].hash()
        );
        assert_eq!(index.get_height(chain[3].hash(), false).await.unwrap(), None);
        assert_eq!(
            index.get_height(chain[3].hash(), true).await.unwrap(),
            Some(3)
        );
    }

    #[tokio::test]
    async fn test_field_accessors() {
        let (index, chain) = seeded(2).await;
        assert_eq!(
            index.get_bits(1, true).await.unwrap(),
            CompactTarget::from_consensus(0x207fffff)
        );
        assert_eq!(index.get_version(1, true).await.unwrap(), 1);
        assert_eq!(index.get_timestamp(2, true).await.unwrap(), chain[2].header().time);
        assert_eq!(index.get_hash(2, true).await.unwrap(), *chain[2].hash());
    }

    #[tokio::test]
    async fn test_append_rejects_disconnected_header() {
        let (index, _) = seeded(1).await;
        let stray = header(BlockHash::from_byte_array([9; 32]), 77);
        assert!(index.append(stray).await.is_err());
    }

    #[tokio::test]
    async fn test_get_work_accumulates_above_fork() {
        let (index, _) = seeded(3).await;
        let per_header =
            ChainWork::from_target(Target::from_compact(CompactTarget::from_consensus(
                0x207fffff,
            )));
        let three = per_header + per_header + per_header;

        // A huge maximum walks the whole segment above height 0.
        let mut big = [0xff_u8; 32];
        big[0] = 0x7f;
        let required = index
            .get_work(&ChainWork::from_bytes(big), 0, true)
            .await
            .unwrap();
        assert_eq!(required, three);

        // Early stop: once accumulation exceeds the branch work there is no
        // reason to keep reading.
        let stopped = index.get_work(&ChainWork::zero(), 0, true).await.unwrap();
        assert_eq!(stopped, per_header);

        // Nothing above the top.
        let empty = index.get_work(&ChainWork::zero(), 3, true).await.unwrap();
        assert!(empty.is_zero());
    }

    #[tokio::test]
    async fn test_reorganize_swaps_segments() {
        let (index, chain) = seeded(3).await;

        let fork = ForkPoint {
            hash: *chain[1].hash(),
            height: 1,
        };
        let side1 = Arc::new(header(*chain[1].hash(), 100));
        let side2 = Arc::new(header(*side1.hash(), 101));
        let side3 = Arc::new(header(*side2.hash(), 102));

        let detached = index
            .reorganize(&fork, &[side1.clone(), side2.clone(), side3.clone()])
            .await
            .unwrap();

        assert_eq!(detached.len(), 2);
        assert_eq!(detached[0].hash(), chain[2].hash());
        assert_eq!(detached[1].hash(), chain[3].hash());

        let (top_height, top_hash) = index.top().await;
        assert_eq!(top_height, 4);
        assert_eq!(top_hash, *side3.hash());

        // Detached hashes are no longer indexed; attached ones are.
        assert_eq!(index.get_height(chain[3].hash(), true).await.unwrap(), None);
        assert_eq!(index.get_height(side2.hash(), true).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_reorganize_rejects_bad_fork_point() {
        let (index, chain) = seeded(2).await;
        let side = Arc::new(header(*chain[1].hash(), 100));

        let bogus = ForkPoint {
            hash: BlockHash::from_byte_array([5; 32]),
            height: 1,
        };
        assert!(index.reorganize(&bogus, &[side.clone()]).await.is_err());

        // Height/hash mismatch leaves the index unchanged.
        let (top_height, _) = index.top().await;
        assert_eq!(top_height, 2);
    }

    #[tokio::test]
    async fn test_reorganize_protects_confirmed_prefix() {
        let (index, chain) = seeded(3).await;
        index.confirm_to(2).await.unwrap();

        let fork = ForkPoint {
            hash: *chain[1].hash(),
            height: 1,
        };
        let side = Arc::new(header(*chain[1].hash(), 100));
        assert!(matches!(
            index.reorganize(&fork, &[side]).await,
            Err(ChainError::InconsistentState(_))
        ));
    }
}
