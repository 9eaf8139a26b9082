//! Chain-state population.
//!
//! For a header at a height, the populator assembles the snapshot needed to
//! contextually validate it: active forks, median time past, required bits,
//! rolling version counts, and the BIP9 deployment states. Samples are read
//! from the index — except that heights above a pending branch's fork point
//! must come from the branch itself, since those headers are not merged yet.
//!
//! Population is read-only; any number of invocations may run in parallel.

use std::sync::Arc;

use bitcoin::CompactTarget;

use crate::chain::{
    Bip9Deployment, Bip9Status, ChainIndex, ChainStateSnapshot, ForkFlags, HeaderBranch,
    ThresholdState, VersionTally,
};
use crate::config::NetworkParams;
use crate::error::ChainResult;
use crate::populate::retarget::{retarget, retarget_heights};
use crate::types::HashedHeader;

/// Median time past sample width.
const MEDIAN_TIME_SPAN: u32 = 11;

/// Assembles chain-state snapshots from the index, optionally overlaid with
/// an unmerged branch.
pub struct ChainStatePopulator<C> {
    chain: Arc<C>,
    params: NetworkParams,
}

impl<C: ChainIndex> ChainStatePopulator<C> {
    pub fn new(chain: Arc<C>, params: NetworkParams) -> Self {
        Self { chain, params }
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    /// Snapshot for the top of the candidate or confirmed chain.
    pub async fn populate_top(&self, candidate: bool) -> ChainResult<ChainStateSnapshot> {
        let height = self.chain.get_top_height(candidate).await?;
        self.populate_height(height, candidate).await
    }

    /// Snapshot for the indexed header at `height`.
    pub async fn populate_height(
        &self,
        height: u32,
        candidate: bool,
    ) -> ChainResult<ChainStateSnapshot> {
        let header = self.chain.get_header(height, candidate).await?;
        self.populate_header(&header, height, candidate).await
    }

    /// Snapshot for a given header as if indexed at `height`.
    pub async fn populate_header(
        &self,
        header: &HashedHeader,
        height: u32,
        candidate: bool,
    ) -> ChainResult<ChainStateSnapshot> {
        self.populate(header, height, candidate, None).await
    }

    /// Snapshot for the branch entry at `index`, reading branch headers for
    /// heights above the fork point.
    pub async fn populate_branch(
        &self,
        branch: &HeaderBranch,
        index: usize,
        candidate: bool,
    ) -> ChainResult<ChainStateSnapshot> {
        let header = &branch.headers()[index];
        let height = branch
            .height_at(index)
            .unwrap_or_else(|| unreachable!("populated branches are anchored"));
        self.populate(header, height, candidate, Some(branch)).await
    }

    async fn populate(
        &self,
        header: &HashedHeader,
        height: u32,
        candidate: bool,
        branch: Option<&HeaderBranch>,
    ) -> ChainResult<ChainStateSnapshot> {
        if height == 0 {
            return Ok(self.genesis_snapshot(header));
        }

        let median_time_past = self.median_time_past(height, candidate, branch).await?;
        let work_required = self.work_required(height, candidate, branch).await?;
        let version_tally = self.version_tally(height, candidate, branch).await?;
        let bip9 = [
            self.bip9_status(&self.params.bip9[0], height, candidate, branch).await?,
            self.bip9_status(&self.params.bip9[1], height, candidate, branch).await?,
        ];
        let forks = self.derive_forks(&version_tally, &bip9);

        Ok(ChainStateSnapshot {
            height,
            hash: *header.hash(),
            version: header.header().version.to_consensus(),
            timestamp: header.header().time,
            bits: header.header().bits,
            forks,
            median_time_past,
            work_required,
            version_tally,
            bip9,
        })
    }

    /// The height-zero snapshot comes from configuration alone.
    fn genesis_snapshot(&self, header: &HashedHeader) -> ChainStateSnapshot {
        ChainStateSnapshot {
            height: 0,
            hash: *header.hash(),
            version: header.header().version.to_consensus(),
            timestamp: header.header().time,
            bits: header.header().bits,
            forks: self.params.base_forks,
            median_time_past: 0,
            work_required: self.params.genesis.header().bits,
            version_tally: VersionTally::default(),
            bip9: [
                Bip9Status {
                    state: ThresholdState::Defined,
                    period_start: 0,
                },
                Bip9Status {
                    state: ThresholdState::Defined,
                    period_start: 0,
                },
            ],
        }
    }

    async fn median_time_past(
        &self,
        height: u32,
        candidate: bool,
        branch: Option<&HeaderBranch>,
    ) -> ChainResult<u32> {
        let start = height.saturating_sub(MEDIAN_TIME_SPAN);
        let mut timestamps = Vec::with_capacity((height - start) as usize);
        for sample in start..height {
            timestamps.push(self.timestamp_at(sample, candidate, branch).await?);
        }
        timestamps.sort_unstable();
        Ok(timestamps[timestamps.len() / 2])
    }

    async fn work_required(
        &self,
        height: u32,
        candidate: bool,
        branch: Option<&HeaderBranch>,
    ) -> ChainResult<CompactTarget> {
        let interval = self.params.retarget_interval;
        let (first_height, last_height) = retarget_heights(height, interval);
        let previous_bits = self.bits_at(last_height, candidate, branch).await?;

        if !self.params.retargeting || height % interval != 0 {
            return Ok(previous_bits);
        }

        let first_timestamp = self.timestamp_at(first_height, candidate, branch).await?;
        let last_timestamp = self.timestamp_at(last_height, candidate, branch).await?;
        Ok(retarget(
            previous_bits,
            first_timestamp,
            last_timestamp,
            self.params.target_timespan_secs,
            self.params.pow_limit_target(),
        ))
    }

    async fn version_tally(
        &self,
        height: u32,
        candidate: bool,
        branch: Option<&HeaderBranch>,
    ) -> ChainResult<VersionTally> {
        let start = height.saturating_sub(self.params.version_window);
        let mut versions = Vec::with_capacity((height - start) as usize);
        for sample in start..height {
            versions.push(self.version_at(sample, candidate, branch).await?);
        }
        Ok(VersionTally::count(&versions))
    }

    /// Walk the deployment's state machine over completed periods. Signal
    /// counting only happens while the deployment is started, so the deep
    /// windows stay untouched for settled deployments.
    async fn bip9_status(
        &self,
        deployment: &Bip9Deployment,
        height: u32,
        candidate: bool,
        branch: Option<&HeaderBranch>,
    ) -> ChainResult<Bip9Status> {
        let interval = self.params.retarget_interval;
        let period_start = self.params.period_start(height);
        let mut state = ThresholdState::Defined;

        if deployment.start_height == u32::MAX {
            return Ok(Bip9Status { state, period_start });
        }

        for boundary in (1..=period_start / interval).map(|period| period * interval) {
            let signal_count = if state == ThresholdState::Started {
                self.count_signals(deployment, boundary - interval, boundary, candidate, branch)
                    .await?
            } else {
                0
            };
            state = deployment.next_state(state, boundary, signal_count);
            if matches!(state, ThresholdState::Active | ThresholdState::Failed) {
                break;
            }
        }

        Ok(Bip9Status { state, period_start })
    }

    async fn count_signals(
        &self,
        deployment: &Bip9Deployment,
        from: u32,
        to: u32,
        candidate: bool,
        branch: Option<&HeaderBranch>,
    ) -> ChainResult<u32> {
        let mut count = 0;
        for sample in from..to {
            if deployment.signals(self.version_at(sample, candidate, branch).await?) {
                count += 1;
            }
        }
        Ok(count)
    }

    fn derive_forks(&self, tally: &VersionTally, bip9: &[Bip9Status; 2]) -> ForkFlags {
        let mut forks = self.params.base_forks;

        let threshold = self.params.version_threshold;
        if tally.count_at_least(2) >= threshold {
            forks |= ForkFlags::BIP34;
        }
        if tally.count_at_least(3) >= threshold {
            forks |= ForkFlags::BIP66;
        }
        if tally.count_at_least(4) >= threshold {
            forks |= ForkFlags::BIP65;
        }

        if bip9[0].state == ThresholdState::Active {
            forks |= ForkFlags::CSV;
        }
        if bip9[1].state == ThresholdState::Active {
            forks |= ForkFlags::SEGWIT;
        }

        forks
    }

    async fn timestamp_at(
        &self,
        height: u32,
        candidate: bool,
        branch: Option<&HeaderBranch>,
    ) -> ChainResult<u32> {
        if let Some(header) = Self::branch_header(branch, height) {
            return Ok(header.header().time);
        }
        self.chain.get_timestamp(height, candidate).await
    }

    async fn bits_at(
        &self,
        height: u32,
        candidate: bool,
        branch: Option<&HeaderBranch>,
    ) -> ChainResult<CompactTarget> {
        if let Some(header) = Self::branch_header(branch, height) {
            return Ok(header.header().bits);
        }
        self.chain.get_bits(height, candidate).await
    }

    async fn version_at(
        &self,
        height: u32,
        candidate: bool,
        branch: Option<&HeaderBranch>,
    ) -> ChainResult<i32> {
        if let Some(header) = Self::branch_header(branch, height) {
            return Ok(header.header().version.to_consensus());
        }
        self.chain.get_version(height, candidate).await
    }

    /// Branch entries shadow the index for heights above the fork point.
    fn branch_header(branch: Option<&HeaderBranch>, height: u32) -> Option<&Arc<HashedHeader>> {
        let branch = branch?;
        let index = branch.index_of_height(height)?;
        Some(&branch.headers()[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryChainIndex;
    use crate::types::ForkPoint;
    use bitcoin::block::Version;
    use bitcoin::hashes::Hash;
    use bitcoin::{BlockHash, TxMerkleNode};

    const EASY_BITS: u32 = 0x207fffff;

    fn header_with(previous: BlockHash, time: u32, version: i32, nonce: u32) -> HashedHeader {
        HashedHeader::from(bitcoin::block::Header {
            version: Version::from_consensus(version),
            prev_blockhash: previous,
            merkle_root: TxMerkleNode::all_zeros(),
            time,
            bits: CompactTarget::from_consensus(EASY_BITS),
            nonce,
        })
    }

    fn test_params(genesis: HashedHeader) -> NetworkParams {
        NetworkParams::regtest().with_genesis(genesis)
    }

    /// Index with genesis plus `length` successors; timestamps advance by
    /// 600 seconds per height.
    async fn seeded(length: u32) -> (Arc<MemoryChainIndex>, Vec<HashedHeader>, NetworkParams) {
        let genesis = header_with(BlockHash::all_zeros(), 1296688602, 1, 0);
        let index = Arc::new(MemoryChainIndex::new(genesis));
        let mut chain = vec![genesis];
        for offset in 1..=length {
            let next = header_with(
                *chain[chain.len() - 1].hash(),
                1296688602 + offset * 600,
                1,
                offset,
            );
            index.append(next).await.unwrap();
            chain.push(next);
        }
        let params = test_params(genesis);
        (index, chain, params)
    }

    #[tokio::test]
    async fn test_genesis_snapshot_uses_constants() {
        let (index, chain, params) = seeded(0).await;
        let populator = ChainStatePopulator::new(index, params.clone());

        let snapshot = populator.populate_height(0, true).await.unwrap();
        assert_eq!(snapshot.height, 0);
        assert_eq!(snapshot.hash, *chain[0].hash());
        assert_eq!(snapshot.median_time_past, 0);
        assert_eq!(snapshot.work_required, params.genesis.header().bits);
        assert_eq!(snapshot.forks, params.base_forks);
        assert_eq!(snapshot.bip9[0].state, ThresholdState::Defined);
    }

    #[tokio::test]
    async fn test_median_time_past_matches_sorted_window() {
        let (index, chain, params) = seeded(20).await;
        let populator = ChainStatePopulator::new(index, params);

        for height in 1..=20u32 {
            let snapshot = populator.populate_height(height, true).await.unwrap();
            let start = height.saturating_sub(11) as usize;
            let mut window: Vec<u32> = chain[start..height as usize]
                .iter()
                .map(|header| header.header().time)
                .collect();
            window.sort_unstable();
            assert_eq!(snapshot.median_time_past, window[window.len() / 2]);
        }
    }

    #[tokio::test]
    async fn test_work_required_without_retargeting_echoes_previous() {
        let (index, _, params) = seeded(5).await;
        let populator = ChainStatePopulator::new(index, params);

        let snapshot = populator.populate_height(5, true).await.unwrap();
        assert_eq!(snapshot.work_required, CompactTarget::from_consensus(EASY_BITS));
    }

    #[tokio::test]
    async fn test_work_required_adjusts_at_boundary() {
        let (index, chain, mut params) = seeded(8).await;
        params.retargeting = true;
        params.retarget_interval = 4;
        let pow_limit = params.pow_limit_target();
        let timespan = params.target_timespan_secs;
        let populator = ChainStatePopulator::new(index, params);

        // Mid-period heights keep echoing the previous bits.
        let snapshot = populator.populate_height(3, true).await.unwrap();
        assert_eq!(snapshot.work_required, CompactTarget::from_consensus(EASY_BITS));

        // The boundary samples the closing period's endpoints.
        let snapshot = populator.populate_height(4, true).await.unwrap();
        let expected = retarget(
            CompactTarget::from_consensus(EASY_BITS),
            chain[0].header().time,
            chain[3].header().time,
            timespan,
            pow_limit,
        );
        assert_eq!(snapshot.work_required, expected);
        // Six hundred seconds per block is far faster than the schedule, so
        // the target must tighten.
        assert_ne!(snapshot.work_required, CompactTarget::from_consensus(EASY_BITS));
    }

    #[tokio::test]
    async fn test_populate_top_and_header_agree() {
        let (index, chain, params) = seeded(8).await;
        let populator = ChainStatePopulator::new(index, params);

        let by_top = populator.populate_top(true).await.unwrap();
        let by_height = populator.populate_height(8, true).await.unwrap();
        let by_header = populator.populate_header(&chain[8], 8, true).await.unwrap();
        assert_eq!(by_top, by_height);
        assert_eq!(by_height, by_header);
    }

    #[tokio::test]
    async fn test_sampling_past_top_is_hard_error() {
        let (index, _, params) = seeded(3).await;
        let populator = ChainStatePopulator::new(index, params);

        let missing = header_with(BlockHash::from_byte_array([1; 32]), 1296690000, 1, 99);
        assert!(populator.populate_header(&missing, 40, true).await.is_err());
    }

    #[tokio::test]
    async fn test_branch_overlay_shadows_index() {
        let (index, chain, params) = seeded(4).await;
        let populator = ChainStatePopulator::new(index, params);

        // A fork from height 2 with deliberately different timestamps.
        let fork_time = 1296688602 + 10_000;
        let side1 = Arc::new(header_with(*chain[2].hash(), fork_time, 1, 50));
        let side2 = Arc::new(header_with(*side1.hash(), fork_time + 600, 1, 51));
        let branch = HeaderBranch::anchored(
            ForkPoint {
                hash: *chain[2].hash(),
                height: 2,
            },
            vec![side1.clone(), side2.clone()],
        );

        let snapshot = populator.populate_branch(&branch, 1, true).await.unwrap();
        assert_eq!(snapshot.height, 4);
        assert_eq!(snapshot.hash, *side2.hash());

        // The median window covers heights 0..=3; height 3 must be the
        // branch's header, not the indexed one.
        let mut window = vec![
            chain[0].header().time,
            chain[1].header().time,
            chain[2].header().time,
            side1.header().time,
        ];
        window.sort_unstable();
        assert_eq!(snapshot.median_time_past, window[window.len() / 2]);
    }

    #[tokio::test]
    async fn test_version_tally_in_window() {
        let genesis = header_with(BlockHash::all_zeros(), 1296688602, 1, 0);
        let index = Arc::new(MemoryChainIndex::new(genesis));
        let mut previous = genesis;
        for offset in 1..=6u32 {
            let version = if offset <= 3 { 4 } else { 1 };
            let next = header_with(*previous.hash(), 1296688602 + offset * 600, version, offset);
            index.append(next).await.unwrap();
            previous = next;
        }

        let populator = ChainStatePopulator::new(index, test_params(genesis));
        let snapshot = populator.populate_height(6, true).await.unwrap();
        assert_eq!(snapshot.version_tally.sampled, 6);
        assert_eq!(snapshot.version_tally.count_at_least(4), 3);
        // Regtest threshold is unreachable, so no legacy fork activates.
        assert!(!snapshot.forks.contains(ForkFlags::BIP34));
    }

    #[tokio::test]
    async fn test_bip9_lifecycle_across_boundaries() {
        // Tiny periods keep the walk readable: interval 4, threshold 3,
        // deployment starts at height 4 and times out at height 16.
        let genesis = header_with(BlockHash::all_zeros(), 1296688602, 1, 0);
        let deployment = Bip9Deployment {
            bit: 0,
            start_height: 4,
            timeout_height: 16,
            threshold: 3,
        };
        let params = test_params(genesis)
            .with_retarget_interval(4)
            .with_bip9([deployment, Bip9Deployment::never(1)]);

        let signal = 0x2000_0001u32 as i32;
        let index = Arc::new(MemoryChainIndex::new(genesis));
        let mut previous = genesis;
        // Heights 1..=3: no signal. Heights 4..=7: all signal (lock-in
        // period). Heights 8..=11: quiet.
        for height in 1..=11u32 {
            let version = if (4..=7).contains(&height) { signal } else { 1 };
            let next = header_with(*previous.hash(), 1296688602 + height * 600, version, height);
            index.append(next).await.unwrap();
            previous = next;
        }

        let populator = ChainStatePopulator::new(index, params);

        // Period [0,3]: defined until the start boundary.
        let snapshot = populator.populate_height(3, true).await.unwrap();
        assert_eq!(snapshot.bip9[0].state, ThresholdState::Defined);
        assert_eq!(snapshot.bip9[0].period_start, 0);

        // Boundary 4: started.
        let snapshot = populator.populate_height(4, true).await.unwrap();
        assert_eq!(snapshot.bip9[0].state, ThresholdState::Started);
        assert_eq!(snapshot.bip9[0].period_start, 4);

        // Boundary 8: period [4,7] signalled 4 of 4, locked in.
        let snapshot = populator.populate_height(8, true).await.unwrap();
        assert_eq!(snapshot.bip9[0].state, ThresholdState::LockedIn);
        assert!(!snapshot.forks.contains(ForkFlags::BIP68));

        // Mid-period heights share the boundary state.
        let snapshot = populator.populate_height(11, true).await.unwrap();
        assert_eq!(snapshot.bip9[0].state, ThresholdState::LockedIn);

        // Boundary 12 requires an indexed height 12; extend and observe
        // activation.
        let next = header_with(*previous.hash(), 1296688602 + 12 * 600, 1, 12);
        populator.chain.append(next).await.unwrap();
        let snapshot = populator.populate_height(12, true).await.unwrap();
        assert_eq!(snapshot.bip9[0].state, ThresholdState::Active);
        assert!(snapshot.forks.contains(ForkFlags::BIP68));
        assert!(snapshot.forks.contains(ForkFlags::BIP112));
        assert!(snapshot.forks.contains(ForkFlags::BIP113));
    }

    #[tokio::test]
    async fn test_bip9_times_out_without_signals() {
        let genesis = header_with(BlockHash::all_zeros(), 1296688602, 1, 0);
        let deployment = Bip9Deployment {
            bit: 0,
            start_height: 4,
            timeout_height: 12,
            threshold: 3,
        };
        let params = test_params(genesis)
            .with_retarget_interval(4)
            .with_bip9([deployment, Bip9Deployment::never(1)]);

        let index = Arc::new(MemoryChainIndex::new(genesis));
        let mut previous = genesis;
        for height in 1..=12u32 {
            let next = header_with(*previous.hash(), 1296688602 + height * 600, 1, height);
            index.append(next).await.unwrap();
            previous = next;
        }

        let populator = ChainStatePopulator::new(index, params);
        let snapshot = populator.populate_height(12, true).await.unwrap();
        assert_eq!(snapshot.bip9[0].state, ThresholdState::Failed);
        assert!(!snapshot.forks.contains(ForkFlags::BIP68));
    }
}
