//! Network and organizer configuration.

use bitcoin::blockdata::constants::genesis_block;
use bitcoin::{CompactTarget, Network, Target};

use crate::chain::{Bip9Deployment, CheckpointList, ForkFlags};
use crate::types::HashedHeader;

/// Consensus parameters of the network the organizer runs on.
///
/// Everything the populator and validator need that is not derivable from
/// indexed headers lives here: proof-of-work limits, retarget rule inputs,
/// activation thresholds, and the checkpoint list.
#[derive(Debug, Clone)]
pub struct NetworkParams {
    pub network: Network,

    /// Genesis header; its constants seed the height-zero snapshot.
    pub genesis: HashedHeader,

    /// Headers between difficulty adjustments (and the BIP9 period length).
    pub retarget_interval: u32,

    /// Expected seconds per retarget interval.
    pub target_timespan_secs: u32,

    /// Whether difficulty retargets at interval boundaries. Regtest keeps a
    /// constant target.
    pub retargeting: bool,

    /// Tolerated clock skew for header timestamps.
    pub timestamp_limit_secs: u32,

    /// Easiest admissible compact target.
    pub proof_of_work_limit: CompactTarget,

    /// Select the scrypt proof-of-work digest instead of double-SHA256.
    pub scrypt: bool,

    /// Age after which a tip is considered stale for policy purposes.
    /// Zero disables the horizon.
    pub stale_secs: u32,

    /// Rules active from genesis onward.
    pub base_forks: ForkFlags,

    /// Pinned header hashes.
    pub checkpoints: CheckpointList,

    /// Trailing headers sampled for version-based activation.
    pub version_window: u32,

    /// Version count within the window that activates a legacy soft fork.
    pub version_threshold: u32,

    /// Version-bit deployments tracked per snapshot (bit 0 and bit 1).
    pub bip9: [Bip9Deployment; 2],
}

impl NetworkParams {
    pub fn mainnet() -> Self {
        Self {
            network: Network::Bitcoin,
            genesis: HashedHeader::from(genesis_block(Network::Bitcoin).header),
            retarget_interval: 2016,
            target_timespan_secs: 14 * 24 * 60 * 60,
            retargeting: true,
            timestamp_limit_secs: 2 * 60 * 60,
            proof_of_work_limit: CompactTarget::from_consensus(0x1d00ffff),
            scrypt: false,
            stale_secs: 24 * 60 * 60,
            base_forks: ForkFlags::BIP16 | ForkFlags::BIP30,
            checkpoints: CheckpointList::default(),
            version_window: 1000,
            version_threshold: 750,
            bip9: [
                // Bit 0: the CSV trio.
                Bip9Deployment {
                    bit: 0,
                    start_height: 417_312,
                    timeout_height: 483_840,
                    threshold: 1916,
                },
                // Bit 1: segregated witness.
                Bip9Deployment {
                    bit: 1,
                    start_height: 475_776,
                    timeout_height: 584_640,
                    threshold: 1916,
                },
            ],
        }
    }

    pub fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            genesis: HashedHeader::from(genesis_block(Network::Testnet).header),
            retarget_interval: 2016,
            target_timespan_secs: 14 * 24 * 60 * 60,
            retargeting: true,
            timestamp_limit_secs: 2 * 60 * 60,
            proof_of_work_limit: CompactTarget::from_consensus(0x1d00ffff),
            scrypt: false,
            stale_secs: 24 * 60 * 60,
            base_forks: ForkFlags::BIP16 | ForkFlags::BIP30 | ForkFlags::TESTNET_EASY_BLOCKS,
            checkpoints: CheckpointList::default(),
            version_window: 1000,
            version_threshold: 51,
            bip9: [
                Bip9Deployment {
                    bit: 0,
                    start_height: 770_112,
                    timeout_height: 1_071_504,
                    threshold: 1512,
                },
                Bip9Deployment {
                    bit: 1,
                    start_height: 834_624,
                    timeout_height: 1_141_104,
                    threshold: 1512,
                },
            ],
        }
    }

    pub fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            genesis: HashedHeader::from(genesis_block(Network::Regtest).header),
            retarget_interval: 2016,
            target_timespan_secs: 14 * 24 * 60 * 60,
            retargeting: false,
            timestamp_limit_secs: 2 * 60 * 60,
            proof_of_work_limit: CompactTarget::from_consensus(0x207fffff),
            scrypt: false,
            stale_secs: 0,
            base_forks: ForkFlags::BIP16 | ForkFlags::BIP30,
            checkpoints: CheckpointList::default(),
            version_window: 1000,
            // The window can never cross this, so legacy forks stay off.
            version_threshold: u32::MAX,
            bip9: [Bip9Deployment::never(0), Bip9Deployment::never(1)],
        }
    }

    /// Replace the genesis header (and with it the seed of every height-zero
    /// snapshot).
    pub fn with_genesis(mut self, genesis: HashedHeader) -> Self {
        self.genesis = genesis;
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: CheckpointList) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn with_scrypt(mut self, scrypt: bool) -> Self {
        self.scrypt = scrypt;
        self
    }

    pub fn with_proof_of_work_limit(mut self, limit: CompactTarget) -> Self {
        self.proof_of_work_limit = limit;
        self
    }

    pub fn with_bip9(mut self, bip9: [Bip9Deployment; 2]) -> Self {
        self.bip9 = bip9;
        self
    }

    pub fn with_retarget_interval(mut self, interval: u32) -> Self {
        debug_assert!(interval > 0, "retarget interval must be positive");
        self.retarget_interval = interval;
        self
    }

    /// The proof-of-work limit as a full target.
    pub fn pow_limit_target(&self) -> Target {
        Target::from_compact(self.proof_of_work_limit)
    }

    /// First height of the retarget period containing `height`.
    pub fn period_start(&self, height: u32) -> u32 {
        height - height % self.retarget_interval
    }
}

/// Tunables of the organizer itself.
#[derive(Debug, Clone)]
pub struct OrganizerConfig {
    /// Pool entries kept before the oldest are evicted.
    pub max_pool_size: usize,
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        Self { max_pool_size: 512 }
    }
}
