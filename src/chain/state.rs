//! Chain state attached to a header height.
//!
//! A snapshot carries everything needed to contextually validate the next
//! header: the active rule set, median time past, the required compact
//! target, rolling version counts, and the BIP9 deployment states.

use std::ops::{BitOr, BitOrAssign};

use bitcoin::{BlockHash, CompactTarget};

/// Bitset of consensus rules active at a height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForkFlags(u32);

impl ForkFlags {
    pub const NONE: ForkFlags = ForkFlags(0);
    /// Pay-to-script-hash evaluation.
    pub const BIP16: ForkFlags = ForkFlags(1);
    /// No duplication of unspent transaction ids.
    pub const BIP30: ForkFlags = ForkFlags(1 << 1);
    /// Coinbase must include the block height; headers must be version 2+.
    pub const BIP34: ForkFlags = ForkFlags(1 << 2);
    /// Strict DER signatures; headers must be version 3+.
    pub const BIP66: ForkFlags = ForkFlags(1 << 3);
    /// CHECKLOCKTIMEVERIFY; headers must be version 4+.
    pub const BIP65: ForkFlags = ForkFlags(1 << 4);
    /// Relative lock-time via sequence numbers.
    pub const BIP68: ForkFlags = ForkFlags(1 << 5);
    /// CHECKSEQUENCEVERIFY.
    pub const BIP112: ForkFlags = ForkFlags(1 << 6);
    /// Median-time-past lock-time semantics.
    pub const BIP113: ForkFlags = ForkFlags(1 << 7);
    /// Segregated witness.
    pub const SEGWIT: ForkFlags = ForkFlags(1 << 8);
    /// Network-specific: 20-minute minimum-difficulty blocks.
    pub const TESTNET_EASY_BLOCKS: ForkFlags = ForkFlags(1 << 9);

    /// The forks activated together by BIP9 bit 0.
    pub const CSV: ForkFlags =
        ForkFlags(Self::BIP68.0 | Self::BIP112.0 | Self::BIP113.0);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        ForkFlags(bits)
    }

    pub const fn contains(self, other: ForkFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ForkFlags {
    type Output = ForkFlags;

    fn bitor(self, rhs: ForkFlags) -> ForkFlags {
        ForkFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ForkFlags {
    fn bitor_assign(&mut self, rhs: ForkFlags) {
        self.0 |= rhs.0;
    }
}

/// BIP9 deployment state for one version bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdState {
    Defined,
    Started,
    LockedIn,
    Active,
    Failed,
}

/// Parameters of a height-gated BIP9 deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bip9Deployment {
    /// Version bit set by signalling headers.
    pub bit: u8,
    /// First period boundary at which the deployment may start.
    pub start_height: u32,
    /// Boundary at which a deployment that has not locked in fails.
    pub timeout_height: u32,
    /// Signalling headers required within one period to lock in.
    pub threshold: u32,
}

impl Bip9Deployment {
    /// A deployment that never leaves `Defined`.
    pub const fn never(bit: u8) -> Self {
        Self {
            bit,
            start_height: u32::MAX,
            timeout_height: u32::MAX,
            threshold: u32::MAX,
        }
    }

    /// Whether a header version signals for this deployment. Signalling
    /// requires the BIP9 top bits `001` plus the deployment bit.
    pub fn signals(&self, version: i32) -> bool {
        let bits = version as u32;
        bits & 0xe000_0000 == 0x2000_0000 && bits >> self.bit & 1 == 1
    }

    /// State for the period starting at `period_start`, given the state of
    /// the previous period and the number of signalling headers counted in
    /// it. Transitions occur only at period boundaries.
    pub fn next_state(
        &self,
        previous: ThresholdState,
        period_start: u32,
        signal_count: u32,
    ) -> ThresholdState {
        match previous {
            ThresholdState::Defined => {
                if period_start >= self.timeout_height {
                    ThresholdState::Failed
                } else if period_start >= self.start_height {
                    ThresholdState::Started
                } else {
                    ThresholdState::Defined
                }
            }
            ThresholdState::Started => {
                if signal_count >= self.threshold {
                    ThresholdState::LockedIn
                } else if period_start >= self.timeout_height {
                    ThresholdState::Failed
                } else {
                    ThresholdState::Started
                }
            }
            ThresholdState::LockedIn => ThresholdState::Active,
            ThresholdState::Active => ThresholdState::Active,
            ThresholdState::Failed => ThresholdState::Failed,
        }
    }
}

/// Resolved deployment state at a height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bip9Status {
    pub state: ThresholdState,
    /// First block of the retarget period this state was computed for.
    pub period_start: u32,
}

/// Rolling counts of header versions over the sampling window, kept as
/// cumulative at-least counts since the legacy soft forks gate on them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionTally {
    pub sampled: u32,
    pub at_least_2: u32,
    pub at_least_3: u32,
    pub at_least_4: u32,
}

impl VersionTally {
    pub fn count(versions: &[i32]) -> Self {
        let mut tally = VersionTally {
            sampled: versions.len() as u32,
            ..VersionTally::default()
        };
        for &version in versions {
            if version >= 2 {
                tally.at_least_2 += 1;
            }
            if version >= 3 {
                tally.at_least_3 += 1;
            }
            if version >= 4 {
                tally.at_least_4 += 1;
            }
        }
        tally
    }

    pub fn count_at_least(&self, version: i32) -> u32 {
        match version {
            i32::MIN..=1 => self.sampled,
            2 => self.at_least_2,
            3 => self.at_least_3,
            _ => self.at_least_4,
        }
    }
}

/// Chain state for exactly one header height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStateSnapshot {
    pub height: u32,
    pub hash: BlockHash,
    pub version: i32,
    pub timestamp: u32,
    pub bits: CompactTarget,

    /// Rules active when validating the header at this height.
    pub forks: ForkFlags,
    /// Median of the previous eleven timestamps.
    pub median_time_past: u32,
    /// Expected compact target at this height.
    pub work_required: CompactTarget,
    /// Version counts over the trailing sample window.
    pub version_tally: VersionTally,
    /// Deployment bit 0 and bit 1 states.
    pub bip9: [Bip9Status; 2],
}

/// Write-once metadata attached to a header out-of-band.
///
/// Headers stay immutable; this map entry is the only mutable companion and
/// it is published exclusively under the organizer's write lock.
#[derive(Debug, Clone, Default)]
pub struct HeaderMetadata {
    /// Set when full-block validation already covered this header.
    pub validated: bool,
    /// Chain state populated for this header, set at most once.
    pub state: Option<std::sync::Arc<ChainStateSnapshot>>,
}

impl ChainStateSnapshot {
    /// Minimum header version admitted under the active rule set.
    pub fn minimum_version(&self) -> i32 {
        if self.forks.contains(ForkFlags::BIP65) {
            4
        } else if self.forks.contains(ForkFlags::BIP66) {
            3
        } else if self.forks.contains(ForkFlags::BIP34) {
            2
        } else {
            1
        }
    }

    /// Whether this tip is older than the stale horizon. Staleness gates
    /// policy decisions only, never consensus checks.
    pub fn is_stale(&self, now: u32, stale_secs: u32) -> bool {
        stale_secs != 0 && self.timestamp < now.saturating_sub(stale_secs)
    }
}
