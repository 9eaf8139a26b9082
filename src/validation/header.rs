//! Header validation.
//!
//! `check` runs the context-free rules and never touches the chain;
//! `accept` runs the context-dependent rules against populated chain state.

use std::collections::HashMap;

use bitcoin::{BlockHash, Target};

use crate::chain::{ChainIndex, ChainStateSnapshot, HeaderBranch, HeaderMetadata};
use crate::config::NetworkParams;
use crate::error::{ValidationError, ValidationResult};
use crate::populate::ChainStatePopulator;
use crate::types::HashedHeader;

pub struct HeaderValidator {
    params: NetworkParams,
}

impl HeaderValidator {
    pub fn new(params: NetworkParams) -> Self {
        Self { params }
    }

    /// Context-free checks: structure, bits range, timestamp skew, and the
    /// proof-of-work digest. Runs before any lock is taken.
    pub fn check(&self, header: &HashedHeader, now: u32) -> ValidationResult<()> {
        let version = header.header().version.to_consensus();
        if version < 1 {
            return Err(ValidationError::InvalidVersion {
                got: version,
                minimum: 1,
            });
        }

        if header.has_null_prev() && header.hash() != self.params.genesis.hash() {
            return Err(ValidationError::NullPreviousHash);
        }

        let bits = header.header().bits;
        let target = Target::from_compact(bits);
        let limit = self.params.pow_limit_target();
        if target == Target::ZERO || target.to_be_bytes() > limit.to_be_bytes() {
            return Err(ValidationError::BitsOutOfRange {
                got: bits.to_consensus(),
            });
        }

        let timestamp = header.header().time;
        let limit_secs = now.saturating_add(self.params.timestamp_limit_secs);
        if timestamp > limit_secs {
            return Err(ValidationError::TimestampTooFar {
                timestamp,
                limit: limit_secs,
            });
        }

        if !target.is_met_by(header.pow_hash(self.params.scrypt)) {
            return Err(ValidationError::InvalidProofOfWork);
        }

        Ok(())
    }

    /// Context-dependent checks for the whole branch, bottom-up.
    ///
    /// Each header either short-circuits on its `validated` metadata, reuses
    /// a previously populated snapshot, or is populated from scratch —
    /// intermediate branch headers passed individual validation when they
    /// were first submitted, but the cache may be cold after a restart.
    /// Snapshots are recorded write-once into the metadata map, which the
    /// caller must hold under the write lock.
    pub async fn accept<C: ChainIndex>(
        &self,
        branch: &HeaderBranch,
        populator: &ChainStatePopulator<C>,
        metadata: &mut HashMap<BlockHash, HeaderMetadata>,
    ) -> ValidationResult<()> {
        for position in 0..branch.len() {
            let header = &branch.headers()[position];
            let hash = *header.hash();
            let height = match branch.height_at(position) {
                Some(height) => height,
                None => {
                    return Err(ValidationError::Populate(
                        "branch is not anchored".to_string(),
                    ))
                }
            };

            if metadata.get(&hash).is_some_and(|meta| meta.validated) {
                continue;
            }

            let cached = metadata.get(&hash).and_then(|meta| meta.state.clone());
            let snapshot = match cached {
                Some(snapshot) => snapshot,
                None => std::sync::Arc::new(
                    populator
                        .populate_branch(branch, position, true)
                        .await
                        .map_err(|e| ValidationError::Populate(e.to_string()))?,
                ),
            };

            self.accept_header(header, height, &snapshot)?;
            let meta = metadata.entry(hash).or_default();
            meta.state.get_or_insert(snapshot);
        }

        Ok(())
    }

    /// Contextual rules for one header against its snapshot.
    fn accept_header(
        &self,
        header: &HashedHeader,
        height: u32,
        snapshot: &ChainStateSnapshot,
    ) -> ValidationResult<()> {
        let bits = header.header().bits;
        if bits != snapshot.work_required {
            return Err(ValidationError::IncorrectBits {
                got: bits.to_consensus(),
                required: snapshot.work_required.to_consensus(),
            });
        }

        let timestamp = header.header().time;
        if timestamp <= snapshot.median_time_past {
            return Err(ValidationError::TimestampNotPastMedian {
                timestamp,
                median: snapshot.median_time_past,
            });
        }

        if !self.params.checkpoints.matches(height, header.hash()) {
            return Err(ValidationError::CheckpointMismatch { height });
        }

        let minimum = snapshot.minimum_version();
        let version = header.header().version.to_consensus();
        if version < minimum {
            return Err(ValidationError::InvalidVersion {
                got: version,
                minimum,
            });
        }

        Ok(())
    }
}
