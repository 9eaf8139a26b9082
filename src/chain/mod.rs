//! Chain primitives: indexed-chain access, pending-header pooling, branch
//! construction, work accounting, checkpoints, and chain-state types.

pub mod branch;
pub mod checkpoints;
pub mod index;
pub mod pool;
pub mod state;
pub mod work;

pub use branch::HeaderBranch;
pub use checkpoints::{Checkpoint, CheckpointList};
pub use index::{ChainIndex, MemoryChainIndex};
pub use pool::{HeaderPool, PoolStats};
pub use state::{
    Bip9Deployment, Bip9Status, ChainStateSnapshot, ForkFlags, HeaderMetadata, ThresholdState,
    VersionTally,
};
pub use work::ChainWork;
