//! Chain-state population over the index and pending branches.

pub mod chain_state;
pub mod retarget;

pub use chain_state::ChainStatePopulator;
pub use retarget::{retarget, retarget_heights};
