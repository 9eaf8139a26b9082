//! Header-chain organizer core.
//!
//! This library implements the header path of a blockchain node: it ingests
//! newly received block headers, decides whether each one extends, forks, or
//! is rejected against the current candidate chain, and atomically
//! reorganizes the candidate index when a branch carries strictly more
//! proof-of-work. Alongside organization it assembles the chain state
//! (active forks, median time past, required bits, version tallies, BIP9
//! deployment states) needed to contextually validate the next header.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use header_organizer::chain::MemoryChainIndex;
//! use header_organizer::{HeaderOrganizer, NetworkParams, OrganizerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let params = NetworkParams::regtest();
//!     let index = Arc::new(MemoryChainIndex::new(params.genesis));
//!     let organizer = Arc::new(HeaderOrganizer::new(
//!         index,
//!         params,
//!         OrganizerConfig::default(),
//!     ));
//!     organizer.start();
//!
//!     // organizer.organize(header).await drives one submission;
//!     // organizer.organize_with(header, handler) delivers the outcome
//!     // through a callback instead.
//! }
//! ```
//!
//! # Architecture
//!
//! - [`chain`]: the [`chain::ChainIndex`] contract with an in-memory
//!   implementation, the pending-header pool, branches, work accounting,
//!   checkpoints, and chain-state types.
//! - [`populate`]: chain-state population over the index with pending-branch
//!   overlay, including difficulty retargeting.
//! - [`validation`]: context-free and context-dependent header checks.
//! - [`organizer`]: the single-writer coordination of one submission under a
//!   prioritized reader-writer lock.
//!
//! Out of scope by design: networking, full-block validation, UTXO state,
//! script execution, and durable index storage — those are collaborators
//! behind narrow interfaces.

pub mod chain;
pub mod config;
pub mod error;
pub mod lock;
pub mod logging;
pub mod organizer;
pub mod populate;
pub mod types;
pub mod validation;

// Re-export main types for convenience.
pub use chain::{ChainIndex, ChainStateSnapshot, ChainWork, ForkFlags};
pub use config::{NetworkParams, OrganizerConfig};
pub use error::{
    ChainError, ChainResult, LoggingError, LoggingResult, OrganizeError, OrganizeResult,
    ValidationError, ValidationResult,
};
pub use lock::PrioritizedRwLock;
pub use logging::{init_console_logging, init_logging, LogFileConfig, LoggingConfig, LoggingGuard};
pub use organizer::{HeaderOrganizer, OrganizerState};
pub use populate::ChainStatePopulator;
pub use tracing::level_filters::LevelFilter;
pub use types::{ForkPoint, HashedHeader, OrganizerStats};
pub use validation::HeaderValidator;

// Re-export commonly used bitcoin types.
pub use bitcoin::{block::Header as BlockHeader, BlockHash, CompactTarget, Network, Target};

/// Current version of the header-organizer library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
