//! # blvm-versionbits
//!
//! BIP9 version bits soft-fork activation for the BLVM node.
//!
//! Miners signal readiness for a candidate rule change by setting a bit in the
//! block version. This crate tracks, for every registered deployment, the
//! state machine `DEFINED -> STARTED -> LOCKED_IN -> ACTIVE` (or `FAILED`)
//! over fixed-length signalling periods, and answers whether a rule is in
//! force for the block that would follow any given block, on any branch.
//!
//! ## Architecture
//!
//! - [`deployment`]: validated registry of deployments
//! - [`chain`]: read-only ancestor view over the block tree
//! - [`statistics`]: signalling counts within a period
//! - [`threshold`] and [`cache`]: the memoized state engine
//! - [`version`]: block version and block template rules
//! - [`activation`]: activation queries and status reports
//! - [`warnings`]: unknown-bit and unexpected-version warnings
//! - [`manager`]: owner of registry and caches, the usual entry point
//!
//! ## Design Principles
//!
//! 1. **Pure over chain history**: a state depends only on the ancestry of the
//!    block it is asked about, never on which branch is currently active
//! 2. **Memoized per boundary**: results are cached at period boundaries keyed
//!    by block identity, so forks never share entries
//! 3. **Validated up front**: conflicting deployments are rejected when the
//!    registry is built
//!
//! ## Usage
//!
//! ```rust
//! use blvm_versionbits::chain::ChainIndex;
//! use blvm_versionbits::manager::VersionBitsManager;
//! use blvm_versionbits::threshold::ThresholdState;
//! use blvm_versionbits::types::{BlockHash, BlockHeader, Network};
//!
//! let mut index = ChainIndex::new();
//! let genesis = index.insert_genesis(&BlockHeader {
//!     version: 1,
//!     prev_block_hash: BlockHash::ZERO,
//!     merkle_root: [0u8; 32],
//!     timestamp: 1_296_688_602,
//!     bits: 0x207f_ffff,
//!     nonce: 2,
//! })
//! .unwrap();
//! index.set_tip(genesis).unwrap();
//!
//! let manager = VersionBitsManager::for_network(Network::Regtest);
//! let state = manager.state(&index, "csv", index.tip()).unwrap();
//! assert_eq!(state, ThresholdState::Defined);
//! ```

pub mod activation;
pub mod bip113;
pub mod cache;
pub mod chain;
pub mod config;
pub mod constants;
pub mod deployment;
pub mod error;
pub mod manager;
pub mod statistics;
pub mod threshold;
pub mod types;
pub mod version;
pub mod warnings;

pub use activation::DeploymentStatus;
pub use chain::{AncestorView, ChainIndex, ChainNode, ClockRule, NodeId};
pub use config::VersionBitsConfig;
pub use deployment::{Deployment, DeploymentRegistry};
pub use error::{Result, VersionBitsError};
pub use manager::{VersionBitsContext, VersionBitsManager};
pub use statistics::PeriodStatistics;
pub use threshold::{ThresholdCondition, ThresholdState};
pub use version::BlockTemplateRules;
