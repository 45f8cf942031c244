//! Error types for version bits evaluation

use std::borrow::Cow;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum VersionBitsError {
    #[error("Configuration error: {0}")]
    Config(Cow<'static, str>),

    #[error("Invalid deployment {name}: {reason}")]
    InvalidDeployment {
        name: String,
        reason: Cow<'static, str>,
    },

    #[error("Duplicate deployment name: {0}")]
    DuplicateDeployment(String),

    #[error("Deployments {first} and {second} both claim bit {bit} for overlapping time ranges")]
    BitCollision {
        first: String,
        second: String,
        bit: u8,
    },

    #[error("Unknown deployment: {0}")]
    UnknownDeployment(String),

    #[error("Insufficient chain history: ancestor at height {height} is not available")]
    InsufficientHistory { height: u64 },

    #[error("Requested ancestor height {requested} is above node height {height}")]
    InvalidAncestorHeight { requested: u64, height: u64 },

    #[error("Unknown block: {0}")]
    UnknownBlock(String),

    #[error("Unknown chain node index: {0}")]
    UnknownNode(usize),

    #[error("Header timestamp {0} does not fit the 32-bit header field")]
    TimestampOutOfRange(u64),

    #[error("Header {hash} references unknown parent {parent}")]
    OrphanHeader { hash: String, parent: String },

    #[error("Support for '{0}' rule requires explicit client support")]
    UnsupportedRule(String),
}

pub type Result<T> = std::result::Result<T, VersionBitsError>;
