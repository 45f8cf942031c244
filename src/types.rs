//! Core types shared by the version bits machinery

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::constants::*;
use crate::error::VersionBitsError;

/// Block height
pub type Height = u64;

/// Block hash: newtype wrapper for type safety
///
/// Prevents mixing up block hashes with other 32-byte values (e.g. merkle roots).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// All-zero hash, used as the previous hash of genesis
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    /// Hex encoding in display (byte-reversed) order
    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Block header fields relevant to version bits evaluation
///
/// The full 80-byte header is kept so block identity is the real double-SHA256
/// header hash rather than something derived from height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block_hash: BlockHash,
    pub merkle_root: [u8; 32],
    /// Seconds since the epoch; must fit the 32-bit header field
    pub timestamp: u64,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Serialize the header in Bitcoin wire format (80 bytes)
    pub fn serialize(&self) -> [u8; 80] {
        let mut data = [0u8; 80];
        data[0..4].copy_from_slice(&self.version.to_le_bytes());
        data[4..36].copy_from_slice(&self.prev_block_hash.0);
        data[36..68].copy_from_slice(&self.merkle_root);
        // Low 32 bits; ChainIndex rejects headers whose timestamp does not fit
        data[68..72].copy_from_slice(&(self.timestamp as u32).to_le_bytes());
        data[72..76].copy_from_slice(&self.bits.to_le_bytes());
        data[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        data
    }

    /// Double SHA256 of the serialized header
    pub fn hash(&self) -> BlockHash {
        let first = Sha256::digest(self.serialize());
        let second = Sha256::digest(first);
        let mut out = [0u8; 32];
        out.copy_from_slice(&second);
        BlockHash(out)
    }

    /// Whether the version field uses the version bits scheme at all
    #[inline]
    pub fn uses_version_bits(&self) -> bool {
        self.version & VERSIONBITS_TOP_MASK == VERSIONBITS_TOP_BITS
    }
}

/// Network selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    /// Signalling window and lock-in threshold used by this network's deployments
    pub fn versionbits_params(self) -> VersionBitsParams {
        match self {
            Network::Mainnet => VersionBitsParams {
                period: MAINNET_CONFIRMATION_WINDOW,
                threshold: MAINNET_ACTIVATION_THRESHOLD,
            },
            Network::Testnet => VersionBitsParams {
                period: TESTNET_CONFIRMATION_WINDOW,
                threshold: TESTNET_ACTIVATION_THRESHOLD,
            },
            Network::Regtest => VersionBitsParams {
                period: REGTEST_CONFIRMATION_WINDOW,
                threshold: REGTEST_ACTIVATION_THRESHOLD,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Regtest => "regtest",
        }
    }
}

impl FromStr for Network {
    type Err = VersionBitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Ok(Network::Mainnet),
            "test" | "testnet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(VersionBitsError::Config(
                format!("unknown network '{other}'").into(),
            )),
        }
    }
}

/// Chain-wide signalling window and threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBitsParams {
    /// Blocks per signalling period
    pub period: u32,
    /// Signalling blocks needed within one period
    pub threshold: u32,
}
