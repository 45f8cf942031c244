//! Version bits constants (BIP9)

/// Top three bits every version-bits block carries: `001`
pub const VERSIONBITS_TOP_BITS: u32 = 0x2000_0000;

/// Mask selecting the top three bits of the version field
pub const VERSIONBITS_TOP_MASK: u32 = 0xE000_0000;

/// Number of bits available for deployments (bits 0-28)
pub const VERSIONBITS_NUM_BITS: u8 = 29;

/// Highest block version used before version bits were introduced
///
/// Versions at or below this value are never counted as "unexpected".
pub const VERSIONBITS_LAST_OLD_BLOCK_VERSION: u32 = 4;

/// Number of blocks used for median time-past (BIP113)
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Mainnet miner confirmation window: 2016 blocks
pub const MAINNET_CONFIRMATION_WINDOW: u32 = 2016;

/// Mainnet lock-in threshold: 95% of 2016, rounded up
pub const MAINNET_ACTIVATION_THRESHOLD: u32 = 1916;

/// Testnet miner confirmation window: 2016 blocks
pub const TESTNET_CONFIRMATION_WINDOW: u32 = 2016;

/// Testnet lock-in threshold: 75% of 2016
pub const TESTNET_ACTIVATION_THRESHOLD: u32 = 1512;

/// Regtest miner confirmation window
pub const REGTEST_CONFIRMATION_WINDOW: u32 = 844;

/// Regtest lock-in threshold: 75% of 844
pub const REGTEST_ACTIVATION_THRESHOLD: u32 = 633;

/// Timeout used by deployments that never expire
pub const NO_TIMEOUT: u64 = 999_999_999_999;

/// Number of recent blocks inspected for unexpected versions
pub const UNEXPECTED_VERSION_WINDOW: u32 = 100;

/// Unexpected versions in the window above which the node warns loudly
pub const UNEXPECTED_VERSION_THRESHOLD: u32 = UNEXPECTED_VERSION_WINDOW / 2;
