pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const BITS_PER_HEX_CHAR: u32 = 4;
pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const GENESIS_MESSAGE: &str = "Genesis Block - anchoring ledger";
pub const DEFAULT_DIFFICULTY: u32 = 2;
pub const SYSTEM_MINER: &str = "system";
pub const CANCEL_CHECK_INTERVAL: u64 = 1 << 12;
pub const PROGRESS_LOG_INTERVAL: u64 = 1 << 20;
/// A hex digest has only this many characters to be zero.
pub const MAX_DIFFICULTY: u32 = HASH_HEX_SIZE as u32;
