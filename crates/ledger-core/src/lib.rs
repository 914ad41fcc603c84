//! Hash-linked, proof-of-work sealed chain used to anchor domain events.
//!
//! A [`Block`] hashes a canonical JSON encoding of its five header fields, so
//! any implementation that follows the same encoding produces byte-identical
//! hashes for identical inputs.

pub mod chain;
pub mod constants;
pub mod error;
pub mod mine;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

pub use chain::{Chain, ChainState, ChainStore, ChainSummary, ValidationMode};
pub use error::{ChainViolation, LedgerError, Result};
pub use mine::{CancelToken, MiningBudget};

pub type Hash = [u8; 32];

/// Current Unix time in whole seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Compact JSON with object keys sorted by byte order at every depth.
/// Strings are emitted as UTF-8; non-ASCII characters are not escaped.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&json_string(key));
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

fn json_string(s: &str) -> String {
    Value::from(s).to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_id: String,
    pub payload: Value,
    pub created_at: u64,
}

impl Transaction {
    /// Wrap `payload` with a fresh random identifier and the current time.
    pub fn new(payload: Value) -> Self {
        let id: [u8; 16] = rand::random();
        Self {
            tx_id: hex::encode(id),
            payload,
            created_at: now_secs(),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "tx_id": self.tx_id,
            "payload": self.payload,
            "created_at": self.created_at,
        })
    }
}

/// The bytes hashed for a block, split around the nonce so mining only
/// re-serializes the nonce on every attempt.
///
/// Keys appear in sorted order: `data`, `index`, `nonce`, `previous_hash`,
/// `timestamp`.
#[derive(Clone, Debug)]
pub(crate) struct HashPreimage {
    prefix: Vec<u8>,
    suffix: Vec<u8>,
}

impl HashPreimage {
    pub(crate) fn digest(&self, nonce: u64) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(&self.prefix);
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(&self.suffix);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest[..]);
        out
    }
}

/// Flat field mapping used for persistence. The payload is stored as `data`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub index: u64,
    pub timestamp: u64,
    pub data: Value,
    pub previous_hash: String,
    pub nonce: u64,
    pub hash: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    index: u64,
    timestamp: u64,
    data: Value,
    previous_hash: String,
    nonce: u64,
    hash: String,
}

impl Block {
    /// Build an unmined block (nonce 0) with its hash computed immediately.
    pub fn new(index: u64, timestamp: u64, data: Value, previous_hash: impl Into<String>) -> Self {
        let mut block = Self {
            index,
            timestamp,
            data,
            previous_hash: previous_hash.into(),
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub(crate) fn preimage(&self) -> HashPreimage {
        let prefix = format!(
            "{{\"data\":{},\"index\":{},\"nonce\":",
            canonical_json(&self.data),
            self.index
        );
        let suffix = format!(
            ",\"previous_hash\":{},\"timestamp\":{}}}",
            json_string(&self.previous_hash),
            self.timestamp
        );
        HashPreimage {
            prefix: prefix.into_bytes(),
            suffix: suffix.into_bytes(),
        }
    }

    /// Recompute the hash from the current field values.
    pub fn calculate_hash(&self) -> String {
        hex::encode(self.preimage().digest(self.nonce))
    }

    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        pow::meets_difficulty(&self.hash, difficulty)
    }

    /// Search nonces upward from the current one until the difficulty is met.
    /// Returns the number of hashes tried.
    pub fn mine(&mut self, difficulty: u32) -> u64 {
        pow::mine_block(self, difficulty)
    }

    /// Bounded variant of [`Block::mine`].
    pub fn mine_with(&mut self, difficulty: u32, budget: &MiningBudget) -> Result<u64> {
        mine::mine_block_bounded(self, difficulty, budget)
    }

    pub(crate) fn seal(&mut self, nonce: u64, hash: &Hash) {
        self.nonce = nonce;
        self.hash = hex::encode(hash);
    }

    pub fn to_record(&self) -> BlockRecord {
        BlockRecord {
            index: self.index,
            timestamp: self.timestamp,
            data: self.data.clone(),
            previous_hash: self.previous_hash.clone(),
            nonce: self.nonce,
            hash: self.hash.clone(),
        }
    }

    /// Rebuild a block verbatim. The stored nonce and hash are trusted;
    /// integrity is checked later by chain validation.
    pub fn from_record(record: BlockRecord) -> Self {
        Self {
            index: record.index,
            timestamp: record.timestamp,
            data: record.data,
            previous_hash: record.previous_hash,
            nonce: record.nonce,
            hash: record.hash,
        }
    }
}

pub mod pow {
    use super::{Block, Hash};
    use crate::constants::{BITS_PER_HEX_CHAR, PROGRESS_LOG_INTERVAL};
    use tracing::debug;

    /// Mine the block by incrementing the nonce until its hex hash starts with
    /// `difficulty` zero characters. Unbounded; returns the attempts made.
    pub fn mine_block(block: &mut Block, difficulty: u32) -> u64 {
        let preimage = block.preimage();
        let mut nonce = block.nonce;
        let mut attempts = 0u64;
        loop {
            let h = preimage.digest(nonce);
            attempts += 1;
            if hash_meets_difficulty(&h, difficulty) {
                block.seal(nonce, &h);
                return attempts;
            }
            if attempts % PROGRESS_LOG_INTERVAL == 0 {
                debug!(index = block.index, attempts, "still mining");
            }
            nonce = nonce.wrapping_add(1);
        }
    }

    pub fn count_leading_zero_bits(hash: &Hash) -> u32 {
        let mut total = 0u32;
        for b in hash {
            if *b == 0 {
                total += 8;
            } else {
                total += b.leading_zeros();
                break;
            }
        }
        total
    }

    /// Raw-digest form of the difficulty check: `d` zero hex chars is `4d`
    /// zero bits.
    pub fn hash_meets_difficulty(hash: &Hash, difficulty: u32) -> bool {
        count_leading_zero_bits(hash) >= difficulty.saturating_mul(BITS_PER_HEX_CHAR)
    }

    pub fn leading_zero_nibbles(hex_hash: &str) -> usize {
        hex_hash.bytes().take_while(|c| *c == b'0').count()
    }

    pub fn meets_difficulty(hex_hash: &str, difficulty: u32) -> bool {
        leading_zero_nibbles(hex_hash) >= difficulty as usize
    }
}
