use anyhow::{ensure, Context, Result};
use ledger_core::{
    constants::{DEFAULT_DIFFICULTY, MAX_DIFFICULTY, SYSTEM_MINER},
    MiningBudget,
};
use ledger_storage::OnCorrupt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_CHAIN_PATH: &str = "./data/blockchain_chain.json";

pub const ENV_CHAIN_PATH: &str = "LEDGER_CHAIN_PATH";
pub const ENV_DIFFICULTY: &str = "LEDGER_DIFFICULTY";
pub const ENV_ON_CORRUPT: &str = "LEDGER_ON_CORRUPT";
pub const ENV_MINER: &str = "LEDGER_MINER";
pub const ENV_MAX_MINING_ATTEMPTS: &str = "LEDGER_MAX_MINING_ATTEMPTS";

/// Settings for an [`crate::AnchorService`]. Deserializes from any serde
/// format with every field optional.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON file holding the chain
    pub chain_path: PathBuf,
    /// Leading zero hex characters required of each block hash. Only used
    /// when a new chain is created.
    pub difficulty: u32,
    pub on_corrupt: OnCorrupt,
    /// Recorded as `miner` in every anchored block
    pub miner_label: String,
    /// Give up on a block after this many hashes. `None` searches forever.
    pub max_mining_attempts: Option<u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            chain_path: PathBuf::from(DEFAULT_CHAIN_PATH),
            difficulty: DEFAULT_DIFFICULTY,
            on_corrupt: OnCorrupt::default(),
            miner_label: SYSTEM_MINER.to_owned(),
            max_mining_attempts: None,
        }
    }
}

impl LedgerConfig {
    /// Defaults overlaid with the `LEDGER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values returned by `lookup` for each `LEDGER_*` key.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_CHAIN_PATH) {
            self.chain_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(ENV_DIFFICULTY) {
            self.difficulty = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_DIFFICULTY}={raw:?} is not a valid difficulty"))?;
            ensure!(
                self.difficulty <= MAX_DIFFICULTY,
                "{ENV_DIFFICULTY}={} exceeds the maximum of {MAX_DIFFICULTY}",
                self.difficulty
            );
        }
        if let Some(raw) = lookup(ENV_ON_CORRUPT) {
            self.on_corrupt = raw.parse()?;
        }
        if let Some(miner) = lookup(ENV_MINER) {
            self.miner_label = miner;
        }
        if let Some(raw) = lookup(ENV_MAX_MINING_ATTEMPTS) {
            let raw = raw.trim();
            self.max_mining_attempts = if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(raw.parse().with_context(|| {
                    format!("{ENV_MAX_MINING_ATTEMPTS}={raw:?} is not a valid attempt count")
                })?)
            };
        }
        Ok(self)
    }

    pub fn mining_budget(&self) -> MiningBudget {
        MiningBudget {
            max_attempts: self.max_mining_attempts,
            cancel: None,
        }
    }
}
