pub mod json_store;
pub mod memory_store;

use anyhow::Result;
use ledger_core::{Chain, ChainStore, LedgerError, MiningBudget};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

pub use json_store::JsonFileStore;
pub use memory_store::MemoryStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("stored chain is corrupted: {0}")]
    Corrupted(String),

    #[error("unknown corruption policy {0:?}, expected \"reset\" or \"fail\"")]
    UnknownPolicy(String),
}

/// What `load_or_init` does with a stored chain it cannot read back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnCorrupt {
    /// Replace the stored state with a fresh chain.
    #[default]
    Reset,
    /// Return [`StorageError::Corrupted`] and leave storage untouched.
    Fail,
}

impl FromStr for OnCorrupt {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reset" => Ok(Self::Reset),
            "fail" => Ok(Self::Fail),
            other => Err(StorageError::UnknownPolicy(other.to_owned())),
        }
    }
}

/// Load the stored chain, or start a new one at `difficulty` and persist it
/// right away when nothing is stored.
///
/// A stored chain keeps its own difficulty. Unreadable state is handled per
/// `on_corrupt`; I/O failures other than corruption are always returned.
pub fn load_or_init<S: ChainStore + ?Sized>(
    store: &S,
    difficulty: u32,
    on_corrupt: OnCorrupt,
) -> Result<Chain> {
    load_or_init_with(store, difficulty, on_corrupt, &MiningBudget::unbounded())
}

/// Like [`load_or_init`], with any genesis search limited by `budget`. A
/// genesis that cannot be mined within it is an error, not corruption.
pub fn load_or_init_with<S: ChainStore + ?Sized>(
    store: &S,
    difficulty: u32,
    on_corrupt: OnCorrupt,
    budget: &MiningBudget,
) -> Result<Chain> {
    let state = match store.load() {
        Ok(Some(state)) => state,
        Ok(None) => {
            let chain = Chain::new_with(difficulty, budget)?;
            store.save(&chain.export_state())?;
            info!(difficulty, "initialized new chain");
            return Ok(chain);
        }
        Err(err) => match err.downcast_ref::<StorageError>() {
            Some(StorageError::Corrupted(reason)) => {
                let reason = reason.clone();
                return recover(store, difficulty, on_corrupt, budget, reason);
            }
            _ => return Err(err),
        },
    };

    match Chain::import_state_with(state, budget) {
        Ok(chain) => {
            if chain.difficulty() != difficulty {
                warn!(
                    stored = chain.difficulty(),
                    requested = difficulty,
                    "stored chain difficulty differs from configuration, keeping stored value"
                );
            }
            info!(blocks = chain.len(), "loaded chain");
            Ok(chain)
        }
        Err(LedgerError::Corrupted(reason)) => {
            recover(store, difficulty, on_corrupt, budget, reason)
        }
        Err(err) => Err(err.into()),
    }
}

fn recover<S: ChainStore + ?Sized>(
    store: &S,
    difficulty: u32,
    on_corrupt: OnCorrupt,
    budget: &MiningBudget,
    reason: String,
) -> Result<Chain> {
    match on_corrupt {
        OnCorrupt::Fail => Err(StorageError::Corrupted(reason).into()),
        OnCorrupt::Reset => {
            warn!(%reason, "stored chain unreadable, discarding it and starting fresh");
            let chain = Chain::new_with(difficulty, budget)?;
            store.save(&chain.export_state())?;
            Ok(chain)
        }
    }
}
