use anyhow::{anyhow, Result};
use ledger_core::{ChainState, ChainStore};
use std::sync::Mutex;

/// In-process store for tests and for hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
  state: Mutex<Option<ChainState>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_state(state: ChainState) -> Self {
    Self {
      state: Mutex::new(Some(state)),
    }
  }

  /// Copy of whatever was saved last.
  pub fn snapshot(&self) -> Option<ChainState> {
    self.state.lock().ok().and_then(|guard| guard.clone())
  }
}

impl ChainStore for MemoryStore {
  fn load(&self) -> Result<Option<ChainState>> {
    let guard = self
      .state
      .lock()
      .map_err(|_| anyhow!("memory store lock poisoned"))?;
    Ok(guard.clone())
  }

  fn save(&self, state: &ChainState) -> Result<()> {
    let mut guard = self
      .state
      .lock()
      .map_err(|_| anyhow!("memory store lock poisoned"))?;
    *guard = Some(state.clone());
    Ok(())
  }
}
