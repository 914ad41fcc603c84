use crate::StorageError;
use anyhow::{Context, Result};
use ledger_core::{ChainState, ChainStore};
use std::{
  fs,
  io::ErrorKind,
  path::{Path, PathBuf},
};
use tracing::{debug, info};

/// One chain per JSON file. Saves overwrite the file in place; a torn write
/// is caught by the loader's corruption policy.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
  path: PathBuf,
}

impl JsonFileStore {
  pub fn new<P: AsRef<Path>>(path: P) -> Self {
    let path = path.as_ref().to_path_buf();
    info!(path = %path.display(), "json chain store opened");
    Self { path }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl ChainStore for JsonFileStore {
  fn load(&self) -> Result<Option<ChainState>> {
    let bytes = match fs::read(&self.path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
      Err(e) => {
        return Err(e).with_context(|| format!("reading chain file {}", self.path.display()))
      }
    };
    let state: ChainState = serde_json::from_slice(&bytes).map_err(|e| {
      StorageError::Corrupted(format!("{}: {e}", self.path.display()))
    })?;
    debug!(blocks = state.chain.len(), "chain file parsed");
    Ok(Some(state))
  }

  fn save(&self, state: &ChainState) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
          .with_context(|| format!("creating directory {}", parent.display()))?;
      }
    }
    let bytes = serde_json::to_vec_pretty(state)?;
    fs::write(&self.path, bytes)
      .with_context(|| format!("writing chain file {}", self.path.display()))?;
    debug!(blocks = state.chain.len(), path = %self.path.display(), "chain saved");
    Ok(())
  }
}
