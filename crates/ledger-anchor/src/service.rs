use crate::config::LedgerConfig;
use anyhow::{anyhow, Context, Result};
use ledger_core::{
    BlockRecord, CancelToken, Chain, ChainState, ChainStore, ChainSummary, MiningBudget,
};
use ledger_storage::{load_or_init_with, JsonFileStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info};

/// Proof that a payload was included in a mined block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    pub tx_id: String,
    pub block_hash: String,
    pub block_index: u64,
    /// Timestamp of the block, Unix seconds
    pub timestamp: u64,
}

/// Entry point for the rest of the system: every payload handed to
/// [`AnchorService::anchor`] gets its own mined, persisted block.
///
/// Clones share one chain. Mutations hold the write lock from queueing the
/// transaction until the state is saved; reads share the read lock.
pub struct AnchorService<S: ChainStore = JsonFileStore> {
    chain: Arc<RwLock<Chain>>,
    store: Arc<S>,
    miner_label: String,
    budget: MiningBudget,
}

impl<S: ChainStore> Clone for AnchorService<S> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            store: Arc::clone(&self.store),
            miner_label: self.miner_label.clone(),
            budget: self.budget.clone(),
        }
    }
}

impl AnchorService<JsonFileStore> {
    /// Load the chain file named in `config`, creating it if needed. A new
    /// genesis block is mined under the configured attempt cap.
    pub fn open(config: &LedgerConfig) -> Result<Self> {
        let store = Arc::new(JsonFileStore::new(&config.chain_path));
        let chain = load_or_init_with(
            store.as_ref(),
            config.difficulty,
            config.on_corrupt,
            &config.mining_budget(),
        )
        .with_context(|| format!("opening chain at {}", config.chain_path.display()))?;
        Ok(Self::with_store(chain, store, config))
    }
}

impl<S: ChainStore> AnchorService<S> {
    pub fn with_store(chain: Chain, store: Arc<S>, config: &LedgerConfig) -> Self {
        Self {
            chain: Arc::new(RwLock::new(chain)),
            store,
            miner_label: config.miner_label.clone(),
            budget: config.mining_budget(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Chain>> {
        self.chain.read().map_err(|_| anyhow!("chain lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Chain>> {
        self.chain.write().map_err(|_| anyhow!("chain lock poisoned"))
    }

    /// Queue `payload`, mine it into a block, persist, and return the receipt.
    ///
    /// If mining fails nothing changes. If only the save fails, the mined
    /// block stays in memory and is written by the next successful save, so
    /// the payload is already anchored and must not be retried.
    pub fn anchor(&self, payload: Value) -> Result<AnchorReceipt> {
        self.anchor_with_budget(payload, &self.budget)
    }

    /// Like [`AnchorService::anchor`], but mining stops when `token` fires.
    pub fn anchor_with_cancel(&self, payload: Value, token: CancelToken) -> Result<AnchorReceipt> {
        let budget = self.budget.clone().cancel_on(token);
        self.anchor_with_budget(payload, &budget)
    }

    fn anchor_with_budget(&self, payload: Value, budget: &MiningBudget) -> Result<AnchorReceipt> {
        let mut chain = self.write()?;
        let tx_id = chain.add_transaction(payload);

        let mined = chain
            .mine_pending_with(&self.miner_label, budget)
            .map(|block| AnchorReceipt {
                tx_id: tx_id.clone(),
                block_hash: block.hash().to_owned(),
                block_index: block.index(),
                timestamp: block.timestamp(),
            });
        let receipt = match mined {
            Ok(receipt) => receipt,
            Err(err) => {
                chain.discard_pending(&tx_id);
                return Err(err.into());
            }
        };

        self.persist(&chain, receipt.block_index)?;
        info!(
            tx_id = %receipt.tx_id,
            block_index = receipt.block_index,
            block_hash = %receipt.block_hash,
            "payload anchored"
        );
        Ok(receipt)
    }

    /// Mine `event` itself as the payload of a new block, bypassing the
    /// transaction queue. Failure semantics match [`AnchorService::anchor`].
    pub fn record_event(&self, event: Value) -> Result<BlockRecord> {
        let mut chain = self.write()?;
        let record = chain.append_event(event, &self.budget)?.to_record();
        self.persist(&chain, record.index)?;
        info!(block_index = record.index, block_hash = %record.hash, "event recorded");
        Ok(record)
    }

    fn persist(&self, chain: &Chain, block_index: u64) -> Result<()> {
        self.store.save(&chain.export_state()).map_err(|err| {
            error!(block_index, "mined block was not persisted: {err:#}");
            err.context("persisting anchored block")
        })
    }

    /// Check every link, hash and proof of work. A poisoned lock reports
    /// `false`.
    pub fn verify_chain(&self) -> bool {
        match self.read() {
            Ok(chain) => chain.is_valid(),
            Err(err) => {
                error!("cannot verify chain: {err:#}");
                false
            }
        }
    }

    /// Every block that anchored an event for `batch_number`, oldest first.
    pub fn trace_history(&self, batch_number: &str) -> Result<Vec<BlockRecord>> {
        let chain = self.read()?;
        Ok(chain
            .trace_history("batch_number", &Value::from(batch_number))
            .into_iter()
            .map(|block| block.to_record())
            .collect())
    }

    pub fn summary(&self) -> Result<ChainSummary> {
        Ok(self.read()?.summary())
    }

    pub fn export_state(&self) -> Result<ChainState> {
        Ok(self.read()?.export_state())
    }
}

impl<S: ChainStore + 'static> AnchorService<S> {
    /// Run [`AnchorService::anchor`] on tokio's blocking pool so the proof of
    /// work does not stall async workers.
    pub async fn anchor_async(&self, payload: Value) -> Result<AnchorReceipt> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.anchor(payload))
            .await
            .context("anchor worker panicked")?
    }
}
