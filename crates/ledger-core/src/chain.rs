use crate::{
    constants::{GENESIS_MESSAGE, GENESIS_PREVIOUS_HASH, MAX_DIFFICULTY},
    error::{ChainViolation, LedgerError, Result},
    mine::MiningBudget,
    now_secs, Block, BlockRecord, Transaction,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Trait the storage backends implement to persist a chain.
/// This lives in `ledger-core` to avoid a circular dependency.
pub trait ChainStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> anyhow::Result<Option<ChainState>>;
    /// Overwrite whatever was stored before.
    fn save(&self, state: &ChainState) -> anyhow::Result<()>;
}

/// Flat, ordered snapshot of a chain as it is written to storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainState {
    pub difficulty: u32,
    #[serde(default)]
    pub chain: Vec<BlockRecord>,
    #[serde(default)]
    pub pending_transactions: Vec<Transaction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChainSummary {
    pub height: u64,
    pub tip_hash: Option<String>,
    pub difficulty: u32,
    pub pending: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ValidationMode {
    /// Links, recomputed hashes and proof of work.
    #[default]
    Full,
    /// Links and recomputed hashes only.
    Structure,
}

/// Append-only block list plus the queue of transactions awaiting a block.
#[derive(Clone, Debug)]
pub struct Chain {
    blocks: Vec<Block>,
    difficulty: u32,
    pending_transactions: Vec<Transaction>,
}

impl Chain {
    /// A fresh chain holding only a mined genesis block.
    pub fn new(difficulty: u32) -> Result<Self> {
        Self::new_with(difficulty, &MiningBudget::unbounded())
    }

    /// Like [`Chain::new`], with the genesis search limited by `budget`.
    pub fn new_with(difficulty: u32, budget: &MiningBudget) -> Result<Self> {
        check_difficulty(difficulty)?;
        let mut chain = Self {
            blocks: Vec::new(),
            difficulty,
            pending_transactions: Vec::new(),
        };
        chain.create_genesis(budget)?;
        Ok(chain)
    }

    fn create_genesis(&mut self, budget: &MiningBudget) -> Result<()> {
        let mut genesis = Block::new(
            0,
            now_secs(),
            json!({ "message": GENESIS_MESSAGE }),
            GENESIS_PREVIOUS_HASH,
        );
        genesis.mine_with(self.difficulty, budget)?;
        info!(hash = genesis.hash(), difficulty = self.difficulty, "genesis block created");
        self.blocks.push(genesis);
        Ok(())
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending_transactions
    }

    pub fn latest_block(&self) -> Result<&Block> {
        self.blocks.last().ok_or(LedgerError::ChainEmpty)
    }

    /// Queue `payload` for the next block and return its transaction id.
    pub fn add_transaction(&mut self, payload: Value) -> String {
        let tx = Transaction::new(payload);
        let id = tx.tx_id.clone();
        debug!(tx_id = %id, "transaction queued");
        self.pending_transactions.push(tx);
        id
    }

    /// Drop a queued transaction. Returns whether it was found.
    pub fn discard_pending(&mut self, tx_id: &str) -> bool {
        match self.pending_transactions.iter().position(|tx| tx.tx_id == tx_id) {
            Some(pos) => {
                self.pending_transactions.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn mine_pending(&mut self, miner: &str) -> Result<&Block> {
        self.mine_pending_with(miner, &MiningBudget::unbounded())
    }

    /// Fold every pending transaction into one mined block.
    ///
    /// Nothing changes unless mining succeeds: on error the queue and the
    /// block list are exactly as before.
    pub fn mine_pending_with(&mut self, miner: &str, budget: &MiningBudget) -> Result<&Block> {
        if self.pending_transactions.is_empty() {
            return Err(LedgerError::NoPendingTransactions);
        }
        let transactions: Vec<Value> = self
            .pending_transactions
            .iter()
            .map(Transaction::to_value)
            .collect();
        let data = json!({ "transactions": transactions, "miner": miner });
        let block = self.seal_next(data, budget)?;
        self.pending_transactions.clear();
        self.push(block)
    }

    /// Mine a block whose payload is `event` itself, bypassing the queue.
    pub fn append_event(&mut self, event: Value, budget: &MiningBudget) -> Result<&Block> {
        let block = self.seal_next(event, budget)?;
        self.push(block)
    }

    fn seal_next(&self, data: Value, budget: &MiningBudget) -> Result<Block> {
        let previous_hash = self.latest_block()?.hash().to_owned();
        let mut block = Block::new(self.blocks.len() as u64, now_secs(), data, previous_hash);
        block.mine_with(self.difficulty, budget)?;
        Ok(block)
    }

    fn push(&mut self, block: Block) -> Result<&Block> {
        info!(index = block.index(), hash = block.hash(), "block appended");
        self.blocks.push(block);
        self.latest_block()
    }

    pub fn is_valid(&self) -> bool {
        match self.validate(ValidationMode::Full) {
            Ok(()) => true,
            Err(violation) => {
                warn!(%violation, "chain validation failed");
                false
            }
        }
    }

    /// Scan from genesis upward and report the first broken invariant.
    pub fn validate(&self, mode: ValidationMode) -> std::result::Result<(), ChainViolation> {
        let genesis = self.blocks.first().ok_or(ChainViolation::Empty)?;
        if genesis.previous_hash() != GENESIS_PREVIOUS_HASH {
            return Err(ChainViolation::BadGenesis {
                previous_hash: genesis.previous_hash().to_owned(),
            });
        }

        for (position, block) in self.blocks.iter().enumerate() {
            if block.index() != position as u64 {
                return Err(ChainViolation::IndexMismatch {
                    position,
                    index: block.index(),
                });
            }
            let computed = block.calculate_hash();
            if computed != block.hash() {
                return Err(ChainViolation::HashMismatch {
                    index: block.index(),
                    stored: block.hash().to_owned(),
                    computed,
                });
            }
            if position > 0 {
                let previous = &self.blocks[position - 1];
                if block.previous_hash() != previous.hash() {
                    return Err(ChainViolation::BrokenLink {
                        index: block.index(),
                        expected: previous.hash().to_owned(),
                        found: block.previous_hash().to_owned(),
                    });
                }
            }
            if mode == ValidationMode::Full && !block.meets_difficulty(self.difficulty) {
                return Err(ChainViolation::InsufficientWork {
                    index: block.index(),
                    difficulty: self.difficulty,
                });
            }
        }
        Ok(())
    }

    /// Blocks whose payload, or any transaction payload inside it, has
    /// `field` equal to `value`. Returned in chain order.
    pub fn trace_history(&self, field: &str, value: &Value) -> Vec<&Block> {
        self.blocks
            .iter()
            .filter(|block| payload_mentions(block.data(), field, value))
            .collect()
    }

    pub fn summary(&self) -> ChainSummary {
        ChainSummary {
            height: self.blocks.len().saturating_sub(1) as u64,
            tip_hash: self.blocks.last().map(|b| b.hash().to_owned()),
            difficulty: self.difficulty,
            pending: self.pending_transactions.len(),
        }
    }

    pub fn export_state(&self) -> ChainState {
        ChainState {
            difficulty: self.difficulty,
            chain: self.blocks.iter().map(Block::to_record).collect(),
            pending_transactions: self.pending_transactions.clone(),
        }
    }

    pub fn import_state(state: ChainState) -> Result<Self> {
        Self::import_state_with(state, &MiningBudget::unbounded())
    }

    /// Rebuild a chain from storage without re-mining. An empty block list
    /// gets a new genesis mined within `budget`; indices out of sequence or
    /// an unattainable difficulty are rejected. Hashes are left for
    /// [`Chain::validate`].
    pub fn import_state_with(state: ChainState, budget: &MiningBudget) -> Result<Self> {
        if state.difficulty > MAX_DIFFICULTY {
            return Err(LedgerError::Corrupted(format!(
                "stored difficulty {} exceeds {MAX_DIFFICULTY}",
                state.difficulty
            )));
        }
        for (position, record) in state.chain.iter().enumerate() {
            if record.index != position as u64 {
                return Err(LedgerError::Corrupted(format!(
                    "block at position {position} has index {}",
                    record.index
                )));
            }
        }

        let mut chain = Self {
            blocks: state.chain.into_iter().map(Block::from_record).collect(),
            difficulty: state.difficulty,
            pending_transactions: state.pending_transactions,
        };
        if chain.blocks.is_empty() {
            warn!("imported state has no blocks, creating genesis");
            chain.create_genesis(budget)?;
        }
        debug!(
            blocks = chain.blocks.len(),
            pending = chain.pending_transactions.len(),
            "chain imported"
        );
        Ok(chain)
    }
}

fn check_difficulty(difficulty: u32) -> Result<()> {
    if difficulty > MAX_DIFFICULTY {
        return Err(LedgerError::InvalidDifficulty {
            difficulty,
            max: MAX_DIFFICULTY,
        });
    }
    Ok(())
}

fn payload_mentions(data: &Value, field: &str, value: &Value) -> bool {
    if data.get(field) == Some(value) {
        return true;
    }
    data.get("transactions")
        .and_then(Value::as_array)
        .is_some_and(|txs| {
            txs.iter()
                .any(|tx| tx.get("payload").and_then(|p| p.get(field)) == Some(value))
        })
}
