use crate::{
    constants::{CANCEL_CHECK_INTERVAL, PROGRESS_LOG_INTERVAL},
    error::{LedgerError, Result},
    pow::hash_meets_difficulty,
    Block,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, info, warn};

/// Shared flag that asks an in-flight nonce search to stop.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Limits on a single proof-of-work search.
#[derive(Clone, Debug, Default)]
pub struct MiningBudget {
    pub max_attempts: Option<u64>,
    pub cancel: Option<CancelToken>,
}

impl MiningBudget {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(max_attempts: u64) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            cancel: None,
        }
    }

    pub fn cancel_on(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// Mines `block` like [`crate::pow::mine_block`] but gives up once the budget
/// is exhausted or its token fires. The block is only sealed on success.
pub fn mine_block_bounded(block: &mut Block, difficulty: u32, budget: &MiningBudget) -> Result<u64> {
    let preimage = block.preimage();
    let mut nonce = block.nonce();
    let mut attempts = 0u64;

    loop {
        if budget.max_attempts.is_some_and(|max| attempts >= max) {
            warn!(index = block.index(), attempts, difficulty, "mining budget exhausted");
            return Err(LedgerError::MiningAborted { attempts });
        }
        if attempts % CANCEL_CHECK_INTERVAL == 0 && budget.cancelled() {
            warn!(index = block.index(), attempts, "mining cancelled");
            return Err(LedgerError::MiningCancelled { attempts });
        }

        let h = preimage.digest(nonce);
        attempts += 1;
        if hash_meets_difficulty(&h, difficulty) {
            block.seal(nonce, &h);
            info!(
                "Mined block {} with nonce {} and hash {} after {} attempts",
                block.index(),
                nonce,
                block.hash(),
                attempts
            );
            return Ok(attempts);
        }
        if attempts % PROGRESS_LOG_INTERVAL == 0 {
            debug!(index = block.index(), attempts, "still mining");
        }
        nonce = nonce.wrapping_add(1);
    }
}
