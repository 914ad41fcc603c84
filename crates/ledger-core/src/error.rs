use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("no pending transactions to mine")]
    NoPendingTransactions,

    #[error("chain has no blocks")]
    ChainEmpty,

    #[error("mining gave up after {attempts} attempts")]
    MiningAborted { attempts: u64 },

    #[error("mining cancelled after {attempts} attempts")]
    MiningCancelled { attempts: u64 },

    #[error("difficulty {difficulty} is out of range, at most {max} is attainable")]
    InvalidDifficulty { difficulty: u32, max: u32 },

    #[error("chain state is corrupted: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// First broken invariant found by [`crate::chain::Chain::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainViolation {
    Empty,
    BadGenesis { previous_hash: String },
    IndexMismatch { position: usize, index: u64 },
    HashMismatch { index: u64, stored: String, computed: String },
    BrokenLink { index: u64, expected: String, found: String },
    InsufficientWork { index: u64, difficulty: u32 },
}

impl std::fmt::Display for ChainViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "chain is empty"),
            Self::BadGenesis { previous_hash } => {
                write!(f, "genesis block links to {previous_hash:?}")
            }
            Self::IndexMismatch { position, index } => {
                write!(f, "block at position {position} carries index {index}")
            }
            Self::HashMismatch {
                index,
                stored,
                computed,
            } => write!(
                f,
                "block {index} stores hash {stored} but recomputes to {computed}"
            ),
            Self::BrokenLink {
                index,
                expected,
                found,
            } => write!(
                f,
                "block {index} links to {found}, previous block hash is {expected}"
            ),
            Self::InsufficientWork { index, difficulty } => write!(
                f,
                "block {index} hash lacks {difficulty} leading zero hex chars"
            ),
        }
    }
}
