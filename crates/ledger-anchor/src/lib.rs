//! Anchoring service over the ledger: turns arbitrary event payloads into
//! mined, persisted blocks and answers integrity checks.

pub mod config;
pub mod logging;
pub mod service;

pub use config::LedgerConfig;
pub use logging::init_logging;
pub use service::{AnchorReceipt, AnchorService};
