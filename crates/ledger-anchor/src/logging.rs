use tracing_subscriber::{fmt, EnvFilter};

/// Install a global fmt subscriber. `RUST_LOG` overrides `default_level`,
/// e.g. `RUST_LOG=ledger_core=debug,ledger_anchor=info`.
///
/// Returns `false` when a subscriber was already installed, so hosts and
/// tests can call it more than once.
pub fn init_logging(default_level: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
