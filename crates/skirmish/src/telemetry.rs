//! Tracing setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "skirmish=info";

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`, falling back
/// to `default_filter`.
///
/// Returns `false` if a global subscriber was already installed, which is
/// harmless in tests that call this more than once.
pub fn init_tracing(default_filter: &str) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(DEFAULT_FILTER);
        assert!(!init_tracing(DEFAULT_FILTER));
    }
}
