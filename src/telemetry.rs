use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the log filter directives.
pub const LOG_ENV_VAR: &str = "TINDA_LEDGER_LOG";

/// Install a global fmt subscriber filtered by `TINDA_LEDGER_LOG`
/// (default `info`). Embedding services that own their subscriber skip this.
/// Returns false if a global subscriber was already set.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_refused() {
        let _ = init_tracing();
        assert!(!init_tracing());
        tracing::info!("subscriber installed");
    }
}
