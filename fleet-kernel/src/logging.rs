use tracing_subscriber::EnvFilter;

/// `RUST_LOG` l'emporte sur `log_level` de la config.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Installe le subscriber global ; sans effet s'il y en a déjà un (tests).
pub fn init_logging(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_target(false)
        .try_init();
}
