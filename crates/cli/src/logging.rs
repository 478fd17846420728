use tracing_subscriber::EnvFilter;

/// Installs the tracing subscriber, seeded from the configured log level.
/// `RUST_LOG` takes precedence when set, and the `log` macros used across
/// the library are captured through the compatibility layer.
pub fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
