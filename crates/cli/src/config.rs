//! Logging setup shared by every subcommand.

/// Install a `tracing` subscriber honoring `RUST_LOG`, defaulting to
/// warnings only so a clean `run` doesn't print diagnostic noise to
/// stderr.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
