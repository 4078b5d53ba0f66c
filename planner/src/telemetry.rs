use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber and the `log` bridge. Filtering follows
/// `RUST_LOG`; defaults to `info` when unset.
pub fn init_tracing() {
    let _ = LogTracer::init();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
