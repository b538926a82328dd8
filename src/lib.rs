pub mod config;
pub mod pipeline;
pub mod pipeline_config;

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber. Filter from `RUST_LOG`, else the default.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .try_init();

    tracing::debug!("{} v{}", config::APP_NAME, config::APP_VERSION);
}
