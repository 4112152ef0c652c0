use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,warden_core=debug";

/// Install the global subscriber. Logs go to stderr so stdout carries only
/// command output.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}
