// Logging setup
// Terraform owns stdout of a provider plugin, so all log output goes to stderr

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "AZURESQL_LOG";

/// Install the global tracing subscriber.
///
/// The filter comes from `AZURESQL_LOG` when set, otherwise `default_filter`
/// (e.g. `"azuresql_provider_lib=info"`). Calling this more than once is harmless.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}
