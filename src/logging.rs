use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "MUTATOR_LOG";

/// Install the global subscriber. Logs go to stderr so `--json` output on
/// stdout stays parseable. Safe to call more than once; later calls are ignored.
pub fn init(verbose: bool) {
    let default = if verbose { "mutator_prep=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
