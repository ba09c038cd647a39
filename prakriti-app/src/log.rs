use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding the log filter, e.g. `prakriti_app=debug`
pub const LOG_ENV: &str = "PRAKRITI_LOG";

/// Install the global subscriber, writing to stderr so command output on
/// stdout stays clean. `verbose` overrides the filter with `debug`.
pub fn init_logging(verbose: bool) -> Result<()> {
    tracing_log::LogTracer::init()?;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()?;
    Ok(())
}
