use tracing_subscriber::EnvFilter;

use crate::config::AppEnv;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Production emits JSON lines;
/// dev and test keep human-readable console output.
pub fn init(env: AppEnv, level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match env {
        AppEnv::Prod => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))?,
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))?,
    }
    Ok(())
}
