use tracing::subscriber::set_global_default;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// Installs the global subscriber.
///
/// Bunyan JSON lines on stdout by default; `LOG_FORMAT=pretty` switches to the
/// human-readable formatter. Filtering follows `RUST_LOG` (default `info`).
pub fn init_telemetry(name: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let pretty = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("pretty"))
        .unwrap_or(false);

    if pretty {
        let subscriber = Registry::default()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true));
        set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default()
            .with(env_filter)
            .with(JsonStorageLayer)
            .with(BunyanFormattingLayer::new(name.to_string(), std::io::stdout));
        set_global_default(subscriber)?;
    }
    Ok(())
}
