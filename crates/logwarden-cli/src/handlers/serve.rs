use anyhow::{Context, Result};
use logwarden_runtime::{Config, Server};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn run(data_dir: Option<&str>) -> Result<()> {
    let config = Config::load(data_dir)?;

    std::fs::create_dir_all(config.logs_dir())
        .with_context(|| format!("creating {}", config.logs_dir().display()))?;

    // Console plus a daily-rotated text log under <data>/logs/
    let file_appender = tracing_appender::rolling::daily(config.logs_dir(), "logwarden.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building the async runtime")?;

    runtime.block_on(Server::new(config).run())?;
    Ok(())
}
