use anyhow::Context;
use scanout::config::Config;

fn main() -> anyhow::Result<()> {
    let _guard = setup_tracing();
    let config = Config::setup().context("failed to read configuration")?;
    scanout::backend::run(config)
}

fn setup_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_appender::{rolling::never, non_blocking};
    std::fs::remove_file(".log").ok();
    let (log, guard) = non_blocking(never(".", ".log"));
    tracing_subscriber::fmt()
        .with_writer(log)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    guard
}
