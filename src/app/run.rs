use crate::cli::app_config::Cli;
use anyhow::Context;
use clap::Parser;
use httptracer::{prepare, HyperTransport, TraceResult, Tracer};
use std::time::Duration;
use tokio::time::timeout;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

pub async fn main_with_error() -> Result<(), anyhow::Error> {
    let cli: Cli = Cli::parse();
    init_logging(cli.verbosity)?;

    let result = do_request(&cli).await?;
    if cli.json {
        println!("{}", serde_json::to_string(&result)?);
    } else {
        println!("{}", result);
    }
    Ok(())
}

fn init_logging(verbosity: u8) -> Result<(), anyhow::Error> {
    let log_level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy()
        .add_directive("hyper_util=off".parse()?);
    let subscriber = tracing_subscriber::fmt()
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

async fn do_request(cli: &Cli) -> Result<TraceResult, anyhow::Error> {
    let request = prepare(&cli.host).context("invalid host")?;
    let transport = HyperTransport::new(cli.transport_config())?;
    let tracer = Tracer::new(transport);

    let result = match cli.max_time_option {
        Some(secs) => timeout(Duration::from_secs(secs), tracer.trace(request))
            .await
            .map_err(|_| anyhow!("Request timed out after {} seconds", secs))??,
        None => tracer.trace(request).await?,
    };
    Ok(result)
}
