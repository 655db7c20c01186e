use std::path::PathBuf;

use ::tracing::{debug, error, info_span};
use clap::Parser;
use service::Service;

mod config;
mod service;
mod tracing;

#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,

    #[arg(
        short,
        long = "request",
        value_name = "request manifest",
        help = "Gather request manifest to submit at startup, may be repeated"
    )]
    requests: Vec<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match config::OperatorConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error loading configuration: {err:#}");
            std::process::exit(1);
        }
    };

    let tracing_guard = match tracing::init(&config) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("error setting up tracing: {err:#}");
            std::process::exit(1);
        }
    };
    debug!(export_spans = tracing_guard.exports_spans(), "tracing initialized");
    let meter_provider = match metrics::init_provider(
        config.telemetry.enable_metrics,
        config.telemetry.endpoint.as_deref(),
    ) {
        Ok(provider) => provider,
        Err(err) => {
            error!("error setting up metrics: {:?}", err);
            std::process::exit(1);
        }
    };

    let root_span = info_span!("gather-operator");
    let _guard = root_span.enter();

    match Service::new(config) {
        Ok(service) => {
            if let Err(err) = service.seed_requests(&cli.requests).await {
                error!("error submitting gather requests: {:?}", err);
            }
            if let Err(err) = service.start().await {
                error!("error running gather operator: {:?}", err);
            }
        }
        Err(err) => error!("error creating service: {:?}", err),
    }

    if let Err(err) = meter_provider.shutdown() {
        error!("error shutting down meter provider: {:?}", err);
    }
    tracing_guard.shutdown();
}
