use anyhow::{Context, Result};
use beach_rendezvous::{
    cli::{self, Cli, Commands},
    config::Config,
    server::{self, AppState},
    telemetry,
};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing("info")?;
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Pair { url }) => match cli::run_pair_check(&url).await {
            Ok(report) => {
                for step in &report.steps {
                    println!("ok  {step}");
                }
                println!("paired {} through {}", report.conn_id, url);
                Ok(())
            }
            Err(err) => {
                error!("pairing check failed: {err:#}");
                std::process::exit(1);
            }
        },
        Some(Commands::Serve { port }) => run_server(port).await,
        None => run_server(None).await,
    }
}

async fn run_server(port: Option<u16>) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(port) = port {
        config.port = port;
    }
    info!(
        instance = %config.instance_id,
        redis = config.redis_url.is_some(),
        inactivity_timeout = config.inactivity_timeout_seconds,
        grace_period = config.grace_period_seconds,
        "starting rendezvous server"
    );

    let metrics = telemetry::install_metrics()?;
    let registry = server::build_registry(&config).await?;
    let state = AppState {
        registry,
        metrics: Some(metrics),
    };

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("rendezvous server listening on {}", addr);
    server::serve(listener, state, server::shutdown_signal()).await
}
