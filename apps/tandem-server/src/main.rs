use anyhow::Result;
use clap::Parser;
use tandem_server::cli::{self, Cli, Commands};
use tandem_server::config::ServerConfig;
use tandem_server::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.serve.log_filter)?;

    if let Some(Commands::Probe(args)) = cli.command {
        return cli::run_probe(args).await;
    }

    let config = ServerConfig::try_from(cli.serve)?;
    let metrics = telemetry::install_metrics()?;
    tandem_server::run(config, Some(metrics)).await
}
