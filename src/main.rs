//! SSO Gateway - session-gated OAuth front for a remote resource API

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use sso_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::CheckConfig) => check_config(&config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

fn load_config(cli: &Cli) -> sso_gateway::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

fn check_config(config: &Config) -> ExitCode {
    match config.validate().and_then(|()| config.session.resolve_key().map(drop)) {
        Ok(()) => {
            println!("Configuration OK");
            println!("  listen:   {}:{}", config.server.host, config.server.port);
            println!("  provider: {}", config.oauth.authorize_url);
            println!("  redirect: {}", config.oauth.redirect_url);
            println!("  api:      {}", config.api.base_url);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        cache = config.cache.enabled,
        "Starting SSO Gateway"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
