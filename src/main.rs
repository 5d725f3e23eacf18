//! Connect authorization gateway
//!
//! Terminates mutual TLS, asks the Authorize endpoint whether the client
//! certificate's identity may reach the target service, and either passes
//! the connection through to the upstream or closes it.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use connect_authz_gateway::{
    authorize::{AuthorizationRequest, AuthorizationVerdict, Authorizer, HttpAuthorizer},
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
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
        Some(Command::Authorize { ref uri, ref serial }) => run_authorize(&config, uri, serial).await,
        Some(Command::CheckConfig) => run_check_config(&config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> connect_authz_gateway::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(ref listen) = cli.listen {
        config.listener.address.clone_from(listen);
    }
    if let Some(ref admin) = cli.admin {
        config.admin.address.clone_from(admin);
    }
    if let Some(ref target) = cli.target {
        config.authorize.target.clone_from(target);
    }
    Ok(config)
}

/// Validate configuration and TLS material without serving
fn run_check_config(config: &Config) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("❌ {e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = connect_authz_gateway::mtls::build_tls_config(&config.tls) {
        eprintln!("❌ {e}");
        return ExitCode::FAILURE;
    }
    println!("✅ Configuration is valid");
    println!("   Listener:  {}", config.listener.address);
    println!("   Upstream:  {}", config.upstream.address);
    println!("   Target:    {}", config.authorize.target);
    println!("   Authorize: {}{}", config.authorize.endpoint, config.authorize.path);
    ExitCode::SUCCESS
}

/// Ask for a single verdict and print it as JSON
async fn run_authorize(config: &Config, uri: &str, serial: &str) -> ExitCode {
    match query_verdict(config, uri, serial).await {
        Ok((verdict, json)) => {
            println!("{json}");
            if verdict.authorized {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

async fn query_verdict(
    config: &Config,
    uri: &str,
    serial: &str,
) -> connect_authz_gateway::Result<(AuthorizationVerdict, String)> {
    let gateway_config = config.gateway_config()?;
    let authorizer = HttpAuthorizer::new(&gateway_config)?;
    let request = AuthorizationRequest::new(&gateway_config.target, uri, serial);
    let verdict = authorizer.authorize(&request).await?;
    let json = serde_json::to_string_pretty(&verdict)?;
    Ok((verdict, json))
}

/// Run the gateway server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listener.address,
        upstream = %config.upstream.address,
        target_service = %config.authorize.target,
        "Starting Connect authorization gateway"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!(fatal = e.is_fatal(), "Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
