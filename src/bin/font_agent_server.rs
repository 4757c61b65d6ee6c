//! Font agent server.
//!
//! Usage: `font-agent-server [CONFIG.toml]`, or `font-agent-server --example-config`
//! to print a configuration template. `FONT_AGENT_*` environment variables
//! override whatever the file sets.

use std::process::ExitCode;

use font_agent_protocol::{init_logging, AcceptAll, AgentServer, NetworkConfig, Result, TcpServer};
use tracing::{error, info};

fn load_config() -> Result<Option<NetworkConfig>> {
    let mut config = match std::env::args().nth(1).as_deref() {
        Some("--example-config") => {
            println!("{}", NetworkConfig::example_config());
            return Ok(None);
        }
        Some(path) => NetworkConfig::from_file(path)?,
        None => NetworkConfig::default(),
    };
    config.apply_env_overrides();
    config.validate_strict()?;
    Ok(Some(config))
}

async fn serve(config: NetworkConfig) -> Result<()> {
    init_logging(&config.logging)?;

    let mut server = TcpServer::new(config);
    let agents = AgentServer::attach(&mut server, AcceptAll);
    let listening = server.listen().await?;
    info!(address = %listening.local_addr(), "Font agent server ready");

    listening.run().await?;
    info!(agents = agents.directory().len(), "Server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load_config() {
        Ok(Some(config)) => config,
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("font-agent-server: {e}");
            return ExitCode::FAILURE;
        }
    };

    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            eprintln!("font-agent-server: {e}");
            ExitCode::FAILURE
        }
    }
}
