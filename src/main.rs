use std::time::Duration;

use auth_relay::{RelayConfig, RelayError, RelayServer, TargetOrigin};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "auth-relay",
    about = "Receive an OAuth redirect on loopback and print the result as JSON."
)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 3000)]
    port: u16,

    #[arg(long, default_value = "/")]
    path: String,

    /// Opener origin allowed to receive the relayed message. Relays to any
    /// origin when omitted.
    #[arg(long)]
    target_origin: Option<String>,

    /// Give up if the provider has not redirected back after this many
    /// seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Authorization URL to open in the system browser once the relay is
    /// listening.
    #[arg(long)]
    open: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("auth_relay=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = RelayConfig::new(cli.host, cli.port, cli.path);
    if let Some(origin) = cli.target_origin {
        config = config.with_target_origin(TargetOrigin::Origin(origin));
    }
    if let Some(secs) = cli.timeout_secs {
        config = config.with_timeout(Duration::from_secs(secs));
    }

    let mut handle = RelayServer::new(config).start().await?;
    eprintln!("Waiting for the provider redirect at {}", handle.redirect_uri());

    if let Some(url) = cli.open {
        if let Err(err) = webbrowser::open(&url) {
            eprintln!("Failed to open browser automatically: {err}");
        }
    }

    let result = handle.wait().await;
    handle.stop().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}
