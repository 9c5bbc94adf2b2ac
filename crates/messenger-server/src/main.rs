//! Messenger session server.

use clap::Parser;
use messenger_server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "messenger-server")]
#[command(about = "Encrypted direct-messaging session server", long_about = None)]
struct Cli {
    /// Host or address to bind to.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 6074)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    info!("==============================================");
    info!("  messenger-server v{}", env!("CARGO_PKG_VERSION"));
    info!("==============================================");

    let server = Server::bind(&cli.host, cli.port).await?;
    info!("listening on {}", server.local_addr()?);

    tokio::select! {
        result = server.serve() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested, exiting");
            Ok(())
        }
    }
}
