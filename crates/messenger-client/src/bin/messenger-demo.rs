//! Minimal non-interactive harness exercising `messenger-client` end to
//! end: connect, handshake, then either send one message or poll once and
//! print whatever comes back. Deliberately not a TUI - interactive input
//! editing and color output stay out of scope.

use anyhow::Result;
use clap::{Parser, Subcommand};
use messenger_client::ClientDriver;

#[derive(Parser)]
#[command(name = "messenger-demo")]
#[command(about = "Exercise the messenger client driver from the command line", long_about = None)]
struct Cli {
    /// Server host or address.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server port.
    #[arg(long, default_value_t = 6074)]
    port: u16,

    /// Name to register with the server.
    #[arg(long)]
    name: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message to a named peer.
    Send {
        /// Name of the peer to deliver the message to.
        receiver: String,
        /// Message body.
        message: String,
    },
    /// Poll once for messages queued by a named peer.
    Receive {
        /// Name of the peer whose queued messages to fetch.
        sender: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let driver = ClientDriver::new(cli.host, cli.port, cli.name.into_bytes());
    driver.start().await?;

    match cli.command {
        Commands::Send { receiver, message } => {
            driver
                .send_message(receiver.as_bytes(), message.as_bytes())
                .await?;
            println!("sent");
        }
        Commands::Receive { sender } => {
            let messages = driver.receive_messages(sender.as_bytes()).await?;
            if messages.is_empty() {
                println!("(no messages)");
            }
            for message in messages {
                println!("{}", String::from_utf8_lossy(&message));
            }
        }
    }

    driver.stop().await;
    Ok(())
}
