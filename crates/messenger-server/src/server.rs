//! Accept loop: one task per connection, fed from a bound listener.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::info;

use crate::client_record::ClientRecord;
use crate::connection::Connection;
use crate::state::ServerState;

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("failed to bind {host}:{port}"))?;
        Ok(Self {
            listener,
            state: Arc::new(ServerState::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop forever, spawning one task per connection.
    pub async fn serve(self) -> Result<()> {
        info!(addr = %self.local_addr()?, "messenger server listening");
        loop {
            let (stream, addr) = self.listener.accept().await?;
            info!(%addr, "accepted connection");

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let record = Arc::new(Mutex::new(ClientRecord::new()));
                state.insert(addr, Arc::clone(&record)).await;
                Connection::new(stream, addr, record, state).run().await;
            });
        }
    }
}
