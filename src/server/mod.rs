//! Signaling server: room registry, relay and the WebSocket front end.

mod connection;
mod handler;
mod relay;

pub use connection::{Connection, Connections};
pub use handler::{dispatch, handle_connection};
pub use relay::Relay;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::room::RoomRegistry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Shared state across all WebSocket connections
pub struct ServerState {
    pub connections: Arc<Connections>,
    pub registry: RoomRegistry,
    pub relay: Relay,
}

impl ServerState {
    pub fn new() -> Self {
        let connections = Arc::new(Connections::new());
        let relay = Relay::new(Arc::clone(&connections));
        let registry = RoomRegistry::new(Arc::clone(&connections), relay.clone());
        Self {
            connections,
            registry,
            relay,
        }
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn run(config: &ServerConfig) -> Result<()> {
    let listener = TcpListener::bind(&config.bind_address).await?;
    info!("Signaling server listening on {}", listener.local_addr()?);
    serve(listener, Arc::new(ServerState::new())).await
}

/// Accept connections forever. A failing connection never takes the
/// listener down.
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> Result<()> {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                warn!("Connection from {} ended with error: {}", addr, e);
            }
        });
    }
}
