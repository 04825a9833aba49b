use std::net::SocketAddr;

use futures::StreamExt;
use tokio::task::JoinHandle;

use upf_socket::{RepError, RepSocket};
use upf_transport::Tcp;

use crate::Engine;

/// Serves an [`Engine`] over a TCP reply socket. The serving task is aborted on drop.
pub struct SimServer {
    engine: Engine,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl SimServer {
    /// Serves `engine` on an ephemeral localhost port.
    pub async fn spawn(engine: Engine) -> Result<Self, RepError> {
        Self::bind(engine, SocketAddr::from(([127, 0, 0, 1], 0))).await
    }

    /// Serves `engine` on `addr`.
    pub async fn bind(engine: Engine, addr: SocketAddr) -> Result<Self, RepError> {
        let mut socket = RepSocket::new(Tcp::new());
        socket.bind(addr).await?;
        let local_addr = socket.local_addr().ok_or(RepError::SocketClosed)?;

        let task = tokio::spawn(serve(socket, engine.clone()));
        tracing::info!(%local_addr, "simulated engine listening");

        Ok(Self { engine, local_addr, task })
    }

    /// The address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The served engine. Clones share its tables.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Stops serving and waits for the serving task to wind down. Connected
    /// clients see their connection close.
    pub async fn shutdown(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for SimServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut socket: RepSocket<Tcp>, engine: Engine) {
    while let Some(request) = socket.next().await {
        let engine = engine.clone();
        let latency = engine.latency();

        let respond = async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let response = engine.handle_bytes(request.msg().clone());
            if request.respond(response).is_err() {
                tracing::debug!("client went away before the response");
            }
        };

        if latency.is_zero() {
            respond.await;
        } else {
            tokio::spawn(respond);
        }
    }
}
