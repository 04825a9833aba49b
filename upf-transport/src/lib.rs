use std::{
    net::SocketAddr,
    task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncWrite};

pub mod tcp;
pub use tcp::{Tcp, TcpOptions};

/// The client side of a transport: opens a connection to the engine. Clones carry
/// the configuration only, never an open connection.
#[async_trait::async_trait]
pub trait ClientTransport: Clone + Send + Sync + 'static {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn connect(&self, addr: SocketAddr) -> Result<Self::Io, Self::Error>;
}

/// The server side of a transport: accepts connections from clients.
#[async_trait::async_trait]
pub trait ServerTransport: Unpin + Send + Sync + 'static {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;

    async fn bind(&mut self, addr: SocketAddr) -> Result<(), Self::Error>;

    #[allow(clippy::type_complexity)]
    fn poll_accept(
        &self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(Self::Io, SocketAddr), Self::Error>>;
}
