//! TCP transport with optional socket tuning.

use std::{
    io,
    net::SocketAddr,
    task::{Context, Poll},
};
use tokio::net::{TcpListener, TcpStream};

use crate::{ClientTransport, ServerTransport};

/// Options applied to every TCP stream.
#[derive(Debug, Clone)]
pub struct TcpOptions {
    /// Disable Nagle's algorithm on every stream. Control commands are small and
    /// latency bound, so this defaults to `true`.
    pub set_nodelay: bool,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self { set_nodelay: true }
    }
}

impl TcpOptions {
    /// Sets `TCP_NODELAY` on every stream.
    pub fn with_nodelay(mut self, set_nodelay: bool) -> Self {
        self.set_nodelay = set_nodelay;
        self
    }
}

/// TCP transport. Usable as a client, or as a server once bound.
#[derive(Debug, Default)]
pub struct Tcp {
    options: TcpOptions,
    listener: Option<TcpListener>,
}

impl Tcp {
    /// A transport with the default [`TcpOptions`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport with the given options.
    pub fn with_options(options: TcpOptions) -> Self {
        Self { options, listener: None }
    }
}

impl Clone for Tcp {
    /// Clones the options. A bound listener is not shared with the clone.
    fn clone(&self) -> Self {
        Self::with_options(self.options.clone())
    }
}

#[async_trait::async_trait]
impl ClientTransport for Tcp {
    type Io = TcpStream;
    type Error = io::Error;

    async fn connect(&self, addr: SocketAddr) -> Result<Self::Io, Self::Error> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(self.options.set_nodelay)?;

        tracing::debug!("Connected to {}", addr);

        Ok(stream)
    }
}

#[async_trait::async_trait]
impl ServerTransport for Tcp {
    type Io = TcpStream;
    type Error = io::Error;

    fn local_addr(&self) -> Result<SocketAddr, Self::Error> {
        self.listener
            .as_ref()
            .ok_or_else(|| io::ErrorKind::NotConnected.into())
            .and_then(|l| l.local_addr())
    }

    async fn bind(&mut self, addr: SocketAddr) -> Result<(), Self::Error> {
        let listener = TcpListener::bind(addr).await?;
        tracing::debug!("Listening on {}", listener.local_addr()?);

        self.listener = Some(listener);

        Ok(())
    }

    fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<Result<(Self::Io, SocketAddr), Self::Error>> {
        let Some(ref listener) = self.listener else {
            return Poll::Ready(Err(io::ErrorKind::NotConnected.into()));
        };

        match listener.poll_accept(cx) {
            Poll::Ready(Ok((io, addr))) => {
                tracing::debug!("Accepted connection from {}", addr);
                Poll::Ready(io.set_nodelay(self.options.set_nodelay).map(|_| (io, addr)))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}
