use std::{
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::StreamMap;

use upf_transport::ServerTransport;

use super::{driver::RepDriver, RepError, RepOptions, RepStats, Request, SocketState, DEFAULT_BUFFER_SIZE};

/// A reply socket. This socket implements [`Stream`] and yields incoming [`Request`]s.
pub struct RepSocket<T: ServerTransport> {
    /// The reply socket options, shared with the driver.
    options: Arc<RepOptions>,
    /// The reply socket state, shared with the driver.
    state: Arc<SocketState>,
    /// Receiver from the socket driver.
    from_driver: Option<mpsc::Receiver<Request>>,
    /// The transport used by this socket. Moved to the driver task once the
    /// socket is bound.
    transport: Option<T>,
    /// The local address this socket is bound to.
    local_addr: Option<SocketAddr>,
}

impl<T: ServerTransport> RepSocket<T> {
    /// Creates a new reply socket with the default [`RepOptions`].
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, RepOptions::default())
    }

    /// Creates a new reply socket with the given options.
    pub fn with_options(transport: T, options: RepOptions) -> Self {
        Self {
            options: Arc::new(options),
            state: Arc::new(SocketState::default()),
            from_driver: None,
            transport: Some(transport),
            local_addr: None,
        }
    }

    /// Binds the socket to the given address and spawns the driver task.
    pub async fn bind(&mut self, addr: SocketAddr) -> Result<(), RepError> {
        let mut transport = self.transport.take().ok_or(RepError::AlreadyBound)?;

        if let Err(e) = transport.bind(addr).await {
            tracing::warn!(?addr, "failed to bind: {e}");
            self.transport = Some(transport);
            return Err(RepError::Transport(Box::new(e)));
        }
        let local_addr = transport.local_addr().map_err(|e| RepError::Transport(Box::new(e)))?;

        let (to_socket, from_driver) = mpsc::channel(DEFAULT_BUFFER_SIZE);

        let driver = RepDriver {
            transport,
            options: Arc::clone(&self.options),
            state: Arc::clone(&self.state),
            peer_states: StreamMap::with_capacity(self.options.max_clients.unwrap_or(64)),
            to_socket,
        };

        tracing::debug!("Reply socket listening on {}", local_addr);
        tokio::spawn(driver);

        self.local_addr = Some(local_addr);
        self.from_driver = Some(from_driver);

        Ok(())
    }

    /// Returns the statistics for this socket.
    pub fn stats(&self) -> &RepStats {
        &self.state.stats
    }

    /// Returns the local address this socket is bound to. `None` if the socket is not bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl<T: ServerTransport> Stream for RepSocket<T> {
    type Item = Request;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut().from_driver.as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}
