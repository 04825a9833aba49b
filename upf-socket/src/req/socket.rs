use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;

use upf_transport::ClientTransport;
use upf_wire::reqrep;

use super::{Command, ReqDriver, ReqError, ReqOptions, ReqStats, SocketState, DEFAULT_BUFFER_SIZE};

/// The client side of the control channel. Requests are pipelined over a single
/// connection and matched to responses by ID.
///
/// Clones share the connection and the in-flight bound. The connection closes once
/// every clone is closed or dropped.
#[derive(Debug, Clone)]
pub struct ReqSocket<T: ClientTransport> {
    /// Command channel to the backend task.
    to_driver: Option<mpsc::Sender<Command>>,
    /// The underlying transport.
    transport: T,
    /// Options for the socket.
    options: Arc<ReqOptions>,
    /// Socket state. This is shared with the backend task.
    state: Arc<SocketState>,
    /// The number of requests awaiting a response.
    active_requests: Arc<AtomicUsize>,
}

/// Releases an in-flight slot when the request resolves or is abandoned.
struct ActiveSlot(Arc<AtomicUsize>);

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T: ClientTransport> ReqSocket<T> {
    /// Creates a new request socket with the default [`ReqOptions`].
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, ReqOptions::default())
    }

    /// Creates a new request socket with the given options.
    pub fn with_options(transport: T, options: ReqOptions) -> Self {
        Self {
            to_driver: None,
            transport,
            options: Arc::new(options),
            state: Arc::new(SocketState::default()),
            active_requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counters shared with the driver.
    pub fn stats(&self) -> &ReqStats {
        &self.state.stats
    }

    /// The options the socket was created with.
    pub fn options(&self) -> &ReqOptions {
        &self.options
    }

    /// Returns `true` if the socket is connected and its driver is still running.
    pub fn is_connected(&self) -> bool {
        self.to_driver.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Sends a request with the default timeout and waits for its response.
    pub async fn request(&self, message: Bytes) -> Result<Bytes, ReqError> {
        self.request_with_timeout(message, self.options.timeout).await
    }

    /// Sends a request and waits at most `timeout` for its response.
    pub async fn request_with_timeout(
        &self,
        message: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, ReqError> {
        let to_driver = self.to_driver.as_ref().ok_or(ReqError::NotConnected)?;

        if self.active_requests.fetch_add(1, Ordering::SeqCst) >= self.options.max_active_requests {
            self.active_requests.fetch_sub(1, Ordering::SeqCst);
            return Err(ReqError::TooManyRequests);
        }
        let _slot = ActiveSlot(Arc::clone(&self.active_requests));

        let (response_tx, response_rx) = oneshot::channel();

        to_driver
            .send(Command::Send { message, timeout, response: response_tx })
            .await
            .map_err(|_| ReqError::SocketClosed)?;

        response_rx.await.map_err(|_| ReqError::SocketClosed)?
    }

    /// Connects to the target and spawns the socket driver.
    pub async fn connect(&mut self, endpoint: SocketAddr) -> Result<(), ReqError> {
        // Initialize communication channels
        let (to_driver, from_socket) = mpsc::channel(DEFAULT_BUFFER_SIZE);

        let stream = self
            .transport
            .connect(endpoint)
            .await
            .map_err(|e| ReqError::Transport(Box::new(e)))?;

        let mut pending_requests = FxHashMap::default();
        pending_requests.reserve(self.options.max_active_requests);

        // Create the socket backend
        let driver = ReqDriver {
            socket_state: Arc::clone(&self.state),
            id_counter: 0,
            from_socket,
            conn: Framed::new(stream, reqrep::Codec::new()),
            egress_queue: VecDeque::with_capacity(self.options.max_active_requests),
            pending_requests,
            timeout_timer: None,
        };

        // Spawn the backend task
        tokio::spawn(driver);

        self.to_driver = Some(to_driver);

        Ok(())
    }

    /// Disconnects the socket. The driver flushes and closes the connection.
    /// Requests issued afterwards fail with [`ReqError::NotConnected`].
    pub fn close(&mut self) {
        if self.to_driver.take().is_some() {
            tracing::debug!("Closing request socket");
        }
    }
}
