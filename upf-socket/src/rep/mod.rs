use bytes::Bytes;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::oneshot;

mod driver;
mod socket;
mod stats;
pub use socket::*;
pub use stats::RepStats;

const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Errors of a [`RepSocket`].
#[derive(Debug, Error)]
pub enum RepError {
    /// Reading or writing a connection failed.
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    /// A frame could not be decoded.
    #[error("Wire protocol error: {0:?}")]
    Wire(#[from] upf_wire::Error),
    /// The driver task has stopped.
    #[error("Socket closed")]
    SocketClosed,
    /// [`RepSocket::bind`] was called twice.
    #[error("Socket already bound")]
    AlreadyBound,
    /// The transport failed to bind or accept.
    #[error("Transport error: {0:?}")]
    Transport(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Options of a [`RepSocket`].
#[derive(Debug, Clone, Default)]
pub struct RepOptions {
    /// The maximum number of concurrent clients.
    pub max_clients: Option<usize>,
}

impl RepOptions {
    /// Sets the number of maximum concurrent clients.
    pub fn max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = Some(max_clients);
        self
    }
}

/// The reply socket state, shared between the backend task and the socket.
#[derive(Debug, Default)]
pub(crate) struct SocketState {
    pub(crate) stats: RepStats,
}

/// A request received by the socket.
#[derive(Debug)]
pub struct Request {
    /// The source address of the request.
    source: SocketAddr,
    /// The oneshot channel to respond to the request.
    response: oneshot::Sender<Bytes>,
    /// The message payload.
    msg: Bytes,
}

impl Request {
    /// Returns the source address of the request.
    pub fn source(&self) -> SocketAddr {
        self.source
    }

    /// Returns a reference to the message.
    pub fn msg(&self) -> &Bytes {
        &self.msg
    }

    /// Responds to the request.
    pub fn respond(self, response: Bytes) -> Result<(), RepError> {
        self.response.send(response).map_err(|_| RepError::SocketClosed)
    }
}
