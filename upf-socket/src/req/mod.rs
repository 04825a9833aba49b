use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

use upf_wire::Error as WireError;

mod driver;
mod socket;
mod stats;
use driver::*;
pub use socket::*;
pub use stats::ReqStats;

const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Errors of a [`ReqSocket`].
#[derive(Debug, Error)]
pub enum ReqError {
    /// Reading or writing the connection failed.
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    /// A frame could not be decoded.
    #[error("Wire protocol error: {0:?}")]
    Wire(#[from] WireError),
    /// The driver task has stopped.
    #[error("Socket closed")]
    SocketClosed,
    /// [`ReqSocket::connect`] has not succeeded yet.
    #[error("Socket not connected")]
    NotConnected,
    /// The transport failed to connect.
    #[error("Transport error: {0:?}")]
    Transport(#[from] Box<dyn std::error::Error + Send + Sync>),
    /// No response arrived before the request deadline.
    #[error("Request timed out")]
    Timeout,
    /// The bound on in-flight requests was reached.
    #[error("Too many in-flight requests")]
    TooManyRequests,
}

pub(crate) enum Command {
    Send {
        message: Bytes,
        timeout: Duration,
        response: oneshot::Sender<Result<Bytes, ReqError>>,
    },
}

/// Options of a [`ReqSocket`].
#[derive(Debug, Clone)]
pub struct ReqOptions {
    /// Default deadline of a request. Can be overridden per request.
    pub timeout: Duration,
    /// The maximum number of requests awaiting a response at any time.
    /// Requests beyond this bound fail immediately with [`ReqError::TooManyRequests`].
    pub max_active_requests: usize,
}

impl ReqOptions {
    /// Sets the default request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the bound on in-flight requests.
    pub fn max_active_requests(mut self, max_active_requests: usize) -> Self {
        self.max_active_requests = max_active_requests;
        self
    }
}

impl Default for ReqOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(5), max_active_requests: 64 }
    }
}

/// The request socket state, shared between the backend task and the socket.
#[derive(Debug, Default)]
pub(crate) struct SocketState {
    pub(crate) stats: ReqStats,
}

