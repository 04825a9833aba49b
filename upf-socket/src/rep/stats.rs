use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters of a reply socket, updated by the driver and read through
/// [`RepSocket::stats`](super::RepSocket::stats).
#[derive(Debug, Default)]
pub struct RepStats {
    bytes_tx: AtomicUsize,
    bytes_rx: AtomicUsize,
    /// Requests handed to the socket.
    requests: AtomicUsize,
    /// Requests dropped by the application without a response.
    unanswered: AtomicUsize,
    active_clients: AtomicUsize,
    /// Connections refused because of `max_clients`.
    rejected_clients: AtomicUsize,
}

impl RepStats {
    #[inline]
    pub(crate) fn on_request(&self, bytes: usize) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_rx.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn on_response(&self, bytes: usize) {
        self.bytes_tx.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn on_unanswered(&self) {
        self.unanswered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn on_connect(&self) {
        self.active_clients.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn on_disconnect(&self) {
        self.active_clients.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn on_reject(&self) {
        self.rejected_clients.fetch_add(1, Ordering::Relaxed);
    }

    /// Total bytes of responses written.
    pub fn bytes_tx(&self) -> usize {
        self.bytes_tx.load(Ordering::Relaxed)
    }

    /// Total bytes of requests read.
    pub fn bytes_rx(&self) -> usize {
        self.bytes_rx.load(Ordering::Relaxed)
    }

    /// Requests handed to the socket.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    /// Requests dropped without a response.
    pub fn unanswered(&self) -> usize {
        self.unanswered.load(Ordering::Relaxed)
    }

    /// Connections currently served.
    pub fn active_clients(&self) -> usize {
        self.active_clients.load(Ordering::Relaxed)
    }

    /// Connections refused because of `max_clients`.
    pub fn rejected_clients(&self) -> usize {
        self.rejected_clients.load(Ordering::Relaxed)
    }
}
