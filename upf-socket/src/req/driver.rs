use bytes::Bytes;
use futures::{Future, SinkExt, StreamExt};
use rustc_hash::FxHashMap;
use std::{
    collections::VecDeque,
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot},
    time::{Instant, Sleep},
};
use tokio_util::codec::Framed;

use super::{Command, ReqError, SocketState};
use upf_wire::reqrep;

/// The request socket driver. Endless future that drives
/// the socket forward.
pub(crate) struct ReqDriver<T: AsyncRead + AsyncWrite> {
    /// State shared with the socket.
    pub(crate) socket_state: Arc<SocketState>,
    /// ID counter for outgoing requests.
    pub(crate) id_counter: u32,
    /// Commands from the socket.
    pub(crate) from_socket: mpsc::Receiver<Command>,
    /// The actual [`Framed`] connection with the request/reply codec.
    pub(crate) conn: Framed<T, reqrep::Codec>,
    /// The outgoing message queue.
    pub(crate) egress_queue: VecDeque<reqrep::Message>,
    /// The currently pending requests, if any. Uses [`FxHashMap`] for performance.
    pub(crate) pending_requests: FxHashMap<u32, PendingRequest>,
    /// Fires at the earliest deadline of the pending requests, if any.
    pub(crate) timeout_timer: Option<Pin<Box<Sleep>>>,
}

pub(crate) struct PendingRequest {
    start: Instant,
    deadline: Instant,
    sender: oneshot::Sender<Result<Bytes, ReqError>>,
}

impl<T: AsyncRead + AsyncWrite> ReqDriver<T> {
    fn new_message(&mut self, payload: Bytes) -> reqrep::Message {
        let id = self.id_counter;
        // Wrap add here to avoid overflow
        self.id_counter = id.wrapping_add(1);

        reqrep::Message::new(id, payload)
    }

    fn on_message(&mut self, msg: reqrep::Message) {
        let Some(pending) = self.pending_requests.remove(&msg.id()) else {
            tracing::debug!("Dropping response {} with no pending request (expired?)", msg.id());
            return;
        };

        let rtt = pending.start.elapsed().as_micros() as usize;
        let size = msg.size();
        let _ = pending.sender.send(Ok(msg.into_payload()));

        self.socket_state.stats.update_rtt(rtt);
        self.socket_state.stats.increment_rx(size);
    }

    /// Arms the timeout timer for `deadline` unless it already fires earlier.
    fn arm_timer(&mut self, deadline: Instant) {
        if let Some(timer) = self.timeout_timer.as_mut() {
            if deadline < timer.deadline() {
                timer.as_mut().reset(deadline);
            }
            return;
        }

        self.timeout_timer = Some(Box::pin(tokio::time::sleep_until(deadline)));
    }

    /// Fails every pending request whose deadline has passed and re-arms the timer
    /// for the earliest remaining one.
    fn check_timeouts(&mut self) {
        let now = Instant::now();
        let expired: Vec<u32> = self
            .pending_requests
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(pending) = self.pending_requests.remove(&id) {
                tracing::debug!("Request {} timed out", id);
                self.socket_state.stats.increment_timeouts();
                let _ = pending.sender.send(Err(ReqError::Timeout));
            }
        }

        if let Some(deadline) = self.pending_requests.values().map(|p| p.deadline).min() {
            self.arm_timer(deadline);
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Future for ReqDriver<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            if let Some(timer) = this.timeout_timer.as_mut() {
                if timer.as_mut().poll(cx).is_ready() {
                    this.timeout_timer = None;
                    this.check_timeouts();
                    // Register the re-armed timer, if any.
                    continue;
                }
            }

            let _ = this.conn.poll_flush_unpin(cx);

            // Check for incoming messages from the socket
            match this.conn.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(msg))) => {
                    this.on_message(msg);

                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    // The framing is lost after a decode error, so is the connection.
                    tracing::error!("Failed to read message from socket: {:?}", e);
                    return Poll::Ready(());
                }
                Poll::Ready(None) => {
                    tracing::debug!("Socket closed, shutting down backend");
                    return Poll::Ready(());
                }
                Poll::Pending => {}
            }

            if this.conn.poll_ready_unpin(cx).is_ready() {
                // Drain the egress queue
                if let Some(msg) = this.egress_queue.pop_front() {
                    let size = msg.size();
                    tracing::trace!("Sending msg {}", msg.id());
                    match this.conn.start_send_unpin(msg) {
                        Ok(_) => {
                            this.socket_state.stats.increment_tx(size);
                            // We might be able to send more queued messages
                            continue;
                        }
                        Err(e) => {
                            tracing::error!("Failed to send message to socket: {:?}", e);
                            return Poll::Ready(());
                        }
                    }
                }
            }

            // Check for outgoing messages from the socket handle
            match this.from_socket.poll_recv(cx) {
                Poll::Ready(Some(Command::Send { message, timeout, response })) => {
                    let start = Instant::now();
                    let deadline = start + timeout;
                    let msg = this.new_message(message);
                    let id = msg.id();
                    this.egress_queue.push_back(msg);
                    this.pending_requests.insert(id, PendingRequest { start, deadline, sender: response });
                    this.arm_timer(deadline);

                    continue;
                }
                Poll::Ready(None) => {
                    tracing::debug!(
                        "Socket dropped, shutting down backend and flushing connection"
                    );
                    let _ = ready!(this.conn.poll_close_unpin(cx));
                    return Poll::Ready(());
                }
                Poll::Pending => {}
            }

            return Poll::Pending;
        }
    }
}
