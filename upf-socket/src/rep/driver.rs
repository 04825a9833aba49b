use bytes::Bytes;
use futures::{stream::FuturesUnordered, Future, FutureExt, SinkExt, Stream, StreamExt};
use std::{
    collections::VecDeque,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot},
};
use tokio_stream::{StreamMap, StreamNotifyClose};
use tokio_util::codec::Framed;
use tracing::{debug, error, trace, warn};

use upf_transport::ServerTransport;
use upf_wire::reqrep;

use super::{RepError, RepOptions, Request, SocketState};

/// Resolves once the application responds to (or drops) a request.
struct PendingRequest {
    id: u32,
    response: oneshot::Receiver<Bytes>,
}

impl Future for PendingRequest {
    type Output = Option<(u32, Bytes)>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match this.response.poll_unpin(cx) {
            Poll::Ready(Ok(response)) => Poll::Ready(Some((this.id, response))),
            Poll::Ready(Err(_)) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A connected client.
pub(crate) struct PeerState<T: AsyncRead + AsyncWrite> {
    pending_requests: FuturesUnordered<PendingRequest>,
    conn: Framed<T, reqrep::Codec>,
    addr: SocketAddr,
    egress_queue: VecDeque<reqrep::Message>,
    state: Arc<SocketState>,
}

pub(crate) struct RepDriver<T: ServerTransport> {
    /// The server transport used to accept incoming connections.
    pub(crate) transport: T,
    /// Options shared with the socket.
    pub(crate) options: Arc<RepOptions>,
    /// The reply socket state, shared with the socket front-end.
    pub(crate) state: Arc<SocketState>,
    /// [`StreamMap`] of connected peers. The key is the peer's address.
    pub(crate) peer_states: StreamMap<SocketAddr, StreamNotifyClose<PeerState<T::Io>>>,
    /// Sender to the socket front-end. Used to notify the socket of incoming requests.
    pub(crate) to_socket: mpsc::Sender<Request>,
}

impl<T: ServerTransport> Future for RepDriver<T> {
    type Output = Result<(), RepError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            if this.to_socket.is_closed() {
                debug!("Reply socket dropped, shutting down driver");
                return Poll::Ready(Ok(()));
            }

            if let Poll::Ready(Some((peer, msg))) = this.peer_states.poll_next_unpin(cx) {
                match msg {
                    Some(Ok(request)) => {
                        debug!("Received request from peer {}", peer);
                        this.state.stats.on_request(request.msg().len());
                        if let Err(e) = this.to_socket.try_send(request) {
                            // The request is dropped, the client will time out.
                            warn!("Reply socket queue rejected request from {}: {}", peer, e);
                        }
                    }
                    Some(Err(e)) => {
                        error!("Error receiving message from peer {}: {:?}", peer, e);
                    }
                    None => {
                        debug!("Peer {} disconnected", peer);
                        this.state.stats.on_disconnect();
                    }
                }

                continue;
            }

            match this.transport.poll_accept(cx) {
                Poll::Ready(Ok((io, addr))) => {
                    if let Some(max) = this.options.max_clients {
                        if this.peer_states.len() >= max {
                            warn!("Max clients reached, rejecting connection from {}", addr);
                            this.state.stats.on_reject();
                            continue;
                        }
                    }

                    this.peer_states.insert(
                        addr,
                        StreamNotifyClose::new(PeerState {
                            pending_requests: FuturesUnordered::new(),
                            conn: Framed::new(io, reqrep::Codec::new()),
                            addr,
                            egress_queue: VecDeque::new(),
                            state: Arc::clone(&this.state),
                        }),
                    );
                    this.state.stats.on_connect();
                    debug!("New connection from {}", addr);

                    continue;
                }
                Poll::Ready(Err(e)) => {
                    error!("Error accepting connection: {:?}", e);
                    return Poll::Ready(Err(RepError::Transport(Box::new(e))));
                }
                Poll::Pending => {}
            }

            return Poll::Pending;
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Stream for PeerState<T> {
    type Item = Result<Request, RepError>;

    /// Advances the state of the peer.
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            let _ = this.conn.poll_flush_unpin(cx);

            // First, try to drain the egress queue.
            if this.conn.poll_ready_unpin(cx).is_ready() {
                if let Some(msg) = this.egress_queue.pop_front() {
                    let size = msg.size();
                    match this.conn.start_send_unpin(msg) {
                        Ok(_) => {
                            this.state.stats.on_response(size);
                            // We might be able to send more queued messages
                            continue;
                        }
                        Err(e) => {
                            error!("Failed to send message to socket: {:?}", e);
                            // End this stream as we can't send any more messages
                            return Poll::Ready(None);
                        }
                    }
                }
            }

            // Then check for completed requests
            if let Poll::Ready(Some(result)) = this.pending_requests.poll_next_unpin(cx) {
                match result {
                    Some((id, payload)) => {
                        this.egress_queue.push_back(reqrep::Message::new(id, payload));
                    }
                    None => this.state.stats.on_unanswered(),
                }

                continue;
            }

            match this.conn.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(msg))) => {
                    trace!("Received message {} from peer {}", msg.id(), this.addr);
                    let (tx, rx) = oneshot::channel();

                    this.pending_requests.push(PendingRequest { id: msg.id(), response: rx });

                    let request = Request { source: this.addr, response: tx, msg: msg.into_payload() };

                    return Poll::Ready(Some(Ok(request)));
                }
                Poll::Ready(Some(Err(e))) => {
                    // The framing is lost after a decode error, so is the peer.
                    error!("Failed to decode message from peer {}: {:?}", this.addr, e);
                    return Poll::Ready(None);
                }
                Poll::Ready(None) => {
                    debug!("Connection to {} closed", this.addr);
                    return Poll::Ready(None);
                }
                Poll::Pending => {}
            }

            return Poll::Pending;
        }
    }
}
