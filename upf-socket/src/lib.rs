//! Request/reply sockets for the UPF control channel.
//!
//! [`ReqSocket`] is the client side used by the control plane: every request gets a
//! deadline and at most one response. [`RepSocket`] is the engine side: it yields
//! incoming [`Request`]s as a [`Stream`](futures::Stream).

mod rep;
mod req;

pub use rep::*;
pub use req::*;
