//! Wire formats for the UPF control channel: the frame codec and the typed
//! command and response envelopes carried inside frames.

use thiserror::Error;

pub mod command;
pub mod pack;
pub mod reqrep;
pub mod response;

pub use command::*;
pub use pack::{Pack, Unpack};
pub use response::*;

/// Errors of encoding and decoding control channel frames.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying stream failed.
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    /// The frame header carries an unknown version.
    #[error("Unsupported frame version {0}")]
    UnsupportedVersion(u8),
    /// The frame exceeds [`reqrep::MAX_FRAME_SIZE`].
    #[error("Frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(u32),
    /// A field extends past the end of the message.
    #[error("Truncated message: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the field needs.
        needed: usize,
        /// Bytes left in the message.
        remaining: usize,
    },
    /// A tag byte selects no known variant.
    #[error("Unknown {what} tag {tag}")]
    UnknownTag {
        /// What the tag selects.
        what: &'static str,
        /// The tag as read.
        tag: u8,
    },
    /// The command name is not understood.
    #[error("Unknown command {0:?}")]
    UnknownCommand(String),
    /// A string field is not valid UTF-8.
    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,
}
