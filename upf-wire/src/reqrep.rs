//! Length-prefixed request/response frames and their codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::Error;

/// The frame format version spoken by this crate.
pub const VERSION: u8 = 1;

/// Frames larger than this are rejected by the decoder.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// A request or response frame. Requests and their responses share the same ID.
#[derive(Debug, Clone)]
pub struct Message {
    header: Header,
    /// The message payload.
    payload: Bytes,
}

impl Message {
    /// A frame carrying `payload` under `id`.
    pub fn new(id: u32, payload: Bytes) -> Self {
        Self {
            header: Header {
                version: VERSION,
                id,
                size: payload.len() as u32,
            },
            payload,
        }
    }

    /// The message ID.
    pub fn id(&self) -> u32 {
        self.header.id
    }

    /// Total size of the frame on the wire, header included.
    pub fn size(&self) -> usize {
        Header::len() + self.header.size as usize
    }

    /// The message payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the frame, returning its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Fixed-size frame header.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub(crate) version: u8,
    /// The message ID.
    pub(crate) id: u32,
    /// The size of the payload.
    pub(crate) size: u32,
}

impl Header {
    /// Returns the length of the header in bytes.
    #[inline]
    pub const fn len() -> usize {
        9
    }
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Header,
    Payload(Header),
}

/// Length-prefixed frame codec for the control channel.
#[derive(Debug, Default)]
pub struct Codec {
    /// The current state of the decoder.
    state: State,
}

impl Codec {
    /// A codec awaiting a header.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for Codec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Header => {
                    if src.len() < Header::len() {
                        return Ok(None);
                    }

                    let header = Header {
                        version: src.get_u8(),
                        id: src.get_u32(),
                        size: src.get_u32(),
                    };

                    if header.version != VERSION {
                        return Err(Error::UnsupportedVersion(header.version));
                    }

                    if header.size > MAX_FRAME_SIZE {
                        return Err(Error::FrameTooLarge(header.size));
                    }

                    src.reserve(header.size as usize);
                    self.state = State::Payload(header);
                }
                State::Payload(header) => {
                    if src.len() < header.size as usize {
                        return Ok(None);
                    }

                    let payload = src.split_to(header.size as usize);
                    let message = Message {
                        header,
                        payload: payload.freeze(),
                    };

                    self.state = State::Header;
                    return Ok(Some(message));
                }
            }
        }
    }
}

impl Encoder<Message> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.header.size > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge(item.header.size));
        }

        dst.reserve(item.size());

        dst.put_u8(item.header.version);
        dst.put_u32(item.header.id);
        dst.put_u32(item.header.size);
        dst.put(item.payload);

        Ok(())
    }
}
