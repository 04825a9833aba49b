//! Primitive packing helpers shared by the command and response envelopes.
//!
//! All integers are big-endian. Strings and lists carry a `u16` length prefix.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::Error;

/// Serializes a value into an envelope buffer.
pub trait Pack {
    fn pack(&self, dst: &mut BytesMut);

    /// Packs the value into a fresh buffer.
    fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.pack(&mut dst);
        dst.freeze()
    }
}

/// Deserializes a value from an envelope buffer, consuming what it reads.
pub trait Unpack: Sized {
    fn unpack(src: &mut Bytes) -> Result<Self, Error>;
}

#[inline]
fn ensure(src: &Bytes, needed: usize) -> Result<(), Error> {
    if src.remaining() < needed {
        return Err(Error::Truncated { needed, remaining: src.remaining() });
    }

    Ok(())
}

pub(crate) fn get_u8(src: &mut Bytes) -> Result<u8, Error> {
    ensure(src, 1)?;
    Ok(src.get_u8())
}

pub(crate) fn get_u16(src: &mut Bytes) -> Result<u16, Error> {
    ensure(src, 2)?;
    Ok(src.get_u16())
}

pub(crate) fn get_u32(src: &mut Bytes) -> Result<u32, Error> {
    ensure(src, 4)?;
    Ok(src.get_u32())
}

pub(crate) fn get_i32(src: &mut Bytes) -> Result<i32, Error> {
    ensure(src, 4)?;
    Ok(src.get_i32())
}

pub(crate) fn get_u64(src: &mut Bytes) -> Result<u64, Error> {
    ensure(src, 8)?;
    Ok(src.get_u64())
}

pub(crate) fn get_f64(src: &mut Bytes) -> Result<f64, Error> {
    ensure(src, 8)?;
    Ok(src.get_f64())
}

pub(crate) fn get_bool(src: &mut Bytes) -> Result<bool, Error> {
    match get_u8(src)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::UnknownTag { what: "bool", tag: other }),
    }
}

pub(crate) fn put_bool(dst: &mut BytesMut, value: bool) {
    dst.put_u8(u8::from(value));
}

pub(crate) fn put_str(dst: &mut BytesMut, value: &str) {
    let len = value.len().min(u16::MAX as usize);
    dst.put_u16(len as u16);
    dst.put_slice(&value.as_bytes()[..len]);
}

pub(crate) fn get_str(src: &mut Bytes) -> Result<String, Error> {
    let len = get_u16(src)? as usize;
    ensure(src, len)?;
    let raw = src.split_to(len);

    String::from_utf8(raw.to_vec()).map_err(|_| Error::InvalidUtf8)
}

pub(crate) fn put_u32_list(dst: &mut BytesMut, values: &[u32]) {
    let len = values.len().min(u16::MAX as usize);
    dst.put_u16(len as u16);
    for value in &values[..len] {
        dst.put_u32(*value);
    }
}

pub(crate) fn get_u32_list(src: &mut Bytes) -> Result<Vec<u32>, Error> {
    let len = get_u16(src)? as usize;
    ensure(src, len * 4)?;

    Ok((0..len).map(|_| src.get_u32()).collect())
}
