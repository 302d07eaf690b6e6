// Copyright 2018 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Application packets and the big-endian length-prefixed wire primitives
//! shared by the frame codec and sub-protocol payload encodings.

use crate::error::FramingError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// One application-level message.
///
/// `protocol_id` names the owning sub-protocol by its registration index and
/// never appears on the wire as such; the frame carries only the flat command
/// id. `cmd_id` is relative to the protocol locally and flat on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub protocol_id: usize,
    pub cmd_id: usize,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(protocol_id: usize, cmd_id: usize, payload: Bytes) -> Packet {
        Packet { protocol_id, cmd_id, payload }
    }
}

/// Writes an unsigned integer as a one-byte length followed by that many
/// big-endian bytes, without leading zeroes. Zero encodes as a bare zero
/// length.
pub fn put_uint(buf: &mut BytesMut, value: u64) {
    let len = (64 - u64::leading_zeros(value) as usize + 7) / 8;
    buf.put_u8(len as u8);
    buf.extend_from_slice(&value.to_be_bytes()[8 - len..]);
}

/// Reads an integer written by [`put_uint`].
pub fn get_uint(buf: &mut Bytes) -> Result<u64, FramingError> {
    if buf.is_empty() {
        return Err(FramingError::Truncated);
    }
    let len = buf.get_u8() as usize;
    if len > 8 {
        return Err(FramingError::Malformed);
    }
    if buf.len() < len {
        return Err(FramingError::Truncated);
    }
    let mut value = 0u64;
    for _ in 0..len {
        value = value << 8 | u64::from(buf.get_u8());
    }
    Ok(value)
}

/// Writes a length-prefixed byte string.
pub fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    put_uint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Reads a byte string written by [`put_bytes`].
pub fn get_bytes(buf: &mut Bytes) -> Result<Bytes, FramingError> {
    let len = get_uint(buf)? as usize;
    if buf.len() < len {
        return Err(FramingError::Truncated);
    }
    Ok(buf.split_to(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint_round_trip() {
        for value in &[0u64, 1, 0x7f, 0x80, 0xffff, 0x0102_0304, u64::MAX] {
            let mut buf = BytesMut::new();
            put_uint(&mut buf, *value);
            let mut bytes = buf.freeze();
            assert_eq!(get_uint(&mut bytes).unwrap(), *value);
            assert!(bytes.is_empty());
        }
    }

    #[test]
    fn uint_is_minimal() {
        let mut buf = BytesMut::new();
        put_uint(&mut buf, 0);
        assert_eq!(&buf[..], &[0]);
        let mut buf = BytesMut::new();
        put_uint(&mut buf, 0x1234);
        assert_eq!(&buf[..], &[2, 0x12, 0x34]);
    }

    #[test]
    fn rejects_truncated_and_oversized_uints() {
        assert!(matches!(get_uint(&mut Bytes::new()), Err(FramingError::Truncated)));
        assert!(matches!(
            get_uint(&mut Bytes::from_static(&[4, 1, 2])),
            Err(FramingError::Truncated)
        ));
        assert!(matches!(
            get_uint(&mut Bytes::from_static(&[9, 0, 0, 0, 0, 0, 0, 0, 0, 1])),
            Err(FramingError::Malformed)
        ));
    }

    #[test]
    fn quickcheck_uint_round_trip() {
        fn prop(value: u64) -> bool {
            let mut buf = BytesMut::new();
            put_uint(&mut buf, value);
            let mut bytes = buf.freeze();
            matches!(get_uint(&mut bytes), Ok(v) if v == value) && bytes.is_empty()
        }
        quickcheck::quickcheck(prop as fn(u64) -> bool);
    }

    #[test]
    fn bytes_round_trip() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, b"hello");
        put_bytes(&mut buf, b"");
        let mut bytes = buf.freeze();
        assert_eq!(&get_bytes(&mut bytes).unwrap()[..], b"hello");
        assert_eq!(&get_bytes(&mut bytes).unwrap()[..], b"");
    }
}
