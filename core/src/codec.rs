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

//! Frame codec for the multiplexed stream.
//!
//! A frame is a 4-byte big-endian length followed by the sealed body. The
//! body is `uint protocol_id`, `uint cmd_id`, then the raw payload. The
//! `protocol_id` written to the wire is always zero; sub-protocol identity
//! lives in the flat command id space assigned at registration time.

use crate::cipher::FrameCipher;
use crate::error::{Error, FramingError};
use crate::packet::{get_uint, put_uint, Packet};
use asynchronous_codec::{Decoder, Encoder};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Upper bound on the sealed length of a single frame.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const LENGTH_PREFIX_SIZE: usize = 4;

/// Frames [`Packet`]s through a [`FrameCipher`].
pub struct FrameCodec<C> {
    cipher: C,
}

impl<C: FrameCipher> FrameCodec<C> {
    pub fn new(cipher: C) -> FrameCodec<C> {
        FrameCodec { cipher }
    }
}

impl<C: FrameCipher> Encoder for FrameCodec<C> {
    type Item = Packet;
    type Error = Error;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), Error> {
        let mut body = BytesMut::with_capacity(packet.payload.len() + 8);
        // The wire carries only the flat command id.
        put_uint(&mut body, 0);
        put_uint(&mut body, packet.cmd_id as u64);
        body.extend_from_slice(&packet.payload);
        let sealed = self.cipher.seal(&body);
        if sealed.len() > MAX_FRAME_SIZE {
            return Err(FramingError::Oversize { size: sealed.len(), max: MAX_FRAME_SIZE }.into());
        }
        dst.reserve(LENGTH_PREFIX_SIZE + sealed.len());
        dst.put_u32(sealed.len() as u32);
        dst.extend_from_slice(&sealed);
        Ok(())
    }
}

impl<C: FrameCipher> Decoder for FrameCodec<C> {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }
        let sealed_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if sealed_len > MAX_FRAME_SIZE {
            return Err(FramingError::Oversize { size: sealed_len, max: MAX_FRAME_SIZE }.into());
        }
        if src.len() < LENGTH_PREFIX_SIZE + sealed_len {
            // Partial frame, wait for more bytes.
            return Ok(None);
        }
        src.advance(LENGTH_PREFIX_SIZE);
        let sealed = src.split_to(sealed_len);
        let mut body = Bytes::from(self.cipher.open(&sealed)?);
        let protocol_id = get_uint(&mut body)? as usize;
        let cmd_id = get_uint(&mut body)? as usize;
        Ok(Some(Packet { protocol_id, cmd_id, payload: body }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::Plain;

    fn codec() -> FrameCodec<Plain> {
        FrameCodec::new(Plain)
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut codec = codec();
        let packet = Packet::new(3, 42, Bytes::from_static(b"data"));
        let mut wire = BytesMut::new();
        codec.encode(packet, &mut wire).unwrap();
        let decoded = codec.decode(&mut wire).unwrap().unwrap();
        // Protocol identity is not carried on the wire.
        assert_eq!(decoded.protocol_id, 0);
        assert_eq!(decoded.cmd_id, 42);
        assert_eq!(&decoded.payload[..], b"data");
        assert!(wire.is_empty());
    }

    #[test]
    fn decode_is_incremental() {
        let mut codec = codec();
        let mut wire = BytesMut::new();
        codec.encode(Packet::new(0, 7, Bytes::from_static(b"abc")), &mut wire).unwrap();
        let full = wire.clone();
        for cut in 0..full.len() {
            let mut partial = BytesMut::from(&full[..cut]);
            assert!(codec.decode(&mut partial).unwrap().is_none(), "cut at {}", cut);
            assert_eq!(&partial[..], &full[..cut], "buffer must be preserved");
        }
    }

    #[test]
    fn decodes_several_frames_from_one_buffer() {
        let mut codec = codec();
        let mut wire = BytesMut::new();
        for cmd in 0..3usize {
            codec.encode(Packet::new(0, cmd, Bytes::new()), &mut wire).unwrap();
        }
        for cmd in 0..3usize {
            assert_eq!(codec.decode(&mut wire).unwrap().unwrap().cmd_id, cmd);
        }
        assert!(codec.decode(&mut wire).unwrap().is_none());
    }

    #[test]
    fn corrupted_frame_fails_mac() {
        let mut codec = codec();
        let mut wire = BytesMut::new();
        codec.encode(Packet::new(0, 1, Bytes::from_static(b"x")), &mut wire).unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xff;
        assert!(matches!(
            codec.decode(&mut wire),
            Err(Error::Framing(FramingError::Mac))
        ));
    }

    #[test]
    fn oversize_length_is_rejected_early() {
        let mut codec = codec();
        let mut wire = BytesMut::new();
        wire.put_u32(MAX_FRAME_SIZE as u32 + 1);
        assert!(matches!(
            codec.decode(&mut wire),
            Err(Error::Framing(FramingError::Oversize { .. }))
        ));
    }
}
