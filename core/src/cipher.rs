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

//! The encrypt-then-MAC seam between the frame codec and the connection
//! handshake.
//!
//! The handshake negotiates per-direction cipher and MAC state and hands it
//! to the codec as a [`FrameCipher`]. [`Plain`] is the no-encryption
//! implementation: frames travel in the clear but still carry an integrity
//! MAC, the same shape an authenticated cipher produces.

use crate::error::FramingError;
use sha2::{Digest, Sha256};

/// Length of the per-frame message authentication code.
pub const MAC_SIZE: usize = 16;

/// Per-connection cipher state applied to every frame body.
///
/// Implementations are stateful on purpose; real ones chain the MAC over the
/// whole stream.
pub trait FrameCipher: Send {
    /// Protects a frame body for the wire.
    fn seal(&mut self, body: &[u8]) -> Vec<u8>;

    /// Verifies and recovers a frame body. Fails with
    /// [`FramingError::Mac`] when authentication fails.
    fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>, FramingError>;
}

impl<T: FrameCipher + ?Sized> FrameCipher for Box<T> {
    fn seal(&mut self, body: &[u8]) -> Vec<u8> {
        (**self).seal(body)
    }

    fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>, FramingError> {
        (**self).open(sealed)
    }
}

/// Cleartext frames with a truncated SHA-256 MAC.
#[derive(Debug, Default, Clone, Copy)]
pub struct Plain;

impl Plain {
    fn mac(body: &[u8]) -> [u8; MAC_SIZE] {
        let digest = Sha256::digest(body);
        let mut mac = [0u8; MAC_SIZE];
        mac.copy_from_slice(&digest[..MAC_SIZE]);
        mac
    }
}

impl FrameCipher for Plain {
    fn seal(&mut self, body: &[u8]) -> Vec<u8> {
        let mut sealed = Vec::with_capacity(body.len() + MAC_SIZE);
        sealed.extend_from_slice(body);
        sealed.extend_from_slice(&Plain::mac(body));
        sealed
    }

    fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>, FramingError> {
        if sealed.len() < MAC_SIZE {
            return Err(FramingError::Truncated);
        }
        let (body, mac) = sealed.split_at(sealed.len() - MAC_SIZE);
        if mac != Plain::mac(body) {
            return Err(FramingError::Mac);
        }
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let mut cipher = Plain;
        let sealed = cipher.seal(b"payload");
        assert_eq!(cipher.open(&sealed).unwrap(), b"payload");
    }

    #[test]
    fn detects_tampering() {
        let mut cipher = Plain;
        let mut sealed = cipher.seal(b"payload");
        sealed[0] ^= 0xff;
        assert!(matches!(cipher.open(&sealed), Err(FramingError::Mac)));
    }

    #[test]
    fn rejects_short_frames() {
        let mut cipher = Plain;
        assert!(matches!(cipher.open(&[0u8; MAC_SIZE - 1]), Err(FramingError::Truncated)));
    }
}
