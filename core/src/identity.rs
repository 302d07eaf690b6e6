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

//! Node identity keys.
//!
//! A node is identified by a secp256k1 keypair. The public key travels on
//! the wire in its raw 64-byte form, without the uncompressed-point tag.

use rand::RngCore;
use std::convert::TryInto;
use std::fmt;
use thiserror::Error;

/// Length of a raw public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 64;

/// Length of a secret key in bytes.
pub const SECRET_KEY_SIZE: usize = 32;

/// Key material that could not be interpreted.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid secret key material")]
    InvalidSecretKey,
    #[error("public keys are {PUBLIC_KEY_SIZE} raw bytes")]
    InvalidPublicKey,
}

/// Raw 64-byte secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Wraps raw key bytes. Only the length is checked; the session
    /// handshake is responsible for proving possession of the key.
    pub fn from_bytes(bytes: &[u8]) -> Result<PublicKey, IdentityError> {
        let bytes: [u8; PUBLIC_KEY_SIZE] =
            bytes.try_into().map_err(|_| IdentityError::InvalidPublicKey)?;
        Ok(PublicKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}…)", hex::encode(&self.0[..4]))
    }
}

/// A secp256k1 keypair identifying the local node.
#[derive(Clone)]
pub struct Keypair {
    secret: secp256k1::SecretKey,
    public: PublicKey,
}

impl Keypair {
    /// Generates a fresh random keypair.
    pub fn generate() -> Keypair {
        let mut rng = rand::thread_rng();
        loop {
            let mut raw = [0u8; SECRET_KEY_SIZE];
            rng.fill_bytes(&mut raw);
            // Rejection sampling; almost never loops.
            if let Ok(keypair) = Keypair::from_secret_bytes(&raw) {
                return keypair;
            }
        }
    }

    /// Builds a keypair from 32 bytes of secret key material.
    pub fn from_secret_bytes(raw: &[u8]) -> Result<Keypair, IdentityError> {
        let raw: [u8; SECRET_KEY_SIZE] =
            raw.try_into().map_err(|_| IdentityError::InvalidSecretKey)?;
        let secret =
            secp256k1::SecretKey::parse(&raw).map_err(|_| IdentityError::InvalidSecretKey)?;
        let uncompressed = secp256k1::PublicKey::from_secret_key(&secret).serialize();
        // Strip the 0x04 uncompressed-point tag.
        let mut public = [0u8; PUBLIC_KEY_SIZE];
        public.copy_from_slice(&uncompressed[1..]);
        Ok(Keypair { secret, public: PublicKey(public) })
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_SIZE] {
        self.secret.serialize()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair").field("public", &self.public).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let raw = [7u8; SECRET_KEY_SIZE];
        let a = Keypair::from_secret_bytes(&raw).unwrap();
        let b = Keypair::from_secret_bytes(&raw).unwrap();
        assert_eq!(a.public(), b.public());
        assert_eq!(a.secret_bytes(), raw);
    }

    #[test]
    fn rejects_bad_lengths() {
        assert!(Keypair::from_secret_bytes(&[1u8; 31]).is_err());
        assert!(Keypair::from_secret_bytes(&[0u8; SECRET_KEY_SIZE]).is_err());
        assert!(PublicKey::from_bytes(&[1u8; 63]).is_err());
    }

    #[test]
    fn generated_keys_differ() {
        assert_ne!(Keypair::generate().public(), Keypair::generate().public());
    }
}
