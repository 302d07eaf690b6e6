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

//! Core building blocks of the peer-to-peer stack.
//!
//! This crate contains everything a single connection needs below the
//! sub-protocol layer: node identity and addressing ([`node`], [`identity`]),
//! the application [`packet`] and its wire helpers, the frame [`codec`] with
//! its pluggable [`cipher`] seam, and the multiplexed [`session`] that fans
//! packets of several sub-protocols in and out of one byte stream.

pub mod cipher;
pub mod codec;
pub mod error;
pub mod identity;
pub mod node;
pub mod packet;
pub mod session;

pub use cipher::{FrameCipher, Plain, MAC_SIZE};
pub use codec::{FrameCodec, MAX_FRAME_SIZE};
pub use error::{Error, FramingError};
pub use identity::{Keypair, PublicKey, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE};
pub use node::{Address, Node, NodeId, U512};
pub use packet::Packet;
pub use session::Session;
