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

use crate::p2p::DisconnectReason;
use crate::protocol::Capability;
use std::io;
use thiserror::Error;

/// Errors of the peer layer. Any of them is fatal to the peer that raised
/// it and harmless to the rest of the process.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport, framing or session failure from the layer below.
    #[error(transparent)]
    Core(#[from] devp2p_core::Error),
    /// A sub-protocol with this capability is already registered.
    #[error("duplicate sub-protocol {0}")]
    DuplicateProtocol(Capability),
    /// An inbound command id fell outside every registered window.
    #[error("no registered protocol owns command id {0}")]
    UnknownCommand(usize),
    /// Dialing a remote node took longer than the connect budget.
    #[error("connecting to {0} timed out")]
    ConnectTimeout(String),
    /// The remote did not say hello within the grace period.
    #[error("no hello within the handshake grace period")]
    HandshakeTimeout,
    /// The remote sent something else before completing the hello exchange.
    #[error("command received before the hello exchange completed")]
    HandshakeViolation,
    /// The connection ended with a disconnect, ours or theirs.
    #[error("disconnected: {0}")]
    Disconnected(DisconnectReason),
    /// The peer set already holds `max_peers` peers.
    #[error("peer limit reached")]
    TooManyPeers,
    /// The configured private key could not be parsed.
    #[error("configured private key is invalid")]
    InvalidPrivateKey,
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Error {
        Error::Core(error.into())
    }
}
