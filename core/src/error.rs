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

use std::io;
use thiserror::Error;

/// Failure while framing or deframing the encrypted stream.
///
/// Any framing error is fatal to the session that produced it.
#[derive(Debug, Error)]
pub enum FramingError {
    /// A frame announced a length above [`crate::MAX_FRAME_SIZE`].
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    Oversize { size: usize, max: usize },
    /// The message authentication code did not match the frame contents.
    #[error("frame authentication failed")]
    Mac,
    /// A field inside a frame could not be decoded.
    #[error("malformed frame contents")]
    Malformed,
    /// A frame ended in the middle of a field.
    #[error("truncated frame contents")]
    Truncated,
}

/// Errors raised below the sub-protocol layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading from or writing to the underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// The frame codec rejected inbound or outbound data.
    #[error(transparent)]
    Framing(#[from] FramingError),
    /// The session hit a fatal error earlier and refuses further work.
    #[error("session is broken")]
    SessionBroken,
    /// An outbound packet named a protocol with no registered egress queue.
    #[error("no egress queue for protocol {0}")]
    UnknownProtocol(usize),
    /// A bootstrap URI did not match `enode://<pubkey_hex>@<host>:<port>`.
    #[error("invalid enode URI: {0}")]
    InvalidUri(&'static str),
}
