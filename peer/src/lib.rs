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

//! Peer sessions and their management.
//!
//! A [`peer::Peer`] drives one connection: its transport, its multiplexed
//! session and the sub-protocols registered on it, opened by the hello
//! exchange of the built-in [`p2p`] control protocol. The
//! [`manager::PeerManager`] owns the set of peers, accepting inbound
//! connections and dialing outbound ones based on what the
//! [`discovery`] service knows. Applications plug in by implementing
//! [`protocol::WiredService`].

pub mod config;
pub mod discovery;
pub mod error;
pub mod manager;
pub mod p2p;
pub mod peer;
pub mod protocol;

pub use config::{Config, NodeConfig, P2pConfig};
pub use discovery::{DiscoveryHandle, DiscoveryService, InboundMessage, NullWire};
pub use error::Error;
pub use manager::{PeerManager, CONNECT_TIMEOUT};
pub use p2p::{DisconnectReason, Hello, P2pProtocol};
pub use peer::{LocalInfo, Peer, PeerHandle, PeerId, HANDSHAKE_GRACE};
pub use protocol::{Capability, ProtocolContext, ProtocolRegistry, SubProtocol, WiredService};
