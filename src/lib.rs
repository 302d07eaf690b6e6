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

//! Peer-to-peer networking substrate for a decentralized node.
//!
//! The pieces live in their own crates and are re-exported here:
//!
//! - [`core`]: node identity, packet framing and the multiplexed session.
//! - [`kad`]: the k-bucket routing table and the Kademlia discovery
//!   protocol.
//! - [`peer`]: peer sessions, the sub-protocol registry with its command-id
//!   windows, and the peer manager.

pub use devp2p_core as core;
pub use devp2p_kad as kad;
pub use devp2p_peer as peer;

pub use devp2p_core::{Keypair, Node, NodeId, Packet};
pub use devp2p_peer::{
    Capability, Config, DiscoveryHandle, DiscoveryService, PeerHandle, PeerManager, SubProtocol,
    WiredService,
};
