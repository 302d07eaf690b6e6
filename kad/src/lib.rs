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

//! Kademlia node discovery.
//!
//! [`kbucket`] holds the routing table: a sorted list of k-buckets covering
//! the whole 512-bit id space, split on demand as the neighbourhood of the
//! local node fills up. [`protocol`] drives it: ping/pong liveness probes
//! with eviction arbitration, and the iterative find-node lookup.
//!
//! The protocol is written against an abstract [`protocol::WireInterface`];
//! it performs no IO and keeps no tasks of its own. Callers deliver inbound
//! messages through the `recv_*` methods and arrange for
//! [`protocol::KademliaProtocol::check_expired`] to run periodically.

use std::time::Duration;

pub mod kbucket;
pub mod protocol;

pub use kbucket::{KBucket, RoutingTable, UpdateOutcome};
pub use protocol::{KadConfig, KademliaProtocol, PingId, WireInterface};

/// Capacity of a k-bucket and of its replacement cache.
pub const BUCKET_SIZE: usize = 16;

/// Lookup concurrency: how many nodes a find-node round queries.
pub const ALPHA: usize = 3;

/// Width of the node id space in bits.
pub const ID_SIZE: usize = 512;

/// Tree-depth modulus for bucket splitting. A full bucket that does not
/// cover the local id may still split while its depth is not a multiple of
/// `B`.
pub const B: usize = 8;

/// How long a ping or find-node waits for its answer.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Period of the sweep that expires pending pongs and stale lookups.
pub const EVICTION_CHECK_INTERVAL: Duration = Duration::from_millis(75);

/// Buckets untouched for this long get a refresh lookup.
pub const IDLE_BUCKET_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Upper bound on query rounds within one lookup.
pub const MAX_LOOKUP_ROUNDS: usize = 16;
