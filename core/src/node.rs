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

//! Node identifiers, addresses and the `enode://` URI form.

use crate::error::Error;
use crate::identity::{PublicKey, PUBLIC_KEY_SIZE};
use rand::RngCore;
use std::fmt;
use std::hash::{Hash, Hasher};
use uint::construct_uint;

construct_uint! {
    /// 512-bit unsigned integer used for id-space arithmetic.
    pub struct U512(8);
}

/// Number of bytes in a node identifier.
pub const NODE_ID_SIZE: usize = 64;

const URI_SCHEME: &str = "enode://";

/// A 512-bit node identifier.
///
/// Ids are the raw public key bytes of the node, interpreted as a big-endian
/// unsigned integer when computing distances.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; NODE_ID_SIZE]);

impl NodeId {
    /// Derives the identifier of the given public key.
    pub fn from_pubkey(pubkey: &PublicKey) -> NodeId {
        NodeId(*pubkey.as_bytes())
    }

    /// Reads an identifier from a 64-byte slice.
    pub fn from_slice(bytes: &[u8]) -> Option<NodeId> {
        if bytes.len() != NODE_ID_SIZE {
            return None;
        }
        let mut id = [0u8; NODE_ID_SIZE];
        id.copy_from_slice(bytes);
        Some(NodeId(id))
    }

    /// A uniformly random identifier, used as a lookup target.
    pub fn random() -> NodeId {
        let mut id = [0u8; NODE_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut id);
        NodeId(id)
    }

    pub fn from_uint(value: U512) -> NodeId {
        let mut id = [0u8; NODE_ID_SIZE];
        value.to_big_endian(&mut id);
        NodeId(id)
    }

    pub fn to_uint(&self) -> U512 {
        U512::from_big_endian(&self.0)
    }

    /// XOR distance to `other`.
    pub fn distance(&self, other: &NodeId) -> U512 {
        self.to_uint() ^ other.to_uint()
    }

    /// Position of the highest bit differing from `other`, 0 when equal.
    pub fn log_distance(&self, other: &NodeId) -> usize {
        self.distance(other).bits().saturating_sub(1)
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}…", hex::encode(&self.0[..4]))
    }
}

/// Network location of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Address {
        Address { host: host.into(), port }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A remote node: identifier, public key and address.
///
/// Two nodes are equal when their identifiers are equal; the address is
/// descriptive only.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub pubkey: PublicKey,
    pub address: Address,
}

impl Node {
    pub fn new(pubkey: PublicKey, address: Address) -> Node {
        Node { id: NodeId::from_pubkey(&pubkey), pubkey, address }
    }

    /// Builds a node from a bare identifier. The public key is recovered
    /// from the id bytes; the address is left unspecified.
    pub fn from_id(id: NodeId) -> Node {
        let pubkey = PublicKey::from_bytes(id.as_bytes())
            .expect("node ids and public keys have the same width");
        Node { id, pubkey, address: Address::new("0.0.0.0", 0) }
    }

    /// Parses `enode://<pubkey_hex>@<host>:<port>`.
    ///
    /// The public key must be exactly 128 lowercase hex characters.
    pub fn from_uri(uri: &str) -> Result<Node, Error> {
        let rest = uri
            .strip_prefix(URI_SCHEME)
            .ok_or(Error::InvalidUri("missing enode:// scheme"))?;
        let at = rest.find('@').ok_or(Error::InvalidUri("missing @ separator"))?;
        let (pubkey_hex, host_port) = (&rest[..at], &rest[at + 1..]);
        if pubkey_hex.len() != 2 * PUBLIC_KEY_SIZE
            || !pubkey_hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(Error::InvalidUri("public key must be 128 lowercase hex characters"));
        }
        let raw = hex::decode(pubkey_hex)
            .map_err(|_| Error::InvalidUri("public key must be 128 lowercase hex characters"))?;
        let pubkey = PublicKey::from_bytes(&raw)
            .map_err(|_| Error::InvalidUri("public key must be 128 lowercase hex characters"))?;
        let colon = host_port.rfind(':').ok_or(Error::InvalidUri("missing port"))?;
        let (host, port) = (&host_port[..colon], &host_port[colon + 1..]);
        if host.is_empty() {
            return Err(Error::InvalidUri("empty host"));
        }
        let port: u16 = port.parse().map_err(|_| Error::InvalidUri("invalid port"))?;
        Ok(Node::new(pubkey, Address::new(host, port)))
    }

    /// Formats this node back into its `enode://` URI.
    pub fn to_uri(&self) -> String {
        format!(
            "{}{}@{}:{}",
            URI_SCHEME,
            hex::encode(self.pubkey.as_bytes()),
            self.address.host,
            self.address.port
        )
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Node) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({} @ {})", self.id, self.address)
    }
}
