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

//! Sub-protocols and their command-id windows.
//!
//! Every peer carries an ordered list of registered sub-protocols. The wire
//! knows nothing about them: it carries a single flat command-id space, and
//! each protocol owns a contiguous window of it. With protocols `p0, p1, …`
//! registered in that order and `m_i` their largest local command id,
//! protocol `p_i` owns `[offset_i, offset_i + m_i]` where `offset_0 = 0` and
//! `offset_i = offset_(i-1) + m_(i-1) + 1`.
//!
//! Outbound packets have their local command id shifted by the window
//! offset; inbound packets are claimed by the first protocol whose window
//! reaches the wire id, and shifted back before dispatch. Protocols are
//! therefore always written against their own zero-based ids.

use crate::error::Error;
use crate::p2p::{DisconnectReason, Hello};
use crate::peer::PeerHandle;
use bytes::Bytes;
use devp2p_core::{FrameCipher, Packet, Session};
use std::borrow::Cow;
use std::fmt;

/// Name and version of a sub-protocol. This pair is a protocol's identity
/// everywhere: in the hello exchange, in the registry and for broadcasts.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Capability {
    pub name: Cow<'static, str>,
    pub version: u8,
}

impl Capability {
    pub fn new(name: impl Into<Cow<'static, str>>, version: u8) -> Capability {
        Capability { name: name.into(), version }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// Deferred effects a handler asks its peer to apply once dispatch returns.
pub(crate) enum ProtocolAction {
    HelloReceived(Hello),
    /// Send a disconnect with this reason and close.
    Disconnect(DisconnectReason),
    /// The remote sent us a disconnect.
    RemoteDisconnected(DisconnectReason),
}

/// Handler-side view of the peer during a dispatch.
pub struct ProtocolContext<'a> {
    pub(crate) session: &'a mut Session<Box<dyn FrameCipher>>,
    pub(crate) protocol_id: usize,
    pub(crate) offset: usize,
    pub(crate) actions: &'a mut Vec<ProtocolAction>,
}

impl<'a> ProtocolContext<'a> {
    /// Queues a packet of this protocol. `cmd_id` is protocol-local; the
    /// window offset is applied here.
    pub fn send(&mut self, cmd_id: usize, payload: Bytes) -> Result<(), Error> {
        let packet = Packet::new(self.protocol_id, self.offset + cmd_id, payload);
        self.session.add_packet(packet)?;
        Ok(())
    }

    /// Asks the peer to disconnect with `reason` after this dispatch.
    pub fn disconnect(&mut self, reason: DisconnectReason) {
        self.actions.push(ProtocolAction::Disconnect(reason));
    }

    pub(crate) fn action(&mut self, action: ProtocolAction) {
        self.actions.push(action);
    }
}

/// A per-peer sub-protocol instance.
///
/// Handlers run synchronously on the peer loop. They may queue egress
/// packets and update their own state; anything touching the peer itself
/// goes through the context. A handler error terminates its peer.
pub trait SubProtocol: Send {
    fn capability(&self) -> Capability;

    /// Largest protocol-local command id. The window claims
    /// `max_cmd_id + 1` wire ids.
    fn max_cmd_id(&self) -> usize;

    /// Called once right after registration.
    fn on_start(&mut self, _ctx: &mut ProtocolContext<'_>) -> Result<(), Error> {
        Ok(())
    }

    fn on_packet(
        &mut self,
        ctx: &mut ProtocolContext<'_>,
        cmd_id: usize,
        payload: Bytes,
    ) -> Result<(), Error>;

    /// Called when the peer goes away, in registration order.
    fn on_stop(&mut self) {}
}

/// An installed service that speaks a sub-protocol.
///
/// The peer manager advertises every service's capability in its hello, and
/// each peer that shares the capability gets its own protocol instance from
/// [`WiredService::create_protocol`].
pub trait WiredService: Send + Sync {
    fn capability(&self) -> Capability;

    fn max_cmd_id(&self) -> usize;

    fn create_protocol(&self, peer: &PeerHandle) -> Box<dyn SubProtocol>;

    fn on_peer_connected(&self, _peer: &PeerHandle) {}

    fn on_peer_disconnected(&self, _peer: &PeerHandle) {}
}

struct RegisteredProtocol {
    offset: usize,
    handler: Box<dyn SubProtocol>,
}

/// The ordered set of sub-protocols registered on one peer, with their
/// command-id windows.
pub struct ProtocolRegistry {
    entries: Vec<RegisteredProtocol>,
}

impl ProtocolRegistry {
    pub fn new() -> ProtocolRegistry {
        ProtocolRegistry { entries: Vec::new() }
    }

    /// Appends a protocol, assigning the next window. Returns its index.
    pub fn register(&mut self, handler: Box<dyn SubProtocol>) -> Result<usize, Error> {
        let capability = handler.capability();
        if self.entries.iter().any(|e| e.handler.capability() == capability) {
            return Err(Error::DuplicateProtocol(capability));
        }
        let offset = match self.entries.last() {
            Some(last) => last.offset + last.handler.max_cmd_id() + 1,
            None => 0,
        };
        self.entries.push(RegisteredProtocol { offset, handler });
        Ok(self.entries.len() - 1)
    }

    /// Maps a wire command id to `(protocol index, local command id)`.
    pub fn resolve(&self, wire_cmd_id: usize) -> Result<(usize, usize), Error> {
        for (index, entry) in self.entries.iter().enumerate() {
            if wire_cmd_id <= entry.offset + entry.handler.max_cmd_id() {
                return Ok((index, wire_cmd_id - entry.offset));
            }
        }
        Err(Error::UnknownCommand(wire_cmd_id))
    }

    pub fn offset(&self, index: usize) -> usize {
        self.entries[index].offset
    }

    pub(crate) fn entry_mut(&mut self, index: usize) -> (usize, &mut Box<dyn SubProtocol>) {
        let entry = &mut self.entries[index];
        (entry.offset, &mut entry.handler)
    }

    pub fn index_of(&self, capability: &Capability) -> Option<usize> {
        self.entries.iter().position(|e| e.handler.capability() == *capability)
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        self.entries.iter().map(|e| e.handler.capability()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn stop_all(&mut self) {
        for entry in &mut self.entries {
            entry.handler.on_stop();
        }
    }
}

impl Default for ProtocolRegistry {
    fn default() -> ProtocolRegistry {
        ProtocolRegistry::new()
    }
}
