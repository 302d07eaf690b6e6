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

//! The built-in control protocol.
//!
//! It is registered first on every peer, so it owns wire command ids 0
//! through [`MAX_CMD_ID`]. It carries the hello exchange that opens every
//! connection, disconnects with a reason, and a connection-level ping.

use crate::error::Error;
use crate::protocol::{Capability, ProtocolAction, ProtocolContext, SubProtocol};
use bytes::{Bytes, BytesMut};
use devp2p_core::packet::{get_bytes, get_uint, put_bytes, put_uint};
use devp2p_core::{FramingError, NodeId};
use log::{debug, trace};
use std::fmt;

/// Version of the control protocol itself.
pub const PROTOCOL_VERSION: u64 = 4;

/// Largest local command id; the control window is `[0, MAX_CMD_ID]`.
pub const MAX_CMD_ID: usize = 15;

pub const HELLO: usize = 0;
pub const DISCONNECT: usize = 1;
pub const PING: usize = 2;
pub const PONG: usize = 3;

/// Why a connection was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    DisconnectRequested,
    TcpError,
    BadProtocol,
    UselessPeer,
    TooManyPeers,
    AlreadyConnected,
    IncompatibleVersion,
    InvalidIdentity,
    ClientQuitting,
    UnexpectedIdentity,
    ConnectedToSelf,
    Timeout,
    Other,
}

impl DisconnectReason {
    pub fn code(self) -> u64 {
        match self {
            DisconnectReason::DisconnectRequested => 0,
            DisconnectReason::TcpError => 1,
            DisconnectReason::BadProtocol => 2,
            DisconnectReason::UselessPeer => 3,
            DisconnectReason::TooManyPeers => 4,
            DisconnectReason::AlreadyConnected => 5,
            DisconnectReason::IncompatibleVersion => 6,
            DisconnectReason::InvalidIdentity => 7,
            DisconnectReason::ClientQuitting => 8,
            DisconnectReason::UnexpectedIdentity => 9,
            DisconnectReason::ConnectedToSelf => 10,
            DisconnectReason::Timeout => 11,
            DisconnectReason::Other => 16,
        }
    }

    pub fn from_code(code: u64) -> DisconnectReason {
        match code {
            0 => DisconnectReason::DisconnectRequested,
            1 => DisconnectReason::TcpError,
            2 => DisconnectReason::BadProtocol,
            3 => DisconnectReason::UselessPeer,
            4 => DisconnectReason::TooManyPeers,
            5 => DisconnectReason::AlreadyConnected,
            6 => DisconnectReason::IncompatibleVersion,
            7 => DisconnectReason::InvalidIdentity,
            8 => DisconnectReason::ClientQuitting,
            9 => DisconnectReason::UnexpectedIdentity,
            10 => DisconnectReason::ConnectedToSelf,
            11 => DisconnectReason::Timeout,
            _ => DisconnectReason::Other,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectReason::DisconnectRequested => "disconnect requested",
            DisconnectReason::TcpError => "tcp error",
            DisconnectReason::BadProtocol => "bad protocol",
            DisconnectReason::UselessPeer => "useless peer",
            DisconnectReason::TooManyPeers => "too many peers",
            DisconnectReason::AlreadyConnected => "already connected",
            DisconnectReason::IncompatibleVersion => "incompatible protocol version",
            DisconnectReason::InvalidIdentity => "invalid identity",
            DisconnectReason::ClientQuitting => "client quitting",
            DisconnectReason::UnexpectedIdentity => "unexpected identity",
            DisconnectReason::ConnectedToSelf => "connected to self",
            DisconnectReason::Timeout => "timeout",
            DisconnectReason::Other => "unspecified reason",
        };
        f.write_str(text)
    }
}

/// The opening packet of every connection, in both directions.
#[derive(Clone, Debug, PartialEq)]
pub struct Hello {
    pub version: u64,
    pub client_version: String,
    pub capabilities: Vec<Capability>,
    pub listen_port: u16,
    pub node_id: NodeId,
}

impl Hello {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_uint(&mut buf, self.version);
        put_bytes(&mut buf, self.client_version.as_bytes());
        put_uint(&mut buf, self.capabilities.len() as u64);
        for capability in &self.capabilities {
            put_bytes(&mut buf, capability.name.as_bytes());
            put_uint(&mut buf, u64::from(capability.version));
        }
        put_uint(&mut buf, u64::from(self.listen_port));
        put_bytes(&mut buf, self.node_id.as_bytes());
        buf.freeze()
    }

    pub fn decode(mut payload: Bytes) -> Result<Hello, devp2p_core::Error> {
        let version = get_uint(&mut payload)?;
        let client_version = String::from_utf8(get_bytes(&mut payload)?.to_vec())
            .map_err(|_| FramingError::Malformed)?;
        let count = get_uint(&mut payload)? as usize;
        let mut capabilities = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let name = String::from_utf8(get_bytes(&mut payload)?.to_vec())
                .map_err(|_| FramingError::Malformed)?;
            let version = get_uint(&mut payload)?;
            if version > u64::from(u8::MAX) {
                return Err(FramingError::Malformed.into());
            }
            capabilities.push(Capability::new(name, version as u8));
        }
        let listen_port = get_uint(&mut payload)?;
        if listen_port > u64::from(u16::MAX) {
            return Err(FramingError::Malformed.into());
        }
        let node_id = NodeId::from_slice(&get_bytes(&mut payload)?)
            .ok_or(FramingError::Malformed)?;
        Ok(Hello {
            version,
            client_version,
            capabilities,
            listen_port: listen_port as u16,
            node_id,
        })
    }
}

/// Per-peer instance of the control protocol.
pub struct P2pProtocol {
    local_hello: Hello,
}

impl P2pProtocol {
    pub fn new(local_hello: Hello) -> P2pProtocol {
        P2pProtocol { local_hello }
    }

    pub fn capability() -> Capability {
        Capability::new("p2p", PROTOCOL_VERSION as u8)
    }
}

impl SubProtocol for P2pProtocol {
    fn capability(&self) -> Capability {
        P2pProtocol::capability()
    }

    fn max_cmd_id(&self) -> usize {
        MAX_CMD_ID
    }

    fn on_start(&mut self, ctx: &mut ProtocolContext<'_>) -> Result<(), Error> {
        // Hello goes out before anything else on the connection.
        ctx.send(HELLO, self.local_hello.encode())
    }

    fn on_packet(
        &mut self,
        ctx: &mut ProtocolContext<'_>,
        cmd_id: usize,
        payload: Bytes,
    ) -> Result<(), Error> {
        match cmd_id {
            HELLO => {
                let hello = Hello::decode(payload)?;
                trace!("hello from {}: {}", hello.node_id, hello.client_version);
                ctx.action(ProtocolAction::HelloReceived(hello));
                Ok(())
            }
            DISCONNECT => {
                let mut payload = payload;
                let reason = DisconnectReason::from_code(get_uint(&mut payload).unwrap_or(16));
                ctx.action(ProtocolAction::RemoteDisconnected(reason));
                Ok(())
            }
            PING => ctx.send(PONG, Bytes::new()),
            PONG => Ok(()),
            other => {
                // Reserved command ids inside the control window.
                debug!("ignoring reserved control command {}", other);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devp2p_core::{FrameCipher, Plain, Session};

    fn sample_hello() -> Hello {
        Hello {
            version: PROTOCOL_VERSION,
            client_version: "devp2p/test".into(),
            capabilities: vec![Capability::new("eth", 63), Capability::new("shh", 2)],
            listen_port: 30303,
            node_id: NodeId::random(),
        }
    }

    #[test]
    fn hello_round_trip() {
        let hello = sample_hello();
        assert_eq!(Hello::decode(hello.encode()).unwrap(), hello);
    }

    #[test]
    fn hello_with_no_capabilities_round_trips() {
        let mut hello = sample_hello();
        hello.capabilities.clear();
        assert_eq!(Hello::decode(hello.encode()).unwrap(), hello);
    }

    #[test]
    fn truncated_hello_is_rejected() {
        let encoded = sample_hello().encode();
        for cut in 0..encoded.len() {
            assert!(Hello::decode(encoded.slice(0..cut)).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn disconnect_reason_codes_round_trip() {
        for reason in &[
            DisconnectReason::DisconnectRequested,
            DisconnectReason::TooManyPeers,
            DisconnectReason::ConnectedToSelf,
            DisconnectReason::Timeout,
            DisconnectReason::Other,
        ] {
            assert_eq!(DisconnectReason::from_code(reason.code()), *reason);
        }
        assert_eq!(DisconnectReason::from_code(250), DisconnectReason::Other);
    }

    /// Drives one command through a control protocol instance and returns
    /// the actions and queued egress it produced.
    fn drive(cmd_id: usize, payload: Bytes) -> (Vec<ProtocolAction>, Option<usize>) {
        let mut session: Session<Box<dyn FrameCipher>> = Session::new(Box::new(Plain));
        session.add_protocol(0);
        let mut actions = Vec::new();
        let mut proto = P2pProtocol::new(sample_hello());
        let mut ctx = ProtocolContext {
            session: &mut session,
            protocol_id: 0,
            offset: 0,
            actions: &mut actions,
        };
        proto.on_packet(&mut ctx, cmd_id, payload).unwrap();
        // Recover the queued command id, if any, through a decoding sink.
        let mut sink: Session<Box<dyn FrameCipher>> = Session::new(Box::new(Plain));
        sink.add_protocol(0);
        let queued = match session.get_message().unwrap() {
            Some(chunk) => {
                sink.add_message(&chunk).unwrap();
                sink.get_packet().map(|p| p.cmd_id)
            }
            None => None,
        };
        (actions, queued)
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let (actions, queued) = drive(PING, Bytes::new());
        assert!(actions.is_empty());
        assert_eq!(queued, Some(PONG));
    }

    #[test]
    fn hello_becomes_an_action() {
        let hello = sample_hello();
        let (actions, queued) = drive(HELLO, hello.encode());
        assert!(queued.is_none());
        match actions.as_slice() {
            [ProtocolAction::HelloReceived(received)] => assert_eq!(*received, hello),
            _ => panic!("expected exactly one hello action"),
        }
    }

    #[test]
    fn disconnect_becomes_an_action() {
        let mut payload = BytesMut::new();
        put_uint(&mut payload, DisconnectReason::TooManyPeers.code());
        let (actions, queued) = drive(DISCONNECT, payload.freeze());
        assert!(queued.is_none());
        match actions.as_slice() {
            [ProtocolAction::RemoteDisconnected(reason)] => {
                assert_eq!(*reason, DisconnectReason::TooManyPeers)
            }
            _ => panic!("expected exactly one disconnect action"),
        }
    }
}
