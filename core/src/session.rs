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

//! The multiplexed session.
//!
//! One session sits between a peer's transport and its sub-protocols. On the
//! way out it keeps one egress queue per registered protocol and serves them
//! round-robin, so a chatty protocol cannot starve the others. On the way in
//! it deframes whatever ciphertext the transport produced and queues decoded
//! packets for dispatch.
//!
//! The first framing or authentication failure poisons the session; every
//! operation afterwards fails with [`Error::SessionBroken`].

use crate::cipher::FrameCipher;
use crate::codec::FrameCodec;
use crate::error::Error;
use crate::packet::Packet;
use asynchronous_codec::{Decoder, Encoder};
use bytes::{Bytes, BytesMut};
use log::trace;
use std::collections::VecDeque;

pub struct Session<C> {
    codec: FrameCodec<C>,
    /// Undecoded inbound ciphertext.
    ingress: BytesMut,
    /// Decoded inbound packets awaiting dispatch.
    packets: VecDeque<Packet>,
    /// Egress queues in protocol registration order.
    queues: Vec<(usize, VecDeque<Packet>)>,
    /// Next queue the round-robin scan starts from.
    cursor: usize,
    broken: bool,
}

impl<C: FrameCipher> Session<C> {
    pub fn new(cipher: C) -> Session<C> {
        Session {
            codec: FrameCodec::new(cipher),
            ingress: BytesMut::new(),
            packets: VecDeque::new(),
            queues: Vec::new(),
            cursor: 0,
            broken: false,
        }
    }

    /// Registers an egress queue for `protocol_id`.
    ///
    /// Panics when the protocol already has a queue; registration is driven
    /// by the peer's protocol registry which never repeats an id.
    pub fn add_protocol(&mut self, protocol_id: usize) {
        assert!(
            self.queues.iter().all(|(id, _)| *id != protocol_id),
            "protocol {} registered twice",
            protocol_id
        );
        self.queues.push((protocol_id, VecDeque::new()));
    }

    /// Queues an outbound packet on its protocol's egress queue.
    pub fn add_packet(&mut self, packet: Packet) -> Result<(), Error> {
        if self.broken {
            return Err(Error::SessionBroken);
        }
        let queue = self
            .queues
            .iter_mut()
            .find(|(id, _)| *id == packet.protocol_id)
            .map(|(_, q)| q)
            .ok_or(Error::UnknownProtocol(packet.protocol_id))?;
        queue.push_back(packet);
        Ok(())
    }

    /// Returns the next ciphertext chunk ready for the transport, or `None`
    /// when every queue is empty. Successive calls rotate over the
    /// non-empty queues.
    pub fn get_message(&mut self) -> Result<Option<Bytes>, Error> {
        if self.broken {
            return Err(Error::SessionBroken);
        }
        for step in 0..self.queues.len() {
            let index = (self.cursor + step) % self.queues.len();
            if let Some(packet) = self.queues[index].1.pop_front() {
                self.cursor = index + 1;
                let mut chunk = BytesMut::new();
                if let Err(error) = self.codec.encode(packet, &mut chunk) {
                    self.broken = true;
                    return Err(error);
                }
                return Ok(Some(chunk.freeze()));
            }
        }
        Ok(None)
    }

    /// Feeds inbound ciphertext, decoding as many complete frames as it
    /// contains onto the packet queue.
    pub fn add_message(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.broken {
            return Err(Error::SessionBroken);
        }
        self.ingress.extend_from_slice(data);
        loop {
            match self.codec.decode(&mut self.ingress) {
                Ok(Some(packet)) => {
                    trace!("decoded packet cmd={} len={}", packet.cmd_id, packet.payload.len());
                    self.packets.push_back(packet);
                }
                Ok(None) => return Ok(()),
                Err(error) => {
                    self.broken = true;
                    return Err(error);
                }
            }
        }
    }

    /// Pops one decoded inbound packet.
    pub fn get_packet(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::Plain;

    fn session_with_protocols(n: usize) -> Session<Plain> {
        let mut session = Session::new(Plain);
        for id in 0..n {
            session.add_protocol(id);
        }
        session
    }

    fn packet(protocol_id: usize, cmd_id: usize) -> Packet {
        Packet::new(protocol_id, cmd_id, Bytes::new())
    }

    /// Pipes `from`'s next chunk into `to` and returns the decoded command.
    fn relay(from: &mut Session<Plain>, to: &mut Session<Plain>) -> Option<usize> {
        let chunk = from.get_message().unwrap()?;
        to.add_message(&chunk).unwrap();
        to.get_packet().map(|p| p.cmd_id)
    }

    #[test]
    fn round_trip_through_two_sessions() {
        let mut a = session_with_protocols(1);
        let mut b = session_with_protocols(1);
        a.add_packet(packet(0, 5)).unwrap();
        assert_eq!(relay(&mut a, &mut b), Some(5));
        assert_eq!(relay(&mut a, &mut b), None);
    }

    #[test]
    fn egress_round_robins_across_protocols() {
        let mut session = session_with_protocols(2);
        let mut sink = session_with_protocols(1);
        // Queue two packets on each protocol; commands name their queue.
        for cmd in &[10, 11] {
            session.add_packet(packet(0, *cmd)).unwrap();
        }
        for cmd in &[20, 21] {
            session.add_packet(packet(1, *cmd)).unwrap();
        }
        let mut order = Vec::new();
        while let Some(cmd) = relay(&mut session, &mut sink) {
            order.push(cmd);
        }
        assert_eq!(order, vec![10, 20, 11, 21]);
    }

    #[test]
    fn drained_queue_is_skipped() {
        let mut session = session_with_protocols(2);
        let mut sink = session_with_protocols(1);
        session.add_packet(packet(0, 1)).unwrap();
        session.add_packet(packet(1, 2)).unwrap();
        session.add_packet(packet(1, 3)).unwrap();
        let mut order = Vec::new();
        while let Some(cmd) = relay(&mut session, &mut sink) {
            order.push(cmd);
        }
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn unknown_protocol_is_rejected() {
        let mut session = session_with_protocols(1);
        assert!(matches!(session.add_packet(packet(7, 0)), Err(Error::UnknownProtocol(7))));
    }

    #[test]
    fn framing_error_breaks_the_session() {
        let mut a = session_with_protocols(1);
        let mut b = session_with_protocols(1);
        a.add_packet(packet(0, 1)).unwrap();
        let mut chunk = a.get_message().unwrap().unwrap().to_vec();
        let last = chunk.len() - 1;
        chunk[last] ^= 0xff;
        assert!(b.add_message(&chunk).is_err());
        assert!(b.is_broken());
        assert!(matches!(b.add_message(&[]), Err(Error::SessionBroken)));
        assert!(matches!(b.get_message(), Err(Error::SessionBroken)));
        assert!(matches!(b.add_packet(packet(0, 1)), Err(Error::SessionBroken)));
    }

    #[test]
    fn partial_chunks_accumulate() {
        let mut a = session_with_protocols(1);
        let mut b = session_with_protocols(1);
        a.add_packet(packet(0, 9)).unwrap();
        let chunk = a.get_message().unwrap().unwrap();
        let (head, tail) = chunk.split_at(3);
        b.add_message(head).unwrap();
        assert!(b.get_packet().is_none());
        b.add_message(tail).unwrap();
        assert_eq!(b.get_packet().unwrap().cmd_id, 9);
    }
}
