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

//! The discovery service task.
//!
//! The Kademlia state machine is single-owner: exactly one task holds it and
//! everything else talks to that task over a bounded command channel. The
//! task also runs the periodic sweep that expires probes and stale lookups.
//!
//! The wire the state machine sends on stays abstract here; the application
//! decides how discovery datagrams actually travel and feeds inbound ones
//! back through [`DiscoveryHandle::deliver`].

use async_std::task;
use devp2p_core::{Node, NodeId};
use devp2p_kad::{KadConfig, KademliaProtocol, PingId, WireInterface, EVICTION_CHECK_INTERVAL};
use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, SinkExt, StreamExt};
use log::{debug, trace};
use std::time::Duration;

const COMMAND_BUFFER: usize = 64;

/// A discovery datagram delivered by the application's wire.
#[derive(Debug)]
pub enum InboundMessage {
    Ping { from: Node, ping_id: PingId },
    Pong { from: Node, ping_id: PingId },
    FindNode { from: Node, target: NodeId },
    Neighbours { from: Node, nodes: Vec<Node> },
}

enum DiscoveryCommand {
    Lookup(NodeId),
    Update(Node),
    Bootstrap(Vec<Node>),
    Neighbours { target: NodeId, count: usize, reply: oneshot::Sender<Vec<Node>> },
    Inbound(InboundMessage),
}

/// Client side of the discovery task. Cloneable and cheap.
#[derive(Clone)]
pub struct DiscoveryHandle {
    tx: mpsc::Sender<DiscoveryCommand>,
}

impl DiscoveryHandle {
    /// Starts an iterative lookup for `target`. Results accumulate in the
    /// routing table; query them with [`DiscoveryHandle::neighbours`].
    pub async fn lookup(&self, target: NodeId) {
        self.send(DiscoveryCommand::Lookup(target)).await;
    }

    /// Feeds a freshly seen node into the routing table.
    pub async fn update(&self, node: Node) {
        self.send(DiscoveryCommand::Update(node)).await;
    }

    /// Seeds the table and looks up the local id.
    pub async fn bootstrap(&self, nodes: Vec<Node>) {
        self.send(DiscoveryCommand::Bootstrap(nodes)).await;
    }

    /// The closest known nodes to `target`.
    pub async fn neighbours(&self, target: NodeId, count: usize) -> Vec<Node> {
        let (reply, rx) = oneshot::channel();
        self.send(DiscoveryCommand::Neighbours { target, count, reply }).await;
        rx.await.unwrap_or_default()
    }

    /// Delivers an inbound discovery datagram.
    pub async fn deliver(&self, message: InboundMessage) {
        self.send(DiscoveryCommand::Inbound(message)).await;
    }

    async fn send(&self, command: DiscoveryCommand) {
        let mut tx = self.tx.clone();
        if tx.send(command).await.is_err() {
            debug!("discovery service is gone");
        }
    }
}

/// The task that owns the Kademlia state machine.
pub struct DiscoveryService<W> {
    protocol: KademliaProtocol<W>,
    commands: mpsc::Receiver<DiscoveryCommand>,
    sweep_interval: Duration,
}

impl<W: WireInterface> DiscoveryService<W> {
    pub fn new(this_node: Node, wire: W) -> (DiscoveryService<W>, DiscoveryHandle) {
        DiscoveryService::with_config(this_node, wire, KadConfig::default(), EVICTION_CHECK_INTERVAL)
    }

    pub fn with_config(
        this_node: Node,
        wire: W,
        config: KadConfig,
        sweep_interval: Duration,
    ) -> (DiscoveryService<W>, DiscoveryHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let service = DiscoveryService {
            protocol: KademliaProtocol::with_config(this_node, wire, config),
            commands,
            sweep_interval,
        };
        (service, DiscoveryHandle { tx })
    }

    pub fn protocol(&self) -> &KademliaProtocol<W> {
        &self.protocol
    }

    /// Serves commands and the sweep timer until every handle is gone.
    pub async fn run(self) {
        let DiscoveryService { mut protocol, mut commands, sweep_interval } = self;
        debug!("discovery service started");
        loop {
            let tick = task::sleep(sweep_interval).fuse();
            futures::pin_mut!(tick);
            futures::select! {
                command = commands.next() => match command {
                    Some(command) => DiscoveryService::handle(&mut protocol, command),
                    None => break,
                },
                _ = tick => protocol.check_expired(),
            }
        }
        debug!("discovery service stopped");
    }

    fn handle(protocol: &mut KademliaProtocol<W>, command: DiscoveryCommand) {
        match command {
            DiscoveryCommand::Lookup(target) => protocol.find_node(target),
            DiscoveryCommand::Update(node) => protocol.update(node),
            DiscoveryCommand::Bootstrap(nodes) => protocol.bootstrap(nodes),
            DiscoveryCommand::Neighbours { target, count, reply } => {
                let _ = reply.send(protocol.routing().neighbours(&target, count));
            }
            DiscoveryCommand::Inbound(message) => {
                trace!("inbound discovery message: {:?}", message);
                match message {
                    InboundMessage::Ping { from, ping_id } => protocol.recv_ping(&from, ping_id),
                    InboundMessage::Pong { from, ping_id } => protocol.recv_pong(&from, ping_id),
                    InboundMessage::FindNode { from, target } => {
                        protocol.recv_find_node(&from, target)
                    }
                    InboundMessage::Neighbours { from, nodes } => {
                        protocol.recv_neighbours(&from, nodes)
                    }
                }
            }
        }
    }
}

/// A wire that drops every send. Stands in while the application has not
/// wired discovery datagrams to a transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullWire;

impl WireInterface for NullWire {
    fn send_ping(&mut self, _to: &Node, _ping_id: PingId) {}

    fn send_pong(&mut self, _to: &Node, _ping_id: PingId) {}

    fn send_find_node(&mut self, _to: &Node, _target: NodeId) {}

    fn send_neighbours(&mut self, _to: &Node, _neighbours: Vec<Node>) {}
}
