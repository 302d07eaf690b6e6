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

//! The per-connection peer task.
//!
//! Each peer owns its transport, its multiplexed session and its registered
//! sub-protocols, and pumps all of them from a single loop: drain decoded
//! ingress into the handlers, push one ready egress chunk to the transport,
//! then wait briefly for the socket to become readable. Nothing else touches
//! these; the manager talks to the peer only through its [`PeerHandle`].

use crate::error::Error;
use crate::p2p::{self, DisconnectReason, Hello, P2pProtocol};
use crate::protocol::{
    Capability, ProtocolAction, ProtocolContext, ProtocolRegistry, SubProtocol, WiredService,
};
use async_std::io;
use async_std::net::{Shutdown, TcpStream};
use async_std::prelude::*;
use bytes::{Bytes, BytesMut};
use devp2p_core::packet::put_uint;
use devp2p_core::{FrameCipher, NodeId, Packet, Session};
use futures::channel::mpsc;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Local identifier of a live peer session.
pub type PeerId = usize;

const READ_BUFFER_SIZE: usize = 4096;
const POLL_TIMEOUT: Duration = Duration::from_millis(10);
const FLUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// How long the remote has to complete the hello exchange.
pub const HANDSHAKE_GRACE: Duration = Duration::from_secs(2);

/// Identity of the local node, as advertised in its hello.
#[derive(Clone, Debug)]
pub struct LocalInfo {
    pub node_id: NodeId,
    pub client_version: String,
    pub listen_port: u16,
}

pub(crate) enum PeerCommand {
    Send { capability: Capability, cmd_id: usize, payload: Bytes },
    Stop,
}

/// State a peer shares with whoever holds its handle.
struct PeerShared {
    node_id: Mutex<Option<NodeId>>,
    capabilities: Mutex<Vec<Capability>>,
    client_version: Mutex<String>,
}

/// Cheap reference to a running peer.
///
/// Holders may queue packets and request a stop; everything else stays
/// inside the peer task. Dropping a handle never stops the peer.
#[derive(Clone)]
pub struct PeerHandle {
    id: PeerId,
    tx: mpsc::UnboundedSender<PeerCommand>,
    shared: Arc<PeerShared>,
}

impl PeerHandle {
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Remote node id, known once the hello exchange completed.
    pub fn node_id(&self) -> Option<NodeId> {
        *self.shared.node_id.lock()
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        self.shared.capabilities.lock().clone()
    }

    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.shared.capabilities.lock().contains(capability)
    }

    pub fn client_version(&self) -> String {
        self.shared.client_version.lock().clone()
    }

    /// Queues a packet of the given sub-protocol on this peer. Dropped
    /// silently when the protocol is not registered or the peer is gone.
    pub fn send(&self, capability: Capability, cmd_id: usize, payload: Bytes) {
        let _ = self.tx.unbounded_send(PeerCommand::Send { capability, cmd_id, payload });
    }

    /// Asks the peer loop to terminate. Idempotent.
    pub fn stop(&self) {
        let _ = self.tx.unbounded_send(PeerCommand::Stop);
    }
}

pub struct Peer {
    id: PeerId,
    stream: TcpStream,
    session: Session<Box<dyn FrameCipher>>,
    registry: ProtocolRegistry,
    actions: Vec<ProtocolAction>,
    commands: mpsc::UnboundedReceiver<PeerCommand>,
    shared: Arc<PeerShared>,
    handle: PeerHandle,
    services: Vec<Arc<dyn WiredService>>,
    peers: Arc<Mutex<HashMap<PeerId, PeerHandle>>>,
    local: LocalInfo,
    /// Identity we dialed, for outbound connections.
    expected_node_id: Option<NodeId>,
    hello_received: bool,
}

impl Peer {
    /// Builds a peer over an established transport. The control protocol is
    /// registered at index zero and its hello is queued before the loop
    /// ever runs.
    pub(crate) fn new(
        id: PeerId,
        stream: TcpStream,
        cipher: Box<dyn FrameCipher>,
        local: LocalInfo,
        services: Vec<Arc<dyn WiredService>>,
        peers: Arc<Mutex<HashMap<PeerId, PeerHandle>>>,
        expected_node_id: Option<NodeId>,
    ) -> Result<(Peer, PeerHandle), Error> {
        let (tx, commands) = mpsc::unbounded();
        let shared = Arc::new(PeerShared {
            node_id: Mutex::new(None),
            capabilities: Mutex::new(Vec::new()),
            client_version: Mutex::new(String::new()),
        });
        let handle = PeerHandle { id, tx, shared: Arc::clone(&shared) };
        let local_hello = Hello {
            version: p2p::PROTOCOL_VERSION,
            client_version: local.client_version.clone(),
            capabilities: services.iter().map(|s| s.capability()).collect(),
            listen_port: local.listen_port,
            node_id: local.node_id,
        };
        let mut peer = Peer {
            id,
            stream,
            session: Session::new(cipher),
            registry: ProtocolRegistry::new(),
            actions: Vec::new(),
            commands,
            shared,
            handle: handle.clone(),
            services,
            peers,
            local,
            expected_node_id,
            hello_received: false,
        };
        peer.register_protocol(Box::new(P2pProtocol::new(local_hello)))?;
        Ok((peer, handle))
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Runs the session until it ends, then tears everything down.
    pub async fn run(mut self) {
        let result = self.pump().await;
        match &result {
            Ok(()) => debug!("peer {} closed", self.id),
            Err(Error::Disconnected(reason)) => {
                debug!("peer {} disconnected: {}", self.id, reason)
            }
            Err(error) => debug!("peer {} terminated: {}", self.id, error),
        }
        if let Err(Error::Disconnected(_)) = result {
            // Best effort: let the disconnect packet reach the wire.
            if let Err(error) = self.flush_egress().await {
                trace!("peer {} flush failed: {}", self.id, error);
            }
        }
        self.teardown();
    }

    async fn pump(&mut self) -> Result<(), Error> {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let started = Instant::now();
        loop {
            // Commands from the manager.
            loop {
                match self.commands.try_next() {
                    Ok(Some(PeerCommand::Stop)) | Ok(None) => return Ok(()),
                    Ok(Some(PeerCommand::Send { capability, cmd_id, payload })) => {
                        self.queue_packet(&capability, cmd_id, payload)?
                    }
                    Err(_) => break,
                }
            }

            // Decoded ingress goes to the sub-protocols.
            while let Some(packet) = self.session.get_packet() {
                self.dispatch(packet)?;
                self.apply_actions()?;
            }

            if !self.hello_received && started.elapsed() > HANDSHAKE_GRACE {
                return Err(Error::HandshakeTimeout);
            }

            // One ready egress chunk, then read with a timeout that depends
            // on whether more egress may be pending.
            let timeout = match self.session.get_message()? {
                Some(chunk) => {
                    trace!("peer {} sending {} bytes", self.id, chunk.len());
                    self.stream.write_all(&chunk).await?;
                    Duration::from_millis(0)
                }
                None => POLL_TIMEOUT,
            };

            match io::timeout(timeout, self.stream.read(&mut buf)).await {
                Ok(0) => {
                    debug!("peer {} reached end of stream", self.id);
                    return Ok(());
                }
                Ok(n) => self.session.add_message(&buf[..n])?,
                Err(error) if error.kind() == io::ErrorKind::TimedOut => {}
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Registers a sub-protocol: window assignment, session queue, start
    /// hook.
    fn register_protocol(&mut self, handler: Box<dyn SubProtocol>) -> Result<(), Error> {
        let index = self.registry.register(handler)?;
        self.session.add_protocol(index);
        let (offset, handler) = self.registry.entry_mut(index);
        let mut ctx = ProtocolContext {
            session: &mut self.session,
            protocol_id: index,
            offset,
            actions: &mut self.actions,
        };
        handler.on_start(&mut ctx)
    }

    fn queue_packet(
        &mut self,
        capability: &Capability,
        cmd_id: usize,
        payload: Bytes,
    ) -> Result<(), Error> {
        match self.registry.index_of(capability) {
            Some(index) => {
                let offset = self.registry.offset(index);
                self.session.add_packet(Packet::new(index, offset + cmd_id, payload))?;
                Ok(())
            }
            None => {
                debug!("peer {} dropping packet for unregistered {}", self.id, capability);
                Ok(())
            }
        }
    }

    fn dispatch(&mut self, packet: Packet) -> Result<(), Error> {
        let (index, cmd_id) = self.registry.resolve(packet.cmd_id)?;
        // Until the hello exchange completes, hello is the only command
        // this peer accepts.
        if !self.hello_received && (index != 0 || cmd_id != p2p::HELLO) {
            return Err(Error::HandshakeViolation);
        }
        trace!("peer {} dispatching cmd {} to protocol {}", self.id, cmd_id, index);
        let (offset, handler) = self.registry.entry_mut(index);
        let mut ctx = ProtocolContext {
            session: &mut self.session,
            protocol_id: index,
            offset,
            actions: &mut self.actions,
        };
        handler.on_packet(&mut ctx, cmd_id, packet.payload)
    }

    fn apply_actions(&mut self) -> Result<(), Error> {
        while !self.actions.is_empty() {
            match self.actions.remove(0) {
                ProtocolAction::HelloReceived(hello) => self.on_hello(hello)?,
                ProtocolAction::Disconnect(reason) => {
                    self.queue_disconnect(reason)?;
                    return Err(Error::Disconnected(reason));
                }
                ProtocolAction::RemoteDisconnected(reason) => {
                    return Err(Error::Disconnected(reason));
                }
            }
        }
        Ok(())
    }

    fn on_hello(&mut self, hello: Hello) -> Result<(), Error> {
        if self.hello_received {
            debug!("peer {} repeated its hello", self.id);
            return Ok(());
        }
        if hello.node_id == self.local.node_id {
            self.queue_disconnect(DisconnectReason::ConnectedToSelf)?;
            return Err(Error::Disconnected(DisconnectReason::ConnectedToSelf));
        }
        if let Some(expected) = self.expected_node_id {
            if expected != hello.node_id {
                warn!("peer {} answered with an unexpected identity", self.id);
                self.queue_disconnect(DisconnectReason::UnexpectedIdentity)?;
                return Err(Error::Disconnected(DisconnectReason::UnexpectedIdentity));
            }
        }
        let already_connected = self
            .peers
            .lock()
            .values()
            .any(|other| other.id() != self.id && other.node_id() == Some(hello.node_id));
        if already_connected {
            self.queue_disconnect(DisconnectReason::AlreadyConnected)?;
            return Err(Error::Disconnected(DisconnectReason::AlreadyConnected));
        }

        self.hello_received = true;
        *self.shared.node_id.lock() = Some(hello.node_id);
        *self.shared.client_version.lock() = hello.client_version.clone();

        // Register every local service the remote also speaks.
        let services = self.services.clone();
        for service in services {
            let capability = service.capability();
            if hello.capabilities.contains(&capability)
                && self.registry.index_of(&capability).is_none()
            {
                debug!("peer {} registering {}", self.id, capability);
                let handler = service.create_protocol(&self.handle);
                self.register_protocol(handler)?;
                service.on_peer_connected(&self.handle);
            }
        }
        *self.shared.capabilities.lock() = self.registry.capabilities();
        debug!(
            "peer {} handshake complete: {} ({} protocols)",
            self.id,
            hello.node_id,
            self.registry.len()
        );
        Ok(())
    }

    fn queue_disconnect(&mut self, reason: DisconnectReason) -> Result<(), Error> {
        let mut payload = BytesMut::new();
        put_uint(&mut payload, reason.code());
        self.session.add_packet(Packet::new(0, p2p::DISCONNECT, payload.freeze()))?;
        Ok(())
    }

    async fn flush_egress(&mut self) -> Result<(), Error> {
        while let Some(chunk) = self.session.get_message()? {
            io::timeout(FLUSH_TIMEOUT, self.stream.write_all(&chunk)).await?;
        }
        Ok(())
    }

    /// Stops every sub-protocol, tells the services, leaves the peer set
    /// and releases the transport.
    fn teardown(&mut self) {
        self.registry.stop_all();
        for service in &self.services {
            if self.registry.index_of(&service.capability()).is_some() {
                service.on_peer_disconnected(&self.handle);
            }
        }
        self.peers.lock().remove(&self.id);
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::net::TcpListener;
    use async_std::task;
    use devp2p_core::Plain;
    use std::time::Instant;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, dialed) =
            futures::join!(listener.accept(), TcpStream::connect(addr));
        (accepted.unwrap().0, dialed.unwrap())
    }

    fn spawn_peer(
        id: PeerId,
        stream: TcpStream,
    ) -> (PeerHandle, Arc<Mutex<HashMap<PeerId, PeerHandle>>>, task::JoinHandle<()>) {
        let peers = Arc::new(Mutex::new(HashMap::new()));
        let local = LocalInfo {
            node_id: NodeId::random(),
            client_version: format!("devp2p/peer-{}", id),
            listen_port: 0,
        };
        let (peer, handle) = Peer::new(
            id,
            stream,
            Box::new(Plain),
            local,
            Vec::new(),
            Arc::clone(&peers),
            None,
        )
        .unwrap();
        peers.lock().insert(id, handle.clone());
        let task = task::spawn(peer.run());
        (handle, peers, task)
    }

    async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            if Instant::now() > deadline {
                panic!("timed out waiting for {}", what);
            }
            task::sleep(Duration::from_millis(10)).await;
        }
    }

    #[async_std::test]
    async fn hello_exchange_completes_and_stop_is_orderly() {
        let (a, b) = socket_pair().await;
        let (handle_a, peers_a, task_a) = spawn_peer(1, a);
        let (handle_b, peers_b, task_b) = spawn_peer(2, b);

        let (ha, hb) = (handle_a.clone(), handle_b.clone());
        wait_until("both hellos", move || {
            ha.node_id().is_some() && hb.node_id().is_some()
        })
        .await;
        assert_ne!(handle_a.node_id(), handle_b.node_id());
        assert!(handle_a.client_version().starts_with("devp2p/peer-"));
        // With no shared services only the control protocol is registered.
        assert_eq!(handle_a.capabilities(), vec![P2pProtocol::capability()]);

        handle_a.stop();
        handle_a.stop();
        task_a.await;
        task_b.await;
        assert!(peers_a.lock().is_empty());
        assert!(peers_b.lock().is_empty());
    }

    #[async_std::test]
    async fn command_before_hello_terminates_the_peer() {
        let (a, b) = socket_pair().await;
        let (_handle, peers, task) = spawn_peer(1, a);

        // A raw remote that skips its hello and sends a control ping.
        let mut session: Session<Box<dyn FrameCipher>> = Session::new(Box::new(Plain));
        session.add_protocol(0);
        session.add_packet(Packet::new(0, p2p::PING, Bytes::new())).unwrap();
        let chunk = session.get_message().unwrap().unwrap();
        let mut b = b;
        b.write_all(&chunk).await.unwrap();

        task.await;
        assert!(peers.lock().is_empty());
    }

    #[async_std::test]
    async fn silent_remote_hits_the_handshake_timeout() {
        let (a, _b) = socket_pair().await;
        let started = Instant::now();
        let (_handle, peers, task) = spawn_peer(1, a);
        task.await;
        assert!(started.elapsed() >= HANDSHAKE_GRACE);
        assert!(peers.lock().is_empty());
    }
}
