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

//! The peer manager.
//!
//! Owns the peer set. Accepts inbound connections, dials outbound ones when
//! the set runs low (asking discovery for candidates near a random id), and
//! offers capability-keyed broadcast over the live peers.

use crate::config::Config;
use crate::discovery::DiscoveryHandle;
use crate::error::Error;
use crate::peer::{LocalInfo, Peer, PeerHandle, PeerId};
use crate::protocol::{Capability, WiredService};
use async_std::io;
use async_std::net::{TcpListener, TcpStream};
use async_std::task::{self, JoinHandle};
use bytes::Bytes;
use devp2p_core::{Error as CoreError, Keypair, Node, NodeId, Plain};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Budget for an outbound TCP connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Pause between control-loop rounds.
const LOOP_DELAY: Duration = Duration::from_secs(1);

/// How long a lookup gets to produce neighbours before we dial one.
const LOOKUP_WINDOW: Duration = Duration::from_secs(2);

/// Grace period after start before the control loop begins topping up.
const BOOTSTRAP_SETTLE: Duration = Duration::from_secs(3);

pub struct PeerManager {
    config: Config,
    keypair: Keypair,
    local_node_id: NodeId,
    services: Vec<Arc<dyn WiredService>>,
    discovery: DiscoveryHandle,
    peers: Arc<Mutex<HashMap<PeerId, PeerHandle>>>,
    next_peer_id: AtomicUsize,
    listen_addr: Mutex<Option<SocketAddr>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl PeerManager {
    /// Builds a manager. The node identity comes from the configured
    /// private key, or a freshly generated one.
    pub fn new(
        config: Config,
        services: Vec<Arc<dyn WiredService>>,
        discovery: DiscoveryHandle,
    ) -> Result<PeerManager, Error> {
        let keypair = config.node.keypair()?;
        let local_node_id = NodeId::from_pubkey(keypair.public());
        info!("local node id {}", local_node_id);
        Ok(PeerManager {
            config,
            keypair,
            local_node_id,
            services,
            discovery,
            peers: Arc::new(Mutex::new(HashMap::new())),
            next_peer_id: AtomicUsize::new(0),
            listen_addr: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn local_node_id(&self) -> NodeId {
        self.local_node_id
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// The bound listen address, once [`PeerManager::start`] succeeded.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        *self.listen_addr.lock()
    }

    pub fn num_peers(&self) -> usize {
        self.peers.lock().len()
    }

    /// Snapshot of the live peer handles.
    pub fn peers(&self) -> Vec<PeerHandle> {
        self.peers.lock().values().cloned().collect()
    }

    /// Binds the listener, dials the bootstrap nodes and spawns the
    /// acceptor and control tasks.
    pub async fn start(self: Arc<Self>) -> Result<(), Error> {
        let host = self.config.p2p.listen_host.clone();
        let port = self.config.p2p.listen_port;
        let listener = TcpListener::bind((host.as_str(), port)).await.map_err(CoreError::from)?;
        let addr = listener.local_addr().map_err(CoreError::from)?;
        *self.listen_addr.lock() = Some(addr);
        info!("listening on {}", addr);

        let this = Arc::clone(&self);
        self.tasks.lock().push(task::spawn(async move { this.accept_loop(listener).await }));

        self.bootstrap().await;

        let this = Arc::clone(&self);
        self.tasks.lock().push(task::spawn(async move { this.control_loop().await }));
        Ok(())
    }

    async fn accept_loop(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, address)) => {
                    if self.stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    if self.num_peers() >= self.config.p2p.max_peers {
                        debug!("declining {}: peer limit reached", address);
                        continue;
                    }
                    debug!("inbound connection from {}", address);
                    // Inbound peers identify themselves in their hello.
                    if let Err(error) = self.start_peer(stream, None) {
                        warn!("failed to start inbound peer: {}", error);
                    }
                }
                Err(error) => {
                    if self.stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!("accept failed: {}", error);
                }
            }
        }
    }

    fn start_peer(&self, stream: TcpStream, expected: Option<NodeId>) -> Result<PeerId, Error> {
        let id = self.next_peer_id.fetch_add(1, Ordering::SeqCst);
        let local = LocalInfo {
            node_id: self.local_node_id,
            client_version: self.config.p2p.client_version.clone(),
            listen_port: self.config.p2p.listen_port,
        };
        let (peer, handle) = Peer::new(
            id,
            stream,
            Box::new(Plain),
            local,
            self.services.clone(),
            Arc::clone(&self.peers),
            expected,
        )?;
        self.peers.lock().insert(id, handle);
        task::spawn(peer.run());
        Ok(id)
    }

    /// Dials a node within [`CONNECT_TIMEOUT`]. Declined outright when the
    /// peer set is at its cap.
    pub async fn connect(&self, node: &Node) -> Result<PeerId, Error> {
        if self.num_peers() >= self.config.p2p.max_peers {
            return Err(Error::TooManyPeers);
        }
        debug!("connecting to {}", node);
        let address = (node.address.host.as_str(), node.address.port);
        let stream = io::timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
            .await
            .map_err(|error| {
                if error.kind() == io::ErrorKind::TimedOut {
                    Error::ConnectTimeout(node.address.to_string())
                } else {
                    Error::from(CoreError::from(error))
                }
            })?;
        self.start_peer(stream, Some(node.id))
    }

    /// Dials every configured bootstrap URI. Failed entries are logged and
    /// skipped; none of them is fatal.
    pub async fn bootstrap(&self) {
        for uri in &self.config.p2p.bootstrap_nodes {
            let node = match Node::from_uri(uri) {
                Ok(node) => node,
                Err(error) => {
                    warn!("skipping bootstrap entry {:?}: {}", uri, error);
                    continue;
                }
            };
            info!("connecting bootstrap node {}", node);
            if let Err(error) = self.connect(&node).await {
                info!("bootstrap connect to {} failed: {}", node, error);
            }
        }
    }

    /// Tops up the peer set towards `min_peers`: look up a random id, give
    /// the lookup a moment, then dial the nearest node found.
    async fn control_loop(&self) {
        task::sleep(BOOTSTRAP_SETTLE).await;
        while !self.stopped.load(Ordering::SeqCst) {
            let num_peers = self.num_peers();
            let min_peers = self.config.p2p.min_peers;
            if num_peers < min_peers {
                let target = NodeId::random();
                debug!("missing peers ({}/{}), locating {}", num_peers, min_peers, target);
                self.discovery.lookup(target).await;
                task::sleep(LOOKUP_WINDOW).await;
                let neighbours = self.discovery.neighbours(target, 1).await;
                match neighbours.first() {
                    Some(node) if node.id != self.local_node_id => {
                        if let Err(error) = self.connect(node).await {
                            debug!("connect to {} failed: {}", node, error);
                        }
                    }
                    _ => {}
                }
            }
            task::sleep(LOOP_DELAY).await;
        }
    }

    /// Sends `(cmd_id, payload)` of the given sub-protocol to up to
    /// `num_peers` peers chosen uniformly at random among those that
    /// registered the capability; to all of them when `num_peers` is
    /// `None`.
    pub fn broadcast(
        &self,
        capability: &Capability,
        cmd_id: usize,
        payload: Bytes,
        num_peers: Option<usize>,
    ) {
        let with_capability: Vec<PeerHandle> = self
            .peers
            .lock()
            .values()
            .filter(|handle| handle.has_capability(capability))
            .cloned()
            .collect();
        let count = num_peers.unwrap_or_else(|| with_capability.len()).min(with_capability.len());
        debug!("broadcasting {} cmd {} to {} peers", capability, cmd_id, count);
        for handle in with_capability.choose_multiple(&mut rand::thread_rng(), count) {
            handle.send(capability.clone(), cmd_id, payload.clone());
        }
    }

    /// Stops the acceptor and control tasks, then every peer. No new peers
    /// are admitted afterwards.
    pub async fn stop(&self) {
        info!("stopping peer manager");
        self.stopped.store(true, Ordering::SeqCst);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.cancel().await;
        }
        let peers = self.peers();
        for peer in peers {
            peer.stop();
        }
        // Give the peer loops a moment to leave the set.
        let deadline = Instant::now() + Duration::from_secs(1);
        while self.num_peers() > 0 && Instant::now() < deadline {
            task::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoveryService, NullWire};
    use devp2p_core::Address;

    fn manager() -> Arc<PeerManager> {
        let local = Node::new(*Keypair::generate().public(), Address::new("127.0.0.1", 0));
        let (_service, discovery) = DiscoveryService::new(local, NullWire);
        Arc::new(PeerManager::new(Config::default(), Vec::new(), discovery).unwrap())
    }

    #[test]
    fn node_id_is_derived_from_the_keypair() {
        let manager = manager();
        assert_eq!(
            manager.local_node_id(),
            NodeId::from_pubkey(manager.keypair().public())
        );
    }

    #[test]
    fn starts_with_an_empty_peer_set() {
        let manager = manager();
        assert_eq!(manager.num_peers(), 0);
        assert!(manager.peers().is_empty());
        assert!(manager.listen_addr().is_none());
    }
}
