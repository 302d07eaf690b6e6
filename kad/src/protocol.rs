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

//! The Kademlia protocol state machine.
//!
//! Sends go through a [`WireInterface`] and never block; inbound messages
//! arrive through the `recv_*` methods. Liveness is arbitrated by pings: a
//! node wanting into a full bucket waits while the bucket head is probed,
//! and takes the head's slot only when the probe times out. Lookups are
//! iterative: [`ALPHA`] nodes are queried at once and each answer may
//! trigger one query to the closest node not asked yet, until no answer
//! names a closer node.
//!
//! Nothing in here keeps time on its own. [`KademliaProtocol::check_expired`]
//! must be called periodically, at [`crate::EVICTION_CHECK_INTERVAL`], to
//! expire unanswered probes and stale lookups.

use crate::kbucket::{RoutingTable, UpdateOutcome};
use crate::{
    ALPHA, BUCKET_SIZE, IDLE_BUCKET_REFRESH_INTERVAL, MAX_LOOKUP_ROUNDS, REQUEST_TIMEOUT,
};
use devp2p_core::{Node, NodeId, U512};
use fnv::{FnvHashMap, FnvHashSet};
use log::{debug, trace};
use smallvec::SmallVec;
use std::time::{Duration, Instant};

/// Random token carried by a ping and echoed by the matching pong.
pub type PingId = u128;

/// Non-blocking message sends towards other nodes.
pub trait WireInterface {
    fn send_ping(&mut self, to: &Node, ping_id: PingId);
    fn send_pong(&mut self, to: &Node, ping_id: PingId);
    fn send_find_node(&mut self, to: &Node, target: NodeId);
    fn send_neighbours(&mut self, to: &Node, neighbours: Vec<Node>);
}

/// Timing knobs of the protocol.
#[derive(Clone, Debug)]
pub struct KadConfig {
    /// How long a ping or find-node waits for its answer.
    pub request_timeout: Duration,
    /// How long a bucket may go untouched before a refresh lookup.
    pub idle_bucket_refresh_interval: Duration,
    /// Upper bound on query rounds within one lookup.
    pub max_lookup_rounds: usize,
}

impl Default for KadConfig {
    fn default() -> KadConfig {
        KadConfig {
            request_timeout: REQUEST_TIMEOUT,
            idle_bucket_refresh_interval: IDLE_BUCKET_REFRESH_INTERVAL,
            max_lookup_rounds: MAX_LOOKUP_ROUNDS,
        }
    }
}

struct PendingPong {
    deadline: Instant,
    /// Candidate whose admission waits on this probe.
    replacement: Option<Node>,
}

struct Lookup {
    queried: FnvHashSet<NodeId>,
    candidates: Vec<Node>,
    /// Distance of the closest node queried so far.
    best_distance: Option<U512>,
    pending: usize,
    rounds: usize,
    deadline: Instant,
}

pub struct KademliaProtocol<W> {
    routing: RoutingTable,
    wire: W,
    config: KadConfig,
    expected_pongs: FnvHashMap<(NodeId, PingId), PendingPong>,
    lookups: FnvHashMap<NodeId, Lookup>,
}

impl<W: WireInterface> KademliaProtocol<W> {
    pub fn new(this_node: Node, wire: W) -> KademliaProtocol<W> {
        KademliaProtocol::with_config(this_node, wire, KadConfig::default())
    }

    pub fn with_config(this_node: Node, wire: W, config: KadConfig) -> KademliaProtocol<W> {
        KademliaProtocol {
            routing: RoutingTable::new(this_node),
            wire,
            config,
            expected_pongs: FnvHashMap::default(),
            lookups: FnvHashMap::default(),
        }
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn routing_mut(&mut self) -> &mut RoutingTable {
        &mut self.routing
    }

    pub fn wire(&self) -> &W {
        &self.wire
    }

    pub fn wire_mut(&mut self) -> &mut W {
        &mut self.wire
    }

    /// Whether a pong from `node` is still awaited.
    pub fn has_pending_ping(&self, node: &NodeId) -> bool {
        self.expected_pongs.keys().any(|(id, _)| id == node)
    }

    /// Number of lookups still in flight.
    pub fn active_lookups(&self) -> usize {
        self.lookups.len()
    }

    /// Probes a node's liveness.
    pub fn ping(&mut self, node: &Node) {
        self.ping_with(node, None);
    }

    fn ping_with(&mut self, node: &Node, replacement: Option<Node>) {
        let ping_id: PingId = rand::random();
        let deadline = Instant::now() + self.config.request_timeout;
        self.expected_pongs.insert((node.id, ping_id), PendingPong { deadline, replacement });
        trace!("pinging {}", node);
        self.wire.send_ping(node, ping_id);
    }

    /// Feeds a seen node into the routing table. When its bucket is full the
    /// current head is probed and the node waits for the outcome.
    pub fn update(&mut self, node: Node) {
        if let UpdateOutcome::NeedPing(head) = self.routing.add_node(node.clone()) {
            debug!("bucket full, probing {} to make room for {}", head, node);
            self.ping_with(&head, Some(node));
        }
    }

    /// Starts an iterative lookup for the nodes closest to `target`.
    pub fn find_node(&mut self, target: NodeId) {
        if self.lookups.contains_key(&target) {
            return;
        }
        let closest = self.routing.neighbours(&target, ALPHA);
        if closest.is_empty() {
            debug!("cannot look up {}: no known nodes", target);
            return;
        }
        let mut lookup = Lookup {
            queried: FnvHashSet::default(),
            best_distance: closest.iter().map(|n| n.id.distance(&target)).min(),
            candidates: closest.clone(),
            pending: closest.len(),
            rounds: 1,
            deadline: Instant::now() + self.config.request_timeout,
        };
        for node in &closest {
            lookup.queried.insert(node.id);
            self.wire.send_find_node(node, target);
        }
        self.lookups.insert(target, lookup);
    }

    /// Seeds the table and looks up the local id, populating the buckets
    /// around it.
    pub fn bootstrap(&mut self, nodes: Vec<Node>) {
        for node in nodes {
            self.update(node);
        }
        let this_id = self.routing.this_node().id;
        self.find_node(this_id);
    }

    pub fn recv_ping(&mut self, sender: &Node, ping_id: PingId) {
        self.wire.send_pong(sender, ping_id);
        self.update(sender.clone());
    }

    pub fn recv_pong(&mut self, sender: &Node, ping_id: PingId) {
        let pending = match self.expected_pongs.remove(&(sender.id, ping_id)) {
            Some(pending) => pending,
            None => {
                trace!("unexpected pong from {}", sender);
                return;
            }
        };
        if Instant::now() > pending.deadline {
            debug!("late pong from {}", sender);
            self.evict_unresponsive(&sender.id, pending.replacement);
            return;
        }
        match pending.replacement {
            // An eviction probe answered in time: the head stays, moved to
            // the tail, and the blocked candidate is cached.
            Some(candidate) => {
                self.routing.add_node(sender.clone());
                self.routing.cache_replacement(candidate);
            }
            None => self.update(sender.clone()),
        }
    }

    pub fn recv_find_node(&mut self, sender: &Node, target: NodeId) {
        let neighbours = self.routing.neighbours(&target, BUCKET_SIZE);
        self.wire.send_neighbours(sender, neighbours);
        self.update(sender.clone());
    }

    pub fn recv_neighbours(&mut self, sender: &Node, nodes: Vec<Node>) {
        let this_id = self.routing.this_node().id;

        // Unknown nodes enter the table through a ping probe.
        let unknown: SmallVec<[Node; BUCKET_SIZE]> = nodes
            .iter()
            .filter(|n| {
                n.id != this_id && !self.routing.contains(&n.id) && !self.has_pending_ping(&n.id)
            })
            .cloned()
            .collect();
        for node in &unknown {
            self.ping(node);
        }

        // Advance every lookup that had queried the sender.
        let now = Instant::now();
        let request_timeout = self.config.request_timeout;
        let max_rounds = self.config.max_lookup_rounds;
        let mut queries: SmallVec<[(Node, NodeId); 4]> = SmallVec::new();
        let mut finished: SmallVec<[NodeId; 4]> = SmallVec::new();
        for (target, lookup) in self.lookups.iter_mut() {
            if !lookup.queried.contains(&sender.id) {
                continue;
            }
            if now > lookup.deadline {
                finished.push(*target);
                continue;
            }
            lookup.pending = lookup.pending.saturating_sub(1);
            for node in &nodes {
                if node.id != this_id && lookup.candidates.iter().all(|c| c.id != node.id) {
                    lookup.candidates.push(node.clone());
                }
            }
            let next = lookup
                .candidates
                .iter()
                .filter(|c| !lookup.queried.contains(&c.id))
                .min_by_key(|c| c.id.distance(target))
                .cloned();
            match next {
                Some(next) => {
                    let next_distance = next.id.distance(target);
                    let closer =
                        lookup.best_distance.map_or(true, |best| next_distance < best);
                    if closer && lookup.rounds < max_rounds {
                        lookup.queried.insert(next.id);
                        lookup.pending += 1;
                        lookup.rounds += 1;
                        lookup.best_distance = Some(next_distance);
                        lookup.deadline = now + request_timeout;
                        queries.push((next, *target));
                    } else {
                        // No candidate gets closer: the lookup has converged.
                        finished.push(*target);
                    }
                }
                None if lookup.pending == 0 => finished.push(*target),
                None => {}
            }
        }
        for target in &finished {
            debug!("lookup for {} converged", target);
            self.lookups.remove(target);
        }
        for (node, target) in queries {
            self.wire.send_find_node(&node, target);
        }
    }

    /// Expires unanswered probes and stale lookups, and refreshes idle
    /// buckets. Must run periodically.
    pub fn check_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<((NodeId, PingId), Option<Node>)> = self
            .expected_pongs
            .iter()
            .filter(|(_, pending)| now > pending.deadline)
            .map(|(key, pending)| (*key, pending.replacement.clone()))
            .collect();
        for ((node_id, ping_id), replacement) in expired {
            self.expected_pongs.remove(&(node_id, ping_id));
            debug!("ping to {} timed out", node_id);
            self.evict_unresponsive(&node_id, replacement);
        }

        let stale: Vec<NodeId> = self
            .lookups
            .iter()
            .filter(|(_, lookup)| now > lookup.deadline)
            .map(|(target, _)| *target)
            .collect();
        for target in stale {
            debug!("lookup for {} timed out", target);
            self.lookups.remove(&target);
        }

        let idle = self.config.idle_bucket_refresh_interval;
        for target in self.routing.take_refresh_targets(idle) {
            trace!("refreshing idle bucket via {}", target);
            self.find_node(target);
        }
    }

    fn evict_unresponsive(&mut self, node_id: &NodeId, replacement: Option<Node>) {
        self.routing.remove(node_id);
        self.routing.remove_replacement(node_id);
        if let Some(candidate) = replacement {
            // The candidate takes the freed slot instead of waiting in the
            // cache.
            self.routing.remove_replacement(&candidate.id);
            self.routing.add_node(candidate);
        }
    }
}
