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

//! The k-bucket routing table.
//!
//! Buckets are kept sorted by id range and partition the whole space:
//! the first bucket starts at zero, every later bucket starts one past its
//! predecessor's end, and the last bucket ends at the maximum id. Ranges are
//! stored with inclusive ends so the top of the space stays representable.
//!
//! Within a bucket, nodes are ordered oldest first. A node seen again moves
//! to the tail, which makes the head the least recently seen node and the
//! natural candidate for a liveness probe when the bucket is full.

use crate::{B, BUCKET_SIZE};
use devp2p_core::{Node, NodeId, U512};
use log::trace;
use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// Result of inserting a node into the table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The node is now in a bucket (inserted fresh or moved to the tail).
    Added,
    /// Its bucket is full and may not split. The returned head must answer
    /// a ping before the new node may take its place.
    NeedPing(Node),
    /// The node is the local one and is never tracked.
    Ignored,
}

/// One slot of the routing table: a contiguous, inclusive id range with up
/// to [`BUCKET_SIZE`] nodes and as many replacement candidates.
pub struct KBucket {
    start: U512,
    end: U512,
    nodes: Vec<Node>,
    replacement_cache: Vec<Node>,
    last_updated: Instant,
}

impl KBucket {
    fn new(start: U512, end: U512) -> KBucket {
        KBucket {
            start,
            end,
            nodes: Vec::with_capacity(BUCKET_SIZE),
            replacement_cache: Vec::new(),
            last_updated: Instant::now(),
        }
    }

    pub fn start(&self) -> U512 {
        self.start
    }

    pub fn end(&self) -> U512 {
        self.end
    }

    pub fn in_range(&self, id: &NodeId) -> bool {
        let value = id.to_uint();
        self.start <= value && value <= self.end
    }

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= BUCKET_SIZE
    }

    /// Least recently seen node.
    pub fn head(&self) -> Option<&Node> {
        self.nodes.first()
    }

    /// Most recently seen node.
    pub fn tail(&self) -> Option<&Node> {
        self.nodes.last()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn replacement_cache(&self) -> &[Node] {
        &self.replacement_cache
    }

    pub fn last_updated(&self) -> Instant {
        self.last_updated
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|n| n.id == *id)
    }

    /// Whether a full bucket may split: it covers the local id, or its depth
    /// in the implicit trie is not a multiple of [`B`].
    pub fn should_split(&self, local: &NodeId) -> bool {
        // `end - start` is one less than the range length, so `bits()` is
        // the log2 of the range length.
        self.in_range(local) || (self.end - self.start).bits() % B != 0
    }

    fn split(self) -> (KBucket, KBucket) {
        let mid = self.start + (self.end - self.start) / U512::from(2u64);
        let mut lower = KBucket::new(self.start, mid);
        let mut upper = KBucket::new(mid + U512::one(), self.end);
        lower.last_updated = self.last_updated;
        upper.last_updated = self.last_updated;
        for node in self.nodes {
            if node.id.to_uint() <= mid {
                lower.nodes.push(node);
            } else {
                upper.nodes.push(node);
            }
        }
        for node in self.replacement_cache {
            if node.id.to_uint() <= mid {
                lower.replacement_cache.push(node);
            } else {
                upper.replacement_cache.push(node);
            }
        }
        (lower, upper)
    }
}

/// The routing table of the local node.
pub struct RoutingTable {
    this_node: Node,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    /// A table with a single bucket spanning the whole id space.
    pub fn new(this_node: Node) -> RoutingTable {
        RoutingTable {
            this_node,
            buckets: vec![KBucket::new(U512::zero(), U512::max_value())],
        }
    }

    pub fn this_node(&self) -> &Node {
        &self.this_node
    }

    pub fn buckets(&self) -> &[KBucket] {
        &self.buckets
    }

    fn bucket_index(&self, id: &NodeId) -> usize {
        let value = id.to_uint();
        self.buckets
            .binary_search_by(|bucket| {
                if bucket.end < value {
                    Ordering::Less
                } else if bucket.start > value {
                    Ordering::Greater
                } else {
                    Ordering::Equal
                }
            })
            .expect("buckets partition the id space")
    }

    /// The bucket whose range covers `id`.
    pub fn bucket_of(&self, id: &NodeId) -> &KBucket {
        &self.buckets[self.bucket_index(id)]
    }

    /// Inserts or refreshes a node.
    ///
    /// A node already present moves to the tail of its bucket. A node whose
    /// bucket is full either triggers a split, when permitted, or is handed
    /// back as [`UpdateOutcome::NeedPing`] with the bucket head to probe.
    pub fn add_node(&mut self, node: Node) -> UpdateOutcome {
        if node.id == self.this_node.id {
            return UpdateOutcome::Ignored;
        }
        loop {
            let index = self.bucket_index(&node.id);
            let bucket = &mut self.buckets[index];
            if let Some(position) = bucket.nodes.iter().position(|n| n.id == node.id) {
                // Seen again: move to the tail, keeping the fresh address.
                bucket.nodes.remove(position);
                bucket.nodes.push(node);
                bucket.last_updated = Instant::now();
                return UpdateOutcome::Added;
            }
            if !bucket.is_full() {
                bucket.nodes.push(node);
                bucket.last_updated = Instant::now();
                return UpdateOutcome::Added;
            }
            if bucket.should_split(&self.this_node.id) {
                trace!("splitting bucket {}", index);
                self.split_bucket(index);
                continue;
            }
            let head = bucket.nodes[0].clone();
            return UpdateOutcome::NeedPing(head);
        }
    }

    fn split_bucket(&mut self, index: usize) {
        let (lower, upper) = self.buckets.remove(index).split();
        self.buckets.insert(index, lower);
        self.buckets.insert(index + 1, upper);
    }

    /// Drops a node from its bucket, if present.
    pub fn remove(&mut self, id: &NodeId) {
        let index = self.bucket_index(id);
        self.buckets[index].nodes.retain(|n| n.id != *id);
    }

    /// Appends a candidate to the replacement cache of its bucket. The cache
    /// holds at most [`BUCKET_SIZE`] candidates, dropping the oldest first.
    pub fn cache_replacement(&mut self, node: Node) {
        let index = self.bucket_index(&node.id);
        let cache = &mut self.buckets[index].replacement_cache;
        cache.retain(|n| n.id != node.id);
        cache.push(node);
        if cache.len() > BUCKET_SIZE {
            cache.remove(0);
        }
    }

    /// Drops a candidate from the replacement cache of its bucket.
    pub fn remove_replacement(&mut self, id: &NodeId) {
        let index = self.bucket_index(id);
        self.buckets[index].replacement_cache.retain(|n| n.id != *id);
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.bucket_of(id).contains(id)
    }

    /// Number of nodes across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.nodes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.buckets.iter().flat_map(|b| b.nodes.iter())
    }

    /// Up to `count` known nodes, closest to `target` first. The local node
    /// is never listed.
    pub fn neighbours(&self, target: &NodeId, count: usize) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes().cloned().collect();
        nodes.sort_by_key(|n| n.id.distance(target));
        nodes.truncate(count);
        nodes
    }

    /// Random targets inside every bucket untouched for `idle` or longer.
    /// Marks those buckets as refreshed.
    pub fn take_refresh_targets(&mut self, idle: Duration) -> Vec<NodeId> {
        let now = Instant::now();
        let mut targets = Vec::new();
        for bucket in &mut self.buckets {
            if now.duration_since(bucket.last_updated) < idle {
                continue;
            }
            bucket.last_updated = now;
            let span = bucket.end - bucket.start;
            let random = NodeId::random().to_uint();
            let offset = if span == U512::max_value() {
                random
            } else {
                random % (span + U512::one())
            };
            targets.push(NodeId::from_uint(bucket.start + offset));
        }
        targets
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use devp2p_core::Address;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    pub(crate) fn random_node(rng: &mut StdRng) -> Node {
        let mut id = [0u8; 64];
        rng.fill_bytes(&mut id);
        let mut node = Node::from_id(NodeId::from_slice(&id).unwrap());
        node.address = Address::new("127.0.0.1", 30303);
        node
    }

    fn table(rng: &mut StdRng, num_nodes: usize) -> RoutingTable {
        let mut routing = RoutingTable::new(random_node(rng));
        for _ in 0..num_nodes {
            routing.add_node(random_node(rng));
        }
        routing
    }

    fn assert_partition(routing: &RoutingTable) {
        let buckets = routing.buckets();
        assert_eq!(buckets[0].start(), U512::zero());
        assert_eq!(buckets.last().unwrap().end(), U512::max_value());
        for pair in buckets.windows(2) {
            assert_eq!(pair[1].start(), pair[0].end() + U512::one(), "gap or overlap between buckets");
        }
    }

    #[test]
    fn starts_with_one_full_range_bucket() {
        let mut rng = StdRng::seed_from_u64(1);
        let routing = table(&mut rng, 0);
        assert_eq!(routing.buckets().len(), 1);
        assert_partition(&routing);
    }

    #[test]
    fn thousand_nodes_keep_the_partition() {
        let mut rng = StdRng::seed_from_u64(42);
        let routing = table(&mut rng, 1000);
        assert_partition(&routing);
        assert!(routing.buckets().len() <= 512);
        for bucket in routing.buckets() {
            assert!(bucket.nodes().len() <= BUCKET_SIZE);
            assert!(bucket.replacement_cache().len() <= BUCKET_SIZE);
            for node in bucket.nodes() {
                assert!(bucket.in_range(&node.id));
            }
        }
    }

    #[test]
    fn every_node_lives_in_exactly_one_bucket() {
        let mut rng = StdRng::seed_from_u64(7);
        let routing = table(&mut rng, 500);
        for node in routing.nodes() {
            let holding: Vec<_> =
                routing.buckets().iter().filter(|b| b.contains(&node.id)).collect();
            assert_eq!(holding.len(), 1);
        }
    }

    #[test]
    fn quickcheck_partition_survives_any_insertion_order() {
        fn prop(seeds: Vec<u64>) -> bool {
            let mut rng = StdRng::seed_from_u64(99);
            let mut routing = RoutingTable::new(random_node(&mut rng));
            for seed in seeds {
                let mut node_rng = StdRng::seed_from_u64(seed);
                routing.add_node(random_node(&mut node_rng));
            }
            let buckets = routing.buckets();
            buckets[0].start() == U512::zero()
                && buckets.last().unwrap().end() == U512::max_value()
                && buckets.windows(2).all(|p| p[1].start() == p[0].end() + U512::one())
                && buckets.iter().all(|b| b.nodes().len() <= BUCKET_SIZE)
        }
        quickcheck::quickcheck(prop as fn(Vec<u64>) -> bool);
    }

    #[test]
    fn reinserting_moves_to_tail() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut routing = RoutingTable::new(random_node(&mut rng));
        let first = random_node(&mut rng);
        routing.add_node(first.clone());
        for _ in 0..5 {
            routing.add_node(random_node(&mut rng));
        }
        assert_eq!(routing.add_node(first.clone()), UpdateOutcome::Added);
        assert_eq!(routing.bucket_of(&first.id).tail(), Some(&first));
    }

    #[test]
    fn full_unsplittable_bucket_asks_for_a_ping() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut routing = table(&mut rng, 10000);
        let bucket = routing
            .buckets()
            .iter()
            .find(|b| b.is_full() && !b.should_split(&routing.this_node().id))
            .expect("a large table has full buckets past the split depth");
        let head = bucket.head().unwrap().clone();
        let newcomer = Node::from_id(NodeId::from_uint(bucket.start() + U512::one()));
        assert!(!routing.contains(&newcomer.id), "seed collision");
        assert_eq!(routing.add_node(newcomer.clone()), UpdateOutcome::NeedPing(head));
        assert!(!routing.contains(&newcomer.id));
    }

    #[test]
    fn full_splittable_bucket_splits_and_admits() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut routing = table(&mut rng, 1000);
        let local = routing.this_node().id;
        let bucket = routing
            .buckets()
            .iter()
            .find(|b| b.is_full() && b.should_split(&local))
            .expect("a young table has splittable full buckets");
        let newcomer = Node::from_id(NodeId::from_uint(bucket.start() + U512::one()));
        assert!(!routing.contains(&newcomer.id), "seed collision");
        let buckets_before = routing.buckets().len();
        assert_eq!(routing.add_node(newcomer.clone()), UpdateOutcome::Added);
        assert!(routing.contains(&newcomer.id));
        assert!(routing.buckets().len() > buckets_before);
        assert_partition(&routing);
    }

    #[test]
    fn local_node_is_never_tracked() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut routing = table(&mut rng, 10);
        let local = routing.this_node().clone();
        assert_eq!(routing.add_node(local.clone()), UpdateOutcome::Ignored);
        assert!(!routing.contains(&local.id));
    }

    #[test]
    fn neighbours_are_sorted_by_distance_and_exclude_self() {
        let mut rng = StdRng::seed_from_u64(11);
        let routing = table(&mut rng, 200);
        let target = random_node(&mut rng).id;
        let neighbours = routing.neighbours(&target, BUCKET_SIZE);
        assert_eq!(neighbours.len(), BUCKET_SIZE);
        for pair in neighbours.windows(2) {
            assert!(pair[0].id.distance(&target) <= pair[1].id.distance(&target));
        }
        assert!(neighbours.iter().all(|n| n.id != routing.this_node().id));
        // Nothing outside the answer is closer than what is in it.
        let worst = neighbours.last().unwrap().id.distance(&target);
        for node in routing.nodes() {
            if neighbours.iter().all(|n| n.id != node.id) {
                assert!(node.id.distance(&target) >= worst);
            }
        }
    }

    #[test]
    fn replacement_cache_is_bounded_and_ordered() {
        let mut rng = StdRng::seed_from_u64(13);
        // One node, one bucket: every candidate lands in the same cache.
        let mut routing = table(&mut rng, 1);
        assert_eq!(routing.buckets().len(), 1);
        let mut cached = Vec::new();
        for _ in 0..BUCKET_SIZE + 4 {
            let node = random_node(&mut rng);
            cached.push(node.clone());
            routing.cache_replacement(node);
        }
        let cache = routing.buckets()[0].replacement_cache();
        assert_eq!(cache.len(), BUCKET_SIZE);
        // The four oldest were dropped; the newest sits at the tail.
        assert_eq!(cache.first(), cached.get(4));
        assert_eq!(cache.last(), cached.last());
        let newest = cached.last().unwrap().id;
        routing.remove_replacement(&newest);
        assert!(routing.buckets()[0].replacement_cache().iter().all(|n| n.id != newest));
    }
}
