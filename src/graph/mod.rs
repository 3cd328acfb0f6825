// In-memory topology graph.
//
// Nodes and edges carry ordered metadata maps; topology probes mutate the
// graph and every other subsystem (flow path resolution, alerting) reads it.
// The whole graph sits behind one RwLock: mutations take the write lock and
// dispatch listeners while still holding it, multi-step queries take the read
// lock for their whole extent via [`Graph::read`].

pub mod path;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Mutex, RwLock, RwLockReadGuard};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique id of a node or edge, rendered as a hyphenated hex string.
pub type Identifier = Uuid;

/// Ordered metadata map attached to nodes and edges.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A scalar metadata value.
///
/// The variants mirror what topology probes report: flags, counters,
/// interface indexes, rates and names. Serialized untagged, so metadata
/// round-trips as plain JSON scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            MetadataValue::UInt(v) => Some(*v),
            MetadataValue::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(v) => write!(f, "{v}"),
            MetadataValue::Int(v) => write!(f, "{v}"),
            MetadataValue::UInt(v) => write!(f, "{v}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<u64> for MetadataValue {
    fn from(v: u64) -> Self {
        MetadataValue::UInt(v)
    }
}

impl From<u32> for MetadataValue {
    fn from(v: u32) -> Self {
        MetadataValue::UInt(v as u64)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Str(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Str(v)
    }
}

/// Build a [`Metadata`] map from key/value pairs.
pub fn metadata<K, V, const N: usize>(pairs: [(K, V); N]) -> Metadata
where
    K: Into<String>,
    V: Into<MetadataValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// A topology node: an identifier plus its metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    #[serde(rename = "ID")]
    pub id: Identifier,
    #[serde(rename = "Metadata")]
    pub metadata: Metadata,
}

impl Node {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            metadata,
        }
    }

    /// Returns true when every entry of `m` is present with an equal value.
    pub fn matches(&self, m: &Metadata) -> bool {
        m.iter().all(|(k, v)| self.metadata.get(k) == Some(v))
    }

    /// The node's `Name` metadata, falling back to the identifier.
    pub fn name(&self) -> String {
        self.metadata
            .get("Name")
            .and_then(MetadataValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// A directed topology edge between two nodes.
///
/// The `RelationType` metadata value (`ownership`, `layer2`, ...) classifies
/// the relation; traversal treats edges as undirected.
#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    #[serde(rename = "ID")]
    pub id: Identifier,
    #[serde(rename = "Source")]
    pub source: Identifier,
    #[serde(rename = "Target")]
    pub target: Identifier,
    #[serde(rename = "Metadata")]
    pub metadata: Metadata,
}

impl Edge {
    pub fn new(source: Identifier, target: Identifier, metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            target,
            metadata,
        }
    }

    pub fn relation_type(&self) -> Option<&str> {
        self.metadata.get("RelationType").and_then(MetadataValue::as_str)
    }
}

/// Typed callbacks for graph mutations.
///
/// Listeners run in registration order, synchronously, while the write lock
/// is still held. They receive post-state snapshots and must not re-enter
/// the graph with a write from the callback; work is queued instead (see the
/// alert engine's evaluation queue).
pub trait GraphEventListener: Send {
    fn on_node_added(&self, _n: &Node) {}
    fn on_node_updated(&self, _n: &Node) {}
    fn on_node_deleted(&self, _n: &Node) {}
    fn on_edge_added(&self, _e: &Edge) {}
    fn on_edge_updated(&self, _e: &Edge) {}
    fn on_edge_deleted(&self, _e: &Edge) {}
    fn on_connected(&self) {}
    fn on_disconnected(&self) {}
}

#[derive(Default)]
struct GraphState {
    nodes: HashMap<Identifier, Node>,
    // Insertion order of nodes, for deterministic lookups.
    node_order: Vec<Identifier>,
    edges: HashMap<Identifier, Edge>,
    // node id -> incident edge ids, in edge-insertion order.
    adjacency: HashMap<Identifier, Vec<Identifier>>,
}

/// The shared topology graph.
pub struct Graph {
    state: RwLock<GraphState>,
    listeners: Mutex<Vec<Box<dyn GraphEventListener>>>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn add_event_listener(&self, l: Box<dyn GraphEventListener>) {
        self.listeners.lock().unwrap().push(l);
    }

    fn notify(&self, f: impl Fn(&dyn GraphEventListener)) {
        for l in self.listeners.lock().unwrap().iter() {
            f(l.as_ref());
        }
    }

    /// Insert a node. Returns false when the identifier already exists.
    pub fn add_node(&self, node: Node) -> bool {
        let mut st = self.state.write().unwrap();
        if st.nodes.contains_key(&node.id) {
            return false;
        }
        st.node_order.push(node.id);
        st.nodes.insert(node.id, node.clone());
        self.notify(|l| l.on_node_added(&node));
        true
    }

    /// Set one metadata entry on a node. Returns false when the node is
    /// unknown; no notification fires when the value is unchanged.
    pub fn set_node_metadata<V: Into<MetadataValue>>(
        &self,
        id: &Identifier,
        key: &str,
        value: V,
    ) -> bool {
        let mut st = self.state.write().unwrap();
        let Some(node) = st.nodes.get_mut(id) else {
            return false;
        };
        let value = value.into();
        if node.metadata.get(key) == Some(&value) {
            return true;
        }
        node.metadata.insert(key.to_string(), value);
        let snapshot = node.clone();
        self.notify(|l| l.on_node_updated(&snapshot));
        true
    }

    /// Set one metadata entry on an edge. Returns false when the edge is
    /// unknown; no notification fires when the value is unchanged.
    pub fn set_edge_metadata<V: Into<MetadataValue>>(
        &self,
        id: &Identifier,
        key: &str,
        value: V,
    ) -> bool {
        let mut st = self.state.write().unwrap();
        let Some(edge) = st.edges.get_mut(id) else {
            return false;
        };
        let value = value.into();
        if edge.metadata.get(key) == Some(&value) {
            return true;
        }
        edge.metadata.insert(key.to_string(), value);
        let snapshot = edge.clone();
        self.notify(|l| l.on_edge_updated(&snapshot));
        true
    }

    /// Insert an edge. Both endpoints must exist and the identifier must be
    /// new, otherwise returns false.
    pub fn add_edge(&self, edge: Edge) -> bool {
        let mut st = self.state.write().unwrap();
        if st.edges.contains_key(&edge.id)
            || !st.nodes.contains_key(&edge.source)
            || !st.nodes.contains_key(&edge.target)
        {
            return false;
        }
        st.adjacency.entry(edge.source).or_default().push(edge.id);
        st.adjacency.entry(edge.target).or_default().push(edge.id);
        st.edges.insert(edge.id, edge.clone());
        self.notify(|l| l.on_edge_added(&edge));
        true
    }

    fn remove_edge_locked(st: &mut GraphState, id: &Identifier) -> Option<Edge> {
        let edge = st.edges.remove(id)?;
        for endpoint in [edge.source, edge.target] {
            if let Some(incident) = st.adjacency.get_mut(&endpoint) {
                incident.retain(|e| e != id);
            }
        }
        Some(edge)
    }

    pub fn del_edge(&self, id: &Identifier) -> bool {
        let mut st = self.state.write().unwrap();
        match Self::remove_edge_locked(&mut st, id) {
            Some(edge) => {
                self.notify(|l| l.on_edge_deleted(&edge));
                true
            }
            None => false,
        }
    }

    /// Delete a node and its incident edges. Edge deletions are notified
    /// before the node deletion so listeners never observe a dangling edge.
    pub fn del_node(&self, id: &Identifier) -> bool {
        let mut st = self.state.write().unwrap();
        if !st.nodes.contains_key(id) {
            return false;
        }
        let incident: Vec<Identifier> = st.adjacency.get(id).cloned().unwrap_or_default();
        for edge_id in incident {
            if let Some(edge) = Self::remove_edge_locked(&mut st, &edge_id) {
                self.notify(|l| l.on_edge_deleted(&edge));
            }
        }
        st.adjacency.remove(id);
        st.node_order.retain(|n| n != id);
        let Some(node) = st.nodes.remove(id) else {
            return false;
        };
        self.notify(|l| l.on_node_deleted(&node));
        true
    }

    /// Acquire the read lock for a multi-step query.
    pub fn read(&self) -> GraphReader<'_> {
        GraphReader {
            st: self.state.read().unwrap(),
        }
    }

    pub fn get_node(&self, id: &Identifier) -> Option<Node> {
        self.read().get_node(id).cloned()
    }

    pub fn lookup_nodes(&self, m: &Metadata) -> Vec<Node> {
        self.read().lookup_nodes(m).into_iter().cloned().collect()
    }

    /// All nodes carrying the given metadata key, in insertion order.
    pub fn lookup_nodes_from_key(&self, key: &str) -> Vec<Node> {
        self.read()
            .lookup_nodes_from_key(key)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn lookup_shortest_path(
        &self,
        from: &Identifier,
        target: &Metadata,
        edge_pred: impl Fn(&Edge) -> bool,
    ) -> Vec<Node> {
        self.read().lookup_shortest_path(from, target, edge_pred)
    }
}

/// Read-locked view of the graph. Holds the lock until dropped, so a chain
/// of lookups observes one consistent topology.
pub struct GraphReader<'a> {
    st: RwLockReadGuard<'a, GraphState>,
}

impl GraphReader<'_> {
    pub fn get_node(&self, id: &Identifier) -> Option<&Node> {
        self.st.nodes.get(id)
    }

    pub fn lookup_nodes(&self, m: &Metadata) -> Vec<&Node> {
        self.st
            .node_order
            .iter()
            .filter_map(|id| self.st.nodes.get(id))
            .filter(|n| n.matches(m))
            .collect()
    }

    pub fn lookup_nodes_from_key(&self, key: &str) -> Vec<&Node> {
        self.st
            .node_order
            .iter()
            .filter_map(|id| self.st.nodes.get(id))
            .filter(|n| n.metadata.contains_key(key))
            .collect()
    }

    /// Unweighted BFS from `from`, restricted to edges satisfying
    /// `edge_pred`, stopping at the first node matching `target`.
    ///
    /// Edges are traversed undirected. Adjacency is explored in
    /// edge-insertion order, so equal-length candidates resolve to the first
    /// one discovered. Returns the node sequence `from..=match`, or an empty
    /// vector when no match is reachable.
    pub fn lookup_shortest_path(
        &self,
        from: &Identifier,
        target: &Metadata,
        edge_pred: impl Fn(&Edge) -> bool,
    ) -> Vec<Node> {
        if !self.st.nodes.contains_key(from) {
            return Vec::new();
        }

        let mut visited: HashSet<Identifier> = HashSet::from([*from]);
        let mut prev: HashMap<Identifier, Identifier> = HashMap::new();
        let mut queue: VecDeque<Identifier> = VecDeque::from([*from]);

        while let Some(cur) = queue.pop_front() {
            let node = &self.st.nodes[&cur];
            if node.matches(target) {
                let mut path = vec![cur];
                let mut walk = cur;
                while let Some(p) = prev.get(&walk) {
                    path.push(*p);
                    walk = *p;
                }
                path.reverse();
                return path
                    .into_iter()
                    .map(|id| self.st.nodes[&id].clone())
                    .collect();
            }

            for edge_id in self.st.adjacency.get(&cur).into_iter().flatten() {
                let edge = &self.st.edges[edge_id];
                if !edge_pred(edge) {
                    continue;
                }
                let next = if edge.source == cur {
                    edge.target
                } else {
                    edge.source
                };
                if visited.insert(next) {
                    prev.insert(next, cur);
                    queue.push_back(next);
                }
            }
        }

        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::path::{is_layer2_edge, is_ownership_edge, layer2, ownership, NodePath};
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn node(kind: &str, name: &str) -> Node {
        Node::new(metadata([("Type", kind), ("Name", name)]))
    }

    /// host --ownership--> br0 --ownership--> port1 --layer2--> iface1,
    /// plus the bridge's own layer2 adjacency to the interface.
    fn sample_topology(g: &Graph) -> (Node, Node, Node, Node) {
        let host = node("host", "host");
        let br0 = node("ovsbridge", "br0");
        let port1 = node("ovsport", "port1");
        let iface1 = node("interface", "iface1");
        for n in [&host, &br0, &port1, &iface1] {
            assert!(g.add_node(n.clone()));
        }
        assert!(g.add_edge(ownership(&host, &br0)));
        assert!(g.add_edge(ownership(&br0, &port1)));
        assert!(g.add_edge(layer2(&port1, &iface1)));
        assert!(g.add_edge(layer2(&br0, &iface1)));
        (host, br0, port1, iface1)
    }

    #[test]
    fn add_node_rejects_duplicate_id() {
        let g = Graph::new();
        let n = node("host", "h1");
        assert!(g.add_node(n.clone()));
        assert!(!g.add_node(n));
    }

    #[test]
    fn add_edge_requires_endpoints() {
        let g = Graph::new();
        let a = node("host", "a");
        let b = node("host", "b");
        g.add_node(a.clone());
        // b never inserted
        assert!(!g.add_edge(ownership(&a, &b)));
    }

    #[test]
    fn lookup_nodes_matches_all_entries() {
        let g = Graph::new();
        sample_topology(&g);
        let bridges = g.lookup_nodes(&metadata([("Type", "ovsbridge")]));
        assert_eq!(bridges.len(), 1);
        assert_eq!(bridges[0].name(), "br0");

        let none = g.lookup_nodes(&metadata([("Type", "ovsbridge"), ("Name", "br1")]));
        assert!(none.is_empty());
    }

    #[test]
    fn lookup_nodes_from_key_insertion_order() {
        let g = Graph::new();
        let (host, br0, port1, iface1) = sample_topology(&g);
        let typed = g.lookup_nodes_from_key("Type");
        let ids: Vec<Identifier> = typed.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![host.id, br0.id, port1.id, iface1.id]);
    }

    #[test]
    fn shortest_path_layer2_then_ownership() {
        let g = Graph::new();
        let (host, br0, _port1, iface1) = sample_topology(&g);

        let to_bridge = g.lookup_shortest_path(
            &iface1.id,
            &metadata([("Type", "ovsbridge")]),
            is_layer2_edge,
        );
        let ids: Vec<Identifier> = to_bridge.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![iface1.id, br0.id]);

        let to_host =
            g.lookup_shortest_path(&br0.id, &metadata([("Type", "host")]), is_ownership_edge);
        let ids: Vec<Identifier> = to_host.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![br0.id, host.id]);
        assert_eq!(NodePath(&to_host).to_string(), "host/br0");
    }

    #[test]
    fn shortest_path_respects_edge_predicate() {
        let g = Graph::new();
        let (_host, _br0, port1, iface1) = sample_topology(&g);
        // No ownership edge reaches iface1, only layer2 ones.
        let path = g.lookup_shortest_path(
            &iface1.id,
            &metadata([("Type", "ovsport")]),
            is_ownership_edge,
        );
        assert!(path.is_empty());
        let path =
            g.lookup_shortest_path(&iface1.id, &metadata([("Type", "ovsport")]), is_layer2_edge);
        assert_eq!(path.last().unwrap().id, port1.id);
    }

    #[test]
    fn shortest_path_every_edge_satisfies_predicate() {
        let g = Graph::new();
        let (_host, _br0, _port1, iface1) = sample_topology(&g);
        // host is only reachable from iface1 by mixing relation types, so a
        // single-relation query must come back empty.
        let preds: [fn(&Edge) -> bool; 2] = [is_ownership_edge, is_layer2_edge];
        for pred in preds {
            let path = g.lookup_shortest_path(&iface1.id, &metadata([("Type", "host")]), pred);
            assert!(path.is_empty(), "mixed-relation path must not be returned");
        }
    }

    struct CountingListener {
        nodes_added: Arc<AtomicUsize>,
        edges_deleted: Arc<AtomicUsize>,
        nodes_deleted: Arc<AtomicUsize>,
    }

    impl GraphEventListener for CountingListener {
        fn on_node_added(&self, _n: &Node) {
            self.nodes_added.fetch_add(1, Ordering::SeqCst);
        }
        fn on_edge_deleted(&self, _e: &Edge) {
            self.edges_deleted.fetch_add(1, Ordering::SeqCst);
        }
        fn on_node_deleted(&self, _n: &Node) {
            // Incident edges must already be gone.
            assert!(self.edges_deleted.load(Ordering::SeqCst) > 0);
            self.nodes_deleted.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn del_node_removes_incident_edges_first() {
        let g = Graph::new();
        let nodes_added = Arc::new(AtomicUsize::new(0));
        let edges_deleted = Arc::new(AtomicUsize::new(0));
        let nodes_deleted = Arc::new(AtomicUsize::new(0));
        g.add_event_listener(Box::new(CountingListener {
            nodes_added: nodes_added.clone(),
            edges_deleted: edges_deleted.clone(),
            nodes_deleted: nodes_deleted.clone(),
        }));

        let (_host, br0, _port1, _iface1) = sample_topology(&g);
        assert_eq!(nodes_added.load(Ordering::SeqCst), 4);

        assert!(g.del_node(&br0.id));
        // br0 had three incident edges.
        assert_eq!(edges_deleted.load(Ordering::SeqCst), 3);
        assert_eq!(nodes_deleted.load(Ordering::SeqCst), 1);
        assert!(g.get_node(&br0.id).is_none());
    }

    #[test]
    fn set_edge_metadata_notifies_listeners() {
        let g = Graph::new();
        let updated = Arc::new(AtomicUsize::new(0));
        struct L(Arc<AtomicUsize>);
        impl GraphEventListener for L {
            fn on_edge_updated(&self, _e: &Edge) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        g.add_event_listener(Box::new(L(updated.clone())));

        let a = node("host", "a");
        let b = node("ovsbridge", "b");
        g.add_node(a.clone());
        g.add_node(b.clone());
        let edge = ownership(&a, &b);
        g.add_edge(edge.clone());

        assert!(g.set_edge_metadata(&edge.id, "State", "active"));
        assert_eq!(updated.load(Ordering::SeqCst), 1);
        assert!(!g.set_edge_metadata(&Uuid::new_v4(), "State", "active"));
    }

    #[test]
    fn set_node_metadata_notifies_on_change_only() {
        let g = Graph::new();
        let updated = Arc::new(AtomicUsize::new(0));
        struct L(Arc<AtomicUsize>);
        impl GraphEventListener for L {
            fn on_node_updated(&self, _n: &Node) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        g.add_event_listener(Box::new(L(updated.clone())));

        let n = node("host", "h1");
        g.add_node(n.clone());
        assert!(g.set_node_metadata(&n.id, "State", "up"));
        assert!(g.set_node_metadata(&n.id, "State", "up"));
        assert_eq!(updated.load(Ordering::SeqCst), 1);
    }
}
