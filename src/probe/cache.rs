// Ingress-ifindex to probe-path resolution.
//
// Lookups are non-blocking: a miss enqueues the index for one updater
// thread that walks the graph and fills the cache, and the sample goes out
// with the empty path. The next sample for the same index hits the cache.
// A full queue drops the request and bumps a counter; sampling means the
// index comes around again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Sender};

use crate::error::AgentError;
use crate::flow::FlowPathResolver;
use crate::graph::path::{is_layer2_edge, is_ownership_edge, NodePath};
use crate::graph::{metadata, Graph};

const QUEUE_CAPACITY: usize = 200;

enum CacheState {
    Pending,
    Resolved(String),
}

struct CacheEntry {
    state: CacheState,
    inserted: Instant,
}

struct PathCache {
    entries: Mutex<HashMap<u32, CacheEntry>>,
    expire: Duration,
}

impl PathCache {
    fn new(expire: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            expire,
        }
    }

    /// `None`: absent or expired. `Some(None)`: resolution in flight.
    /// `Some(Some(path))`: resolved.
    fn get(&self, if_index: u32) -> Option<Option<String>> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(&if_index)?;
        if entry.inserted.elapsed() > self.expire {
            return None;
        }
        match &entry.state {
            CacheState::Pending => Some(None),
            CacheState::Resolved(path) => Some(Some(path.clone())),
        }
    }

    fn mark_pending(&self, if_index: u32) {
        self.entries.lock().unwrap().insert(
            if_index,
            CacheEntry {
                state: CacheState::Pending,
                inserted: Instant::now(),
            },
        );
    }

    fn insert(&self, if_index: u32, path: String) {
        self.entries.lock().unwrap().insert(
            if_index,
            CacheEntry {
                state: CacheState::Resolved(path),
                inserted: Instant::now(),
            },
        );
    }

    /// Failed resolution: forget the pending entry so the next sample
    /// retries.
    fn clear(&self, if_index: u32) {
        self.entries.lock().unwrap().remove(&if_index);
    }

    fn cleanup(&self) {
        let expire = self.expire;
        self.entries
            .lock()
            .unwrap()
            .retain(|_, e| e.inserted.elapsed() <= expire);
    }
}

/// Cache-backed [`FlowPathResolver`] over the topology graph.
pub struct TopologyPathResolver {
    cache: Arc<PathCache>,
    queue: Sender<u32>,
    dropped: AtomicU64,
    stop_tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TopologyPathResolver {
    pub fn new(
        graph: Arc<Graph>,
        cache_expire: Duration,
        cache_cleanup: Duration,
    ) -> Result<Self, AgentError> {
        Self::with_queue_capacity(graph, cache_expire, cache_cleanup, QUEUE_CAPACITY)
    }

    fn with_queue_capacity(
        graph: Arc<Graph>,
        cache_expire: Duration,
        cache_cleanup: Duration,
        capacity: usize,
    ) -> Result<Self, AgentError> {
        let cache = Arc::new(PathCache::new(cache_expire));
        let (queue_tx, queue_rx) = bounded::<u32>(capacity);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let cleanup_tick = crossbeam_channel::tick(cache_cleanup);

        let updater_cache = cache.clone();
        let handle = thread::Builder::new()
            .name("topoflow-path-cache".into())
            .spawn(move || loop {
                select! {
                    recv(queue_rx) -> msg => match msg {
                        Ok(if_index) => match resolve_path(&graph, if_index) {
                            Some(path) => updater_cache.insert(if_index, path),
                            None => updater_cache.clear(if_index),
                        },
                        Err(_) => break,
                    },
                    recv(cleanup_tick) -> _ => updater_cache.cleanup(),
                    recv(stop_rx) -> _ => break,
                }
            })
            .map_err(|e| AgentError::Spawn(format!("spawn path cache updater: {e}")))?;

        Ok(Self {
            cache,
            queue: queue_tx,
            dropped: AtomicU64::new(0),
            stop_tx: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Resolution requests shed because the updater queue was full.
    pub fn dropped_requests(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.stop_tx.lock().unwrap().take();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TopologyPathResolver {
    fn drop(&mut self) {
        self.stop();
    }
}

impl FlowPathResolver for TopologyPathResolver {
    fn probe_path(&self, if_index: u32) -> Option<String> {
        match self.cache.get(if_index) {
            Some(Some(path)) => Some(path),
            Some(None) => None, // in flight
            None => {
                if self.queue.try_send(if_index).is_ok() {
                    self.cache.mark_pending(if_index);
                } else {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                None
            }
        }
    }
}

/// Walk ifindex -> interface node -> layer2 path to its bridge -> ownership
/// path to the host, and serialize the host-side path.
fn resolve_path(graph: &Graph, if_index: u32) -> Option<String> {
    let g = graph.read();
    for iface in g.lookup_nodes(&metadata([("IfIndex", if_index)])) {
        let to_bridge =
            g.lookup_shortest_path(&iface.id, &metadata([("Type", "ovsbridge")]), is_layer2_edge);
        let Some(bridge) = to_bridge.last() else {
            continue;
        };
        let to_host =
            g.lookup_shortest_path(&bridge.id, &metadata([("Type", "host")]), is_ownership_edge);
        if to_host.is_empty() {
            continue;
        }
        return Some(NodePath(&to_host).to_string());
    }
    None
}
