// Concurrent flow table.
//
// One mutex around the fingerprint map; expire and updated passes collect
// their batch under the lock and invoke the registered callback after
// releasing it, so downstream pipelines are free to query the graph.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use rustc_hash::FxHashMap;

use super::{FlowKey, FlowRecord};
use crate::sflow::decode::FrameSummary;

pub type FlowCallback = Box<dyn Fn(&[FlowRecord]) + Send>;

struct TableEntry {
    record: FlowRecord,
    // Touched since the last updated tick.
    touched: bool,
}

struct Registration {
    callback: FlowCallback,
    every: Duration,
    ticker: Receiver<Instant>,
}

/// Per-agent aggregator of flow records, keyed by fingerprint.
#[derive(Default)]
pub struct FlowTable {
    entries: Mutex<FxHashMap<FlowKey, TableEntry>>,
    expire: Mutex<Option<Registration>>,
    updated: Mutex<Option<Registration>>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the expire callback, ticking every `every`. At most one
    /// expire registration per table; a second call replaces the first.
    pub fn register_expire(&self, callback: FlowCallback, every: Duration) {
        *self.expire.lock().unwrap() = Some(Registration {
            callback,
            every,
            ticker: crossbeam_channel::tick(every),
        });
    }

    /// Install the updated callback, ticking every `every`.
    pub fn register_updated(&self, callback: FlowCallback, every: Duration) {
        *self.updated.lock().unwrap() = Some(Registration {
            callback,
            every,
            ticker: crossbeam_channel::tick(every),
        });
    }

    /// Drop both registrations and their tickers.
    pub fn unregister_all(&self) {
        self.expire.lock().unwrap().take();
        self.updated.lock().unwrap().take();
    }

    pub fn expire_ticker(&self) -> Option<Receiver<Instant>> {
        self.expire.lock().unwrap().as_ref().map(|r| r.ticker.clone())
    }

    pub fn updated_ticker(&self) -> Option<Receiver<Instant>> {
        self.updated.lock().unwrap().as_ref().map(|r| r.ticker.clone())
    }

    /// Deposit one decoded frame: update the record for its key, or create
    /// one stamped with `probe_graph_path`.
    pub fn ingest(&self, frame: &FrameSummary, probe_graph_path: &str, now: i64) {
        let key = FlowKey::from_frame(frame);
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&key) {
            Some(entry) => {
                entry.record.update(frame, now);
                entry.touched = true;
            }
            None => {
                entries.insert(
                    key,
                    TableEntry {
                        record: FlowRecord::from_frame(frame, probe_graph_path, now),
                        touched: true,
                    },
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every record whose `last_seen` predates `now` minus the expire
    /// interval and deliver the batch, as final snapshots, to the expire
    /// callback.
    pub fn expire(&self, now: i64) {
        let reg = self.expire.lock().unwrap();
        let Some(reg) = reg.as_ref() else { return };
        let deadline = now - reg.every.as_secs() as i64;

        let expired: Vec<FlowRecord> = {
            let mut entries = self.entries.lock().unwrap();
            let keys: Vec<FlowKey> = entries
                .iter()
                .filter(|(_, e)| e.record.last_seen < deadline)
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter()
                .filter_map(|k| entries.remove(k))
                .map(|e| e.record)
                .collect()
        };

        if !expired.is_empty() {
            (reg.callback)(&expired);
        }
    }

    /// Deliver every record touched since the previous updated tick to the
    /// updated callback. Records stay in the table.
    pub fn updated(&self, _now: i64) {
        let reg = self.updated.lock().unwrap();
        let Some(reg) = reg.as_ref() else { return };

        let batch: Vec<FlowRecord> = {
            let mut entries = self.entries.lock().unwrap();
            entries
                .values_mut()
                .filter(|e| e.touched)
                .map(|e| {
                    e.touched = false;
                    e.record.clone()
                })
                .collect()
        };

        if !batch.is_empty() {
            (reg.callback)(&batch);
        }
    }

    /// Flush every record through the expire callback and empty the table.
    /// Shutdown and test path.
    pub fn expire_now(&self) {
        let all: Vec<FlowRecord> = {
            let mut entries = self.entries.lock().unwrap();
            entries.drain().map(|(_, e)| e.record).collect()
        };
        if all.is_empty() {
            return;
        }
        let reg = self.expire.lock().unwrap();
        if let Some(reg) = reg.as_ref() {
            (reg.callback)(&all);
        }
    }
}
