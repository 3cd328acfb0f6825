// Replicated key-value collaborator for alert-rule persistence.
//
// The real store is external; the engine only needs list-then-watch
// semantics with monotonic revisions. `MemoryKv` is the embedded
// implementation used by the binary and the test suite; a networked client
// plugs in behind the same trait.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::KvError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    Create,
    Set,
    Update,
    Delete,
    Expire,
}

/// One change observed by a watcher. Revisions are strictly increasing and
/// each revision is delivered at most once per subscription.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub action: WatchAction,
    pub key: String,
    pub value: Option<String>,
    pub revision: u64,
}

pub trait KvStore: Send + Sync {
    /// All entries under `prefix` plus the store revision they were read at.
    /// `Err(KvError::NotFound)` when the prefix has never been created.
    fn list(&self, prefix: &str) -> Result<(Vec<(String, String)>, u64), KvError>;

    /// Create `prefix` so that subsequent lists succeed on an empty set.
    fn ensure_prefix(&self, prefix: &str) -> Result<(), KvError>;

    fn put(&self, key: &str, value: &str) -> Result<(), KvError>;

    fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Subscribe to changes under `prefix` with revision greater than
    /// `after_revision`. Events already committed are replayed first; the
    /// channel closes when the store shuts down.
    fn watch(&self, prefix: &str, after_revision: u64) -> Result<Receiver<WatchEvent>, KvError>;
}

struct Subscription {
    prefix: String,
    tx: Sender<WatchEvent>,
}

#[derive(Default)]
struct MemoryKvState {
    entries: BTreeMap<String, String>,
    prefixes: HashSet<String>,
    revision: u64,
    log: Vec<WatchEvent>,
    subscriptions: Vec<Subscription>,
}

/// In-process store with watch support.
#[derive(Default)]
pub struct MemoryKv {
    state: Mutex<MemoryKvState>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn publish(st: &mut MemoryKvState, action: WatchAction, key: &str, value: Option<String>) {
        st.revision += 1;
        let event = WatchEvent {
            action,
            key: key.to_string(),
            value,
            revision: st.revision,
        };
        st.log.push(event.clone());
        st.subscriptions
            .retain(|sub| !key.starts_with(&sub.prefix) || sub.tx.send(event.clone()).is_ok());
    }
}

impl KvStore for MemoryKv {
    fn list(&self, prefix: &str) -> Result<(Vec<(String, String)>, u64), KvError> {
        let st = self.state.lock().unwrap();
        let entries: Vec<(String, String)> = st
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if entries.is_empty() && !st.prefixes.contains(prefix) {
            return Err(KvError::NotFound);
        }
        Ok((entries, st.revision))
    }

    fn ensure_prefix(&self, prefix: &str) -> Result<(), KvError> {
        self.state.lock().unwrap().prefixes.insert(prefix.to_string());
        Ok(())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut st = self.state.lock().unwrap();
        let action = if st.entries.contains_key(key) {
            WatchAction::Set
        } else {
            WatchAction::Create
        };
        st.entries.insert(key.to_string(), value.to_string());
        Self::publish(&mut st, action, key, Some(value.to_string()));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut st = self.state.lock().unwrap();
        if st.entries.remove(key).is_none() {
            return Err(KvError::NotFound);
        }
        Self::publish(&mut st, WatchAction::Delete, key, None);
        Ok(())
    }

    fn watch(&self, prefix: &str, after_revision: u64) -> Result<Receiver<WatchEvent>, KvError> {
        let mut st = self.state.lock().unwrap();
        let (tx, rx) = unbounded();

        // Replay committed events the caller has not seen, then subscribe.
        for event in &st.log {
            if event.revision > after_revision && event.key.starts_with(prefix) {
                let _ = tx.send(event.clone());
            }
        }
        st.subscriptions.push(Subscription {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(rx)
    }
}
