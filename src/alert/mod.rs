// Alert engine: rule store, KV reconciler, predicate evaluation, fan-out.
//
// Rules live in the replicated KV store under `/alert/`; the engine hydrates
// its in-memory map from a list, then keeps it converged through a watcher
// thread. Graph notifications never evaluate inline (they arrive under the
// graph write lock): they enqueue onto a bounded queue drained by one
// evaluation thread, which takes the graph read lock itself.

pub mod eval;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, Sender};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentError, KvError};
use crate::graph::{Graph, GraphEventListener, Node};
use crate::kv::{KvStore, WatchAction, WatchEvent};

pub const ALERT_PREFIX: &str = "/alert/";

/// Pending evaluation requests before the queue starts shedding.
const EVAL_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AlertType {
    Fixed,
    Threshold,
}

impl From<AlertType> for u8 {
    fn from(t: AlertType) -> u8 {
        match t {
            AlertType::Fixed => 1,
            AlertType::Threshold => 2,
        }
    }
}

impl TryFrom<u8> for AlertType {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(AlertType::Fixed),
            2 => Ok(AlertType::Threshold),
            other => Err(format!("invalid alert type {other}")),
        }
    }
}

/// User-supplied fields of a rule.
#[derive(Debug, Clone, Default)]
pub struct AlertRuleParam {
    pub name: String,
    pub description: String,
    pub select: String,
    pub test: String,
    pub action: String,
}

/// A stored alert rule. Field names are the wire format of the KV store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Description")]
    pub description: String,
    /// Metadata key picking candidate nodes.
    #[serde(rename = "Select")]
    pub select: String,
    /// Predicate over candidate node metadata.
    #[serde(rename = "Test")]
    pub test: String,
    #[serde(rename = "Action")]
    pub action: String,
    #[serde(rename = "UUID")]
    pub uuid: Uuid,
    #[serde(rename = "CreateTime")]
    pub create_time: DateTime<Utc>,
    #[serde(rename = "Type")]
    pub kind: AlertType,
    #[serde(rename = "Count")]
    pub count: u64,
}

/// One firing, emitted to every registered listener.
#[derive(Debug, Clone, Serialize)]
pub struct AlertMessage {
    #[serde(rename = "UUID")]
    pub uuid: Uuid,
    #[serde(rename = "Type")]
    pub kind: AlertType,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "Count")]
    pub count: u64,
    #[serde(rename = "Reason")]
    pub reason: String,
    #[serde(rename = "ReasonData")]
    pub reason_data: serde_json::Value,
}

pub trait AlertListener: Send {
    fn on_alert(&self, msg: &AlertMessage);
}

fn rule_path(id: &Uuid) -> String {
    format!("{ALERT_PREFIX}{id}")
}

struct EngineInner {
    graph: Arc<Graph>,
    kv: Arc<dyn KvStore>,
    rules: RwLock<HashMap<Uuid, AlertRule>>,
    listeners: Mutex<Vec<Box<dyn AlertListener>>>,
}

impl EngineInner {
    /// Evaluate every rule against its candidate nodes, firing listeners on
    /// matches. Takes the rule-store write lock because a firing mutates the
    /// rule's count.
    fn eval_nodes(&self) {
        let mut rules = self.rules.write().unwrap();
        for rule in rules.values_mut() {
            let nodes = self.graph.lookup_nodes_from_key(&rule.select);
            for node in nodes {
                let wrapped = format!("({}) == true", rule.test);
                match eval::evaluate(&wrapped, &node.metadata) {
                    Ok(true) => {
                        rule.count += 1;
                        let msg = AlertMessage {
                            uuid: rule.uuid,
                            kind: rule.kind,
                            timestamp: Utc::now(),
                            count: rule.count,
                            reason: rule.action.clone(),
                            reason_data: serde_json::to_value(&node)
                                .unwrap_or(serde_json::Value::Null),
                        };
                        log::debug!("alert {} fired (count {})", rule.uuid, rule.count);
                        for l in self.listeners.lock().unwrap().iter() {
                            l.on_alert(&msg);
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        log::error!("cannot evaluate expression {wrapped:?}: {e}");
                        continue;
                    }
                }
            }
        }
    }

    fn apply_event(&self, ev: WatchEvent) {
        match ev.action {
            WatchAction::Create | WatchAction::Set | WatchAction::Update => {
                let Some(value) = ev.value else {
                    log::debug!("rule event without value for {}", ev.key);
                    return;
                };
                match serde_json::from_str::<AlertRule>(&value) {
                    Ok(rule) => {
                        log::debug!("alert rule {} loaded", rule.uuid);
                        self.rules.write().unwrap().insert(rule.uuid, rule);
                    }
                    Err(e) => log::debug!("error handling rule event for {}: {e}", ev.key),
                }
            }
            WatchAction::Delete | WatchAction::Expire => {
                let id = ev.key.rsplit('/').next().unwrap_or_default();
                match Uuid::parse_str(id) {
                    Ok(uuid) => {
                        self.rules.write().unwrap().remove(&uuid);
                    }
                    Err(e) => log::debug!("rule event with malformed id {id:?}: {e}"),
                }
            }
        }
    }
}

/// Graph listener side of the engine: notifications only enqueue, the
/// evaluation thread does the graph reads.
struct AlertGraphListener {
    queue: Sender<()>,
}

impl AlertGraphListener {
    fn enqueue(&self) {
        if self.queue.try_send(()).is_err() {
            log::warn!("alert evaluation queue unavailable, dropping request");
        }
    }
}

impl GraphEventListener for AlertGraphListener {
    fn on_node_added(&self, _n: &Node) {
        self.enqueue();
    }

    fn on_node_updated(&self, _n: &Node) {
        self.enqueue();
    }

    // Rules re-hydrate from the KV store through the watcher, so a
    // reconnect needs no resync here.
    fn on_connected(&self) {}
}

/// The alert engine. Dropping it stops the watcher and evaluation threads.
pub struct AlertEngine {
    inner: Arc<EngineInner>,
    stop_tx: Mutex<Option<Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl AlertEngine {
    /// Hydrate the rule map from the store, subscribe the watcher at the
    /// listed revision, and register for graph events.
    pub fn new(graph: Arc<Graph>, kv: Arc<dyn KvStore>) -> Result<Self, AgentError> {
        let (entries, revision) = match kv.list(ALERT_PREFIX) {
            Ok(r) => r,
            Err(KvError::NotFound) => {
                kv.ensure_prefix(ALERT_PREFIX)?;
                kv.list(ALERT_PREFIX)?
            }
            Err(e) => return Err(e.into()),
        };

        let mut rules = HashMap::new();
        for (key, value) in entries {
            match serde_json::from_str::<AlertRule>(&value) {
                Ok(rule) => {
                    rules.insert(rule.uuid, rule);
                }
                Err(e) => log::warn!("skipping malformed alert rule at {key}: {e}"),
            }
        }

        let events = kv.watch(ALERT_PREFIX, revision)?;

        let inner = Arc::new(EngineInner {
            graph: graph.clone(),
            kv,
            rules: RwLock::new(rules),
            listeners: Mutex::new(Vec::new()),
        });

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let mut threads = Vec::new();

        let watcher_inner = inner.clone();
        let watcher_stop = stop_rx.clone();
        threads.push(
            thread::Builder::new()
                .name("topoflow-alert-watch".into())
                .spawn(move || loop {
                    select! {
                        recv(events) -> ev => match ev {
                            Ok(ev) => watcher_inner.apply_event(ev),
                            Err(_) => {
                                log::warn!("alert rule watcher stream closed");
                                break;
                            }
                        },
                        recv(watcher_stop) -> _ => break,
                    }
                })
                .map_err(|e| AgentError::Spawn(format!("spawn alert watcher: {e}")))?,
        );

        let (eval_tx, eval_rx) = bounded::<()>(EVAL_QUEUE_CAPACITY);
        let worker_inner = inner.clone();
        threads.push(
            thread::Builder::new()
                .name("topoflow-alert-eval".into())
                .spawn(move || loop {
                    select! {
                        recv(eval_rx) -> msg => match msg {
                            Ok(()) => worker_inner.eval_nodes(),
                            Err(_) => break,
                        },
                        recv(stop_rx) -> _ => break,
                    }
                })
                .map_err(|e| AgentError::Spawn(format!("spawn alert evaluator: {e}")))?,
        );

        graph.add_event_listener(Box::new(AlertGraphListener { queue: eval_tx }));

        Ok(Self {
            inner,
            stop_tx: Mutex::new(Some(stop_tx)),
            threads: Mutex::new(threads),
        })
    }

    pub fn add_event_listener(&self, l: Box<dyn AlertListener>) {
        self.inner.listeners.lock().unwrap().push(l);
    }

    /// Persist a new rule. The local map converges through the watcher.
    pub fn create(&self, param: AlertRuleParam) -> Result<AlertRule, AgentError> {
        let rule = AlertRule {
            name: param.name,
            description: param.description,
            select: param.select,
            test: param.test,
            action: param.action,
            uuid: Uuid::new_v4(),
            create_time: Utc::now(),
            kind: AlertType::Fixed,
            count: 0,
        };
        let data = serde_json::to_string(&rule)?;
        self.inner.kv.put(&rule_path(&rule.uuid), &data)?;
        Ok(rule)
    }

    pub fn delete(&self, id: &Uuid) -> Result<(), AgentError> {
        self.inner.kv.delete(&rule_path(id)).map_err(Into::into)
    }

    pub fn get(&self, id: &Uuid) -> Option<AlertRule> {
        self.inner.rules.read().unwrap().get(id).cloned()
    }

    pub fn index(&self) -> HashMap<Uuid, AlertRule> {
        self.inner.rules.read().unwrap().clone()
    }

    /// Stop the watcher and evaluation threads and join them.
    pub fn stop(&self) {
        self.stop_tx.lock().unwrap().take();
        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for AlertEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
