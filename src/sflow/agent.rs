// Per-bridge sFlow agents and their port-pool allocator.
//
// Each agent owns one UDP socket and one flow table, serviced by a single
// named thread. The thread multiplexes, in priority order: expire tick,
// updated tick, flush request, then one socket read with a 1 s deadline so
// the stop flag is observed promptly.

use std::collections::BTreeMap;
use std::net::{IpAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::AgentError;
use crate::flow::pipeline::FlowPipeline;
use crate::flow::table::FlowTable;
use crate::flow::{unix_now, FlowPathResolver};
use crate::sflow::decode::{self, MAX_DATAGRAM_SIZE};

const READ_DEADLINE: Duration = Duration::from_secs(1);

/// One sampled-flow listener bound to a UDP port.
pub struct SflowAgent {
    uuid: String,
    addr: IpAddr,
    port: u16,
    expire_every: Duration,
    update_every: Duration,
    table: Arc<FlowTable>,
    pipeline: Arc<FlowPipeline>,
    resolver: Arc<dyn FlowPathResolver>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    flush_tx: Sender<()>,
    flush_rx: Receiver<()>,
    flush_done_tx: Sender<()>,
    flush_done_rx: Receiver<()>,
}

impl SflowAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uuid: &str,
        addr: IpAddr,
        port: u16,
        expire_every: Duration,
        update_every: Duration,
        pipeline: Arc<FlowPipeline>,
        resolver: Arc<dyn FlowPathResolver>,
    ) -> Self {
        let (flush_tx, flush_rx) = bounded(1);
        let (flush_done_tx, flush_done_rx) = bounded(1);
        Self {
            uuid: uuid.to_string(),
            addr,
            port,
            expire_every,
            update_every,
            table: Arc::new(FlowTable::new()),
            pipeline,
            resolver,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
            flush_tx,
            flush_rx,
            flush_done_tx,
            flush_done_rx,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The `addr:port` string a switch points its sampling target at.
    pub fn target(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    pub fn table(&self) -> &Arc<FlowTable> {
        &self.table
    }

    /// Bind the socket and spawn the read loop. A bind failure is fatal for
    /// this agent and is returned to the caller.
    pub fn start(&self) -> Result<(), AgentError> {
        let socket = UdpSocket::bind((self.addr, self.port)).map_err(AgentError::Bind)?;
        socket
            .set_read_timeout(Some(READ_DEADLINE))
            .map_err(AgentError::Bind)?;

        let expire_pipeline = self.pipeline.clone();
        self.table.register_expire(
            Box::new(move |flows| expire_pipeline.process(flows)),
            self.expire_every,
        );
        let update_pipeline = self.pipeline.clone();
        self.table.register_updated(
            Box::new(move |flows| update_pipeline.process(flows)),
            self.update_every,
        );

        self.running.store(true, Ordering::SeqCst);

        let table = self.table.clone();
        let resolver = self.resolver.clone();
        let running = self.running.clone();
        let flush_rx = self.flush_rx.clone();
        let flush_done_tx = self.flush_done_tx.clone();

        let handle = thread::Builder::new()
            .name(format!("topoflow-sflow-{}", self.port))
            .spawn(move || {
                agent_loop(&socket, &table, resolver.as_ref(), &running, &flush_rx, &flush_done_tx);
            })
            .map_err(|e| AgentError::Spawn(format!("spawn sflow agent: {e}")))?;

        *self.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Flip the running flag and join the read loop. The loop observes the
    /// flag within one read deadline and flushes its table through the
    /// expire path before exiting.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            if let Some(handle) = self.handle.lock().unwrap().take() {
                let _ = handle.join();
            }
        }
    }

    /// Force an immediate full expire and wait for the acknowledgement.
    /// Testing path only.
    pub fn flush(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        if self.flush_tx.send(()).is_ok() {
            let _ = self.flush_done_rx.recv_timeout(Duration::from_secs(5));
        }
    }
}

fn agent_loop(
    socket: &UdpSocket,
    table: &FlowTable,
    resolver: &dyn FlowPathResolver,
    running: &AtomicBool,
    flush_rx: &Receiver<()>,
    flush_done_tx: &Sender<()>,
) {
    let Some(expire_tick) = table.expire_ticker() else {
        return;
    };
    let Some(updated_tick) = table.updated_ticker() else {
        return;
    };

    let mut buf = [0u8; MAX_DATAGRAM_SIZE];

    while running.load(Ordering::SeqCst) {
        if expire_tick.try_recv().is_ok() {
            table.expire(unix_now());
            continue;
        }
        if updated_tick.try_recv().is_ok() {
            table.updated(unix_now());
            continue;
        }
        if flush_rx.try_recv().is_ok() {
            table.expire_now();
            let _ = flush_done_tx.send(());
            continue;
        }

        match socket.recv_from(&mut buf) {
            Ok((len, _)) => feed_flow_table(table, resolver, &buf[..len]),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                // Deadline elapsed; loop to re-check the running flag.
            }
            Err(e) => log::debug!("sflow read error: {e}"),
        }
    }

    // Final snapshots for whatever is still aggregating.
    table.expire_now();
    table.unregister_all();
}

fn feed_flow_table(table: &FlowTable, resolver: &dyn FlowPathResolver, data: &[u8]) {
    let Some(datagram) = decode::decode_datagram(data) else {
        log::debug!("dropping malformed sflow datagram ({} bytes)", data.len());
        return;
    };

    let now = unix_now();
    for sample in &datagram.samples {
        let path = resolver
            .probe_path(sample.input_ifindex)
            .unwrap_or_default();
        for frame in &sample.frames {
            table.ingest(frame, &path, now);
        }
        log::debug!(
            "{} frames captured on ifindex {}",
            sample.frames.len(),
            sample.input_ifindex
        );
    }
}

/// Result of an allocation request: either a freshly started agent or the
/// one already bound to the requested uuid.
pub enum Allocation {
    Created(Arc<SflowAgent>),
    Existing(Arc<SflowAgent>),
}

impl Allocation {
    pub fn agent(&self) -> &Arc<SflowAgent> {
        match self {
            Allocation::Created(a) | Allocation::Existing(a) => a,
        }
    }
}

/// Pool of sFlow agents keyed by bridge uuid, one UDP port each out of the
/// configured `[port_min, port_max]` range.
pub struct SflowAgentAllocator {
    addr: IpAddr,
    port_min: u16,
    port_max: u16,
    expire_every: Duration,
    update_every: Duration,
    pipeline: Arc<FlowPipeline>,
    allocated: Mutex<BTreeMap<u16, Arc<SflowAgent>>>,
}

impl SflowAgentAllocator {
    pub fn new(
        addr: IpAddr,
        port_min: u16,
        port_max: u16,
        expire_every: Duration,
        update_every: Duration,
        pipeline: Arc<FlowPipeline>,
    ) -> Self {
        Self {
            addr,
            port_min,
            port_max,
            expire_every,
            update_every,
            pipeline,
            allocated: Mutex::new(BTreeMap::new()),
        }
    }

    /// Return the agent already serving `uuid`, or start a new one on the
    /// first free port of the range.
    pub fn alloc(
        &self,
        uuid: &str,
        resolver: Arc<dyn FlowPathResolver>,
    ) -> Result<Allocation, AgentError> {
        let mut allocated = self.allocated.lock().unwrap();

        if let Some(agent) = allocated.values().find(|a| a.uuid() == uuid) {
            return Ok(Allocation::Existing(agent.clone()));
        }

        for port in self.port_min..=self.port_max {
            if allocated.contains_key(&port) {
                continue;
            }
            let agent = Arc::new(SflowAgent::new(
                uuid,
                self.addr,
                port,
                self.expire_every,
                self.update_every,
                self.pipeline.clone(),
                resolver,
            ));
            agent.start()?;
            allocated.insert(port, agent.clone());
            return Ok(Allocation::Created(agent));
        }

        Err(AgentError::PortExhausted)
    }

    /// Stop and deallocate the agent serving `uuid`, if any.
    pub fn release(&self, uuid: &str) {
        let mut allocated = self.allocated.lock().unwrap();
        if let Some(port) = allocated
            .iter()
            .find(|(_, a)| a.uuid() == uuid)
            .map(|(p, _)| *p)
        {
            if let Some(agent) = allocated.remove(&port) {
                agent.stop();
            }
        }
    }

    /// Stop every allocated agent.
    pub fn release_all(&self) {
        let mut allocated = self.allocated.lock().unwrap();
        for (_, agent) in std::mem::take(&mut *allocated) {
            agent.stop();
        }
    }

    pub fn agents(&self) -> Vec<Arc<SflowAgent>> {
        self.allocated.lock().unwrap().values().cloned().collect()
    }
}

impl Drop for SflowAgentAllocator {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::EmptyPathResolver;

    fn allocator(port_min: u16, port_max: u16) -> SflowAgentAllocator {
        SflowAgentAllocator::new(
            "127.0.0.1".parse().unwrap(),
            port_min,
            port_max,
            Duration::from_secs(300),
            Duration::from_secs(30),
            Arc::new(FlowPipeline::new()),
        )
    }

    #[test]
    fn alloc_is_idempotent_per_uuid() {
        let alloc = allocator(46345, 46346);
        let resolver = Arc::new(EmptyPathResolver);

        let first = alloc.alloc("uuid-1", resolver.clone()).unwrap();
        assert!(matches!(first, Allocation::Created(_)));
        let port = first.agent().port();

        let second = alloc.alloc("uuid-1", resolver).unwrap();
        assert!(matches!(second, Allocation::Existing(_)));
        assert_eq!(second.agent().port(), port);
        assert_eq!(alloc.agents().len(), 1);
    }

    #[test]
    fn ports_are_distinct_and_in_range() {
        let alloc = allocator(46350, 46352);
        let resolver = Arc::new(EmptyPathResolver);
        let a = alloc.alloc("a", resolver.clone()).unwrap();
        let b = alloc.alloc("b", resolver.clone()).unwrap();
        let c = alloc.alloc("c", resolver).unwrap();

        let mut ports = vec![
            a.agent().port(),
            b.agent().port(),
            c.agent().port(),
        ];
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), 3);
        for p in ports {
            assert!((46350..=46352).contains(&p));
        }
    }

    #[test]
    fn exhausted_range_then_release_reuses_port() {
        let alloc = allocator(46360, 46361);
        let resolver = Arc::new(EmptyPathResolver);

        let a = alloc.alloc("a", resolver.clone()).unwrap();
        assert_eq!(a.agent().port(), 46360);
        let b = alloc.alloc("b", resolver.clone()).unwrap();
        assert_eq!(b.agent().port(), 46361);

        match alloc.alloc("c", resolver.clone()) {
            Err(AgentError::PortExhausted) => {}
            other => panic!("expected port exhaustion, got {:?}", other.is_ok()),
        }

        alloc.release("a");
        let d = alloc.alloc("d", resolver).unwrap();
        assert_eq!(d.agent().port(), 46360);
    }
}
