// Downstream flow pipeline: enhancement stages then the analyzer sink.
//
// Runs on the owning agent's thread, outside the flow-table lock, so stages
// may take the graph read lock.

use std::io::Write;
use std::sync::Mutex;

use super::FlowRecord;

/// A mapping stage that annotates flow records in place.
pub trait FlowEnhancer: Send + Sync {
    fn enhance(&self, flows: &mut [FlowRecord]);
}

/// Best-effort push to the central analyzer. No acknowledgement contract.
pub trait AnalyzerSink: Send + Sync {
    fn send_flows(&self, flows: &[FlowRecord]);
}

/// Enhancement chain plus optional sink, installed as both the expire and
/// the updated callback of an agent's flow table.
#[derive(Default)]
pub struct FlowPipeline {
    enhancers: Vec<Box<dyn FlowEnhancer>>,
    sink: Option<Box<dyn AnalyzerSink>>,
}

impl FlowPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enhancer(mut self, e: Box<dyn FlowEnhancer>) -> Self {
        self.enhancers.push(e);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn AnalyzerSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn process(&self, flows: &[FlowRecord]) {
        if flows.is_empty() {
            return;
        }
        let mut flows = flows.to_vec();
        for e in &self.enhancers {
            e.enhance(&mut flows);
        }
        if let Some(sink) = &self.sink {
            sink.send_flows(&flows);
        }
    }
}

/// Sink writing one JSON object per record, newline separated.
pub struct JsonLinesSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl AnalyzerSink for JsonLinesSink {
    fn send_flows(&self, flows: &[FlowRecord]) {
        let mut out = self.out.lock().unwrap();
        for flow in flows {
            match serde_json::to_string(flow) {
                Ok(line) => {
                    if writeln!(out, "{line}").is_err() {
                        return;
                    }
                }
                Err(e) => log::warn!("cannot serialize flow {}: {e}", flow.key),
            }
        }
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowRecord, Protocol};
    use crate::sflow::decode::FrameSummary;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::{Arc, Mutex};

    fn record() -> FlowRecord {
        let frame = FrameSummary {
            src_mac: [0, 1, 2, 3, 4, 5],
            dst_mac: [6, 7, 8, 9, 10, 11],
            ethertype: 0x0800,
            src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            protocol: Protocol::Udp,
            src_port: 53,
            dst_port: 53,
            frame_length: 64,
        };
        FlowRecord::from_frame(&frame, "", 1)
    }

    struct TagEnhancer;
    impl FlowEnhancer for TagEnhancer {
        fn enhance(&self, flows: &mut [FlowRecord]) {
            for f in flows {
                if f.probe_graph_path.is_empty() {
                    f.probe_graph_path = "unknown".to_string();
                }
            }
        }
    }

    struct CollectSink(Arc<Mutex<Vec<FlowRecord>>>);
    impl AnalyzerSink for CollectSink {
        fn send_flows(&self, flows: &[FlowRecord]) {
            self.0.lock().unwrap().extend_from_slice(flows);
        }
    }

    #[test]
    fn enhancers_run_before_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = FlowPipeline::new()
            .with_enhancer(Box::new(TagEnhancer))
            .with_sink(Box::new(CollectSink(seen.clone())));

        pipeline.process(&[record()]);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].probe_graph_path, "unknown");
    }

    #[test]
    fn json_lines_sink_writes_one_line_per_flow() {
        let buf: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

        struct SharedWriter(Arc<Mutex<Vec<u8>>>);
        impl std::io::Write for SharedWriter {
            fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(data);
                Ok(data.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let sink = JsonLinesSink::new(Box::new(SharedWriter(buf.clone())));
        sink.send_flows(&[record(), record()]);

        let written = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert_eq!(written.lines().count(), 2);
        for line in written.lines() {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(v["transport"]["protocol"], "udp");
        }
    }
}
