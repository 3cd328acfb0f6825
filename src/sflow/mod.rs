// Sampled-flow ingestion: the wire decoder and the per-bridge UDP agents.

pub mod agent;
pub mod decode;

pub use agent::{Allocation, SflowAgent, SflowAgentAllocator};
