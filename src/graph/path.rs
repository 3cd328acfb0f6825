// Edge relation predicates and node path serialization.

use std::fmt;

use super::{metadata, Edge, Node};

pub const RELATION_OWNERSHIP: &str = "ownership";
pub const RELATION_LAYER2: &str = "layer2";

pub fn is_ownership_edge(e: &Edge) -> bool {
    e.relation_type() == Some(RELATION_OWNERSHIP)
}

pub fn is_layer2_edge(e: &Edge) -> bool {
    e.relation_type() == Some(RELATION_LAYER2)
}

/// An ownership edge from `source` to `target`.
pub fn ownership(source: &Node, target: &Node) -> Edge {
    Edge::new(
        source.id,
        target.id,
        metadata([("RelationType", RELATION_OWNERSHIP)]),
    )
}

/// A layer2 edge from `source` to `target`.
pub fn layer2(source: &Node, target: &Node) -> Edge {
    Edge::new(
        source.id,
        target.id,
        metadata([("RelationType", RELATION_LAYER2)]),
    )
}

/// An ordered node sequence from a target up to its host, serialized
/// host-first with `/` separators (e.g. `host/br0`).
///
/// The serialized form is the provenance tag stamped on flow records, so it
/// must stay stable for one topology.
pub struct NodePath<'a>(pub &'a [Node]);

impl fmt::Display for NodePath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for node in self.0.iter().rev() {
            if !first {
                write!(f, "/")?;
            }
            first = false;
            write!(f, "{}", node.name())?;
        }
        Ok(())
    }
}
