use super::hrw::hrw_weight;
use crate::{Result, TesseraError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    /// `host:port` the node's HTTP server is reachable at.
    pub address: String,
}

/// Cluster map as seen by this node. Maintained by an external membership
/// service; here it is a fixed list.
#[derive(Debug, Clone)]
pub struct Smap {
    local_id: String,
    nodes: Vec<NodeInfo>,
}

impl Smap {
    pub fn new(local: NodeInfo, peers: Vec<NodeInfo>) -> Result<Self> {
        let local_id = local.node_id.clone();
        let mut nodes = vec![local];
        for peer in peers {
            if nodes.iter().any(|node| node.node_id == peer.node_id) {
                return Err(TesseraError::Config(format!(
                    "duplicate node id in cluster map: {}",
                    peer.node_id
                )));
            }
            nodes.push(peer);
        }
        Ok(Self { local_id, nodes })
    }

    pub fn single(local: NodeInfo) -> Self {
        Self {
            local_id: local.node_id.clone(),
            nodes: vec![local],
        }
    }

    pub fn local(&self) -> &NodeInfo {
        // `new` always puts the local node first
        &self.nodes[0]
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn nodes(&self) -> &[NodeInfo] {
        &self.nodes
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeInfo> {
        self.nodes.iter().find(|node| node.node_id == node_id)
    }

    pub fn is_local(&self, node: &NodeInfo) -> bool {
        node.node_id == self.local_id
    }

    /// Node that owns `uname`.
    pub fn hrw_node(&self, uname: &str) -> &NodeInfo {
        self.nodes
            .iter()
            .max_by_key(|node| hrw_weight(&node.node_id, uname))
            .unwrap_or_else(|| self.local())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeInfo {
        NodeInfo {
            node_id: id.to_string(),
            address: format!("{}:8080", id),
        }
    }

    #[test]
    fn test_smap_rejects_duplicates() {
        assert!(Smap::new(node("t1"), vec![node("t2"), node("t1")]).is_err());
    }

    #[test]
    fn test_hrw_node_covers_all_nodes() {
        let smap = Smap::new(node("t1"), vec![node("t2"), node("t3")]).unwrap();
        assert_eq!(smap.local().node_id, "t1");

        let mut owners = std::collections::HashSet::new();
        for i in 0..100 {
            owners.insert(smap.hrw_node(&format!("ais/b/{}", i)).node_id.clone());
        }
        assert_eq!(owners.len(), 3);

        let single = Smap::single(node("t1"));
        assert!(single.is_local(single.hrw_node("anything")));
    }
}
