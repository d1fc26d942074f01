use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tessera_core::{
    CapacityConfig, MemsysConfig, NodeInfo, Result, Smap, TesseraError, XactConfig,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub xaction: XactConfig,
    #[serde(default)]
    pub capacity: CapacityConfig,
    #[serde(default)]
    pub memsys: MemsysConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    pub bind_addr: String,
    #[serde(default)]
    pub advertise_addr: Option<String>,
    pub mountpaths: Vec<PathBuf>,
}

impl NodeConfig {
    pub fn effective_address(&self) -> String {
        self.advertise_addr
            .clone()
            .unwrap_or_else(|| self.bind_addr.clone())
    }
}

/// Static cluster membership; every peer is another storage node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub peers: Vec<NodeInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("TESSERA").separator("__"))
            .build()
            .map_err(|e| TesseraError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| TesseraError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node.node_id.trim().is_empty() {
            return Err(TesseraError::Config("node_id cannot be empty".to_string()));
        }
        if self.node.mountpaths.is_empty() {
            return Err(TesseraError::Config(
                "at least one mountpath is required".to_string(),
            ));
        }
        if self.xaction.throttle_objects == 0 {
            return Err(TesseraError::Config(
                "xaction.throttle_objects must be positive".to_string(),
            ));
        }
        self.capacity.validate()
    }

    pub fn local_node(&self) -> NodeInfo {
        NodeInfo {
            node_id: self.node.node_id.clone(),
            address: self.node.effective_address(),
        }
    }

    pub fn smap(&self) -> Result<Smap> {
        Smap::new(self.local_node(), self.cluster.peers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.yaml");
        std::fs::write(
            &path,
            r#"
node:
  node_id: t1
  bind_addr: 127.0.0.1:8080
  mountpaths:
    - /data/mp1
    - /data/mp2
cluster:
  peers:
    - node_id: t2
      address: 10.0.0.2:8080
xaction:
  throttle_objects: 8
"#,
        )
        .unwrap();

        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.node.mountpaths.len(), 2);
        assert_eq!(config.xaction.throttle_objects, 8);
        assert_eq!(config.capacity, CapacityConfig::default());
        assert_eq!(config.transport.timeout_secs, 300);

        let smap = config.smap().unwrap();
        assert_eq!(smap.local().address, "127.0.0.1:8080");
        assert_eq!(smap.nodes().len(), 2);
    }

    #[test]
    fn test_validate_rejects_missing_mountpaths() {
        let config = Config {
            node: NodeConfig {
                node_id: "t1".to_string(),
                bind_addr: "127.0.0.1:8080".to_string(),
                advertise_addr: None,
                mountpaths: vec![],
            },
            cluster: ClusterConfig::default(),
            xaction: XactConfig::default(),
            capacity: CapacityConfig::default(),
            memsys: MemsysConfig::default(),
            transport: TransportConfig::default(),
        };
        assert!(config.validate().is_err());
    }
}
