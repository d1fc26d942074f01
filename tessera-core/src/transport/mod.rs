//! Object streaming between nodes.
//!
//! A [`Transport`] moves one object (header + body) to a peer and hands it to
//! the receive handler registered there under the same name. Jobs use their id
//! as that name, through a [`DataMover`].

pub mod data_mover;
pub mod http;
pub mod loopback;

use crate::cluster::NodeInfo;
use crate::{Bucket, Result, TesseraError};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncRead;

pub use data_mover::{DataMover, DmStats};
pub use http::HttpTransport;
pub use loopback::{LoopbackNetwork, LoopbackTransport};

pub type ObjReader = Box<dyn AsyncRead + Send + Unpin>;

/// What a header carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Opcode {
    /// An object body follows.
    #[default]
    Object,
    /// The sender has no more objects for this transport name. No body.
    Done,
}

/// Metadata travelling in front of an object body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjHdr {
    pub bucket: Bucket,
    pub obj_name: String,
    pub size: u64,
    #[serde(default)]
    pub checksum: Option<String>,
    /// Node id of the sender.
    pub sender: String,
    #[serde(default)]
    pub opcode: Opcode,
}

impl ObjHdr {
    pub fn done(bucket: Bucket) -> Self {
        Self {
            bucket,
            obj_name: String::new(),
            size: 0,
            checksum: None,
            sender: String::new(),
            opcode: Opcode::Done,
        }
    }

    pub fn is_done(&self) -> bool {
        self.opcode == Opcode::Done
    }
}

#[async_trait]
pub trait RecvHandler: Send + Sync {
    async fn recv(&self, hdr: ObjHdr, body: ObjReader) -> Result<()>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn reg_recv(&self, trname: &str, handler: Arc<dyn RecvHandler>) -> Result<()>;

    /// Returns whether a handler was registered under `trname`.
    fn unreg_recv(&self, trname: &str) -> bool;

    async fn send(&self, peer: &NodeInfo, trname: &str, hdr: ObjHdr, body: ObjReader) -> Result<()>;
}

/// Per-node table of inbound handlers, keyed by transport name.
#[derive(Default)]
pub struct RecvHandlers {
    handlers: RwLock<HashMap<String, Arc<dyn RecvHandler>>>,
}

impl RecvHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, trname: &str, handler: Arc<dyn RecvHandler>) -> Result<()> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(trname) {
            return Err(TesseraError::Transport(format!(
                "receive handler {} is already registered",
                trname
            )));
        }
        handlers.insert(trname.to_string(), handler);
        tracing::debug!("registered receive handler {}", trname);
        Ok(())
    }

    pub fn unregister(&self, trname: &str) -> bool {
        let removed = self.handlers.write().remove(trname).is_some();
        if removed {
            tracing::debug!("unregistered receive handler {}", trname);
        }
        removed
    }

    pub fn is_registered(&self, trname: &str) -> bool {
        self.handlers.read().contains_key(trname)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn dispatch(&self, trname: &str, hdr: ObjHdr, body: ObjReader) -> Result<()> {
        let handler = self
            .handlers
            .read()
            .get(trname)
            .cloned()
            .ok_or_else(|| TesseraError::NoRecvHandler(trname.to_string()))?;
        handler.recv(hdr, body).await
    }
}
