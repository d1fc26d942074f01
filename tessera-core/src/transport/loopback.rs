use super::{ObjHdr, ObjReader, RecvHandler, RecvHandlers, Transport};
use crate::cluster::NodeInfo;
use crate::{Result, TesseraError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// Upper bound on what a header's size may reserve up front.
const MAX_PREALLOC: u64 = 64 * 1024;

/// In-process network connecting several nodes' transports.
///
/// Used to run multi-node setups inside one process (tests, local tooling).
#[derive(Default, Clone)]
pub struct LoopbackNetwork {
    nodes: Arc<RwLock<HashMap<String, Arc<RecvHandlers>>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `node_id` to the network, returning its transport.
    pub fn transport(&self, node_id: &str) -> Arc<LoopbackTransport> {
        let handlers = Arc::clone(
            self.nodes
                .write()
                .entry(node_id.to_string())
                .or_insert_with(|| Arc::new(RecvHandlers::new())),
        );
        Arc::new(LoopbackTransport {
            network: self.clone(),
            handlers,
        })
    }

    fn peer(&self, node_id: &str) -> Option<Arc<RecvHandlers>> {
        self.nodes.read().get(node_id).cloned()
    }
}

pub struct LoopbackTransport {
    network: LoopbackNetwork,
    handlers: Arc<RecvHandlers>,
}

impl LoopbackTransport {
    pub fn handlers(&self) -> &Arc<RecvHandlers> {
        &self.handlers
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn reg_recv(&self, trname: &str, handler: Arc<dyn RecvHandler>) -> Result<()> {
        self.handlers.register(trname, handler)
    }

    fn unreg_recv(&self, trname: &str) -> bool {
        self.handlers.unregister(trname)
    }

    async fn send(&self, peer: &NodeInfo, trname: &str, hdr: ObjHdr, mut body: ObjReader) -> Result<()> {
        let handlers = self
            .network
            .peer(&peer.node_id)
            .ok_or_else(|| TesseraError::Transport(format!("unknown peer {}", peer.node_id)))?;

        // Drain the body first so the sender's file handle is released
        // before the receiver starts writing.
        let mut data = Vec::with_capacity(hdr.size.min(MAX_PREALLOC) as usize);
        (&mut body).take(hdr.size.saturating_add(1)).read_to_end(&mut data).await?;
        if data.len() as u64 != hdr.size {
            return Err(TesseraError::Transport(format!(
                "{}: body size mismatch, expected {} bytes, got {}",
                hdr.obj_name,
                hdr.size,
                data.len()
            )));
        }

        handlers.dispatch(trname, hdr, Box::new(Cursor::new(data))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bucket;
    use crate::transport::Opcode;

    #[tokio::test]
    async fn test_unknown_peer_and_handler() {
        let network = LoopbackNetwork::new();
        let t1 = network.transport("t1");
        let _t2 = network.transport("t2");

        let hdr = ObjHdr {
            bucket: Bucket::ais("b").unwrap(),
            obj_name: "o".to_string(),
            size: 1,
            checksum: None,
            sender: "t1".to_string(),
            opcode: Opcode::Object,
        };
        let ghost = NodeInfo {
            node_id: "t9".to_string(),
            address: String::new(),
        };
        let err = t1
            .send(&ghost, "job", hdr.clone(), Box::new(Cursor::new(vec![1u8])))
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::Transport(_)));

        let t2 = NodeInfo {
            node_id: "t2".to_string(),
            address: String::new(),
        };
        let err = t1
            .send(&t2, "job", hdr, Box::new(Cursor::new(vec![1u8])))
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::NoRecvHandler(_)));
    }

    #[derive(Default)]
    struct Calls(parking_lot::Mutex<usize>);

    #[async_trait]
    impl RecvHandler for Calls {
        async fn recv(&self, _hdr: ObjHdr, _body: ObjReader) -> Result<()> {
            *self.0.lock() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_size_mismatch_is_rejected() {
        let network = LoopbackNetwork::new();
        let t1 = network.transport("t1");
        let t2 = network.transport("t2");
        let calls = Arc::new(Calls::default());
        t2.reg_recv("job", calls.clone()).unwrap();
        let peer = NodeInfo {
            node_id: "t2".to_string(),
            address: String::new(),
        };

        let mut hdr = ObjHdr::done(Bucket::ais("b").unwrap());
        hdr.opcode = Opcode::Object;
        hdr.obj_name = "huge".to_string();
        hdr.size = 1 << 40;
        let err = t1
            .send(&peer, "job", hdr.clone(), Box::new(Cursor::new(b"abc".to_vec())))
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::Transport(_)));

        hdr.size = 2;
        let err = t1
            .send(&peer, "job", hdr.clone(), Box::new(Cursor::new(b"abc".to_vec())))
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::Transport(_)));
        assert_eq!(*calls.0.lock(), 0);

        hdr.size = 3;
        t1.send(&peer, "job", hdr, Box::new(Cursor::new(b"abc".to_vec())))
            .await
            .unwrap();
        assert_eq!(*calls.0.lock(), 1);
    }
}
