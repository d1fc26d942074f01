use super::{ObjHdr, ObjReader, RecvHandler, Transport};
use crate::cluster::NodeInfo;
use crate::{Bucket, Result, TesseraError};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DmStats {
    pub sent_objects: u64,
    pub sent_bytes: u64,
    pub recv_objects: u64,
    pub recv_bytes: u64,
}

#[derive(Default)]
struct Counters {
    sent_objects: AtomicU64,
    sent_bytes: AtomicU64,
    recv_objects: AtomicU64,
    recv_bytes: AtomicU64,
}

/// Per-job handle on the shared transport.
///
/// Lifecycle: `reg_recv` → `open` → sends → `quiesce` → `bcast_done` →
/// `close` → `wait_peers_done` → `unreg_recv`. A node stays registered until
/// every peer has said it will send nothing more under this name.
///
/// Dropping a mover that is still registered deregisters it, so a handler can
/// never outlive the job that installed it.
pub struct DataMover {
    trname: String,
    local_id: String,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn RecvHandler>,
    counters: Arc<Counters>,
    peers_done: Arc<watch::Sender<HashSet<String>>>,
    registered: AtomicBool,
    open: AtomicBool,
    in_flight: watch::Sender<usize>,
}

impl DataMover {
    pub fn new(
        trname: impl Into<String>,
        local_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn RecvHandler>,
    ) -> Self {
        let (in_flight, _) = watch::channel(0usize);
        let (peers_done, _) = watch::channel(HashSet::new());
        Self {
            trname: trname.into(),
            local_id: local_id.into(),
            transport,
            handler,
            counters: Arc::new(Counters::default()),
            peers_done: Arc::new(peers_done),
            registered: AtomicBool::new(false),
            open: AtomicBool::new(false),
            in_flight,
        }
    }

    pub fn trname(&self) -> &str {
        &self.trname
    }

    pub fn reg_recv(&self) -> Result<()> {
        if self.registered.load(Ordering::Acquire) {
            return Ok(());
        }
        let handler = Arc::new(MoverRecv {
            trname: self.trname.clone(),
            inner: Arc::clone(&self.handler),
            counters: Arc::clone(&self.counters),
            peers_done: Arc::clone(&self.peers_done),
        });
        self.transport.reg_recv(&self.trname, handler)?;
        self.registered.store(true, Ordering::Release);
        Ok(())
    }

    pub fn unreg_recv(&self) {
        if self.registered.swap(false, Ordering::AcqRel) {
            self.transport.unreg_recv(&self.trname);
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    pub fn close(&self) {
        if self.in_flight() > 0 {
            tracing::warn!(
                "data mover {} closing with {} sends in flight",
                self.trname,
                self.in_flight()
            );
        }
        self.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Streams one object to `peer`.
    pub async fn send(&self, peer: &NodeInfo, mut hdr: ObjHdr, body: ObjReader) -> Result<()> {
        if !self.is_open() {
            return Err(TesseraError::Transport(format!(
                "data mover {} is not open",
                self.trname
            )));
        }
        hdr.sender = self.local_id.clone();
        let size = hdr.size;

        let _in_flight = InFlight::enter(&self.in_flight);
        self.transport.send(peer, &self.trname, hdr, body).await?;

        self.counters.sent_objects.fetch_add(1, Ordering::Relaxed);
        self.counters.sent_bytes.fetch_add(size, Ordering::Relaxed);
        Ok(())
    }

    /// Resolves once no send issued through this mover is in flight.
    pub async fn quiesce(&self) {
        let mut rx = self.in_flight.subscribe();
        // the sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Tells each of `peers` that this node has nothing more to send.
    ///
    /// Every peer is tried; the first failure is returned.
    pub async fn bcast_done(&self, peers: &[NodeInfo], bucket: &Bucket) -> Result<()> {
        let mut first_err = None;
        for peer in peers {
            let mut hdr = ObjHdr::done(bucket.clone());
            hdr.sender = self.local_id.clone();
            let body: ObjReader = Box::new(tokio::io::empty());
            if let Err(error) = self.transport.send(peer, &self.trname, hdr, body).await {
                tracing::warn!("data mover {}: done to {} failed: {}", self.trname, peer.node_id, error);
                first_err.get_or_insert(error);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Resolves once every node in `peers` has reported done.
    pub async fn wait_peers_done(&self, peers: &[NodeInfo]) {
        let mut rx = self.peers_done.subscribe();
        let _ = rx
            .wait_for(|done| peers.iter().all(|peer| done.contains(&peer.node_id)))
            .await;
    }

    pub fn peers_done(&self) -> usize {
        self.peers_done.borrow().len()
    }

    pub fn stats(&self) -> DmStats {
        DmStats {
            sent_objects: self.counters.sent_objects.load(Ordering::Relaxed),
            sent_bytes: self.counters.sent_bytes.load(Ordering::Relaxed),
            recv_objects: self.counters.recv_objects.load(Ordering::Relaxed),
            recv_bytes: self.counters.recv_bytes.load(Ordering::Relaxed),
        }
    }
}

impl Drop for DataMover {
    fn drop(&mut self) {
        if self.registered.load(Ordering::Acquire) {
            tracing::warn!("data mover {} dropped while registered", self.trname);
            self.unreg_recv();
        }
    }
}

struct InFlight<'a> {
    count: &'a watch::Sender<usize>,
}

impl<'a> InFlight<'a> {
    fn enter(count: &'a watch::Sender<usize>) -> Self {
        count.send_modify(|n| *n += 1);
        Self { count }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n -= 1);
    }
}

struct MoverRecv {
    trname: String,
    inner: Arc<dyn RecvHandler>,
    counters: Arc<Counters>,
    peers_done: Arc<watch::Sender<HashSet<String>>>,
}

#[async_trait]
impl RecvHandler for MoverRecv {
    async fn recv(&self, hdr: ObjHdr, body: ObjReader) -> Result<()> {
        if hdr.is_done() {
            tracing::debug!("data mover {}: {} is done", self.trname, hdr.sender);
            self.peers_done.send_modify(|done| {
                done.insert(hdr.sender);
            });
            return Ok(());
        }
        let size = hdr.size;
        self.inner.recv(hdr, body).await?;
        self.counters.recv_objects.fetch_add(1, Ordering::Relaxed);
        self.counters.recv_bytes.fetch_add(size, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LoopbackNetwork, Opcode};
    use parking_lot::Mutex;
    use tokio::io::AsyncReadExt;

    #[derive(Default)]
    struct Collect {
        got: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl RecvHandler for Collect {
        async fn recv(&self, hdr: ObjHdr, mut body: ObjReader) -> Result<()> {
            let mut data = Vec::new();
            body.read_to_end(&mut data).await?;
            self.got.lock().push((hdr.obj_name, data));
            Ok(())
        }
    }

    fn node(id: &str) -> NodeInfo {
        NodeInfo {
            node_id: id.to_string(),
            address: String::new(),
        }
    }

    fn hdr(name: &str, size: u64) -> ObjHdr {
        ObjHdr {
            bucket: Bucket::ais("b").unwrap(),
            obj_name: name.to_string(),
            size,
            checksum: None,
            sender: String::new(),
            opcode: Opcode::Object,
        }
    }

    #[tokio::test]
    async fn test_send_between_movers() {
        let network = LoopbackNetwork::new();
        let t1 = network.transport("t1");
        let t2 = network.transport("t2");

        let sink = Arc::new(Collect::default());
        let dm1 = DataMover::new("job-1", "t1", t1.clone(), Arc::new(Collect::default()));
        let dm2 = DataMover::new("job-1", "t2", t2.clone(), sink.clone());
        dm1.reg_recv().unwrap();
        dm2.reg_recv().unwrap();

        let body: ObjReader = Box::new(std::io::Cursor::new(b"abc".to_vec()));
        assert!(dm1.send(&node("t2"), hdr("o1", 3), body).await.is_err());

        dm1.open();
        let body: ObjReader = Box::new(std::io::Cursor::new(b"abc".to_vec()));
        dm1.send(&node("t2"), hdr("o1", 3), body).await.unwrap();
        dm1.quiesce().await;

        assert_eq!(dm1.in_flight(), 0);
        assert_eq!(dm1.stats().sent_objects, 1);
        assert_eq!(dm2.stats().recv_bytes, 3);
        assert_eq!(sink.got.lock()[0], ("o1".to_string(), b"abc".to_vec()));

        dm1.close();
        dm1.unreg_recv();
        assert!(!t1.handlers().is_registered("job-1"));
        assert!(t2.handlers().is_registered("job-1"));

        drop(dm2);
        assert!(!t2.handlers().is_registered("job-1"));
    }

    #[tokio::test]
    async fn test_done_from_every_peer() {
        let network = LoopbackNetwork::new();
        let t1 = network.transport("t1");
        let t2 = network.transport("t2");
        let t3 = network.transport("t3");
        let bucket = Bucket::ais("b").unwrap();

        let sink = Arc::new(Collect::default());
        let dm1 = Arc::new(DataMover::new("job-2", "t1", t1, sink.clone()));
        let dm2 = DataMover::new("job-2", "t2", t2, Arc::new(Collect::default()));
        let dm3 = DataMover::new("job-2", "t3", t3, Arc::new(Collect::default()));
        for dm in [dm1.as_ref(), &dm2, &dm3] {
            dm.reg_recv().unwrap();
            dm.open();
        }

        let waiter = {
            let dm1 = dm1.clone();
            tokio::spawn(async move { dm1.wait_peers_done(&[node("t2"), node("t3")]).await })
        };

        let body: ObjReader = Box::new(std::io::Cursor::new(b"xy".to_vec()));
        dm2.send(&node("t1"), hdr("o2", 2), body).await.unwrap();
        dm2.bcast_done(&[node("t1"), node("t3")], &bucket).await.unwrap();
        assert_eq!(dm1.peers_done(), 1);
        assert!(!waiter.is_finished());

        dm3.bcast_done(&[node("t1"), node("t2")], &bucket).await.unwrap();
        waiter.await.unwrap();

        // done markers are neither objects nor traffic
        assert_eq!(dm1.stats().recv_objects, 1);
        assert_eq!(dm1.stats().recv_bytes, 2);
        assert_eq!(dm2.stats().sent_objects, 1);
        assert_eq!(sink.got.lock().len(), 1);
        assert_eq!(dm2.peers_done(), 1);

        dm1.unreg_recv();
        let err = dm2.bcast_done(&[node("t1"), node("t3")], &bucket).await.unwrap_err();
        assert!(matches!(err, TesseraError::NoRecvHandler(_)));
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let network = LoopbackNetwork::new();
        let t1 = network.transport("t1");
        let dm1 = DataMover::new("job-1", "t1", t1.clone(), Arc::new(Collect::default()));
        let dm2 = DataMover::new("job-1", "t1", t1.clone(), Arc::new(Collect::default()));
        dm1.reg_recv().unwrap();
        assert!(dm2.reg_recv().is_err());
        assert!(!dm2.is_registered());
    }
}
