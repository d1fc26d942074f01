use super::jogger::{ErrorPolicy, JogItem, JogVisitor, Jogger, JoggerConfig, JoggerGroup};
use super::{XactBase, XactConfig, XactKind};
use crate::cluster::{CopyObjectParams, NodeInfo, PutObjectParams, RecvType, Target};
use crate::fs::OBJECT_TYPE;
use crate::transport::{DataMover, ObjHdr, ObjReader, RecvHandler};
use crate::{Bucket, Result, TesseraError};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Copies every object of one bucket into another, across mountpaths and nodes.
///
/// Construction registers the job's receive handler, so peers taking part in
/// the same copy must construct their job before any node starts sending.
/// The handler stays registered until every other node in the cluster map has
/// reported done, or an abort is requested.
pub struct XactBckCopy {
    base: Arc<XactBase>,
    target: Arc<dyn Target>,
    bck_from: Bucket,
    bck_to: Bucket,
    dm: Arc<DataMover>,
    config: XactConfig,
}

impl XactBckCopy {
    pub fn new(target: Arc<dyn Target>, bck_from: Bucket, bck_to: Bucket, config: XactConfig) -> Result<Self> {
        let base = Arc::new(XactBase::new(
            XactKind::CopyBucket,
            vec![bck_from.clone(), bck_to.clone()],
        ));
        Self::with_base(target, base, bck_from, bck_to, config)
    }

    /// Builds the job under a caller-chosen base, e.g. to share one job id across nodes.
    pub fn with_base(
        target: Arc<dyn Target>,
        base: Arc<XactBase>,
        bck_from: Bucket,
        bck_to: Bucket,
        config: XactConfig,
    ) -> Result<Self> {
        if bck_from == bck_to {
            return Err(TesseraError::InvalidRequest(format!(
                "cannot copy {} onto itself",
                bck_from
            )));
        }
        bck_from.validate()?;
        bck_to.validate()?;

        let recv = Arc::new(CopyRecv {
            target: Arc::clone(&target),
        });
        let dm = Arc::new(DataMover::new(
            base.id(),
            target.node().node_id.clone(),
            Arc::clone(target.transport()),
            recv,
        ));
        dm.reg_recv()?;

        Ok(Self {
            base,
            target,
            bck_from,
            bck_to,
            dm,
            config,
        })
    }

    pub fn base(&self) -> &Arc<XactBase> {
        &self.base
    }

    pub async fn run(self) -> Result<()> {
        if !self.base.start() {
            return Err(TesseraError::InvalidRequest(format!("{} already started", self)));
        }
        self.dm.open();

        let visitor: Arc<dyn JogVisitor> = Arc::new(CopyVisitor {
            xact: Arc::clone(&self.base),
            target: Arc::clone(&self.target),
            bck_to: self.bck_to.clone(),
            dm: Arc::clone(&self.dm),
        });
        let jogger_config = JoggerConfig {
            content_type: OBJECT_TYPE.to_string(),
            throttle: self.config.throttle_objects,
            policy: ErrorPolicy::Stop,
            include_unresolved: false,
        };

        let mut group = JoggerGroup::new(Arc::clone(&self.base));
        for mountpath in self.target.mountpaths().snapshot().iter() {
            let jogger = Jogger::new(
                Arc::clone(&self.base),
                Arc::clone(mountpath),
                self.bck_from.clone(),
                Arc::clone(self.target.registry()),
                Arc::clone(self.target.buffers()),
                Arc::clone(&visitor),
            )
            .with_config(jogger_config.clone());
            group.spawn(jogger);
        }
        tracing::info!("{}: started {} joggers", self, group.len());

        let mut result = group.wait_done().await.map(|_| ());

        self.dm.quiesce().await;
        let smap = self.target.smap();
        let peers: Vec<NodeInfo> = smap
            .nodes()
            .iter()
            .filter(|node| node.node_id != smap.local_id())
            .cloned()
            .collect();
        // peers wait on this even when the local walk failed
        if let Err(error) = self.dm.bcast_done(&peers, &self.bck_to).await {
            tracing::warn!("{}: failed to notify peers: {}", self, error);
        }
        self.dm.close();

        tokio::select! {
            biased;
            _ = self.dm.wait_peers_done(&peers) => {}
            _ = self.base.wait_abort_requested() => {
                tracing::warn!(
                    "{}: abort requested with {} of {} peers done",
                    self,
                    self.dm.peers_done(),
                    peers.len()
                );
                if result.is_ok() {
                    result = Err(self.base.aborted_error("abort requested while waiting for peers"));
                }
            }
        }
        self.dm.unreg_recv();
        self.base.add_transport_stats(self.dm.stats());

        match result {
            Ok(()) => {
                self.base.finish(None);
                Ok(())
            }
            Err(error) => {
                self.base.finish(Some(&error));
                Err(error)
            }
        }
    }
}

impl fmt::Display for XactBckCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] {} <= {}", self.base.kind(), self.base.id(), self.bck_to, self.bck_from)
    }
}

struct CopyVisitor {
    xact: Arc<XactBase>,
    target: Arc<dyn Target>,
    bck_to: Bucket,
    dm: Arc<DataMover>,
}

#[async_trait]
impl JogVisitor for CopyVisitor {
    async fn visit(&self, item: &JogItem, buf: &mut [u8]) -> Result<()> {
        let mut lom = item.lom()?;
        let params = CopyObjectParams {
            bck_to: &self.bck_to,
            buf,
            dm: Some(self.dm.as_ref()),
        };
        if self.target.copy_object(&mut lom, params).await? {
            self.xact.objects_inc();
            self.xact.bytes_add(lom.size());
        }
        Ok(())
    }
}

/// Stores objects peers send for this job.
struct CopyRecv {
    target: Arc<dyn Target>,
}

#[async_trait]
impl RecvHandler for CopyRecv {
    async fn recv(&self, hdr: ObjHdr, body: ObjReader) -> Result<()> {
        let mut lom = self.target.lom(hdr.bucket, &hdr.obj_name)?;
        self.target
            .put_object(
                &mut lom,
                PutObjectParams {
                    reader: body,
                    recv_type: RecvType::Migrated,
                    checksum: hdr.checksum,
                },
            )
            .await?;
        tracing::debug!("received {} from {}", lom, hdr.sender);
        Ok(())
    }
}
