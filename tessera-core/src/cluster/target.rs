use super::{Lom, NodeInfo, Smap};
use crate::fs::{ContentRegistry, Mountpaths, WORKFILE_COPY, WORKFILE_MIGRATE, WORKFILE_PROMOTE, WORKFILE_PUT, WORKFILE_RECV};
use crate::memsys::BufferPool;
use crate::transport::{DataMover, ObjReader, Transport};
use crate::{Bucket, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWrite;

/// Why an object is being written; selects the workfile prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvType {
    /// Client PUT.
    Regular,
    /// Received from a peer during a copy or rebalance.
    Migrated,
    /// Copied between local mountpaths.
    Copied,
    Promoted,
}

impl RecvType {
    pub fn workfile_prefix(&self) -> &'static str {
        match self {
            RecvType::Regular => WORKFILE_PUT,
            RecvType::Migrated => WORKFILE_RECV,
            RecvType::Copied => WORKFILE_COPY,
            RecvType::Promoted => WORKFILE_PROMOTE,
        }
    }
}

pub struct PutObjectParams {
    pub reader: ObjReader,
    pub recv_type: RecvType,
    /// Expected SHA-256 (hex) of the payload, verified before the object becomes visible.
    pub checksum: Option<String>,
}

pub struct CopyObjectParams<'a> {
    pub bck_to: &'a Bucket,
    /// Scratch buffer owned by the calling jogger.
    pub buf: &'a mut [u8],
    /// Required when the destination lands on another node.
    pub dm: Option<&'a DataMover>,
}

#[derive(Debug, Clone)]
pub struct PromoteFileParams {
    pub src: PathBuf,
    pub bucket: Bucket,
    pub obj_name: String,
    pub overwrite: bool,
    /// Copy instead of move.
    pub keep_orig: bool,
}

/// Storage target as seen by background jobs.
#[async_trait]
pub trait Target: Send + Sync {
    fn smap(&self) -> &Smap;

    fn node(&self) -> &NodeInfo {
        self.smap().local()
    }

    fn mountpaths(&self) -> &Arc<Mountpaths>;

    fn registry(&self) -> &Arc<ContentRegistry>;

    fn buffers(&self) -> &Arc<BufferPool>;

    fn transport(&self) -> &Arc<dyn Transport>;

    /// Object metadata placed on the current mountpath set.
    fn lom(&self, bucket: Bucket, obj_name: &str) -> Result<Lom> {
        Lom::new(bucket, obj_name, &self.mountpaths().snapshot())
    }

    /// Streams the object into `writer`; returns the number of bytes written.
    async fn get_object(&self, lom: &mut Lom, writer: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64>;

    async fn put_object(&self, lom: &mut Lom, params: PutObjectParams) -> Result<()>;

    async fn delete_object(&self, lom: &Lom) -> Result<()>;

    /// Drops the local copy of an object from a remote-backed bucket.
    async fn evict_object(&self, lom: &Lom) -> Result<()>;

    /// Copies `lom` into `params.bck_to`. Returns false when there was
    /// nothing to copy because source and destination coincide.
    async fn copy_object(&self, lom: &mut Lom, params: CopyObjectParams<'_>) -> Result<bool>;

    async fn promote_file(&self, params: PromoteFileParams) -> Result<Lom>;
}
