use super::target::{CopyObjectParams, PromoteFileParams, PutObjectParams, RecvType, Target};
use super::{Lom, Smap};
use crate::fs::io::{finalize, remove_quietly, write_file};
use crate::fs::{ContentRegistry, Mountpaths, WORKFILE_TYPE};
use crate::memsys::BufferPool;
use crate::transport::{ObjHdr, Opcode, Transport};
use crate::{Result, TesseraError};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Target backed by the local mountpaths of this node.
pub struct LocalTarget {
    smap: Smap,
    mountpaths: Arc<Mountpaths>,
    registry: Arc<ContentRegistry>,
    buffers: Arc<BufferPool>,
    transport: Arc<dyn Transport>,
}

impl LocalTarget {
    pub fn new(
        smap: Smap,
        mountpaths: Arc<Mountpaths>,
        registry: Arc<ContentRegistry>,
        buffers: Arc<BufferPool>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            smap,
            mountpaths,
            registry,
            buffers,
            transport,
        }
    }

    /// Writes `reader` into a fresh workfile for `lom`, verifies it and renames
    /// it into place. The workfile never survives a failure.
    async fn write_object<R>(
        &self,
        lom: &mut Lom,
        reader: &mut R,
        recv_type: RecvType,
        expected: Option<&str>,
        buf: &mut [u8],
    ) -> Result<()>
    where
        R: tokio::io::AsyncRead + Unpin + Send + ?Sized,
    {
        let workfqn = self
            .registry
            .gen_fqn(&*lom, WORKFILE_TYPE, recv_type.workfile_prefix())?;

        let written = match write_file(reader, &workfqn, buf).await {
            Ok(written) => written,
            Err(error) => {
                remove_quietly(&workfqn).await;
                return Err(error);
            }
        };

        if let Some(expected) = expected {
            if expected != written.checksum {
                remove_quietly(&workfqn).await;
                return Err(TesseraError::HashMismatch {
                    expected: expected.to_string(),
                    actual: written.checksum,
                });
            }
        }

        if let Err(error) = finalize(&workfqn, lom.fqn()).await {
            remove_quietly(&workfqn).await;
            return Err(error);
        }

        lom.load().await?;
        lom.set_checksum(written.checksum);
        Ok(())
    }

    fn check_capacity(&self, lom: &Lom) -> Result<()> {
        match lom.mountpath().cap_status().err(lom.mountpath().path()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Target for LocalTarget {
    fn smap(&self) -> &Smap {
        &self.smap
    }

    fn mountpaths(&self) -> &Arc<Mountpaths> {
        &self.mountpaths
    }

    fn registry(&self) -> &Arc<ContentRegistry> {
        &self.registry
    }

    fn buffers(&self) -> &Arc<BufferPool> {
        &self.buffers
    }

    fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    async fn get_object(&self, lom: &mut Lom, writer: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64> {
        lom.load().await?;
        let mut file = fs::File::open(lom.fqn()).await?;
        let mut buf = self.buffers.alloc();
        let mut total = 0u64;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;
            total += n as u64;
        }
        writer.flush().await?;
        Ok(total)
    }

    async fn put_object(&self, lom: &mut Lom, params: PutObjectParams) -> Result<()> {
        self.check_capacity(lom)?;
        let PutObjectParams {
            mut reader,
            recv_type,
            checksum,
        } = params;
        let mut buf = self.buffers.alloc();
        self.write_object(lom, &mut reader, recv_type, checksum.as_deref(), &mut buf)
            .await?;
        tracing::debug!("put {} ({} bytes, {:?})", lom, lom.size(), recv_type);
        Ok(())
    }

    async fn delete_object(&self, lom: &Lom) -> Result<()> {
        match fs::remove_file(lom.fqn()).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(TesseraError::ObjectNotFound(lom.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn evict_object(&self, lom: &Lom) -> Result<()> {
        if !lom.bucket().is_remote() {
            return Err(TesseraError::InvalidRequest(format!(
                "cannot evict {}: bucket {} is not remote",
                lom,
                lom.bucket()
            )));
        }
        self.delete_object(lom).await?;
        tracing::debug!("evicted {}", lom);
        Ok(())
    }

    async fn copy_object(&self, lom: &mut Lom, params: CopyObjectParams<'_>) -> Result<bool> {
        let CopyObjectParams { bck_to, buf, dm } = params;
        lom.load().await?;

        let uname = bck_to.uname(lom.obj_name());
        let dst_node = self.smap.hrw_node(&uname);
        if !self.smap.is_local(dst_node) {
            let dm = dm.ok_or_else(|| {
                TesseraError::Internal(format!(
                    "{} belongs to {} but no data mover was supplied",
                    uname, dst_node.node_id
                ))
            })?;
            let checksum = source_checksum(lom, buf).await?;
            let hdr = ObjHdr {
                bucket: bck_to.clone(),
                obj_name: lom.obj_name().to_string(),
                size: lom.size(),
                checksum: Some(checksum),
                sender: String::new(),
                opcode: Opcode::Object,
            };
            let file = fs::File::open(lom.fqn()).await?;
            dm.send(dst_node, hdr, Box::new(file)).await?;
            return Ok(true);
        }

        let mut dst = Lom::new(bck_to.clone(), lom.obj_name(), &self.mountpaths.snapshot())?;
        if dst.fqn() == lom.fqn() {
            return Ok(false);
        }

        let expected = source_checksum(lom, buf).await?;
        let mut src = fs::File::open(lom.fqn()).await?;
        self.write_object(&mut dst, &mut src, RecvType::Copied, Some(&expected), buf)
            .await?;
        Ok(true)
    }

    async fn promote_file(&self, params: PromoteFileParams) -> Result<Lom> {
        let PromoteFileParams {
            src,
            bucket,
            obj_name,
            overwrite,
            keep_orig,
        } = params;

        let meta = fs::metadata(&src).await?;
        if !meta.is_file() {
            return Err(TesseraError::InvalidRequest(format!(
                "cannot promote {}: not a regular file",
                src.display()
            )));
        }

        let mut lom = self.lom(bucket, &obj_name)?;
        if !overwrite && lom.exists().await {
            return Err(TesseraError::ObjectExists(lom.to_string()));
        }
        self.check_capacity(&lom)?;

        let mut buf = self.buffers.alloc();
        if !keep_orig && try_move(&src, lom.fqn()).await {
            lom.load().await?;
            lom.compute_checksum(&mut buf).await?;
        } else {
            let mut file = fs::File::open(&src).await?;
            self.write_object(&mut lom, &mut file, RecvType::Promoted, None, &mut buf)
                .await?;
            if !keep_orig {
                fs::remove_file(&src).await?;
            }
        }

        tracing::info!("promoted {} => {}", src.display(), lom);
        Ok(lom)
    }
}

/// Renames `src` into `dst` when both sit on the same filesystem.
async fn try_move(src: &Path, dst: &Path) -> bool {
    if let Some(parent) = dst.parent() {
        if fs::create_dir_all(parent).await.is_err() {
            return false;
        }
    }
    fs::rename(src, dst).await.is_ok()
}

/// Checksum the copy is verified against. Computed from the file when
/// the metadata does not carry one yet.
async fn source_checksum(lom: &mut Lom, buf: &mut [u8]) -> Result<String> {
    match lom.checksum() {
        Some(checksum) => Ok(checksum.to_string()),
        None => lom.compute_checksum(buf).await,
    }
}
