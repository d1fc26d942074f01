use super::jogger::{ErrorPolicy, JogItem, JogVisitor, Jogger, JoggerConfig, JoggerGroup};
use super::{XactBase, XactConfig, XactKind};
use crate::cluster::Target;
use crate::cluster::hrw::hrw_mountpath;
use crate::fs::io::{finalize, remove_quietly, write_file};
use crate::fs::{Mountpath, OBJECT_TYPE, WORKFILE_MIGRATE, WORKFILE_TYPE};
use crate::{Bucket, Result, TesseraError};
use async_trait::async_trait;
use std::sync::Arc;

/// Moves a bucket's objects to the mountpaths HRW assigns them, e.g. after a
/// mountpath was added or removed.
pub struct XactResilver {
    base: Arc<XactBase>,
    target: Arc<dyn Target>,
    bucket: Bucket,
    config: XactConfig,
}

impl XactResilver {
    pub fn new(target: Arc<dyn Target>, bucket: Bucket, config: XactConfig) -> Result<Self> {
        bucket.validate()?;
        Ok(Self {
            base: Arc::new(XactBase::new(XactKind::Resilver, vec![bucket.clone()])),
            target,
            bucket,
            config,
        })
    }

    pub fn base(&self) -> &Arc<XactBase> {
        &self.base
    }

    pub async fn run(self) -> Result<()> {
        if !self.base.start() {
            return Err(TesseraError::InvalidRequest(format!("{} already started", self.base)));
        }

        let mountpaths = self.target.mountpaths().snapshot();
        let visitor: Arc<dyn JogVisitor> = Arc::new(ResilverVisitor {
            xact: Arc::clone(&self.base),
            target: Arc::clone(&self.target),
            mountpaths: mountpaths.to_vec(),
        });
        let jogger_config = JoggerConfig {
            content_type: OBJECT_TYPE.to_string(),
            throttle: self.config.throttle_objects,
            policy: ErrorPolicy::Continue,
            include_unresolved: false,
        };

        let mut group = JoggerGroup::new(Arc::clone(&self.base));
        for mountpath in mountpaths.iter() {
            group.spawn(
                Jogger::new(
                    Arc::clone(&self.base),
                    Arc::clone(mountpath),
                    self.bucket.clone(),
                    Arc::clone(self.target.registry()),
                    Arc::clone(self.target.buffers()),
                    Arc::clone(&visitor),
                )
                .with_config(jogger_config.clone()),
            );
        }

        let result = group.wait_done().await;
        let err = result.err();
        self.base.finish(err.as_ref());
        match err {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

struct ResilverVisitor {
    xact: Arc<XactBase>,
    target: Arc<dyn Target>,
    mountpaths: Vec<Arc<Mountpath>>,
}

#[async_trait]
impl JogVisitor for ResilverVisitor {
    async fn visit(&self, item: &JogItem, buf: &mut [u8]) -> Result<()> {
        let mut lom = item.lom()?;
        let Some(dst_mp) = hrw_mountpath(&lom.uname(), &self.mountpaths).cloned() else {
            return Ok(());
        };
        if dst_mp.path() == lom.mountpath().path() {
            return Ok(());
        }
        if !self.target.registry().perm_to_move(&item.fqn) {
            self.xact.skipped_inc();
            return Ok(());
        }

        lom.load().await?;
        let mut dst = lom.clone();
        dst.relocate(dst_mp);

        let workfqn = self
            .target
            .registry()
            .gen_fqn(&dst, WORKFILE_TYPE, WORKFILE_MIGRATE)?;
        let mut src = tokio::fs::File::open(lom.fqn()).await?;
        let written = match write_file(&mut src, &workfqn, buf).await {
            Ok(written) => written,
            Err(error) => {
                remove_quietly(&workfqn).await;
                return Err(error);
            }
        };
        drop(src);
        if let Err(error) = finalize(&workfqn, dst.fqn()).await {
            remove_quietly(&workfqn).await;
            return Err(error);
        }
        tokio::fs::remove_file(lom.fqn()).await?;

        tracing::debug!("{}: moved {} to {}", self.xact, lom, dst.mountpath());
        self.xact.objects_inc();
        self.xact.bytes_add(written.size);
        Ok(())
    }
}
