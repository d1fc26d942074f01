use super::jogger::{ErrorPolicy, JogItem, JogVisitor, Jogger, JoggerConfig, JoggerGroup};
use super::{XactBase, XactConfig, XactKind};
use crate::cluster::Target;
use crate::fs::WORKFILE_TYPE;
use crate::{Bucket, Result, TesseraError};
use async_trait::async_trait;
use std::sync::Arc;

/// Removes workfiles orphaned by a previous process, plus anything under the
/// workfile directory that does not decode at all.
pub struct XactCleanup {
    base: Arc<XactBase>,
    target: Arc<dyn Target>,
    bucket: Bucket,
    config: XactConfig,
}

impl XactCleanup {
    pub fn new(target: Arc<dyn Target>, bucket: Bucket, config: XactConfig) -> Result<Self> {
        bucket.validate()?;
        Ok(Self {
            base: Arc::new(XactBase::new(XactKind::Cleanup, vec![bucket.clone()])),
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

        let visitor: Arc<dyn JogVisitor> = Arc::new(CleanupVisitor {
            xact: Arc::clone(&self.base),
            target: Arc::clone(&self.target),
        });
        let jogger_config = JoggerConfig {
            content_type: WORKFILE_TYPE.to_string(),
            throttle: self.config.throttle_objects,
            policy: ErrorPolicy::Continue,
            include_unresolved: true,
        };

        let mut group = JoggerGroup::new(Arc::clone(&self.base));
        for mountpath in self.target.mountpaths().snapshot().iter() {
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

        let err = group.wait_done().await.err();
        self.base.finish(err.as_ref());
        match err {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

struct CleanupVisitor {
    xact: Arc<XactBase>,
    target: Arc<dyn Target>,
}

#[async_trait]
impl JogVisitor for CleanupVisitor {
    async fn visit(&self, item: &JogItem, _buf: &mut [u8]) -> Result<()> {
        if item.spec.is_some() {
            let (evict, old) = self.target.registry().perm_to_evict(&item.fqn);
            if !evict || !old {
                return Ok(());
            }
        }

        let removed = async {
            let size = tokio::fs::metadata(&item.fqn).await?.len();
            tokio::fs::remove_file(&item.fqn).await?;
            Ok::<_, std::io::Error>(size)
        }
        .await;
        let size = match removed {
            Ok(size) => size,
            // raced with the writer finishing its rename
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(error.into()),
        };
        tracing::debug!("{}: removed {}", self.xact, item.fqn.display());
        self.xact.objects_inc();
        self.xact.bytes_add(size);
        Ok(())
    }
}
