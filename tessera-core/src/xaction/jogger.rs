use super::XactBase;
use crate::cluster::Lom;
use crate::fs::{ContentInfo, ContentRegistry, ContentResolver, Mountpath, OBJECT_TYPE};
use crate::memsys::BufferPool;
use crate::{Bucket, Result, TesseraError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Objects visited between two capacity checks.
pub const THROTTLE_NUM_OBJECTS: usize = 16;

/// What a jogger does when the per-object operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop this jogger and report the error.
    Stop,
    /// Log, count and keep walking.
    Continue,
}

#[derive(Debug, Clone)]
pub struct JoggerConfig {
    pub content_type: String,
    pub throttle: usize,
    pub policy: ErrorPolicy,
    /// Also visit files that do not decode (debris); they arrive with `spec: None`.
    pub include_unresolved: bool,
}

impl Default for JoggerConfig {
    fn default() -> Self {
        Self {
            content_type: OBJECT_TYPE.to_string(),
            throttle: THROTTLE_NUM_OBJECTS,
            policy: ErrorPolicy::Stop,
            include_unresolved: false,
        }
    }
}

/// One file found by a jogger.
#[derive(Debug)]
pub struct JogItem {
    pub fqn: PathBuf,
    pub mountpath: Arc<Mountpath>,
    pub spec: Option<(ContentResolver, ContentInfo)>,
}

impl JogItem {
    /// Object metadata for a decoded item, bound to the mountpath it was found on.
    pub fn lom(&self) -> Result<Lom> {
        let (_, info) = self.spec.as_ref().ok_or_else(|| TesseraError::InvalidFqn {
            fqn: self.fqn.display().to_string(),
            reason: "does not decode".to_string(),
        })?;
        Lom::on_mountpath(
            info.bucket.clone(),
            info.obj_name.clone(),
            Arc::clone(&self.mountpath),
        )
    }
}

/// Per-object operation applied by joggers.
#[async_trait]
pub trait JogVisitor: Send + Sync {
    async fn visit(&self, item: &JogItem, buf: &mut [u8]) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct JogReport {
    pub mountpath: PathBuf,
    pub visited: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Walks one bucket's content on one mountpath.
pub struct Jogger {
    xact: Arc<XactBase>,
    mountpath: Arc<Mountpath>,
    bucket: Bucket,
    registry: Arc<ContentRegistry>,
    buffers: Arc<BufferPool>,
    visitor: Arc<dyn JogVisitor>,
    config: JoggerConfig,
}

impl Jogger {
    pub fn new(
        xact: Arc<XactBase>,
        mountpath: Arc<Mountpath>,
        bucket: Bucket,
        registry: Arc<ContentRegistry>,
        buffers: Arc<BufferPool>,
        visitor: Arc<dyn JogVisitor>,
    ) -> Self {
        Self {
            xact,
            mountpath,
            bucket,
            registry,
            buffers,
            visitor,
            config: JoggerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: JoggerConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn run(self) -> Result<JogReport> {
        let root = self
            .mountpath
            .make_path_ct(&self.bucket, &self.config.content_type);
        let mut report = JogReport {
            mountpath: self.mountpath.path().to_path_buf(),
            ..Default::default()
        };
        let mut buf = self.buffers.alloc();
        let throttle = self.config.throttle.max(1);
        let mut processed = 0usize;

        tracing::debug!("{}: jogging {}", self.xact, root.display());

        let mut dirs = vec![root];
        while let Some(dir) = dirs.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
                Err(error) => return Err(error.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let fqn = entry.path();
                if file_type.is_dir() {
                    dirs.push(fqn);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                if self.xact.is_abort_requested() {
                    return Err(self
                        .xact
                        .aborted_error(format!("{}: abort requested", self.mountpath)));
                }

                let spec = self
                    .registry
                    .file_spec(&fqn)
                    .map(|(resolver, info)| (resolver.clone(), info));
                let wanted = match &spec {
                    Some((_, info)) => info.content_type == self.config.content_type,
                    None => self.config.include_unresolved,
                };
                if !wanted {
                    report.skipped += 1;
                    self.xact.skipped_inc();
                    continue;
                }

                let item = JogItem {
                    fqn,
                    mountpath: Arc::clone(&self.mountpath),
                    spec,
                };
                match self.visitor.visit(&item, &mut buf).await {
                    Ok(()) => report.visited += 1,
                    Err(error) if error.is_aborted() => return Err(error),
                    Err(error) if error.is_out_of_space() => {
                        return Err(self
                            .xact
                            .aborted_error(format!("{}: {}", self.mountpath, error)));
                    }
                    Err(error) => match self.config.policy {
                        ErrorPolicy::Stop => return Err(error),
                        ErrorPolicy::Continue => {
                            tracing::warn!("{}: {}: {}", self.xact, item.fqn.display(), error);
                            report.errors += 1;
                            self.xact.errors_inc();
                        }
                    },
                }

                processed += 1;
                if processed % throttle == 0 {
                    let status = self.mountpath.cap_status();
                    if let Some(error) = status.err(self.mountpath.path()) {
                        return Err(self.xact.aborted_error(error.to_string()));
                    }
                    if status.is_high() {
                        tracing::warn!(
                            "{}: {} is {}% full",
                            self.xact,
                            self.mountpath,
                            status.used_pct
                        );
                    }
                }
            }
        }

        tracing::debug!(
            "{}: {} done, visited {}, skipped {}, errors {}",
            self.xact,
            self.mountpath,
            report.visited,
            report.skipped,
            report.errors
        );
        Ok(report)
    }
}

/// The joggers of one job.
pub struct JoggerGroup {
    xact: Arc<XactBase>,
    tasks: JoinSet<Result<JogReport>>,
}

impl JoggerGroup {
    pub fn new(xact: Arc<XactBase>) -> Self {
        Self {
            xact,
            tasks: JoinSet::new(),
        }
    }

    pub fn spawn(&mut self, jogger: Jogger) {
        self.xact.jogger_started();
        self.tasks.spawn(jogger.run());
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every jogger. Returns the first error; later ones are only logged.
    pub async fn wait_done(mut self) -> Result<Vec<JogReport>> {
        let mut reports = Vec::with_capacity(self.tasks.len());
        let mut first_err: Option<TesseraError> = None;

        while let Some(joined) = self.tasks.join_next().await {
            self.xact.jogger_done();
            let result = joined.unwrap_or_else(|error| {
                Err(TesseraError::Internal(format!("jogger task failed: {}", error)))
            });
            match result {
                Ok(report) => reports.push(report),
                Err(error) if first_err.is_none() => first_err = Some(error),
                Err(error) => tracing::warn!("{}: {}", self.xact, error),
            }
        }

        match first_err {
            Some(error) => Err(error),
            None => Ok(reports),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FixedProbe, WORKFILE_TYPE};
    use crate::memsys::MemsysConfig;
    use crate::xaction::XactKind;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl JogVisitor for Recorder {
        async fn visit(&self, item: &JogItem, buf: &mut [u8]) -> Result<()> {
            assert!(!buf.is_empty());
            let lom = item.lom()?;
            if self.fail_on.as_deref() == Some(lom.obj_name()) {
                return Err(TesseraError::Internal("boom".to_string()));
            }
            self.seen.lock().push(lom.obj_name().to_string());
            Ok(())
        }
    }

    /// Fails with a disk-full error on the `fail_at`-th visit.
    struct DiskFull {
        calls: Mutex<usize>,
        fail_at: usize,
        error: fn() -> TesseraError,
    }

    #[async_trait]
    impl JogVisitor for DiskFull {
        async fn visit(&self, _item: &JogItem, _buf: &mut [u8]) -> Result<()> {
            let call = {
                let mut calls = self.calls.lock();
                *calls += 1;
                *calls
            };
            if call == self.fail_at {
                return Err((self.error)());
            }
            Ok(())
        }
    }

    async fn populate(mp: &Mountpath, bucket: &Bucket, names: &[&str]) {
        for name in names {
            let fqn = mp.make_path_fqn(bucket, OBJECT_TYPE, name);
            tokio::fs::create_dir_all(fqn.parent().unwrap()).await.unwrap();
            tokio::fs::write(&fqn, b"data").await.unwrap();
        }
    }

    fn fixture(probe: Arc<FixedProbe>) -> (tempfile::TempDir, Arc<Mountpath>, Arc<XactBase>, Arc<BufferPool>) {
        let dir = tempfile::tempdir().unwrap();
        let mp = Arc::new(Mountpath::new(dir.path()).unwrap().with_probe(probe));
        let xact = Arc::new(XactBase::new(XactKind::Resilver, vec![]));
        let buffers = BufferPool::new(MemsysConfig {
            buf_size: 64,
            max_free: 4,
        });
        (dir, mp, xact, buffers)
    }

    #[tokio::test]
    async fn test_walks_nested_objects_and_skips_foreign_content() {
        let (_dir, mp, xact, buffers) = fixture(Arc::new(FixedProbe::new(10)));
        let bck = Bucket::ais("b").unwrap();
        populate(&mp, &bck, &["a", "x/y/z", "x/w"]).await;

        // workfiles live in their own content directory and are not visited
        let wk = mp.make_path_fqn(&bck, WORKFILE_TYPE, "put.a.tie.1");
        tokio::fs::create_dir_all(wk.parent().unwrap()).await.unwrap();
        tokio::fs::write(&wk, b"").await.unwrap();

        let registry = Arc::new(ContentRegistry::with_defaults().unwrap());
        let visitor = Arc::new(Recorder::default());
        let report = Jogger::new(xact, mp, bck, registry, buffers.clone(), visitor.clone())
            .run()
            .await
            .unwrap();

        let mut seen = visitor.seen.lock().clone();
        seen.sort();
        assert_eq!(seen, vec!["a", "x/w", "x/y/z"]);
        assert_eq!(report.visited, 3);
        assert_eq!(buffers.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_capacity_breach_aborts() {
        let probe = Arc::new(FixedProbe::new(99));
        let (_dir, mp, xact, buffers) = fixture(probe);
        let bck = Bucket::ais("b").unwrap();
        let names: Vec<String> = (0..10).map(|i| format!("obj-{}", i)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        populate(&mp, &bck, &names).await;

        let registry = Arc::new(ContentRegistry::with_defaults().unwrap());
        let visitor = Arc::new(Recorder::default());
        let err = Jogger::new(xact.clone(), mp, bck, registry, buffers.clone(), visitor.clone())
            .with_config(JoggerConfig {
                throttle: 5,
                ..Default::default()
            })
            .run()
            .await
            .unwrap_err();

        assert!(err.is_aborted());
        assert!(err.to_string().contains(xact.id()));
        assert_eq!(visitor.seen.lock().len(), 5);
        assert_eq!(buffers.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_out_of_space_from_visitor_aborts() {
        let bck = Bucket::ais("b").unwrap();
        let registry = Arc::new(ContentRegistry::with_defaults().unwrap());
        let names: Vec<String> = (0..8).map(|i| format!("obj-{}", i)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();

        let errors: [fn() -> TesseraError; 2] = [
            || TesseraError::OutOfSpace("mp[/data] is 97% full".to_string()),
            || std::io::Error::from_raw_os_error(nix::errno::Errno::ENOSPC as i32).into(),
        ];
        for error in errors {
            let (_dir, mp, xact, buffers) = fixture(Arc::new(FixedProbe::new(10)));
            populate(&mp, &bck, &names).await;
            let visitor = Arc::new(DiskFull {
                calls: Mutex::new(0),
                fail_at: 3,
                error,
            });

            // the policy covers ordinary errors only
            let err = Jogger::new(
                xact.clone(),
                mp,
                bck.clone(),
                registry.clone(),
                buffers.clone(),
                visitor.clone(),
            )
            .with_config(JoggerConfig {
                policy: ErrorPolicy::Continue,
                throttle: 100,
                ..Default::default()
            })
            .run()
            .await
            .unwrap_err();

            assert!(err.is_aborted(), "{}", err);
            assert!(err.to_string().contains(&format!("resilver({:?})", xact.id())), "{}", err);
            assert_eq!(*visitor.calls.lock(), 3);
            assert_eq!(xact.stats().errors, 0);
            assert_eq!(buffers.outstanding(), 0);
        }
    }

    #[tokio::test]
    async fn test_error_policy() {
        let bck = Bucket::ais("b").unwrap();
        let registry = Arc::new(ContentRegistry::with_defaults().unwrap());

        for (policy, expect_err) in [(ErrorPolicy::Stop, true), (ErrorPolicy::Continue, false)] {
            let (_dir, mp, xact, buffers) = fixture(Arc::new(FixedProbe::new(10)));
            populate(&mp, &bck, &["bad"]).await;
            let visitor = Arc::new(Recorder {
                fail_on: Some("bad".to_string()),
                ..Default::default()
            });
            let result = Jogger::new(
                xact.clone(),
                mp,
                bck.clone(),
                registry.clone(),
                buffers,
                visitor,
            )
            .with_config(JoggerConfig {
                policy,
                ..Default::default()
            })
            .run()
            .await;

            assert_eq!(result.is_err(), expect_err);
            if !expect_err {
                assert_eq!(result.unwrap().errors, 1);
                assert_eq!(xact.stats().errors, 1);
            }
        }
    }

    #[tokio::test]
    async fn test_group_reports_first_error() {
        let bck = Bucket::ais("b").unwrap();
        let registry = Arc::new(ContentRegistry::with_defaults().unwrap());
        let (_d1, mp1, xact, buffers) = fixture(Arc::new(FixedProbe::new(10)));
        let (_d2, mp2, _, _) = fixture(Arc::new(FixedProbe::new(10)));
        populate(&mp1, &bck, &["ok"]).await;
        populate(&mp2, &bck, &["bad"]).await;

        let visitor = Arc::new(Recorder {
            fail_on: Some("bad".to_string()),
            ..Default::default()
        });
        let mut group = JoggerGroup::new(xact.clone());
        for mp in [mp1, mp2] {
            group.spawn(Jogger::new(
                xact.clone(),
                mp,
                bck.clone(),
                registry.clone(),
                buffers.clone(),
                visitor.clone(),
            ));
        }
        assert_eq!(group.len(), 2);

        let err = group.wait_done().await.unwrap_err();
        assert!(matches!(err, TesseraError::Internal(_)));
        assert_eq!(xact.joggers(), 2);
        assert_eq!(xact.joggers_done(), 2);
        assert_eq!(visitor.seen.lock().as_slice(), ["ok"]);
    }
}
