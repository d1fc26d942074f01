use super::capacity::{CapStatus, CapacityConfig, CapacityProbe, StatvfsProbe};
use super::fqn::{self, PROVIDER_MARKER};
use crate::{Bucket, Result, TesseraError};
use parking_lot::RwLock;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// A storage root, usually one per physical disk.
pub struct Mountpath {
    path: PathBuf,
    capacity: CapacityConfig,
    probe: Arc<dyn CapacityProbe>,
    last_used_pct: AtomicU8,
}

impl Mountpath {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(TesseraError::Config(format!(
                "mountpath must be absolute: {}",
                path.display()
            )));
        }
        for component in path.components() {
            if let Component::Normal(name) = component {
                if name.to_string_lossy().starts_with(PROVIDER_MARKER) {
                    return Err(TesseraError::Config(format!(
                        "mountpath {} cannot contain a component starting with {:?}",
                        path.display(),
                        PROVIDER_MARKER
                    )));
                }
            }
            if matches!(component, Component::ParentDir | Component::CurDir) {
                return Err(TesseraError::Config(format!(
                    "mountpath must be normalized: {}",
                    path.display()
                )));
            }
        }

        Ok(Self {
            path,
            capacity: CapacityConfig::default(),
            probe: Arc::new(StatvfsProbe),
            last_used_pct: AtomicU8::new(0),
        })
    }

    pub fn with_capacity(mut self, capacity: CapacityConfig) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn CapacityProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn make_path_bck(&self, bucket: &Bucket) -> PathBuf {
        fqn::make_path_bck(&self.path, bucket)
    }

    pub fn make_path_ct(&self, bucket: &Bucket, content_type: &str) -> PathBuf {
        fqn::make_path_ct(&self.path, bucket, content_type)
    }

    pub fn make_path_fqn(&self, bucket: &Bucket, content_type: &str, obj_name: &str) -> PathBuf {
        fqn::make_path_fqn(&self.path, bucket, content_type, obj_name)
    }

    /// Probes current usage. A failing probe is logged and reported as the
    /// last known value.
    pub fn cap_status(&self) -> CapStatus {
        let used_pct = match self.probe.used_pct(&self.path) {
            Ok(pct) => {
                self.last_used_pct.store(pct, Ordering::Relaxed);
                pct
            }
            Err(error) => {
                tracing::warn!("capacity probe failed for {}: {}", self.path.display(), error);
                self.last_used_pct.load(Ordering::Relaxed)
            }
        };
        CapStatus {
            used_pct,
            high_wm: self.capacity.high_wm,
            oos: self.capacity.oos,
        }
    }

    pub fn last_used_pct(&self) -> u8 {
        self.last_used_pct.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Mountpath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mountpath")
            .field("path", &self.path)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl fmt::Display for Mountpath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mp[{}]", self.path.display())
    }
}

/// The ordered set of available mountpaths.
///
/// Jobs never iterate the live set; they take a [`Mountpaths::snapshot`] at
/// start and keep it for their whole run.
#[derive(Default)]
pub struct Mountpaths {
    available: RwLock<Arc<Vec<Arc<Mountpath>>>>,
}

impl Mountpaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, mountpath: Mountpath) -> Result<Arc<Mountpath>> {
        let mut available = self.available.write();
        let overlaps = available.iter().any(|existing| {
            existing.path().starts_with(mountpath.path())
                || mountpath.path().starts_with(existing.path())
        });
        if overlaps {
            return Err(TesseraError::Config(format!(
                "mountpath {} overlaps an existing mountpath",
                mountpath.path().display()
            )));
        }

        let mountpath = Arc::new(mountpath);
        let mut next = available.as_ref().clone();
        next.push(Arc::clone(&mountpath));
        *available = Arc::new(next);
        tracing::info!("added {}", mountpath);
        Ok(mountpath)
    }

    pub fn remove(&self, path: &Path) -> Option<Arc<Mountpath>> {
        let mut available = self.available.write();
        let idx = available.iter().position(|mp| mp.path() == path)?;
        let mut next = available.as_ref().clone();
        let removed = next.remove(idx);
        *available = Arc::new(next);
        tracing::info!("removed {}", removed);
        Some(removed)
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<Mountpath>>> {
        Arc::clone(&self.available.read())
    }

    pub fn len(&self) -> usize {
        self.available.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
