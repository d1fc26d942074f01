use super::hrw::hrw_mountpath;
use crate::fs::{self, FqnParts, Mountpath, OBJECT_TYPE};
use crate::{Bucket, Result, TesseraError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Logical object metadata: identity plus what is known about the stored copy.
#[derive(Clone)]
pub struct Lom {
    bucket: Bucket,
    obj_name: String,
    mountpath: Arc<Mountpath>,
    fqn: PathBuf,
    size: u64,
    checksum: Option<String>,
    loaded: bool,
}

impl Lom {
    /// Places the object on its HRW mountpath among `mountpaths`.
    pub fn new(bucket: Bucket, obj_name: impl Into<String>, mountpaths: &[Arc<Mountpath>]) -> Result<Self> {
        let obj_name = obj_name.into();
        let mountpath = hrw_mountpath(&bucket.uname(&obj_name), mountpaths)
            .cloned()
            .ok_or(TesseraError::NoMountpaths)?;
        Self::on_mountpath(bucket, obj_name, mountpath)
    }

    /// Binds the object to a specific mountpath, wherever HRW would put it.
    pub fn on_mountpath(bucket: Bucket, obj_name: impl Into<String>, mountpath: Arc<Mountpath>) -> Result<Self> {
        let obj_name = obj_name.into();
        fs::validate_obj_name(&obj_name)?;
        bucket.validate()?;
        let fqn = mountpath.make_path_fqn(&bucket, OBJECT_TYPE, &obj_name);
        Ok(Self {
            bucket,
            obj_name,
            mountpath,
            fqn,
            size: 0,
            checksum: None,
            loaded: false,
        })
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    pub fn obj_name(&self) -> &str {
        &self.obj_name
    }

    pub fn mountpath(&self) -> &Arc<Mountpath> {
        &self.mountpath
    }

    pub fn fqn(&self) -> &Path {
        &self.fqn
    }

    pub fn uname(&self) -> String {
        self.bucket.uname(&self.obj_name)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub fn set_checksum(&mut self, checksum: impl Into<String>) {
        self.checksum = Some(checksum.into());
    }

    /// Refreshes size from the stored file.
    pub async fn load(&mut self) -> Result<()> {
        let meta = match tokio::fs::metadata(&self.fqn).await {
            Ok(meta) => meta,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(TesseraError::ObjectNotFound(self.to_string()));
            }
            Err(error) => return Err(error.into()),
        };
        if !meta.is_file() {
            return Err(TesseraError::ObjectNotFound(self.to_string()));
        }
        if self.loaded && self.size != meta.len() {
            self.checksum = None;
        }
        self.size = meta.len();
        self.loaded = true;
        Ok(())
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::metadata(&self.fqn)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    pub async fn compute_checksum(&mut self, buf: &mut [u8]) -> Result<String> {
        let checksum = fs::io::checksum_file(&self.fqn, buf).await?;
        self.checksum = Some(checksum.clone());
        Ok(checksum)
    }

    pub fn is_misplaced(&self, mountpaths: &[Arc<Mountpath>]) -> bool {
        match hrw_mountpath(&self.uname(), mountpaths) {
            Some(mp) => mp.path() != self.mountpath.path(),
            None => false,
        }
    }

    /// Points the metadata at a new mountpath after the file was moved there.
    pub fn relocate(&mut self, mountpath: Arc<Mountpath>) {
        self.fqn = mountpath.make_path_fqn(&self.bucket, OBJECT_TYPE, &self.obj_name);
        self.mountpath = mountpath;
    }
}

impl FqnParts for Lom {
    fn obj_name(&self) -> &str {
        &self.obj_name
    }

    fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    fn mountpath(&self) -> &Mountpath {
        &self.mountpath
    }
}

impl fmt::Display for Lom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.obj_name)
    }
}

impl fmt::Debug for Lom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lom")
            .field("uname", &self.uname())
            .field("fqn", &self.fqn)
            .field("size", &self.size)
            .field("checksum", &self.checksum)
            .finish()
    }
}
