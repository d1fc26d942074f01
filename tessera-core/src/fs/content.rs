//! Content types and the registry that resolves them.
//!
//! Besides objects a mountpath holds workfiles (partially written data) and
//! erasure-coded slices and metadata. Every kind of content lives under its own
//! `%<type>` directory, and the resolver registered for the type decides how
//! unique basenames are generated and parsed, and which background services
//! may move, evict or otherwise process the file.

use super::fqn::{self, ParsedFqn};
use super::mountpath::Mountpath;
use crate::{Bucket, Result, TesseraError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CONTENT_TYPE_LEN: usize = 2;

pub const OBJECT_TYPE: &str = "ob";
pub const WORKFILE_TYPE: &str = "wk";
pub const EC_SLICE_TYPE: &str = "ec";
pub const EC_META_TYPE: &str = "mt";

pub const WORKFILE_PUT: &str = "put";
pub const WORKFILE_COPY: &str = "copy";
pub const WORKFILE_RECV: &str = "recv";
pub const WORKFILE_MIGRATE: &str = "mig";
pub const WORKFILE_PROMOTE: &str = "prm";

/// Closed set of content resolvers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentResolver {
    Object,
    /// `pid` is the process the resolver considers "current"; workfiles
    /// carrying any other pid are leftovers of a dead process.
    Workfile { pid: u32 },
    EcSlice,
    EcMeta,
}

impl ContentResolver {
    pub fn workfile() -> Self {
        ContentResolver::Workfile {
            pid: std::process::id(),
        }
    }

    /// Rebalance and resilver may relocate the file.
    pub fn perm_to_move(&self) -> bool {
        !matches!(self, ContentResolver::Workfile { .. })
    }

    /// Space cleanup may delete the file.
    pub fn perm_to_evict(&self) -> bool {
        true
    }

    /// The file may be checksummed, listed or otherwise interpreted.
    pub fn perm_to_process(&self) -> bool {
        matches!(self, ContentResolver::Object)
    }

    /// Generates a unique name for `base`; `prefix` is a caller-defined marker.
    pub fn gen_unique_name(&self, base: &str, prefix: &str) -> String {
        match self {
            ContentResolver::Workfile { pid } => {
                let (dir, fname) = match base.rfind('/') {
                    Some(idx) => base.split_at(idx + 1),
                    None => ("", base),
                };
                format!("{}{}.{}.{}.{:x}", dir, prefix, fname, gen_tie(), pid)
            }
            _ => base.to_string(),
        }
    }

    /// Recovers the original basename and the "old" flag from a generated one.
    pub fn parse_unique_name(&self, base: &str) -> Option<(String, bool)> {
        match self {
            ContentResolver::Workfile { pid } => {
                let (_, rest) = base.split_once('.')?;
                let (head, file_pid) = rest.rsplit_once('.')?;
                let (orig, _tie) = head.rsplit_once('.')?;
                let file_pid = u64::from_str_radix(file_pid, 16).ok()?;
                Some((orig.to_string(), file_pid != u64::from(*pid)))
            }
            _ => Some((base.to_string(), false)),
        }
    }
}

fn gen_tie() -> String {
    ulid::Ulid::new().to_string()
}

/// Parsed information about a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentInfo {
    /// Directory of the file, with a trailing separator.
    pub dir: String,
    /// Original basename, with any generated decoration removed.
    pub base: String,
    pub content_type: String,
    /// Set for files left behind by a previous process; subject to cleanup.
    pub old: bool,
    pub mountpath: PathBuf,
    pub bucket: Bucket,
    /// Original object name, including its nested directories.
    pub obj_name: String,
}

/// Anything with enough identity to produce an FQN.
pub trait FqnParts {
    fn obj_name(&self) -> &str;
    fn bucket(&self) -> &Bucket;
    fn mountpath(&self) -> &Mountpath;
}

/// Borrowed identity tuple for callers that do not hold a [`crate::Lom`].
pub struct ObjectParts<'a> {
    pub mountpath: &'a Mountpath,
    pub bucket: &'a Bucket,
    pub obj_name: &'a str,
}

impl FqnParts for ObjectParts<'_> {
    fn obj_name(&self) -> &str {
        self.obj_name
    }

    fn bucket(&self) -> &Bucket {
        self.bucket
    }

    fn mountpath(&self) -> &Mountpath {
        self.mountpath
    }
}

/// Mapping from content type to resolver.
///
/// Populated once at startup through `&mut self`; afterwards it is shared as
/// `Arc<ContentRegistry>` and only read.
#[derive(Debug, Default)]
pub struct ContentRegistry {
    resolvers: HashMap<String, ContentResolver>,
}

impl ContentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four built-in content types, bound to the current process.
    pub fn with_defaults() -> Result<Self> {
        Self::with_defaults_for_pid(std::process::id())
    }

    pub fn with_defaults_for_pid(pid: u32) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(OBJECT_TYPE, ContentResolver::Object)?;
        registry.register(WORKFILE_TYPE, ContentResolver::Workfile { pid })?;
        registry.register(EC_SLICE_TYPE, ContentResolver::EcSlice)?;
        registry.register(EC_META_TYPE, ContentResolver::EcMeta)?;
        Ok(registry)
    }

    pub fn register(&mut self, content_type: &str, resolver: ContentResolver) -> Result<()> {
        if content_type.contains(std::path::MAIN_SEPARATOR) || content_type.contains('/') {
            return Err(TesseraError::Config(format!(
                "{} content type cannot contain {:?}",
                content_type,
                std::path::MAIN_SEPARATOR
            )));
        }
        if content_type.len() != CONTENT_TYPE_LEN {
            return Err(TesseraError::Config(format!(
                "{} content type must have length {}",
                content_type, CONTENT_TYPE_LEN
            )));
        }
        if self.resolvers.contains_key(content_type) {
            return Err(TesseraError::Config(format!(
                "{} content type is already registered",
                content_type
            )));
        }
        self.resolvers.insert(content_type.to_string(), resolver);
        Ok(())
    }

    pub fn resolver(&self, content_type: &str) -> Option<&ContentResolver> {
        self.resolvers.get(content_type)
    }

    /// Generates the FQN of `parts` stored as `content_type`.
    pub fn gen_fqn(&self, parts: &impl FqnParts, content_type: &str, prefix: &str) -> Result<PathBuf> {
        let resolver = self.resolver(content_type).ok_or_else(|| {
            TesseraError::Config(format!("{} content type is not registered", content_type))
        })?;
        if prefix.contains(['.', '/']) {
            return Err(TesseraError::InvalidRequest(format!(
                "content prefix cannot contain '.' or '/': {}",
                prefix
            )));
        }
        let unique = resolver.gen_unique_name(parts.obj_name(), prefix);
        Ok(parts
            .mountpath()
            .make_path_fqn(parts.bucket(), content_type, &unique))
    }

    /// Decodes an FQN produced by [`ContentRegistry::gen_fqn`].
    ///
    /// Anything that does not decode yields `None`; this is never an error.
    pub fn file_spec(&self, fqn: &Path) -> Option<(&ContentResolver, ContentInfo)> {
        let fqn_str = fqn.to_str()?;
        let idx = fqn_str.rfind('/')?;
        let (dir, base) = fqn_str.split_at(idx + 1);
        if !dir.ends_with('/') || base.is_empty() {
            return None;
        }

        let ParsedFqn {
            mountpath,
            bucket,
            content_type,
            obj_name,
        } = fqn::parse_fqn(fqn_str).ok()?;

        let Some(resolver) = self.resolvers.get(&content_type) else {
            tracing::error!("{:?}: unknown content type {}", fqn, content_type);
            return None;
        };

        let (orig_base, old) = resolver.parse_unique_name(base)?;
        let obj_name = match obj_name.rfind('/') {
            Some(idx) => format!("{}{}", &obj_name[..=idx], orig_base),
            None => orig_base.clone(),
        };

        Some((
            resolver,
            ContentInfo {
                dir: dir.to_string(),
                base: orig_base,
                content_type,
                old,
                mountpath,
                bucket,
                obj_name,
            },
        ))
    }

    /// Returns `(permitted, old)`. Unrecognized files may always be evicted.
    pub fn perm_to_evict(&self, fqn: &Path) -> (bool, bool) {
        match self.file_spec(fqn) {
            Some((resolver, info)) => (resolver.perm_to_evict(), info.old),
            None => (true, false),
        }
    }

    pub fn perm_to_move(&self, fqn: &Path) -> bool {
        self.file_spec(fqn)
            .map(|(resolver, _)| resolver.perm_to_move())
            .unwrap_or(false)
    }

    pub fn perm_to_process(&self, fqn: &Path) -> bool {
        self.file_spec(fqn)
            .map(|(resolver, _)| resolver.perm_to_process())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mountpath() -> Mountpath {
        Mountpath::new("/data/mp1").unwrap()
    }

    #[test]
    fn test_register_validation() {
        let mut registry = ContentRegistry::new();
        assert!(registry.register("o", ContentResolver::Object).is_err());
        assert!(registry.register("obj", ContentResolver::Object).is_err());
        assert!(registry.register("o/", ContentResolver::Object).is_err());
        assert!(registry.register("ob", ContentResolver::Object).is_ok());
        assert!(registry.register("ob", ContentResolver::EcMeta).is_err());
        assert_eq!(registry.resolver("ob"), Some(&ContentResolver::Object));
        assert!(registry.resolver("wk").is_none());
    }

    #[test]
    fn test_gen_then_file_spec_recovers_identity() {
        let registry = ContentRegistry::with_defaults().unwrap();
        let mp = mountpath();
        let bck = Bucket::ais("bck").unwrap();

        for content_type in [OBJECT_TYPE, WORKFILE_TYPE, EC_SLICE_TYPE, EC_META_TYPE] {
            for obj_name in ["obj", "dir/sub/file.tar.gz"] {
                let parts = ObjectParts {
                    mountpath: &mp,
                    bucket: &bck,
                    obj_name,
                };
                let fqn = registry.gen_fqn(&parts, content_type, WORKFILE_PUT).unwrap();
                let (_, info) = registry.file_spec(&fqn).unwrap();
                assert_eq!(info.content_type, content_type);
                assert_eq!(info.obj_name, obj_name);
                assert_eq!(info.bucket, bck);
                assert_eq!(info.mountpath, PathBuf::from("/data/mp1"));
                assert!(!info.old);
            }
        }
    }

    #[test]
    fn test_workfile_name_layout() {
        let resolver = ContentResolver::Workfile { pid: 0x1f4 };
        let name = resolver.gen_unique_name("a/b/c.txt", "put");
        assert!(name.starts_with("a/b/put.c.txt."));
        assert!(name.ends_with(".1f4"));

        let base = name.rsplit('/').next().unwrap();
        let (orig, old) = resolver.parse_unique_name(base).unwrap();
        assert_eq!(orig, "c.txt");
        assert!(!old);
    }

    #[test]
    fn test_workfile_from_other_process_is_old() {
        let writer = ContentRegistry::with_defaults_for_pid(1000).unwrap();
        let same = ContentRegistry::with_defaults_for_pid(1000).unwrap();
        let other = ContentRegistry::with_defaults_for_pid(2000).unwrap();

        let mp = mountpath();
        let bck = Bucket::ais("bck").unwrap();
        let parts = ObjectParts {
            mountpath: &mp,
            bucket: &bck,
            obj_name: "obj",
        };
        let fqn = writer.gen_fqn(&parts, WORKFILE_TYPE, WORKFILE_COPY).unwrap();

        assert!(!same.file_spec(&fqn).unwrap().1.old);
        assert!(other.file_spec(&fqn).unwrap().1.old);
        assert_eq!(other.perm_to_evict(&fqn), (true, true));
    }

    #[test]
    fn test_file_spec_rejects_malformed() {
        let registry = ContentRegistry::with_defaults().unwrap();
        assert!(registry.file_spec(Path::new("")).is_none());
        assert!(registry.file_spec(Path::new("obj")).is_none());
        assert!(registry.file_spec(Path::new("/data/mp1/@ais/bck/%ob/")).is_none());
        assert!(registry.file_spec(Path::new("/data/mp1/@ais/bck/ob/x")).is_none());
        assert!(
            registry
                .file_spec(Path::new("/data/mp1/@ais/bck/%wk/not-a-workfile"))
                .is_none()
        );
    }

    #[test]
    fn test_permissions() {
        let registry = ContentRegistry::with_defaults().unwrap();
        let object = Path::new("/data/mp1/@ais/bck/%ob/x");
        let slice = Path::new("/data/mp1/@ais/bck/%ec/x");
        let unknown = Path::new("/data/mp1/@ais/bck/%zz/x");

        assert!(registry.perm_to_move(object));
        assert!(registry.perm_to_process(object));
        assert!(registry.perm_to_move(slice));
        assert!(!registry.perm_to_process(slice));

        assert_eq!(registry.perm_to_evict(unknown), (true, false));
        assert!(!registry.perm_to_move(unknown));
        assert!(!registry.perm_to_process(unknown));

        let mp = mountpath();
        let bck = Bucket::ais("bck").unwrap();
        let parts = ObjectParts {
            mountpath: &mp,
            bucket: &bck,
            obj_name: "x",
        };
        let work = registry.gen_fqn(&parts, WORKFILE_TYPE, WORKFILE_PUT).unwrap();
        assert!(!registry.perm_to_move(&work));
        assert!(!registry.perm_to_process(&work));
        assert_eq!(registry.perm_to_evict(&work), (true, false));
    }

    #[test]
    fn test_gen_rejects_unregistered_type_and_bad_prefix() {
        let registry = ContentRegistry::with_defaults().unwrap();
        let mp = mountpath();
        let bck = Bucket::ais("bck").unwrap();
        let parts = ObjectParts {
            mountpath: &mp,
            bucket: &bck,
            obj_name: "x",
        };
        assert!(registry.gen_fqn(&parts, "zz", "").is_err());
        assert!(registry.gen_fqn(&parts, WORKFILE_TYPE, "a.b").is_err());
    }
}
