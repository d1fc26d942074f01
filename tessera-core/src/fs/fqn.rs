//! Physical layout of stored content:
//!
//! ```text
//! <mountpath>/@<provider>[/#<namespace>]/<bucket>/%<content-type>/<object-name>
//! ```
//!
//! Mountpath roots never contain a component starting with `@`, so an FQN can
//! be decoded without knowing which mountpaths are configured.

use crate::{Bucket, Provider, Result, TesseraError};
use std::path::{Path, PathBuf};

pub const PROVIDER_MARKER: char = '@';
pub const NAMESPACE_MARKER: char = '#';
pub const CONTENT_MARKER: char = '%';

/// Structural decomposition of an FQN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFqn {
    pub mountpath: PathBuf,
    pub bucket: Bucket,
    pub content_type: String,
    pub obj_name: String,
}

pub fn make_path_bck(root: &Path, bucket: &Bucket) -> PathBuf {
    let mut path = root.join(format!("{}{}", PROVIDER_MARKER, bucket.provider));
    if let Some(namespace) = &bucket.namespace {
        path.push(format!("{}{}", NAMESPACE_MARKER, namespace));
    }
    path.push(&bucket.name);
    path
}

pub fn make_path_ct(root: &Path, bucket: &Bucket, content_type: &str) -> PathBuf {
    make_path_bck(root, bucket).join(format!("{}{}", CONTENT_MARKER, content_type))
}

pub fn make_path_fqn(root: &Path, bucket: &Bucket, content_type: &str, obj_name: &str) -> PathBuf {
    make_path_ct(root, bucket, content_type).join(obj_name)
}

/// Object names are relative paths without empty, `.` or `..` components.
pub fn validate_obj_name(obj_name: &str) -> Result<()> {
    if obj_name.is_empty() {
        return Err(TesseraError::InvalidRequest(
            "object name cannot be empty".to_string(),
        ));
    }
    for component in obj_name.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(TesseraError::InvalidRequest(format!(
                "invalid object name component in {:?}",
                obj_name
            )));
        }
    }
    Ok(())
}

pub fn parse_fqn(fqn: &str) -> Result<ParsedFqn> {
    let invalid = |reason: &str| TesseraError::InvalidFqn {
        fqn: fqn.to_string(),
        reason: reason.to_string(),
    };

    let components: Vec<&str> = fqn.split('/').filter(|c| !c.is_empty()).collect();

    let (provider_idx, provider) = components
        .iter()
        .enumerate()
        .find_map(|(idx, component)| {
            component
                .strip_prefix(PROVIDER_MARKER)
                .and_then(Provider::parse)
                .map(|provider| (idx, provider))
        })
        .ok_or_else(|| invalid("missing provider"))?;

    if provider_idx == 0 {
        return Err(invalid("missing mountpath"));
    }

    let mut idx = provider_idx + 1;
    let namespace = match components.get(idx).and_then(|c| c.strip_prefix(NAMESPACE_MARKER)) {
        Some(namespace) => {
            idx += 1;
            Some(namespace.to_string())
        }
        None => None,
    };

    let bucket_name = components.get(idx).ok_or_else(|| invalid("missing bucket"))?;
    idx += 1;

    let content_type = components
        .get(idx)
        .and_then(|c| c.strip_prefix(CONTENT_MARKER))
        .ok_or_else(|| invalid("missing content type"))?;
    idx += 1;

    if idx >= components.len() {
        return Err(invalid("missing object name"));
    }
    let obj_name = components[idx..].join("/");

    let mut bucket = Bucket::new(*bucket_name, provider).map_err(|e| invalid(&e.to_string()))?;
    if let Some(namespace) = namespace {
        bucket = bucket
            .with_namespace(namespace)
            .map_err(|e| invalid(&e.to_string()))?;
    }

    let root = components[..provider_idx].join("/");
    let mountpath = if fqn.starts_with('/') {
        PathBuf::from(format!("/{}", root))
    } else {
        PathBuf::from(root)
    };

    Ok(ParsedFqn {
        mountpath,
        bucket,
        content_type: content_type.to_string(),
        obj_name,
    })
}
