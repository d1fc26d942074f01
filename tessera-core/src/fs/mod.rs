//! Mountpaths, FQNs and the content registry that maps between logical
//! identities and physical files.

pub mod capacity;
pub mod content;
pub mod fqn;
pub mod io;
pub mod mountpath;

pub use capacity::{CapStatus, CapacityConfig, CapacityProbe, FixedProbe, StatvfsProbe};
pub use content::{
    CONTENT_TYPE_LEN, ContentInfo, ContentRegistry, ContentResolver, EC_META_TYPE, EC_SLICE_TYPE,
    FqnParts, OBJECT_TYPE, ObjectParts, WORKFILE_COPY, WORKFILE_MIGRATE, WORKFILE_PROMOTE,
    WORKFILE_PUT, WORKFILE_RECV, WORKFILE_TYPE,
};
pub use fqn::{ParsedFqn, parse_fqn, validate_obj_name};
pub use io::{Written, compute_hash};
pub use mountpath::{Mountpath, Mountpaths};
