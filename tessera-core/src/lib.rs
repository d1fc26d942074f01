//! Tessera Core - mountpath-aware object storage node
//!
//! Objects are spread over local mountpaths and cluster peers using:
//! - a content registry mapping 2-character content types to on-disk naming rules
//! - deterministic FQNs: `<mountpath>/@<provider>[/#<ns>]/<bucket>/%<ct>/<object>`
//! - background jobs (xactions) running one jogger per mountpath
//! - a per-job data mover streaming objects to peers

pub mod bucket;
pub mod cluster;
pub mod error;
pub mod fs;
pub mod memsys;
pub mod transport;
pub mod xaction;

pub use bucket::{Bucket, Provider};
pub use cluster::{
    CopyObjectParams, LocalTarget, Lom, NodeInfo, PromoteFileParams, PutObjectParams, RecvType,
    Smap, Target,
};
pub use error::{Result, TesseraError};
pub use fs::{CapacityConfig, ContentInfo, ContentRegistry, ContentResolver, Mountpath, Mountpaths};
pub use memsys::{BufferPool, MemsysConfig, PooledBuf};
pub use transport::{
    DataMover, DmStats, HttpTransport, LoopbackNetwork, LoopbackTransport, ObjHdr, ObjReader,
    Opcode, RecvHandler, RecvHandlers, Transport,
};
pub use xaction::{
    ErrorPolicy, XactBase, XactBckCopy, XactCleanup, XactConfig, XactKind, XactRegistry,
    XactResilver, XactSnap, XactState, XactStats,
};
