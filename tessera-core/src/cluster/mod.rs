//! Node-level view of the cluster: placement, object metadata and the
//! target operations background jobs are built on.

pub mod hrw;
pub mod local;
pub mod lom;
pub mod smap;
pub mod target;

pub use local::LocalTarget;
pub use lom::Lom;
pub use smap::{NodeInfo, Smap};
pub use target::{CopyObjectParams, PromoteFileParams, PutObjectParams, RecvType, Target};
