//! Background jobs ("xactions") and the per-mountpath joggers that drive them.
//!
//! A job snapshots the mountpath set, runs one [`Jogger`] per mountpath under
//! a [`JoggerGroup`], waits for all of them and finishes exactly once.

pub mod base;
pub mod bck_copy;
pub mod cleanup;
pub mod jogger;
pub mod registry;
pub mod resilver;

use serde::{Deserialize, Serialize};

pub use base::{XactBase, XactKind, XactSnap, XactState, XactStats};
pub use bck_copy::XactBckCopy;
pub use cleanup::XactCleanup;
pub use jogger::{
    ErrorPolicy, JogItem, JogReport, JogVisitor, Jogger, JoggerConfig, JoggerGroup,
    THROTTLE_NUM_OBJECTS,
};
pub use registry::XactRegistry;
pub use resilver::XactResilver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XactConfig {
    /// Objects a jogger processes between capacity checks.
    #[serde(default = "default_throttle_objects")]
    pub throttle_objects: usize,
}

fn default_throttle_objects() -> usize {
    THROTTLE_NUM_OBJECTS
}

impl Default for XactConfig {
    fn default() -> Self {
        Self {
            throttle_objects: THROTTLE_NUM_OBJECTS,
        }
    }
}
