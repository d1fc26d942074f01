//! Highest-random-weight placement over SHA-256.

use crate::fs::Mountpath;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub fn hrw_weight(salt: &str, uname: &str) -> u64 {
    let digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(b"\0")
        .chain_update(uname.as_bytes())
        .finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

pub fn hrw_mountpath<'a>(uname: &str, mountpaths: &'a [Arc<Mountpath>]) -> Option<&'a Arc<Mountpath>> {
    mountpaths
        .iter()
        .max_by_key(|mp| hrw_weight(&mp.path().to_string_lossy(), uname))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hrw_is_deterministic_and_spreads() {
        let mountpaths: Vec<Arc<Mountpath>> = (0..4)
            .map(|i| Arc::new(Mountpath::new(format!("/data/mp{}", i)).unwrap()))
            .collect();

        let first = hrw_mountpath("ais/b/obj-1", &mountpaths).unwrap();
        let again = hrw_mountpath("ais/b/obj-1", &mountpaths).unwrap();
        assert_eq!(first.path(), again.path());

        let mut hit = std::collections::HashSet::new();
        for i in 0..200 {
            let mp = hrw_mountpath(&format!("ais/b/obj-{}", i), &mountpaths).unwrap();
            hit.insert(mp.path().to_path_buf());
        }
        assert_eq!(hit.len(), 4);

        assert!(hrw_mountpath("x", &[]).is_none());
    }
}
