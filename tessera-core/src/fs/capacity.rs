use crate::{Result, TesseraError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Usage percentage at which the mountpath is reported as running high.
    #[serde(default = "default_high_wm")]
    pub high_wm: u8,
    /// Usage percentage at which data-moving jobs abort.
    #[serde(default = "default_oos")]
    pub oos: u8,
}

fn default_high_wm() -> u8 {
    90
}

fn default_oos() -> u8 {
    95
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            high_wm: default_high_wm(),
            oos: default_oos(),
        }
    }
}

impl CapacityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.high_wm > self.oos || self.oos > 100 {
            return Err(TesseraError::Config(format!(
                "invalid capacity watermarks: high_wm={} oos={}",
                self.high_wm, self.oos
            )));
        }
        Ok(())
    }
}

/// Source of disk usage for a mountpath root.
pub trait CapacityProbe: Send + Sync {
    fn used_pct(&self, path: &Path) -> Result<u8>;
}

/// Reads usage from `statvfs(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

impl CapacityProbe for StatvfsProbe {
    fn used_pct(&self, path: &Path) -> Result<u8> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(std::io::Error::from)?;
        let total = stat.blocks() as u64;
        if total == 0 {
            return Ok(0);
        }
        let avail = stat.blocks_available() as u64;
        let used = total.saturating_sub(avail);
        Ok(((used * 100) / total).min(100) as u8)
    }
}

/// Reports whatever usage was last set; for roots whose capacity is managed elsewhere.
#[derive(Debug, Default)]
pub struct FixedProbe {
    used_pct: AtomicU8,
}

impl FixedProbe {
    pub fn new(used_pct: u8) -> Self {
        Self {
            used_pct: AtomicU8::new(used_pct),
        }
    }

    pub fn set(&self, used_pct: u8) {
        self.used_pct.store(used_pct, Ordering::Relaxed);
    }
}

impl CapacityProbe for FixedProbe {
    fn used_pct(&self, _path: &Path) -> Result<u8> {
        Ok(self.used_pct.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapStatus {
    pub used_pct: u8,
    pub high_wm: u8,
    pub oos: u8,
}

impl CapStatus {
    pub fn is_high(&self) -> bool {
        self.used_pct >= self.high_wm
    }

    pub fn is_oos(&self) -> bool {
        self.used_pct >= self.oos
    }

    /// Out-of-space error for `root`, if the status is over the abort threshold.
    pub fn err(&self, root: &Path) -> Option<TesseraError> {
        if !self.is_oos() {
            return None;
        }
        Some(TesseraError::OutOfSpace(format!(
            "mountpath {} used {}% (oos watermark {}%)",
            root.display(),
            self.used_pct,
            self.oos
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_status_thresholds() {
        let status = CapStatus {
            used_pct: 92,
            high_wm: 90,
            oos: 95,
        };
        assert!(status.is_high());
        assert!(!status.is_oos());
        assert!(status.err(Path::new("/mp")).is_none());

        let status = CapStatus {
            used_pct: 95,
            ..status
        };
        let err = status.err(Path::new("/mp")).unwrap();
        assert!(err.is_out_of_space());
    }

    #[test]
    fn test_statvfs_probe_on_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let pct = StatvfsProbe.used_pct(dir.path()).unwrap();
        assert!(pct <= 100);
    }

    #[test]
    fn test_capacity_config_validation() {
        assert!(CapacityConfig::default().validate().is_ok());
        let bad = CapacityConfig {
            high_wm: 97,
            oos: 95,
        };
        assert!(bad.validate().is_err());
    }
}
