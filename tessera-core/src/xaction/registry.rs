use super::{XactBase, XactKind, XactSnap};
use crate::{Bucket, Result, TesseraError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Every job started on this node, by id.
///
/// Ids are ULIDs, so iteration order is start order.
#[derive(Default)]
pub struct XactRegistry {
    entries: RwLock<BTreeMap<String, Arc<XactBase>>>,
}

impl XactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job. Refuses a second running job of the same kind on the same buckets.
    pub fn add(&self, xact: Arc<XactBase>) -> Result<()> {
        let mut entries = self.entries.write();
        let busy = entries.values().find(|other| {
            !other.is_finished() && other.kind() == xact.kind() && other.buckets() == xact.buckets()
        });
        if let Some(busy) = busy {
            return Err(TesseraError::InvalidRequest(format!(
                "{} is already running",
                busy
            )));
        }
        if entries.contains_key(xact.id()) {
            return Err(TesseraError::InvalidRequest(format!(
                "duplicate xaction id {}",
                xact.id()
            )));
        }
        entries.insert(xact.id().to_string(), xact);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Arc<XactBase>> {
        self.entries
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| TesseraError::XactNotFound(id.to_string()))
    }

    pub fn list(&self) -> Vec<XactSnap> {
        self.entries.read().values().map(|xact| xact.snap()).collect()
    }

    pub fn abort(&self, id: &str) -> Result<bool> {
        Ok(self.get(id)?.abort())
    }

    pub fn find_running(&self, kind: XactKind, bucket: &Bucket) -> Option<Arc<XactBase>> {
        self.entries
            .read()
            .values()
            .find(|xact| !xact.is_finished() && xact.kind() == kind && xact.buckets().contains(bucket))
            .cloned()
    }

    /// Drops finished jobs, keeping the `keep` most recent of them.
    pub fn prune(&self, keep: usize) -> usize {
        let mut entries = self.entries.write();
        let finished: Vec<String> = entries
            .iter()
            .filter(|(_, xact)| xact.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        let excess = finished.len().saturating_sub(keep);
        for id in &finished[..excess] {
            entries.remove(id);
        }
        excess
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_add_get_abort() {
        let registry = XactRegistry::new();
        let bck = Bucket::ais("b").unwrap();

        let x1 = Arc::new(XactBase::new(XactKind::Resilver, vec![bck.clone()]));
        assert_ok!(registry.add(x1.clone()));
        x1.start();

        let dup = Arc::new(XactBase::new(XactKind::Resilver, vec![bck.clone()]));
        assert_err!(registry.add(dup));

        let other = Arc::new(XactBase::new(XactKind::Cleanup, vec![bck.clone()]));
        assert_ok!(registry.add(other));

        assert_eq!(registry.get(x1.id()).unwrap().id(), x1.id());
        assert!(registry.get("nope").unwrap_err().is_not_found());
        assert!(registry.find_running(XactKind::Resilver, &bck).is_some());

        assert!(registry.abort(x1.id()).unwrap());
        assert!(x1.is_abort_requested());

        x1.finish(Some(&x1.aborted_error("abort requested")));
        assert!(registry.find_running(XactKind::Resilver, &bck).is_none());
        assert!(!registry.abort(x1.id()).unwrap());
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_prune_keeps_recent_finished() {
        let registry = XactRegistry::new();
        for i in 0..4 {
            let x = Arc::new(XactBase::with_id(
                format!("x{}", i),
                XactKind::Cleanup,
                vec![Bucket::ais(format!("b{}", i)).unwrap()],
            ));
            registry.add(x.clone()).unwrap();
            if i < 3 {
                x.start();
                x.finish(None);
            }
        }

        assert_eq!(registry.prune(1), 2);
        let left: Vec<String> = registry.list().into_iter().map(|s| s.id).collect();
        assert_eq!(left, vec!["x2", "x3"]);
    }
}
