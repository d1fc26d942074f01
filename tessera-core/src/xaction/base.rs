use crate::transport::DmStats;
use crate::{Bucket, TesseraError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum XactKind {
    #[serde(rename = "copy-bck")]
    CopyBucket,
    #[serde(rename = "resilver")]
    Resilver,
    #[serde(rename = "cleanup")]
    Cleanup,
}

impl XactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            XactKind::CopyBucket => "copy-bck",
            XactKind::Resilver => "resilver",
            XactKind::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for XactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum XactState {
    Created,
    Running,
    Finished,
    Aborted,
}

impl XactState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, XactState::Finished | XactState::Aborted)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct XactStats {
    pub objects: u64,
    pub bytes: u64,
    /// Objects sent to peers, and their bytes. Also included in `objects`/`bytes`.
    pub out_objects: u64,
    pub out_bytes: u64,
    /// Objects received from peers on behalf of this job.
    pub in_objects: u64,
    pub in_bytes: u64,
    pub errors: u64,
    pub skipped: u64,
}

/// Point-in-time view of a job, as exposed over the API.
#[derive(Debug, Clone, Serialize)]
pub struct XactSnap {
    pub id: String,
    pub kind: XactKind,
    pub buckets: Vec<String>,
    pub state: XactState,
    pub stats: XactStats,
    pub joggers: usize,
    pub joggers_done: usize,
    pub abort_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Counters {
    objects: AtomicU64,
    bytes: AtomicU64,
    out_objects: AtomicU64,
    out_bytes: AtomicU64,
    in_objects: AtomicU64,
    in_bytes: AtomicU64,
    errors: AtomicU64,
    skipped: AtomicU64,
}

#[derive(Default)]
struct Outcome {
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// State and stats shared by a job and its joggers.
///
/// Joggers hold it through an `Arc`; the job joins every jogger before
/// calling [`XactBase::finish`], which moves the state machine to its
/// terminal state exactly once.
pub struct XactBase {
    id: String,
    kind: XactKind,
    buckets: Vec<Bucket>,
    state: watch::Sender<XactState>,
    counters: Counters,
    abort_requested: watch::Sender<bool>,
    joggers: AtomicUsize,
    joggers_done: AtomicUsize,
    outcome: Mutex<Outcome>,
}

impl XactBase {
    pub fn new(kind: XactKind, buckets: Vec<Bucket>) -> Self {
        Self::with_id(ulid::Ulid::new().to_string(), kind, buckets)
    }

    pub fn with_id(id: impl Into<String>, kind: XactKind, buckets: Vec<Bucket>) -> Self {
        let (state, _) = watch::channel(XactState::Created);
        let (abort_requested, _) = watch::channel(false);
        Self {
            id: id.into(),
            kind,
            buckets,
            state,
            counters: Counters::default(),
            abort_requested,
            joggers: AtomicUsize::new(0),
            joggers_done: AtomicUsize::new(0),
            outcome: Mutex::new(Outcome::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> XactKind {
        self.kind
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn state(&self) -> XactState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == XactState::Running
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Moves `Created` to `Running`. Returns false if the job was already started.
    pub fn start(&self) -> bool {
        let started = self.state.send_if_modified(|state| {
            if *state == XactState::Created {
                *state = XactState::Running;
                true
            } else {
                false
            }
        });
        if started {
            self.outcome.lock().started_at = Some(Utc::now());
            tracing::info!("{} started", self);
        }
        started
    }

    pub fn objects_inc(&self) {
        self.counters.objects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_add(&self, n: u64) {
        self.counters.bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn errors_inc(&self) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped_inc(&self) {
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds the traffic of the job's data mover into the stats.
    pub fn add_transport_stats(&self, dm: DmStats) {
        self.counters.out_objects.fetch_add(dm.sent_objects, Ordering::Relaxed);
        self.counters.out_bytes.fetch_add(dm.sent_bytes, Ordering::Relaxed);
        self.counters.in_objects.fetch_add(dm.recv_objects, Ordering::Relaxed);
        self.counters.in_bytes.fetch_add(dm.recv_bytes, Ordering::Relaxed);
    }

    pub fn stats(&self) -> XactStats {
        let c = &self.counters;
        XactStats {
            objects: c.objects.load(Ordering::Relaxed),
            bytes: c.bytes.load(Ordering::Relaxed),
            out_objects: c.out_objects.load(Ordering::Relaxed),
            out_bytes: c.out_bytes.load(Ordering::Relaxed),
            in_objects: c.in_objects.load(Ordering::Relaxed),
            in_bytes: c.in_bytes.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn jogger_started(&self) {
        self.joggers.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn jogger_done(&self) {
        self.joggers_done.fetch_add(1, Ordering::AcqRel);
    }

    pub fn joggers(&self) -> usize {
        self.joggers.load(Ordering::Acquire)
    }

    pub fn joggers_done(&self) -> usize {
        self.joggers_done.load(Ordering::Acquire)
    }

    /// Asks the joggers to stop at the next object boundary.
    pub fn abort(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        let requested = self.abort_requested.send_if_modified(|requested| !std::mem::replace(requested, true));
        if requested {
            tracing::info!("{}: abort requested", self);
        }
        true
    }

    pub fn is_abort_requested(&self) -> bool {
        *self.abort_requested.borrow()
    }

    /// Resolves once [`XactBase::abort`] has been called.
    pub async fn wait_abort_requested(&self) {
        let mut rx = self.abort_requested.subscribe();
        // the sender lives in `self`
        let _ = rx.wait_for(|requested| *requested).await;
    }

    /// The error a jogger returns when it stops this job early.
    pub fn aborted_error(&self, details: impl Into<String>) -> TesseraError {
        TesseraError::aborted(format!("{}({:?})", self.kind, self.id), details)
    }

    /// Terminal transition. Only the first call has an effect; it returns true.
    pub fn finish(&self, err: Option<&TesseraError>) -> bool {
        let next = if err.is_some() {
            XactState::Aborted
        } else {
            XactState::Finished
        };

        let mut outcome = self.outcome.lock();
        let finished = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = next;
                true
            }
        });
        if !finished {
            drop(outcome);
            tracing::warn!("{}: already finished, ignoring finish({:?})", self, err.map(|e| e.to_string()));
            return false;
        }
        outcome.finished_at = Some(Utc::now());
        outcome.error = err.map(|e| e.to_string());
        drop(outcome);

        let stats = self.stats();
        match err {
            Some(err) => tracing::warn!(
                "{} aborted: {} (objects {}, bytes {})",
                self,
                err,
                stats.objects,
                stats.bytes
            ),
            None => tracing::info!(
                "{} finished (objects {}, bytes {})",
                self,
                stats.objects,
                stats.bytes
            ),
        }
        true
    }

    pub fn error(&self) -> Option<String> {
        self.outcome.lock().error.clone()
    }

    /// Resolves when the job reaches a terminal state.
    pub async fn wait_finished(&self) -> XactState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    pub fn snap(&self) -> XactSnap {
        let state = self.state();
        let (started_at, finished_at, error) = {
            let outcome = self.outcome.lock();
            (outcome.started_at, outcome.finished_at, outcome.error.clone())
        };
        XactSnap {
            id: self.id.clone(),
            kind: self.kind,
            buckets: self.buckets.iter().map(|b| b.to_string()).collect(),
            state,
            stats: self.stats(),
            joggers: self.joggers(),
            joggers_done: self.joggers_done(),
            abort_requested: self.is_abort_requested(),
            error,
            started_at,
            finished_at,
        }
    }
}

impl fmt::Display for XactBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.id)?;
        for bucket in &self.buckets {
            write!(f, " {}", bucket)?;
        }
        Ok(())
    }
}

impl fmt::Debug for XactBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XactBase")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}
