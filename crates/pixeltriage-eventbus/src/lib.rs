//! In-process (and optionally cross-process) publish/subscribe bus (spec
//! §4.5). `ExpectationsStore` uses this to announce triage changes; the
//! Analyzer subscribes to trigger a targeted relabel.
//!
//! Dispatch runs on a small fixed worker pool (teacher precedent:
//! `CommitCoalescer`/`coalescer_pool_worker` in
//! `mcp-agent-mail-storage::lib`, generalized from git-commit coalescing
//! to generic subscriber dispatch) so a slow subscriber callback never
//! blocks the publisher. Delivery is at-least-once from the publisher's
//! perspective (spec §4.5) — handlers must be idempotent.

#![forbid(unsafe_code)]

use pixeltriage_core::{Delta, Digest, Label, TestName};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Wire topic strings from spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `expstorage:changed` — master branch change.
    ExpectationsChanged,
    /// `expstorage:tryjob-exp-change` — per-CL overlay change.
    TryjobExpChange,
}

impl Topic {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExpectationsChanged => "expstorage:changed",
            Self::TryjobExpChange => "expstorage:tryjob-exp-change",
        }
    }
}

/// One `(grouping, digest, label)` triple inside an event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEvent {
    pub grouping: String,
    pub digest: String,
    pub label: String,
}

/// Logical event payload from spec §6: `{ crsClId, delta }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
    pub crs_cl_id: String,
    pub delta: Vec<DeltaEvent>,
}

impl ChangePayload {
    #[must_use]
    pub fn from_delta(crs_cl_id: impl Into<String>, delta: &Delta) -> Self {
        let mut entries = Vec::new();
        for (test, digests) in delta {
            for (digest, label) in digests {
                entries.push(DeltaEvent {
                    grouping: test.as_str().to_string(),
                    digest: digest.as_str().to_string(),
                    label: label.to_string(),
                });
            }
        }
        Self { crs_cl_id: crs_cl_id.into(), delta: entries }
    }

    /// Reconstructs a `(TestName, Digest, Label)` delta map for consumers
    /// (e.g. the Analyzer's relabel path) that want the strong types back.
    #[must_use]
    pub fn to_delta(&self) -> Delta {
        let mut out = Delta::new();
        for entry in &self.delta {
            if let Ok(label) = entry.label.parse::<Label>() {
                out.entry(TestName::from(entry.grouping.as_str()))
                    .or_default()
                    .insert(Digest::from(entry.digest.as_str()), label);
            }
        }
        out
    }
}

type Handler = Box<dyn Fn(&ChangePayload) + Send + Sync>;

struct Subscription {
    id: u64,
    handler: Arc<Handler>,
}

/// Optional cross-process fan-out. `publish(.., global = true)` additionally
/// routes through any registered distributor. The default bus has none —
/// the GCS/Firestore-backed pub/sub product itself is out of scope per
/// spec §1; only the operations this core consumes are specified.
pub trait Distributor: Send + Sync {
    fn distribute(&self, topic: Topic, payload: &ChangePayload);
}

struct DispatchJob {
    handler: Arc<Handler>,
    payload: Arc<ChangePayload>,
}

/// Fixed worker pool draining a single dispatch channel. Small by design:
/// subscriber counts are expected to stay in the single digits (Analyzer,
/// Warmer, maybe an audit sink), unlike DiffStore's ~2000-worker pool.
const DISPATCH_WORKERS: usize = 4;

struct DispatchPool {
    tx: Sender<DispatchJob>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DispatchPool {
    fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<DispatchJob>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(DISPATCH_WORKERS);
        for idx in 0..DISPATCH_WORKERS {
            let rx = Arc::clone(&rx);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("eventbus-dispatch-{idx}"))
                    .spawn(move || dispatch_worker(&rx))
                    .expect("failed to spawn eventbus dispatch worker"),
            );
        }
        Arc::new(Self { tx, workers: Mutex::new(workers) })
    }

    fn submit(&self, job: DispatchJob) {
        // A publish on a bus with no live workers (e.g. during shutdown)
        // is dropped rather than panicking — best-effort delivery.
        let _ = self.tx.send(job);
    }
}

fn dispatch_worker(rx: &Arc<Mutex<Receiver<DispatchJob>>>) {
    loop {
        let job = {
            let guard = rx.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.recv()
        };
        match job {
            Ok(job) => (job.handler)(&job.payload),
            Err(_) => return, // sender dropped: bus is shutting down
        }
    }
}

/// The publish/subscribe bus (spec §4.5).
pub struct EventBus {
    subscribers: Mutex<HashMap<Topic, Vec<Subscription>>>,
    next_id: AtomicU64,
    pool: Arc<DispatchPool>,
    distributor: Mutex<Option<Arc<dyn Distributor>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            pool: DispatchPool::new(),
            distributor: Mutex::new(None),
        }
    }

    /// Registers a cross-process distributor used by `publish(.., global = true)`.
    pub fn set_distributor(&self, distributor: Arc<dyn Distributor>) {
        *self.distributor.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(distributor);
    }

    /// Registers `handler` to be invoked (on a dispatch worker, never on
    /// the publisher's thread) for every `publish` on `topic`.
    ///
    /// Returns a subscription id usable with [`EventBus::unsubscribe`].
    pub fn subscribe_async(&self, topic: Topic, handler: impl Fn(&ChangePayload) + Send + Sync + 'static) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscribers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        subs.entry(topic).or_default().push(Subscription { id, handler: Arc::new(Box::new(handler)) });
        id
    }

    pub fn unsubscribe(&self, topic: Topic, id: u64) {
        let mut subs = self.subscribers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(list) = subs.get_mut(&topic) {
            list.retain(|s| s.id != id);
        }
    }

    /// Publishes `payload` on `topic`. `global = true` additionally routes
    /// to the registered [`Distributor`] (if any); `global = false` stays
    /// in-process only (spec §4.5). The publisher never blocks on
    /// subscriber execution.
    pub fn publish(&self, topic: Topic, payload: ChangePayload, global: bool) {
        tracing::debug!(topic = topic.as_str(), global, "eventbus publish");
        if global {
            let distributor = self.distributor.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
            if let Some(distributor) = distributor {
                distributor.distribute(topic, &payload);
            }
        }
        let subs = self.subscribers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(list) = subs.get(&topic) else { return };
        let payload = Arc::new(payload);
        for sub in list {
            self.pool.submit(DispatchJob { handler: Arc::clone(&sub.handler), payload: Arc::clone(&payload) });
        }
    }

    #[must_use]
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&topic)
            .map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn subscriber_is_invoked_off_the_publisher_thread() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        bus.subscribe_async(Topic::ExpectationsChanged, move |_payload| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(
            Topic::ExpectationsChanged,
            ChangePayload { crs_cl_id: "master".into(), delta: vec![] },
            false,
        );
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while counter.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribed_handler_is_not_invoked() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let id = bus.subscribe_async(Topic::TryjobExpChange, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.unsubscribe(Topic::TryjobExpChange, id);
        bus.publish(
            Topic::TryjobExpChange,
            ChangePayload { crs_cl_id: "123_4".into(), delta: vec![] },
            false,
        );
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn payload_roundtrips_through_delta_conversion() {
        let delta = pixeltriage_core::test_harness::one_delta("t1", "d1", Label::Positive);
        let payload = ChangePayload::from_delta("master", &delta);
        let back = payload.to_delta();
        assert_eq!(
            back.get(&TestName::from("t1")).and_then(|m| m.get(&Digest::from("d1"))),
            Some(&Label::Positive)
        );
    }
}
