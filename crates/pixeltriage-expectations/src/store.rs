//! The public `ExpectationsStore` handle (spec §4.2 "Public contract"):
//! one master handle backed by [`crate::master_cache::MasterCache`], any
//! number of per-CL overlay handles backed by
//! [`crate::overlay::load_overlay`], unified behind one API.

use std::sync::Arc;

use pixeltriage_core::metrics::ExpectationsCounters;
use pixeltriage_core::retry::RetryConfig;
use pixeltriage_core::{Config, Cx, Delta, Digest, Expectations, Label, LogTotal, TestName, TriageLogEntry};
use pixeltriage_eventbus::{ChangePayload, EventBus, Topic};

use crate::audit;
use crate::document_store::{entry_doc_id, Collection, DocumentStore};
use crate::error::{ExpectationsError, Result};
use crate::master_cache::{MasterCache, MASTER_CRS_CL_ID};
use crate::overlay;

enum Branch {
    Master(Arc<MasterCache>),
    Overlay { crs_cl_id: String, cl_shards: usize },
}

/// A handle onto either the master branch or one changelist's overlay
/// (spec §4.2 `forChangeList`). Cheap to clone: the master cache and the
/// document store are both `Arc`-backed.
pub struct ExpectationsStore {
    doc_store: Arc<dyn DocumentStore>,
    branch: Branch,
    event_bus: Option<Arc<EventBus>>,
    max_docs_per_transaction: usize,
    retry: RetryConfig,
    metrics: Arc<ExpectationsCounters>,
    cl_shards: usize,
}

impl ExpectationsStore {
    /// Builds the master handle: warms the sharded cache synchronously
    /// before returning (spec §4.2 "Read path (master)").
    #[must_use]
    pub fn open_master(
        doc_store: Arc<dyn DocumentStore>,
        config: &Config,
        event_bus: Option<Arc<EventBus>>,
        metrics: Arc<ExpectationsCounters>,
    ) -> Self {
        let master_cache = MasterCache::start(
            Arc::clone(&doc_store),
            config.expectations_master_shards,
            config.snapshot_recover_time,
            Arc::clone(&metrics),
        );
        Self {
            doc_store,
            branch: Branch::Master(master_cache),
            event_bus,
            max_docs_per_transaction: config.max_docs_per_transaction,
            retry: retry_config(config),
            metrics,
            cl_shards: config.expectations_cl_shards,
        }
    }

    /// `forChangeList(clId, crsId)` (spec §4.2): returns a fresh,
    /// uncached overlay handle keyed by `crsId_clId`. The master handle
    /// cannot be re-obtained this way.
    #[must_use]
    pub fn for_change_list(&self, cl_id: &str, crs_id: &str) -> Self {
        Self {
            doc_store: Arc::clone(&self.doc_store),
            branch: Branch::Overlay { crs_cl_id: format!("{crs_id}_{cl_id}"), cl_shards: self.cl_shards },
            event_bus: self.event_bus.clone(),
            max_docs_per_transaction: self.max_docs_per_transaction,
            retry: self.retry,
            metrics: Arc::clone(&self.metrics),
            cl_shards: self.cl_shards,
        }
    }

    fn crs_cl_id(&self) -> &str {
        match &self.branch {
            Branch::Master(_) => MASTER_CRS_CL_ID,
            Branch::Overlay { crs_cl_id, .. } => crs_cl_id,
        }
    }

    fn is_master(&self) -> bool {
        matches!(self.branch, Branch::Master(_))
    }

    /// `get()` (spec §4.2): a safe-to-mutate snapshot for this handle's
    /// branch.
    #[must_use]
    pub fn get(&self) -> Expectations {
        match &self.branch {
            Branch::Master(cache) => cache.snapshot(),
            Branch::Overlay { crs_cl_id, cl_shards } => {
                overlay::load_overlay(&self.doc_store, crs_cl_id, *cl_shards).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, crs_cl_id, "overlay load failed, returning empty snapshot");
                    Expectations::new()
                })
            }
        }
    }

    fn current_label(&self, test: &str, digest: &str) -> Result<Label> {
        match &self.branch {
            Branch::Master(cache) => Ok(cache.classification(&TestName::from(test), digest)),
            Branch::Overlay { crs_cl_id, .. } => {
                let id = entry_doc_id(crs_cl_id, test, digest);
                Ok(self
                    .doc_store
                    .get(Collection::Entries, &id)?
                    .and_then(|doc| doc.as_entry().map(|e| e.label))
                    .unwrap_or(Label::Untriaged))
            }
        }
    }

    fn publish_change(&self, delta: &Delta) {
        let Some(bus) = &self.event_bus else { return };
        let payload = ChangePayload::from_delta(self.crs_cl_id().to_string(), delta);
        let topic = if self.is_master() { Topic::ExpectationsChanged } else { Topic::TryjobExpChange };
        bus.publish(topic, payload, true);
    }

    fn on_resolved(&self, test: &str, digest: &str, label: Label) {
        if let Branch::Master(cache) = &self.branch {
            cache.insert_local(TestName::from(test), Digest::from(digest), label);
        }
    }

    /// `addChange(delta, userId)` (spec §4.2).
    pub fn add_change(&self, delta: &Delta, user_id: &str) -> Result<pixeltriage_core::ExpectationChange> {
        let cx = Cx::new();
        let crs_cl_id = self.crs_cl_id().to_string();
        let record = audit::add_change(
            &self.doc_store,
            &crs_cl_id,
            delta,
            user_id,
            |t, d| self.current_label(t, d),
            |t, d, l| self.on_resolved(t, d, l),
            self.max_docs_per_transaction,
            &self.retry,
            &self.metrics,
            &cx,
        )?;
        if let Err(e) = crate::evidence::record_if_configured(&record, &crs_cl_id) {
            tracing::warn!(error = %e, "failed to append to the expectations evidence ledger");
        }
        self.publish_change(delta);
        Ok(record)
    }

    /// `queryLog(offset, size, withDetails)` (spec §4.2).
    pub fn query_log(&self, offset: usize, size: usize, with_details: bool) -> Result<(Vec<TriageLogEntry>, LogTotal)> {
        audit::query_log(&self.doc_store, self.crs_cl_id(), offset, size, with_details)
    }

    /// `undoChange(id, userId)` (spec §4.2).
    pub fn undo_change(&self, change_id: &str, user_id: &str) -> Result<pixeltriage_core::ExpectationChange> {
        let cx = Cx::new();
        let crs_cl_id = self.crs_cl_id().to_string();
        let record = audit::undo_change(
            &self.doc_store,
            &crs_cl_id,
            change_id,
            user_id,
            |t, d| self.current_label(t, d),
            |t, d, l| self.on_resolved(t, d, l),
            self.max_docs_per_transaction,
            &self.retry,
            &self.metrics,
            &cx,
        )?;
        if let Err(e) = crate::evidence::record_if_configured(&record, &crs_cl_id) {
            tracing::warn!(error = %e, "failed to append to the expectations evidence ledger");
        }
        let mut delta = Delta::new();
        for entry in &record.entries {
            delta.entry(entry.test.clone()).or_default().insert(entry.digest.clone(), entry.label_after);
        }
        self.publish_change(&delta);
        Ok(record)
    }

    /// `clear()` (spec §4.2, administrative). Only meaningful called on
    /// the master handle in practice, but available on any handle since
    /// the backend has no per-handle notion of ownership.
    pub fn clear(&self) -> Result<()> {
        self.doc_store.clear_all().map_err(|_| ExpectationsError::ReadOnly("clear".into()))
    }
}

fn retry_config(config: &Config) -> RetryConfig {
    RetryConfig {
        max_delay: config.max_operation_time / 4,
        max_total: config.max_operation_time,
        ..RetryConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryDocumentStore;
    use pixeltriage_core::test_harness::one_delta;

    fn master(doc_store: Arc<dyn DocumentStore>) -> ExpectationsStore {
        let config = Config::default();
        ExpectationsStore::open_master(doc_store, &config, None, Arc::new(ExpectationsCounters::new()))
    }

    #[test]
    fn add_change_then_get_reflects_delta() {
        let doc_store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let store = master(doc_store);
        let delta = one_delta("t1", "d1", Label::Positive);
        store.add_change(&delta, "user-a").unwrap();
        let snap = store.get();
        assert_eq!(snap.classification(&TestName::from("t1"), &Digest::from("d1")), Label::Positive);
    }

    #[test]
    fn second_add_change_wins_on_collision() {
        let doc_store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let store = master(doc_store);
        store.add_change(&one_delta("t1", "d1", Label::Negative), "u").unwrap();
        store.add_change(&one_delta("t1", "d1", Label::Positive), "u").unwrap();
        let snap = store.get();
        assert_eq!(snap.classification(&TestName::from("t1"), &Digest::from("d1")), Label::Positive);
    }

    #[test]
    fn undo_restores_prior_label_through_the_store_api() {
        let doc_store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let store = master(doc_store);
        let r1 = store.add_change(&one_delta("t1", "d1", Label::Negative), "u").unwrap();
        store.add_change(&one_delta("t1", "d1", Label::Positive), "u").unwrap();
        store.undo_change(&r1.id, "u").unwrap();
        let snap = store.get();
        assert_eq!(snap.classification(&TestName::from("t1"), &Digest::from("d1")), Label::Negative);
    }

    #[test]
    fn overlay_handle_is_independent_of_master() {
        let doc_store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let master_store = master(doc_store);
        let overlay_store = master_store.for_change_list("123", "gerrit");
        overlay_store.add_change(&one_delta("t1", "d1", Label::Positive), "u").unwrap();

        assert_eq!(
            master_store.get().classification(&TestName::from("t1"), &Digest::from("d1")),
            Label::Untriaged
        );
        assert_eq!(
            overlay_store.get().classification(&TestName::from("t1"), &Digest::from("d1")),
            Label::Positive
        );
    }
}
