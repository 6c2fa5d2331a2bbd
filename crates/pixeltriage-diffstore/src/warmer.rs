//! Pre-populates the DiffStore's caches for untriaged digests so the UI
//! never waits on a cold diff computation (spec §4.3 "Warmer").

use std::collections::HashMap;
use std::sync::Arc;

use pixeltriage_core::{Cx, Digest, Expectations, Label, Summary, TestName};

use crate::diffstore::DiffStore;
use crate::error::{DiffStoreError, Result};
use crate::finder::closest_digest;

/// Outcome of a warming pass: how many untriaged digests were processed,
/// how many failed, and the first error encountered (spec: "continues on
/// per-item failures, returning the first error and a count").
#[derive(Debug, Default)]
pub struct WarmerReport {
    pub processed: usize,
    pub errors: usize,
    pub first_error: Option<String>,
}

pub struct Warmer {
    store: Arc<DiffStore>,
}

impl Warmer {
    #[must_use]
    pub fn new(store: Arc<DiffStore>) -> Self {
        Self { store }
    }

    /// Warms the DiffStore for every untriaged digest in `summaries`,
    /// optionally restricted to `only_tests`. Stops immediately on
    /// cancellation; otherwise continues past per-digest failures.
    pub fn warm(
        &self,
        summaries: &[Summary],
        only_tests: Option<&[TestName]>,
        observed_digests_by_test: &HashMap<TestName, Vec<Digest>>,
        expectations: &Expectations,
        cx: &Cx,
    ) -> Result<WarmerReport> {
        let mut report = WarmerReport::default();

        for summary in summaries {
            if let Some(filter) = only_tests {
                if !filter.contains(&summary.test) {
                    continue;
                }
            }
            let Some(observed) = observed_digests_by_test.get(&summary.test) else { continue };

            for digest in &summary.untriaged_digests {
                if cx.check().is_err() {
                    return Err(DiffStoreError::Cancelled);
                }

                if let Err(e) = self.store.ensure_local(digest, cx) {
                    report.errors += 1;
                    if report.first_error.is_none() {
                        report.first_error = Some(e.to_string());
                    }
                    continue;
                }

                let _pos = closest_digest(&self.store, &summary.test, digest, Label::Positive, observed, expectations, cx);
                let _neg = closest_digest(&self.store, &summary.test, digest, Label::Negative, observed, expectations, cx);
                report.processed += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diffstore::DiffStoreConfig;
    use crate::object_store::{MemoryObjectStore, ObjectStore};
    use image::ImageEncoder;

    fn sample_png(color: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba(color));
        let mut bytes = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut bytes);
        encoder.write_image(img.as_raw(), 2, 2, image::ExtendedColorType::Rgba8).unwrap();
        bytes
    }

    #[test]
    fn warming_continues_past_missing_digests() {
        let tmp = tempfile::tempdir().unwrap();
        let object_store = Arc::new(MemoryObjectStore::new());
        object_store.insert("b", "present.png", &sample_png([1, 1, 1, 255]));
        let store = Arc::new(
            DiffStore::new(
                object_store,
                DiffStoreConfig {
                    bucket: "b".into(),
                    base_dir: tmp.path().to_path_buf(),
                    worker_count: 2,
                    max_uri_get_tries: 1,
                    lru_capacity: 16,
                },
            )
            .unwrap(),
        );
        let warmer = Warmer::new(store);
        let summary = Summary {
            test: TestName::from("t1"),
            untriaged_digests: vec![Digest::new("present"), Digest::new("absent")],
            pos_count: 0,
            neg_count: 0,
            untriaged_count: 2,
        };
        let mut observed = HashMap::new();
        observed.insert(TestName::from("t1"), vec![Digest::new("present")]);
        let expectations = Expectations::new();
        let cx = Cx::new();
        let report = warmer.warm(&[summary], None, &observed, &expectations, &cx).unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.errors, 1);
        assert!(report.first_error.is_some());
    }

    #[test]
    fn cancellation_stops_the_pass_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let object_store = Arc::new(MemoryObjectStore::new());
        let store = Arc::new(
            DiffStore::new(
                object_store,
                DiffStoreConfig {
                    bucket: "b".into(),
                    base_dir: tmp.path().to_path_buf(),
                    worker_count: 1,
                    max_uri_get_tries: 1,
                    lru_capacity: 16,
                },
            )
            .unwrap(),
        );
        let warmer = Warmer::new(store);
        let summary = Summary {
            test: TestName::from("t1"),
            untriaged_digests: vec![Digest::new("a"), Digest::new("b")],
            pos_count: 0,
            neg_count: 0,
            untriaged_count: 2,
        };
        let mut observed = HashMap::new();
        observed.insert(TestName::from("t1"), vec![]);
        let expectations = Expectations::new();
        let cx = Cx::new();
        cx.cancel();
        let err = warmer.warm(&[summary], None, &observed, &expectations, &cx).unwrap_err();
        assert!(matches!(err, DiffStoreError::Cancelled));
    }
}
