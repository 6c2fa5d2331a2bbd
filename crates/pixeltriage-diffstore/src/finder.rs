//! `DiffFinder::ClosestDigest` (spec §4.4): the digest of a given label
//! nearest a probe digest under the combined diff metric, restricted to
//! digests actually observed for the test and not unavailable.

use std::collections::HashMap;
use std::sync::Arc;

use pixeltriage_core::{Closest, Cx, Digest, Expectations, Label, TestName};

use crate::diffstore::DiffStore;

/// Per-test digest observation counts, used by callers to build the
/// candidate pool (spec §8 scenario 5: "counts `{aaa,bbb,ccc,ddd,eee}=2`").
/// This crate itself only needs the digest's presence, not its count;
/// kept as a distinct alias so call sites read clearly.
pub type DigestCounts = HashMap<Digest, u32>;

/// Implements spec §4.4 steps 1-5.
///
/// `candidates_by_label` should already be restricted to digests actually
/// observed for `test` in the current tile (spec: "`digestsByTest[test]`");
/// this function further filters by `label` and the unavailable set.
pub fn closest_digest(
    store: &Arc<DiffStore>,
    test: &TestName,
    probe: &Digest,
    label: Label,
    observed_digests: &[Digest],
    expectations: &Expectations,
    cx: &Cx,
) -> Closest {
    let unavailable = store.unavailable_digests();

    if unavailable.contains(probe) {
        return Closest::none();
    }

    let mut candidates: Vec<Digest> = observed_digests
        .iter()
        .filter(|d| !unavailable.contains(d))
        .filter(|d| expectations.classification(test, d) == label)
        .cloned()
        .collect();
    candidates.sort();
    candidates.dedup();

    if candidates.is_empty() {
        return Closest::none();
    }

    let Ok(diffs) = store.get(probe, &candidates, cx) else {
        return Closest::none();
    };

    let mut best: Option<(Digest, f64, f64, Vec<u8>)> = None;
    for digest in &candidates {
        let Some(metrics) = diffs.get(digest) else { continue };
        let better = best.as_ref().is_none_or(|(_, m, ..)| metrics.combined_metric < *m);
        if better {
            best = Some((
                digest.clone(),
                metrics.combined_metric,
                metrics.pixel_diff_percent,
                metrics.max_rgba_diffs.to_vec(),
            ));
        }
    }

    match best {
        Some((digest, combined_metric, pixel_diff_percent, max_rgba)) => {
            Closest { digest, combined_metric, pixel_diff_percent, max_rgba }
        }
        None => Closest::none(),
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
    fn returns_none_when_no_candidate_matches_label() {
        let tmp = tempfile::tempdir().unwrap();
        let object_store = Arc::new(MemoryObjectStore::new());
        let store = Arc::new(
            DiffStore::new(
                object_store,
                DiffStoreConfig {
                    bucket: "b".into(),
                    base_dir: tmp.path().to_path_buf(),
                    worker_count: 2,
                    max_uri_get_tries: 2,
                    lru_capacity: 16,
                },
            )
            .unwrap(),
        );
        let expectations = Expectations::new();
        let cx = Cx::new();
        let closest = closest_digest(
            &store,
            &TestName::from("t1"),
            &Digest::new("probe"),
            Label::Positive,
            &[],
            &expectations,
            &cx,
        );
        assert!(closest.is_none());
    }

    #[test]
    fn finds_the_minimum_combined_metric_among_candidates() {
        let tmp = tempfile::tempdir().unwrap();
        let object_store = Arc::new(MemoryObjectStore::new());
        object_store.insert("b", "probe.png", &sample_png([10, 10, 10, 255]));
        object_store.insert("b", "near.png", &sample_png([12, 10, 10, 255]));
        object_store.insert("b", "far.png", &sample_png([250, 250, 250, 255]));
        let store = Arc::new(
            DiffStore::new(
                object_store,
                DiffStoreConfig {
                    bucket: "b".into(),
                    base_dir: tmp.path().to_path_buf(),
                    worker_count: 2,
                    max_uri_get_tries: 2,
                    lru_capacity: 16,
                },
            )
            .unwrap(),
        );
        let mut expectations = Expectations::new();
        expectations.set(TestName::from("t1"), Digest::new("near"), Label::Positive);
        expectations.set(TestName::from("t1"), Digest::new("far"), Label::Positive);
        let cx = Cx::new();
        let closest = closest_digest(
            &store,
            &TestName::from("t1"),
            &Digest::new("probe"),
            Label::Positive,
            &[Digest::new("near"), Digest::new("far")],
            &expectations,
            &cx,
        );
        assert_eq!(closest.digest, Digest::new("near"));
    }
}
