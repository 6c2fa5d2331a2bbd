//! TileIndex (spec §3, §4.1): commits, per-test labeled traces, and an
//! inverted param index, built fresh on every Analyzer tick and replaced
//! atomically.

use std::collections::{BTreeMap, BTreeSet};

use pixeltriage_core::{Commit, Digest, Label, LabeledTrace, Params, TestName};

use crate::trace_store::{Tile, TraceId};

/// Designated param key naming the test (spec §3 "one designated key is
/// the primary key"); matches the convention used by the fixture at
/// `pixeltriage_core::test_harness::sample_tile`.
pub const TEST_NAME_KEY: &str = "name";

/// Designated param key naming the corpus (spec §3, §4.1 "per corpus").
/// A trace without this key falls back to [`DEFAULT_CORPUS`].
pub const CORPUS_KEY: &str = "source_type";
pub const DEFAULT_CORPUS: &str = "default";

#[derive(Debug, Clone, Default)]
pub struct TileIndex {
    pub commits: Vec<Commit>,
    pub commit_by_hash: BTreeMap<String, usize>,
    pub trace_test: BTreeMap<TraceId, TestName>,
    pub trace_params: BTreeMap<TraceId, Params>,
    pub traces_by_test: BTreeMap<TestName, Vec<TraceId>>,
    pub labeled: BTreeMap<TraceId, LabeledTrace>,
    /// Inverted index: param key -> param value -> trace ids carrying it
    /// (spec §3 "paramIndex").
    pub param_index: BTreeMap<String, BTreeMap<String, BTreeSet<TraceId>>>,
}

impl TileIndex {
    #[must_use]
    pub fn corpus_of(&self, trace_id: &str) -> &str {
        self.trace_params
            .get(trace_id)
            .and_then(|p| p.get(CORPUS_KEY))
            .map_or(DEFAULT_CORPUS, String::as_str)
    }

    #[must_use]
    pub fn all_trace_ids(&self) -> BTreeSet<TraceId> {
        self.trace_params.keys().cloned().collect()
    }
}

/// Builds a fresh [`TileIndex`] from a raw [`Tile`], resolving every
/// label via `classify` (spec §4.1 loop steps 2-4). A trace whose params
/// lack [`TEST_NAME_KEY`] is skipped — it cannot be grouped under a test.
pub fn build_tile_index(tile: &Tile, mut classify: impl FnMut(&TestName, &Digest) -> Label) -> TileIndex {
    let commit_by_hash = tile.commits.iter().enumerate().map(|(i, c)| (c.hash.clone(), i)).collect();

    let mut trace_test = BTreeMap::new();
    let mut trace_params = BTreeMap::new();
    let mut traces_by_test: BTreeMap<TestName, Vec<TraceId>> = BTreeMap::new();
    let mut labeled = BTreeMap::new();
    let mut param_index: BTreeMap<String, BTreeMap<String, BTreeSet<TraceId>>> = BTreeMap::new();

    for (trace_id, trace) in &tile.traces {
        let Some(name) = trace.param(TEST_NAME_KEY) else {
            tracing::debug!(trace_id, "trace has no {TEST_NAME_KEY} param, skipping");
            continue;
        };
        let test = TestName::from(name);
        let lt = LabeledTrace::from_trace(trace, |d| classify(&test, d));

        for (key, value) in &trace.params {
            param_index.entry(key.clone()).or_default().entry(value.clone()).or_default().insert(trace_id.clone());
        }

        trace_test.insert(trace_id.clone(), test.clone());
        trace_params.insert(trace_id.clone(), trace.params.clone());
        traces_by_test.entry(test).or_default().push(trace_id.clone());
        labeled.insert(trace_id.clone(), lt);
    }

    TileIndex { commits: tile.commits.clone(), commit_by_hash, trace_test, trace_params, traces_by_test, labeled, param_index }
}

/// Relabel-on-change (spec §4.1 "Relabel on change"): recomputes every
/// label for `test`'s traces from an updated classifier, in place over a
/// clone of the previous index so the swap remains atomic at the
/// Analyzer's install point. Structure (commits, param index) is
/// untouched; only `labeled` entries for this test change.
#[must_use]
pub fn relabel_test(index: &TileIndex, test: &TestName, mut classify: impl FnMut(&Digest) -> Label) -> TileIndex {
    let mut next = index.clone();
    if let Some(trace_ids) = next.traces_by_test.get(test) {
        for trace_id in trace_ids {
            if let Some(lt) = next.labeled.get_mut(trace_id) {
                lt.relabel(&mut classify);
            }
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixeltriage_core::test_harness::sample_tile;

    fn tile_from_fixture() -> Tile {
        let (commits, traces) = sample_tile();
        Tile { commits, traces: traces.into_iter().map(|(t, tr)| (t.0, tr)).collect() }
    }

    #[test]
    fn build_respects_labeled_trace_invariant() {
        let tile = tile_from_fixture();
        let index = build_tile_index(&tile, |_, _| Label::Untriaged);
        assert_eq!(index.labeled.len(), 5);
        for lt in index.labeled.values() {
            assert_eq!(lt.commit_ids.len(), lt.digests.len());
            assert_eq!(lt.digests.len(), lt.labels.len());
            assert!(lt.commit_ids.windows(2).all(|w| w[0] < w[1]));
            for &idx in &lt.commit_ids {
                assert!(idx < tile.commits.len());
            }
        }
    }

    #[test]
    fn param_index_groups_traces_by_value() {
        let tile = tile_from_fixture();
        let index = build_tile_index(&tile, |_, _| Label::Untriaged);
        let v11 = &index.param_index["p1"]["v11"];
        assert_eq!(v11.len(), 5);
    }

    #[test]
    fn relabel_only_touches_the_named_test() {
        let tile = tile_from_fixture();
        let index = build_tile_index(&tile, |_, _| Label::Untriaged);
        let next = relabel_test(&index, &TestName::from("t1"), |_| Label::Positive);
        assert!(next.labeled["t1"].labels.iter().all(|&l| l == Label::Positive));
        assert!(next.labeled["t2"].labels.iter().all(|&l| l == Label::Untriaged));
    }
}
