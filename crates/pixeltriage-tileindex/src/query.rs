//! Query algorithm (spec §4.1): filter traces by `{key: [values]}` plus
//! an optional commit-hash range, intersecting from the smallest
//! candidate set first.

use std::collections::{BTreeMap, BTreeSet};

use pixeltriage_core::{Summary, TestName};

use crate::index::TileIndex;
use crate::trace_store::TraceId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub params: BTreeMap<String, Vec<String>>,
    pub cs: Option<String>,
    pub ce: Option<String>,
}

/// The filter actually applied, returned alongside results so a caller
/// can render what's in force (spec §4.1 step 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveQuery {
    pub params: BTreeMap<String, Vec<String>>,
    pub start_commit_index: usize,
    pub end_commit_index: usize,
}

fn resolve_commit_range(index: &TileIndex, query: &Query) -> (usize, usize) {
    let last = index.commits.len().saturating_sub(1);
    let cs = query.cs.as_deref().and_then(|h| index.commit_by_hash.get(h).copied());
    let ce = query.ce.as_deref().and_then(|h| index.commit_by_hash.get(h).copied());
    match (cs, ce) {
        (Some(a), Some(b)) if a > b => (b, a),
        (Some(a), Some(b)) => (a, b),
        (Some(a), None) => (a, last),
        (None, Some(b)) => (0, b),
        (None, None) => (0, last),
    }
}

/// Trace ids matching `query`, plus the effective filter that was
/// applied. The commit range is resolved but not yet used to filter
/// traces here — it is consumed by the caller when building per-test
/// summaries and status, which need to see only in-range slots.
#[must_use]
pub fn matching_traces(index: &TileIndex, query: &Query) -> (BTreeSet<TraceId>, EffectiveQuery) {
    let (start, end) = resolve_commit_range(index, query);
    let mut effective_params = BTreeMap::new();
    let mut smallest: Option<BTreeSet<TraceId>> = None;

    for (key, values) in &query.params {
        let Some(value_map) = index.param_index.get(key) else { continue };
        let mut union: BTreeSet<TraceId> = BTreeSet::new();
        let mut any_value_matched = false;
        for value in values {
            if let Some(ids) = value_map.get(value) {
                any_value_matched = true;
                union.extend(ids.iter().cloned());
            }
        }
        if !any_value_matched {
            continue;
        }
        effective_params.insert(key.clone(), values.clone());
        smallest = Some(match smallest {
            None => union,
            Some(current) => {
                if union.len() < current.len() {
                    intersect_into(union, &current)
                } else {
                    intersect_into(current, &union)
                }
            }
        });
    }

    let trace_ids = smallest.unwrap_or_else(|| index.all_trace_ids());
    (trace_ids, EffectiveQuery { params: effective_params, start_commit_index: start, end_commit_index: end })
}

fn intersect_into(smaller: BTreeSet<TraceId>, larger: &BTreeSet<TraceId>) -> BTreeSet<TraceId> {
    smaller.into_iter().filter(|id| larger.contains(id)).collect()
}

fn summary_for_test(index: &TileIndex, test: &TestName, trace_ids: &BTreeSet<TraceId>, range: (usize, usize)) -> Summary {
    let (start, end) = range;
    let mut pos_count = 0usize;
    let mut neg_count = 0usize;
    let mut untriaged_count = 0usize;
    let mut untriaged_digests = Vec::new();

    let Some(ids_for_test) = index.traces_by_test.get(test) else {
        return Summary { test: test.clone(), untriaged_digests, pos_count, neg_count, untriaged_count };
    };

    for trace_id in ids_for_test {
        if !trace_ids.contains(trace_id) {
            continue;
        }
        let Some(lt) = index.labeled.get(trace_id) else { continue };
        for (i, &commit_idx) in lt.commit_ids.iter().enumerate() {
            if commit_idx < start || commit_idx > end {
                continue;
            }
            match lt.labels[i] {
                pixeltriage_core::Label::Positive => pos_count += 1,
                pixeltriage_core::Label::Negative => neg_count += 1,
                pixeltriage_core::Label::Untriaged => {
                    untriaged_count += 1;
                    untriaged_digests.push(lt.digests[i].clone());
                }
            }
        }
    }
    untriaged_digests.sort();
    untriaged_digests.dedup();
    Summary { test: test.clone(), untriaged_digests, pos_count, neg_count, untriaged_count }
}

/// `listTestDetails(query)` (spec §4.1): aggregate all tests touched by
/// the matching traces.
#[must_use]
pub fn list_test_details(index: &TileIndex, query: &Query) -> (Vec<Summary>, EffectiveQuery) {
    let (trace_ids, effective) = matching_traces(index, query);
    let range = (effective.start_commit_index, effective.end_commit_index);
    let tests: BTreeSet<&TestName> = trace_ids.iter().filter_map(|id| index.trace_test.get(id)).collect();
    let summaries = tests.into_iter().map(|test| summary_for_test(index, test, &trace_ids, range)).collect();
    (summaries, effective)
}

/// `getTestDetails(testName, query)` (spec §4.1): same, scoped to one
/// test.
#[must_use]
pub fn get_test_details(index: &TileIndex, test: &TestName, query: &Query) -> (Summary, EffectiveQuery) {
    let (trace_ids, effective) = matching_traces(index, query);
    let range = (effective.start_commit_index, effective.end_commit_index);
    (summary_for_test(index, test, &trace_ids, range), effective)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build_tile_index;
    use crate::trace_store::Tile;
    use pixeltriage_core::test_harness::sample_tile;
    use pixeltriage_core::Label;

    fn tile_and_index() -> TileIndex {
        let (commits, traces) = sample_tile();
        let tile = Tile { commits, traces: traces.into_iter().map(|(t, tr)| (t.0, tr)).collect() };
        build_tile_index(&tile, |_, _| Label::Untriaged)
    }

    #[test]
    fn no_params_returns_every_test() {
        let index = tile_and_index();
        let (summaries, effective) = list_test_details(&index, &Query::default());
        assert_eq!(summaries.len(), 5);
        assert!(effective.params.is_empty());
    }

    #[test]
    fn filters_by_param_value() {
        let index = tile_and_index();
        let mut query = Query::default();
        query.params.insert("name".into(), vec!["t1".into()]);
        let (summaries, effective) = list_test_details(&index, &query);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].test, TestName::from("t1"));
        assert_eq!(effective.params["name"], vec!["t1".to_string()]);
    }

    #[test]
    fn unknown_key_is_ignored_and_falls_back_to_full_set() {
        let index = tile_and_index();
        let mut query = Query::default();
        query.params.insert("nope".into(), vec!["anything".into()]);
        let (summaries, effective) = list_test_details(&index, &query);
        assert_eq!(summaries.len(), 5);
        assert!(effective.params.is_empty());
    }

    #[test]
    fn get_test_details_scopes_to_one_test() {
        let index = tile_and_index();
        let (summary, _) = get_test_details(&index, &TestName::from("t1"), &Query::default());
        assert_eq!(summary.test, TestName::from("t1"));
    }
}
