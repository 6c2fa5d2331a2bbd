//! `getStatus()` (spec §4.1 "Status"): per-corpus tip health derived from
//! every trace's own last non-missing slot — not the tile's global tip
//! index (spec §9 design note).

use std::collections::BTreeMap;

use pixeltriage_core::{CorpusStatus, Label};

use crate::index::TileIndex;

/// Per-corpus accumulator: `minCommitHash` tracks the smallest tip
/// commit index seen so far among this corpus's traces.
struct Accumulator {
    ok: bool,
    min_tip_index: Option<usize>,
    untriaged: std::collections::BTreeSet<String>,
    negative: std::collections::BTreeSet<String>,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self { ok: true, min_tip_index: None, untriaged: Default::default(), negative: Default::default() }
    }
}

/// Per spec §4.1: inspects each trace's tip (last slot), not the tile's
/// `lastCommitIndex`. A trace with no samples at all has no tip and is
/// skipped entirely — it does not affect `ok` (spec §9).
#[must_use]
pub fn get_status(index: &TileIndex) -> Vec<CorpusStatus> {
    let mut by_corpus: BTreeMap<String, Accumulator> = BTreeMap::new();

    for (trace_id, lt) in &index.labeled {
        let Some((tip_commit_idx, _digest, tip_label)) = lt.tip() else { continue };
        let corpus = index.corpus_of(trace_id).to_string();
        let acc = by_corpus.entry(corpus).or_default();

        if tip_label != Label::Positive {
            acc.ok = false;
        }
        match tip_label {
            Label::Untriaged => {
                acc.untriaged.insert(trace_id.clone());
            }
            Label::Negative => {
                acc.negative.insert(trace_id.clone());
            }
            Label::Positive => {}
        }
        acc.min_tip_index = Some(acc.min_tip_index.map_or(tip_commit_idx, |m| m.min(tip_commit_idx)));
    }

    by_corpus
        .into_iter()
        .map(|(corpus, acc)| CorpusStatus {
            corpus,
            ok: acc.ok,
            min_commit_hash: acc.min_tip_index.and_then(|i| index.commits.get(i)).map(|c| c.hash.clone()),
            untriaged_count: acc.untriaged.len(),
            negative_count: acc.negative.len(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build_tile_index;
    use crate::trace_store::Tile;
    use pixeltriage_core::test_harness::sample_tile;
    use pixeltriage_core::{Digest, TestName};

    fn tile_and_index(classify: impl FnMut(&TestName, &Digest) -> Label) -> TileIndex {
        let (commits, traces) = sample_tile();
        let tile = Tile { commits, traces: traces.into_iter().map(|(t, tr)| (t.0, tr)).collect() };
        build_tile_index(&tile, classify)
    }

    #[test]
    fn all_untriaged_is_not_ok() {
        let index = tile_and_index(|_, _| Label::Untriaged);
        let statuses = get_status(&index);
        assert_eq!(statuses.len(), 1);
        assert!(!statuses[0].ok);
        assert!(statuses[0].untriaged_count > 0);
    }

    #[test]
    fn all_positive_is_ok() {
        let index = tile_and_index(|_, _| Label::Positive);
        let statuses = get_status(&index);
        assert!(statuses[0].ok);
        assert_eq!(statuses[0].untriaged_count, 0);
        assert_eq!(statuses[0].negative_count, 0);
    }

    #[test]
    fn traceless_trace_is_skipped_and_does_not_break_ok() {
        // t4's digests include a missing slot at the tip-most commit per
        // the fixture; traces with zero samples entirely would have no
        // tip() and are simply absent from the accumulation.
        let index = tile_and_index(|_, _| Label::Positive);
        let statuses = get_status(&index);
        assert_eq!(statuses.len(), 1);
    }
}
