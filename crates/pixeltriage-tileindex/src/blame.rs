//! Blame distribution (spec §4.1 "Blame distribution"): per untriaged
//! digest, a rough vote count over the commit range that could have
//! introduced it.

use std::collections::BTreeMap;

use pixeltriage_core::{BlameDistribution, Digest, Label, TestName};

use crate::index::TileIndex;

/// For `test`, one [`BlameDistribution`] per untriaged digest observed
/// in any of its traces.
#[must_use]
pub fn blame_for_test(index: &TileIndex, test: &TestName) -> Vec<BlameDistribution> {
    let Some(trace_ids) = index.traces_by_test.get(test) else { return Vec::new() };

    // digest -> list of (first+1, first_appearance) candidate ranges
    // contributed by each trace that carries it untriaged.
    let mut ranges_by_digest: BTreeMap<Digest, Vec<(usize, usize)>> = BTreeMap::new();

    for trace_id in trace_ids {
        let Some(lt) = index.labeled.get(trace_id) else { continue };
        for (i, &commit_idx) in lt.commit_ids.iter().enumerate() {
            if lt.labels[i] != Label::Untriaged {
                continue;
            }
            let digest = lt.digests[i].clone();
            let first = lt.commit_ids[..i].iter().zip(lt.labels[..i].iter()).rev().find(|(_, &label)| label != Label::Untriaged).map(|(&idx, _)| idx as i64).unwrap_or(-1);
            let first_appearance = commit_idx;
            #[allow(clippy::cast_sign_loss)]
            let range_start = (first + 1) as usize;
            ranges_by_digest.entry(digest).or_default().push((range_start, first_appearance));
        }
    }

    ranges_by_digest
        .into_iter()
        .map(|(digest, ranges)| {
            let min_start = ranges.iter().map(|(s, _)| *s).min().unwrap_or(0);
            let min_end = ranges.iter().map(|(_, e)| *e).min().unwrap_or(0);
            let len = min_end.saturating_sub(min_start) + 1;
            let mut freq = vec![0u32; len];
            for (start, end) in ranges {
                let lo = start.max(min_start);
                let hi = end.min(min_end);
                if lo > hi {
                    continue;
                }
                for slot in &mut freq[(lo - min_start)..=(hi - min_start)] {
                    *slot += 1;
                }
            }
            BlameDistribution { digest, freq }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build_tile_index;
    use crate::trace_store::Tile;
    use pixeltriage_core::test_harness::sample_tile;

    #[test]
    fn untriaged_digest_yields_a_nonempty_frequency_array() {
        let (commits, traces) = sample_tile();
        let tile = Tile { commits, traces: traces.into_iter().map(|(t, tr)| (t.0, tr)).collect() };
        let index = build_tile_index(&tile, |_, _| Label::Untriaged);
        let blame = blame_for_test(&index, &TestName::from("t1"));
        assert!(!blame.is_empty());
        for b in &blame {
            assert!(!b.freq.is_empty());
        }
    }

    #[test]
    fn fully_triaged_test_has_no_blame_entries() {
        let (commits, traces) = sample_tile();
        let tile = Tile { commits, traces: traces.into_iter().map(|(t, tr)| (t.0, tr)).collect() };
        let index = build_tile_index(&tile, |_, _| Label::Positive);
        let blame = blame_for_test(&index, &TestName::from("t1"));
        assert!(blame.is_empty());
    }
}
