//! Fixed key-space sharding by MD5 digest ranges (spec §4.2 "Read path
//! (master)": "split the key-space into N shards (power-of-two; ≈32
//! recommended) by MD5 digest ranges"; spec §9 "Fixed key-space
//! sharding").
//!
//! A digest is already an MD5 hex string, so the shard a `(grouping,
//! digest)` entry belongs to is determined purely from the numeric value
//! of the digest's leading 8 hex characters — no hashing needed.

use crate::document_store::QueryFilter;

/// Splits the full `u32` keyspace into `num_shards` equal (±1) ranges.
#[must_use]
pub fn shard_ranges(num_shards: usize) -> Vec<(u32, Option<u32>)> {
    let num_shards = u64::try_from(num_shards.max(1)).unwrap_or(1);
    let span = (u64::from(u32::MAX) + 1) / num_shards;
    (0..num_shards)
        .map(|i| {
            #[allow(clippy::cast_possible_truncation)]
            let start = (i * span) as u32;
            let end = if i + 1 == num_shards {
                None
            } else {
                #[allow(clippy::cast_possible_truncation)]
                let e = ((i + 1) * span) as u32;
                Some(e)
            };
            (start, end)
        })
        .collect()
}

/// Numeric value of `digest`'s leading 8 hex characters, or 0 if it is
/// shorter or not hex (malformed digests sort into the first shard rather
/// than panicking).
#[must_use]
pub fn digest_prefix(digest: &str) -> u32 {
    let hex8 = digest.get(0..8).unwrap_or(digest);
    u32::from_str_radix(hex8, 16).unwrap_or(0)
}

#[must_use]
pub fn in_range(digest: &str, range: (u32, Option<u32>)) -> bool {
    let p = digest_prefix(digest);
    let (start, end) = range;
    p >= start && end.is_none_or(|e| p < e)
}

/// Builds one [`QueryFilter`] per shard for a live-snapshot subscription
/// over the master branch (spec §4.2 "entries where `crsClId = master`
/// and `digest` in `[rangeStart, rangeEnd)`").
#[must_use]
pub fn master_shard_filters(num_shards: usize, crs_cl_id: &str) -> Vec<QueryFilter> {
    shard_ranges(num_shards)
        .into_iter()
        .map(|range| QueryFilter {
            crs_cl_id: Some(crs_cl_id.to_string()),
            digest_range: Some(range),
            committed: None,
            order_by_ts_desc: false,
            offset: 0,
            limit: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_ranges_cover_the_full_keyspace_without_gaps() {
        let ranges = shard_ranges(32);
        assert_eq!(ranges.len(), 32);
        assert_eq!(ranges[0].0, 0);
        for w in ranges.windows(2) {
            assert_eq!(w[0].1, Some(w[1].0));
        }
        assert!(ranges.last().unwrap().1.is_none());
    }

    #[test]
    fn digest_prefix_parses_leading_hex() {
        assert_eq!(digest_prefix("00000000aaaa"), 0);
        assert_eq!(digest_prefix("ffffffffaaaa"), u32::MAX);
        assert_eq!(digest_prefix(""), 0);
    }

    #[test]
    fn in_range_respects_half_open_bounds() {
        let range = (10u32, Some(20u32));
        assert!(!in_range(&format!("{:08x}", 9u32), range));
        assert!(in_range(&format!("{:08x}", 10u32), range));
        assert!(in_range(&format!("{:08x}", 19u32), range));
        assert!(!in_range(&format!("{:08x}", 20u32), range));
    }

    #[test]
    fn every_digest_lands_in_exactly_one_shard() {
        let ranges = shard_ranges(8);
        for sample in ["00000000", "1fffffff", "80000000", "ffffffff"] {
            let count = ranges.iter().filter(|&&r| in_range(sample, r)).count();
            assert_eq!(count, 1, "digest {sample} matched {count} shards");
        }
    }
}
