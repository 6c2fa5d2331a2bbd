//! Core domain types shared by every subsystem: tests, digests, labels,
//! params, commits, traces, and the triage log/audit shapes that sit on
//! top of them.
//!
//! No I/O lives here — this module is pure data plus the small amount of
//! logic (classification lookups, merges) that every subsystem needs a
//! consistent answer for.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque string identifying a test. Thin newtype (teacher precedent:
/// `InternedStr` wrapping in `mcp-agent-mail-core::intern`) so call sites
/// can't accidentally transpose a test name and a digest, both of which
/// are plain strings underneath.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TestName(pub String);

impl TestName {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TestName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TestName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Content hash (hex MD5) of a rendered image. Hex-encoded, lowercase,
/// 32 characters for a real digest; the sentinel empty-image digest
/// `d41d8cd98f00b204e9800998ecf8427e` is a legitimate value recognized by
/// `DiffStore` as permanently unavailable (spec §4.3).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(pub String);

/// MD5 of the empty byte string. Permanently unavailable per spec §4.3.
pub const EMPTY_IMAGE_DIGEST: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Sentinel value marking a missing trace slot (no sample for that commit).
pub const MISSING_DIGEST: &str = "";

impl Digest {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn is_empty_image(&self) -> bool {
        self.0 == EMPTY_IMAGE_DIGEST
    }

    /// Canonical basename for a diff pair: `min(a,b)-max(a,b)`. Guarantees
    /// `diff(a,b)` and `diff(b,a)` map to the same cache key (spec §4.3
    /// "Symmetry & dedup").
    #[must_use]
    pub fn canonical_pair_key(a: &Digest, b: &Digest) -> String {
        if a.0 <= b.0 {
            format!("{}-{}", a.0, b.0)
        } else {
            format!("{}-{}", b.0, a.0)
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Digest {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Digest {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Triage outcome for a (test, digest) pair. Default when absent is
/// `Untriaged` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Untriaged,
    Positive,
    Negative,
}

impl Default for Label {
    fn default() -> Self {
        Self::Untriaged
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Untriaged => "untriaged",
            Self::Positive => "positive",
            Self::Negative => "negative",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "untriaged" => Ok(Self::Untriaged),
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            other => Err(format!("unknown label: {other}")),
        }
    }
}

/// Mapping from param-key to param-value for one trace. Keys/values are
/// plain strings; two keys are given semantic meaning by the caller (the
/// primary key names the `TestName`, another names the corpus) rather than
/// being baked into this type, matching spec §3.
pub type Params = BTreeMap<String, String>;

/// `{hash, author, commit-time}` — one entry in a tile's ordered commit
/// sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub author: String,
    pub commit_time: i64,
}

/// Params + an ordered sequence of digest slots aligned with a tile's
/// commits. A slot holding `MISSING_DIGEST` means no sample was recorded
/// for that commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub params: Params,
    pub digests: Vec<Digest>,
}

impl Trace {
    #[must_use]
    pub fn new(params: Params, digests: Vec<Digest>) -> Self {
        Self { params, digests }
    }

    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// A [`Trace`] reduced to the subset of commit indices whose slot is
/// non-missing, paired with the label looked up for each `(TestName,
/// Digest)` at that slot.
///
/// Invariant: `commit_ids.len() == digests.len() == labels.len()`, and
/// `commit_ids` is strictly increasing (spec §3, tested in §8).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledTrace {
    pub params: Params,
    pub commit_ids: Vec<usize>,
    pub digests: Vec<Digest>,
    pub labels: Vec<Label>,
}

impl LabeledTrace {
    /// Builds a `LabeledTrace` from a raw trace by dropping missing slots
    /// and resolving each remaining digest's label via `classify`.
    pub fn from_trace(trace: &Trace, mut classify: impl FnMut(&Digest) -> Label) -> Self {
        let mut commit_ids = Vec::new();
        let mut digests = Vec::new();
        let mut labels = Vec::new();
        for (idx, d) in trace.digests.iter().enumerate() {
            if d.is_missing() {
                continue;
            }
            commit_ids.push(idx);
            labels.push(classify(d));
            digests.push(d.clone());
        }
        Self {
            params: trace.params.clone(),
            commit_ids,
            digests,
            labels,
        }
    }

    /// Recomputes every label in place from an updated classifier. Used by
    /// the Analyzer's relabel-on-change path (spec §4.1): this mutates the
    /// label slice only, the trace's commit/digest structure is unchanged.
    pub fn relabel(&mut self, mut classify: impl FnMut(&Digest) -> Label) {
        for (label, digest) in self.labels.iter_mut().zip(self.digests.iter()) {
            *label = classify(digest);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commit_ids.is_empty()
    }

    /// The trace's own tip: the last non-missing slot, i.e. the last
    /// entry of `commit_ids`/`digests`/`labels`. Per spec §9 "Status
    /// semantics", this is *not* necessarily the tile's global tip index.
    #[must_use]
    pub fn tip(&self) -> Option<(usize, &Digest, Label)> {
        let n = self.commit_ids.len();
        if n == 0 {
            return None;
        }
        Some((self.commit_ids[n - 1], &self.digests[n - 1], self.labels[n - 1]))
    }
}

/// The full `TestName -> Digest -> Label` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectations {
    entries: BTreeMap<TestName, BTreeMap<Digest, Label>>,
}

impl Expectations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored label for `(test, digest)`, or `Label::Untriaged` if absent.
    #[must_use]
    pub fn classification(&self, test: &TestName, digest: &Digest) -> Label {
        self.entries
            .get(test)
            .and_then(|m| m.get(digest))
            .copied()
            .unwrap_or_default()
    }

    pub fn set(&mut self, test: TestName, digest: Digest, label: Label) {
        self.entries.entry(test).or_default().insert(digest, label);
    }

    #[must_use]
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    /// Merges `other` into a copy of `self`; on key collision `other`
    /// wins (spec §3 "right wins", tested in §8 scenario for `addChange`
    /// sequencing).
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for (test, digests) in &other.entries {
            for (digest, label) in digests {
                out.set(test.clone(), digest.clone(), *label);
            }
        }
        out
    }

    /// Iterates every `(test, digest, label)` triple in the table.
    pub fn for_all(&self, mut f: impl FnMut(&TestName, &Digest, Label)) {
        for (test, digests) in &self.entries {
            for (digest, label) in digests {
                f(test, digest, *label);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A single `(test, digest) -> new label` instruction plus (filled in by
/// the store) the label it replaces. `ExpectationsStore::add_change` takes
/// a batch of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEntry {
    pub test: TestName,
    pub digest: Digest,
    pub label: Label,
}

/// A flattened `delta` map, as accepted by `ExpectationsStore::add_change`:
/// `TestName -> Digest -> new Label`.
pub type Delta = BTreeMap<TestName, BTreeMap<Digest, Label>>;

#[must_use]
pub fn delta_entries(delta: &Delta) -> Vec<DeltaEntry> {
    let mut out = Vec::new();
    for (test, digests) in delta {
        for (digest, label) in digests {
            out.push(DeltaEntry {
                test: test.clone(),
                digest: digest.clone(),
                label: *label,
            });
        }
    }
    out
}

/// One row of an [`ExpectationChange`]: the before/after label for a
/// single `(test, digest)` touched by that change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub test: TestName,
    pub digest: Digest,
    pub label_before: Label,
    pub label_after: Label,
}

/// Append-only audit record for one `add_change` call. `schema_version`
/// is reserved for forward migrations (SPEC_FULL §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectationChange {
    pub id: String,
    pub user_id: String,
    pub timestamp: i64,
    pub committed: bool,
    pub count: usize,
    pub entries: Vec<ChangeEntry>,
    pub undo_of_id: Option<String>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

fn default_schema_version() -> u32 {
    1
}

/// Projection of an [`ExpectationChange`] for `queryLog` consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageLogEntry {
    pub id: String,
    pub user_id: String,
    pub timestamp: i64,
    pub count: usize,
    pub undo_of_id: Option<String>,
    pub entries: Option<Vec<ChangeEntry>>,
}

impl From<&ExpectationChange> for TriageLogEntry {
    fn from(c: &ExpectationChange) -> Self {
        Self {
            id: c.id.clone(),
            user_id: c.user_id.clone(),
            timestamp: c.timestamp,
            count: c.count,
            undo_of_id: c.undo_of_id.clone(),
            entries: None,
        }
    }
}

/// Either a precise total or a marker meaning "too expensive to count
/// exactly" (spec §4.2 `queryLog`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogTotal {
    Exact(usize),
    CountMany,
}

/// Aggregate counts + untriaged digest set for one test, plus the
/// overall status derived from it (spec §3 `Summary` / `TriageStatus`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub test: TestName,
    pub untriaged_digests: Vec<Digest>,
    pub pos_count: usize,
    pub neg_count: usize,
    pub untriaged_count: usize,
}

/// `{pixelDiffPercent, maxRGBADiffs[4], numDiffPixels, dimDiffer,
/// combinedMetric, diffImagePath}` (spec §3). Symmetric by construction:
/// callers always look it up under `Digest::canonical_pair_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffMetrics {
    pub pixel_diff_percent: f64,
    pub max_rgba_diffs: [u8; 4],
    pub num_diff_pixels: u64,
    pub dim_differ: bool,
    pub combined_metric: f64,
    pub diff_image_path: String,
}

/// `{digest, combinedMetric, pixelDiffPercent, maxRGBA}`; the sentinel "no
/// digest found" is represented by [`Closest::none`] (empty digest,
/// `f64::MAX` metric) per spec §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Closest {
    pub digest: Digest,
    pub combined_metric: f64,
    pub pixel_diff_percent: f64,
    pub max_rgba: Vec<u8>,
}

impl Closest {
    #[must_use]
    pub fn none() -> Self {
        Self {
            digest: Digest::new(""),
            combined_metric: f64::MAX,
            pixel_diff_percent: 0.0,
            max_rgba: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.digest.is_missing()
    }
}

/// `{digest, freq[]}` — per-test histogram over a contiguous commit range
/// estimating which commit introduced an untriaged digest (spec §3, §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameDistribution {
    pub digest: Digest,
    pub freq: Vec<u32>,
}

/// Per-corpus status: tip state plus untriaged/negative counts (spec §4.1
/// "Status").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusStatus {
    pub corpus: String,
    pub ok: bool,
    pub min_commit_hash: Option<String>,
    pub untriaged_count: usize,
    pub negative_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_defaults_to_untriaged() {
        let exp = Expectations::new();
        assert_eq!(
            exp.classification(&TestName::from("t1"), &Digest::from("d1")),
            Label::Untriaged
        );
    }

    #[test]
    fn merge_right_wins() {
        let mut a = Expectations::new();
        a.set(TestName::from("t1"), Digest::from("d1"), Label::Negative);
        let mut b = Expectations::new();
        b.set(TestName::from("t1"), Digest::from("d1"), Label::Positive);
        let merged = a.merge(&b);
        assert_eq!(
            merged.classification(&TestName::from("t1"), &Digest::from("d1")),
            Label::Positive
        );
    }

    #[test]
    fn canonical_pair_key_is_order_independent() {
        let a = Digest::from("bbb");
        let b = Digest::from("aaa");
        assert_eq!(
            Digest::canonical_pair_key(&a, &b),
            Digest::canonical_pair_key(&b, &a)
        );
        assert_eq!(Digest::canonical_pair_key(&a, &b), "aaa-bbb");
    }

    #[test]
    fn labeled_trace_invariant_holds() {
        let mut params = Params::new();
        params.insert("name".into(), "t1".into());
        let trace = Trace::new(
            params,
            vec![
                Digest::from("d1"),
                Digest::from(""),
                Digest::from("d3"),
            ],
        );
        let lt = LabeledTrace::from_trace(&trace, |_| Label::Untriaged);
        assert_eq!(lt.commit_ids.len(), lt.digests.len());
        assert_eq!(lt.digests.len(), lt.labels.len());
        assert_eq!(lt.commit_ids, vec![0, 2]);
        assert!(lt.commit_ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn relabel_mutates_in_place_without_changing_structure() {
        let mut params = Params::new();
        params.insert("name".into(), "t1".into());
        let trace = Trace::new(params, vec![Digest::from("d1")]);
        let mut lt = LabeledTrace::from_trace(&trace, |_| Label::Untriaged);
        assert_eq!(lt.labels[0], Label::Untriaged);
        lt.relabel(|_| Label::Positive);
        assert_eq!(lt.labels[0], Label::Positive);
        assert_eq!(lt.digests, vec![Digest::from("d1")]);
    }
}
