//! Shared test-only helpers (teacher precedent: `mcp-agent-mail-core::test_harness`).
//!
//! Builds the small fixtures used across this workspace's integration
//! tests so each subsystem crate doesn't redefine them: a toy tile and
//! an initial expectations table matching the §8 scenario 1 layout.

use crate::types::{Commit, Digest, Label, Params, TestName, Trace};
use std::collections::BTreeMap;

/// Builds the five-test, four-commit tile from spec §8 scenario 1:
/// `[[d_11,d_12,MISS,d_14], ..., [d_51,d_52,MISS,d_54]]`.
#[must_use]
pub fn sample_tile() -> (Vec<Commit>, BTreeMap<TestName, Trace>) {
    let commits = vec![
        Commit { hash: "h1".into(), author: "a".into(), commit_time: 1 },
        Commit { hash: "h2".into(), author: "a".into(), commit_time: 2 },
        Commit { hash: "h3".into(), author: "a".into(), commit_time: 3 },
        Commit { hash: "h4".into(), author: "a".into(), commit_time: 4 },
    ];

    let mut traces = BTreeMap::new();
    for (i, test) in ["t1", "t2", "t3", "t4", "t5"].iter().enumerate() {
        let n = i + 1;
        let mut params: Params = BTreeMap::new();
        params.insert("name".into(), (*test).to_string());
        params.insert("p1".into(), "v11".into());
        let digests = vec![
            Digest::from(format!("d_{n}1").as_str()),
            Digest::from(format!("d_{n}2").as_str()),
            Digest::from(""),
            Digest::from(format!("d_{n}4").as_str()),
        ];
        traces.insert(TestName::from(*test), Trace::new(params, digests));
    }
    (commits, traces)
}

/// Convenience builder for a `(TestName, Digest, Label)` delta map.
#[must_use]
pub fn one_delta(test: &str, digest: &str, label: Label) -> crate::types::Delta {
    let mut delta = crate::types::Delta::new();
    delta
        .entry(TestName::from(test))
        .or_default()
        .insert(Digest::from(digest), label);
    delta
}
