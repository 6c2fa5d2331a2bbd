//! Optional JSONL mirror of committed audit records, for offline review
//! outside the document store (SPEC_FULL §4.2 ambient addition). Zero
//! overhead when the env var is unset, matching the stateless-emission
//! evidence ledger idiom in
//! `mcp-agent-mail-core::evidence_ledger::append_evidence_entry_if_configured`.
//!
//! This is a supplement, not a replacement: `queryLog` against the
//! document store remains the authoritative source.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use serde::Serialize;

pub const EXPECTATIONS_LEDGER_PATH_ENV: &str = "PIXELTRIAGE_EXPECTATIONS_LEDGER_PATH";

static WRITE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

#[derive(Debug, Serialize)]
struct LedgerEntry<'a> {
    record_id: &'a str,
    user_id: &'a str,
    timestamp: i64,
    crs_cl_id: &'a str,
    undo_of_id: Option<&'a str>,
    count: usize,
}

fn configured_path() -> Option<PathBuf> {
    let raw = std::env::var(EXPECTATIONS_LEDGER_PATH_ENV).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

/// Appends one record to the configured JSONL ledger. No-op (returns
/// `Ok(false)`) when `PIXELTRIAGE_EXPECTATIONS_LEDGER_PATH` is unset.
pub fn record_if_configured(change: &pixeltriage_core::ExpectationChange, crs_cl_id: &str) -> io::Result<bool> {
    let Some(path) = configured_path() else {
        return Ok(false);
    };
    let entry = LedgerEntry {
        record_id: &change.id,
        user_id: &change.user_id,
        timestamp: change.timestamp,
        crs_cl_id,
        undo_of_id: change.undo_of_id.as_deref(),
        count: change.count,
    };

    let lock = WRITE_LOCK.get_or_init(|| Mutex::new(()));
    let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &entry).map_err(io::Error::other)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixeltriage_core::ExpectationChange;
    use std::sync::Mutex as StdMutex;

    static ENV_GUARD: StdMutex<()> = StdMutex::new(());

    fn sample() -> ExpectationChange {
        ExpectationChange {
            id: "rec-1".into(),
            user_id: "u".into(),
            timestamp: 1,
            committed: true,
            count: 1,
            entries: Vec::new(),
            undo_of_id: None,
            schema_version: 1,
        }
    }

    #[test]
    fn disabled_when_env_unset() {
        let _guard = ENV_GUARD.lock().unwrap();
        std::env::remove_var(EXPECTATIONS_LEDGER_PATH_ENV);
        assert!(!record_if_configured(&sample(), "master").unwrap());
    }

    #[test]
    fn writes_one_jsonl_line_when_configured() {
        let _guard = ENV_GUARD.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        std::env::set_var(EXPECTATIONS_LEDGER_PATH_ENV, &path);
        assert!(record_if_configured(&sample(), "master").unwrap());
        std::env::remove_var(EXPECTATIONS_LEDGER_PATH_ENV);
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("\"record_id\":\"rec-1\""));
    }
}
