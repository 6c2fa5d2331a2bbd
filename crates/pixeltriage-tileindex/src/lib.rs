//! Tile Analyzer (spec §4.1): polls a [`TraceStore`](trace_store::TraceStore)
//! into a labeled, queryable [`TileIndex`](index::TileIndex), replaced
//! atomically on every tick, with derived query/status/blame views and a
//! relabel path wired to [`pixeltriage_expectations`] change events.

#![forbid(unsafe_code)]

pub mod analyzer;
pub mod blame;
pub mod index;
pub mod query;
pub mod status;
pub mod trace_store;

pub use analyzer::Analyzer;
pub use index::{build_tile_index, relabel_test, TileIndex, CORPUS_KEY, DEFAULT_CORPUS, TEST_NAME_KEY};
pub use query::{get_test_details, list_test_details, EffectiveQuery, Query};
pub use status::get_status;
pub use trace_store::{InMemoryTraceStore, Tile, TraceId, TraceStore};
