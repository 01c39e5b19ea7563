//! Pattern / Memory Bridge
//!
//! Closes the learning loop without blocking the critical path:
//!
//! - `store`: pattern records, the `PatternStore` contract and an in-process store
//! - `file_store`: the same store persisted as JSONL
//! - `extractor`: declarative structural matchers and complexity buckets
//! - `bridge`: best-effort recall and idempotent learning

pub mod bridge;
pub mod extractor;
pub mod file_store;
pub mod store;

pub use bridge::{LearnReport, MemoryBridge, SharedMemoryBridge};
pub use extractor::{
    ComplexityBucket, ExtractedPattern, Fragment, HeaderMatcher, PatternExtractor,
    StructuralMatcher,
};
pub use file_store::{store_from_config, FilePatternStore};
pub use store::{
    InMemoryPatternStore, Pattern, PatternKind, PatternQuery, PatternStore, PatternSummary,
    SharedPatternStore, StoreError, StoreOutcome, StoreResult,
};
