//! Pattern records and the store contract.
//!
//! Records are append-only. The store de-duplicates by content fingerprint,
//! so re-learning the same winner is a no-op.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::extractor::ComplexityBucket;
use crate::router::complexity::tokens;
use crate::task::TaskId;

/// Error type for memory store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Memory store unavailable: {0}")]
    Unavailable(String),

    #[error("Memory store rejected record: {0}")]
    Rejected(String),
}

/// Result type for memory store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a pattern store
pub type SharedPatternStore = Arc<dyn PatternStore>;

/// Structural shape of a stored pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Function,
    Type,
    ErrorHandling,
    /// The entire winning content
    Solution,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Function => write!(f, "function"),
            Self::Type => write!(f, "type"),
            Self::ErrorHandling => write!(f, "error_handling"),
            Self::Solution => write!(f, "solution"),
        }
    }
}

/// A reusable fragment extracted from a winning candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    pub kind: PatternKind,
    pub content: String,
    pub language: String,
    /// What the originating task was about
    pub context: String,
    pub complexity: ComplexityBucket,
    /// Consensus score of the winner this came from
    pub success_score: f64,
    pub task_id: TaskId,
    pub created_at: DateTime<Utc>,
}

impl Pattern {
    /// blake3 over kind, language and whitespace-normalized content.
    ///
    /// Timestamps and provenance are excluded, so the same fragment learned
    /// twice has the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let normalized: Vec<&str> = self.content.split_whitespace().collect();
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.kind.to_string().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.language.to_lowercase().as_bytes());
        hasher.update(&[0]);
        hasher.update(normalized.join(" ").as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// A recalled pattern, ready to append to a prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub name: String,
    pub kind: PatternKind,
    pub language: String,
    pub context: String,
    pub snippet: String,
    pub complexity: ComplexityBucket,
    /// Ranking score in [0, 1]
    pub relevance: f64,
}

/// Recall query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternQuery {
    pub description: String,
    pub language: Option<String>,
    pub limit: usize,
}

/// What `store` did with a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOutcome {
    Stored,
    /// A record with the same fingerprint already exists
    Duplicate,
}

/// Store/query contract of the memory backend
#[async_trait]
pub trait PatternStore: Send + Sync {
    async fn store(&self, pattern: Pattern) -> StoreResult<StoreOutcome>;

    /// Ranked, most relevant first
    async fn query(&self, query: &PatternQuery) -> StoreResult<Vec<PatternSummary>>;
}

const SNIPPET_CHARS: usize = 600;

/// In-process store ranked by lexical token overlap
#[derive(Debug, Default)]
pub struct InMemoryPatternStore {
    inner: RwLock<Inner>,
}

/// Records plus their fingerprints; the state both stores keep in memory
#[derive(Debug, Default)]
pub(super) struct Inner {
    pub(super) patterns: Vec<Pattern>,
    fingerprints: HashSet<String>,
}

impl Inner {
    /// Whether a record with this fingerprint is already held
    pub(super) fn contains(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    pub(super) fn insert(&mut self, fingerprint: String, pattern: Pattern) -> StoreOutcome {
        if !self.fingerprints.insert(fingerprint) {
            return StoreOutcome::Duplicate;
        }
        self.patterns.push(pattern);
        StoreOutcome::Stored
    }

    /// Lexical token overlap ranking
    pub(super) fn rank(&self, query: &PatternQuery) -> Vec<PatternSummary> {
        let wanted: BTreeSet<String> = tokens(&query.description).collect();
        if wanted.is_empty() || query.limit == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(f64, usize, &Pattern)> = self
            .patterns
            .iter()
            .enumerate()
            .filter(|(_, p)| match &query.language {
                Some(lang) => p.language.eq_ignore_ascii_case(lang),
                None => true,
            })
            .filter_map(|(i, p)| {
                let have: BTreeSet<String> =
                    tokens(&format!("{} {} {}", p.name, p.context, p.content)).collect();
                let overlap = wanted.intersection(&have).count();
                (overlap > 0).then(|| (overlap as f64 / wanted.len() as f64, i, p))
            })
            .collect();

        // Highest relevance first, then better past outcomes, then oldest
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then(b.2.success_score.total_cmp(&a.2.success_score))
                .then(a.1.cmp(&b.1))
        });

        scored
            .into_iter()
            .take(query.limit)
            .map(|(relevance, _, p)| PatternSummary {
                name: p.name.clone(),
                kind: p.kind,
                language: p.language.clone(),
                context: p.context.clone(),
                snippet: snippet(&p.content),
                complexity: p.complexity,
                relevance,
            })
            .collect()
    }
}

/// Reject records that carry nothing to recall
pub(super) fn check_storable(pattern: &Pattern) -> StoreResult<()> {
    if pattern.content.trim().is_empty() {
        return Err(StoreError::Rejected("empty pattern content".into()));
    }
    Ok(())
}

impl InMemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedPatternStore {
        Arc::new(self)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.patterns.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every stored record, in insertion order
    pub async fn patterns(&self) -> Vec<Pattern> {
        self.inner.read().await.patterns.clone()
    }
}

fn snippet(content: &str) -> String {
    if content.chars().count() <= SNIPPET_CHARS {
        return content.to_string();
    }
    let mut cut: String = content.chars().take(SNIPPET_CHARS).collect();
    cut.push_str("\n…");
    cut
}

#[async_trait]
impl PatternStore for InMemoryPatternStore {
    async fn store(&self, pattern: Pattern) -> StoreResult<StoreOutcome> {
        check_storable(&pattern)?;
        let fingerprint = pattern.fingerprint();
        Ok(self.inner.write().await.insert(fingerprint, pattern))
    }

    async fn query(&self, query: &PatternQuery) -> StoreResult<Vec<PatternSummary>> {
        Ok(self.inner.read().await.rank(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(name: &str, content: &str, language: &str) -> Pattern {
        Pattern {
            name: name.into(),
            kind: PatternKind::Function,
            content: content.into(),
            language: language.into(),
            context: "token bucket rate limiter".into(),
            complexity: ComplexityBucket::Low,
            success_score: 0.8,
            task_id: "t1".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_fingerprint_ignores_whitespace_and_provenance() {
        let a = pattern("refill", "fn refill() {\n    tokens += 1;\n}", "rust");
        let mut b = pattern("refill", "fn refill() { tokens += 1; }", "Rust");
        b.task_id = "t9".into();
        b.created_at = a.created_at + chrono::Duration::seconds(5);
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = a.clone();
        c.kind = PatternKind::Solution;
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[tokio::test]
    async fn test_store_deduplicates() {
        let store = InMemoryPatternStore::new();
        let p = pattern("refill", "fn refill() { tokens += 1; }", "rust");
        assert_eq!(store.store(p.clone()).await.unwrap(), StoreOutcome::Stored);
        assert_eq!(store.store(p).await.unwrap(), StoreOutcome::Duplicate);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_query_ranks_by_overlap_and_filters_language() {
        let store = InMemoryPatternStore::new();
        store
            .store(pattern("refill", "fn refill(bucket) {}", "rust"))
            .await
            .unwrap();
        store
            .store(pattern("parse_ini", "def parse_ini(path): pass", "python"))
            .await
            .unwrap();

        let hits = store
            .query(&PatternQuery {
                description: "rate limiter with refill".into(),
                language: Some("rust".into()),
                limit: 5,
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "refill");
        assert!(hits[0].relevance > 0.0 && hits[0].relevance <= 1.0);
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let store = InMemoryPatternStore::new();
        store.store(pattern("a", "fn a() {}", "rust")).await.unwrap();
        let hits = store
            .query(&PatternQuery {
                description: "   ".into(),
                language: None,
                limit: 5,
            })
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
