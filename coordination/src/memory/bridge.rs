//! Memory bridge: recall before generation, learn after a winner.
//!
//! Neither direction can fail a task. Recall degrades to an empty list and
//! learning logs store failures and carries on.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::extractor::{ComplexityBucket, PatternExtractor};
use super::store::{
    Pattern, PatternKind, PatternQuery, PatternSummary, SharedPatternStore, StoreOutcome,
};
use crate::config::MemoryConfig;
use crate::consensus::{Candidate, ConsensusResult};
use crate::resilience::Degraded;
use crate::task::Task;

/// Shared reference to a MemoryBridge
pub type SharedMemoryBridge = Arc<MemoryBridge>;

/// What one learning pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnReport {
    pub stored: usize,
    pub duplicates: usize,
    pub failed: usize,
}

pub struct MemoryBridge {
    store: SharedPatternStore,
    extractor: PatternExtractor,
    config: MemoryConfig,
}

impl MemoryBridge {
    pub fn new(store: SharedPatternStore, extractor: PatternExtractor, config: MemoryConfig) -> Self {
        Self {
            store,
            extractor,
            config,
        }
    }

    pub fn shared(self) -> SharedMemoryBridge {
        Arc::new(self)
    }

    /// Whether winners should be fed back into the store
    pub fn learning_enabled(&self) -> bool {
        self.config.learn
    }

    /// Prior patterns relevant to a task description, best effort.
    pub async fn recall(
        &self,
        description: &str,
        language: Option<&str>,
    ) -> Degraded<Vec<PatternSummary>> {
        let query = PatternQuery {
            description: description.to_string(),
            language: language.map(str::to_string),
            limit: self.config.recall_limit,
        };
        match self.store.query(&query).await {
            Ok(mut hits) => {
                hits.truncate(self.config.recall_limit);
                debug!(hits = hits.len(), "Recalled patterns");
                Degraded::full(hits)
            }
            Err(e) => {
                warn!("Pattern recall failed, continuing without context: {}", e);
                Degraded::unavailable(Vec::new(), e.to_string())
            }
        }
    }

    /// Store the structural patterns of a winner plus the full solution.
    ///
    /// Re-running on the same winner stores nothing new.
    pub async fn learn_from_winner(
        &self,
        result: &ConsensusResult,
        winner: &Candidate,
        task: &Task,
    ) -> LearnReport {
        let language = task
            .language()
            .unwrap_or(&self.config.default_language)
            .to_string();
        let context = format!("{}: {}", task.title, task.description);
        let now = Utc::now();

        let mut records: Vec<Pattern> = self
            .extractor
            .extract(&winner.content)
            .into_iter()
            .map(|p| Pattern {
                name: p.name,
                kind: p.kind,
                content: p.content,
                language: language.clone(),
                context: context.clone(),
                complexity: p.complexity,
                success_score: result.score,
                task_id: task.id.clone(),
                created_at: now,
            })
            .collect();

        records.push(Pattern {
            name: format!("{}_solution", task.id),
            kind: PatternKind::Solution,
            content: winner.content.clone(),
            language: language.clone(),
            context,
            complexity: ComplexityBucket::classify(&winner.content),
            success_score: result.score,
            task_id: task.id.clone(),
            created_at: now,
        });

        let mut report = LearnReport::default();
        for record in records {
            let name = record.name.clone();
            match self.store.store(record).await {
                Ok(StoreOutcome::Stored) => report.stored += 1,
                Ok(StoreOutcome::Duplicate) => report.duplicates += 1,
                Err(e) => {
                    warn!(task_id = %task.id, pattern = %name, "Failed to store pattern: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            task_id = %task.id,
            stored = report.stored,
            duplicates = report.duplicates,
            failed = report.failed,
            "Learned from winner"
        );
        report
    }
}
