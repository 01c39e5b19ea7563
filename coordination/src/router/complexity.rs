//! Task complexity scoring
//!
//! A pure, bounded score in `[0, 1]` built from four declared signals:
//!
//! ```text
//! signal              | divisor | cap
//! --------------------|---------|-----
//! description words   |   200   | 0.3
//! requirements        |    10   | 0.2
//! domain keyword hits |     5   | 0.3
//! dependencies        |     5   | 0.2
//! ```
//!
//! Weights are configuration, not contract.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::task::Task;

/// One capped signal: `min(count / divisor, cap)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalWeight {
    pub divisor: f64,
    pub cap: f64,
}

impl SignalWeight {
    pub const fn new(divisor: f64, cap: f64) -> Self {
        Self { divisor, cap }
    }

    fn apply(&self, count: usize) -> f64 {
        if self.divisor <= 0.0 {
            return 0.0;
        }
        (count as f64 / self.divisor).min(self.cap).max(0.0)
    }
}

/// Weights for `compute_complexity`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityWeights {
    pub words: SignalWeight,
    pub requirements: SignalWeight,
    pub keywords: SignalWeight,
    pub dependencies: SignalWeight,
    /// Domain keywords that signal a harder task
    pub domain_keywords: Vec<String>,
}

impl Default for ComplexityWeights {
    fn default() -> Self {
        Self {
            words: SignalWeight::new(200.0, 0.3),
            requirements: SignalWeight::new(10.0, 0.2),
            keywords: SignalWeight::new(5.0, 0.3),
            dependencies: SignalWeight::new(5.0, 0.2),
            domain_keywords: [
                "architecture",
                "design",
                "scalable",
                "distributed",
                "optimization",
                "algorithm",
                "performance",
                "security",
                "integration",
                "microservice",
                "async",
                "concurrent",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Lowercased alphanumeric tokens of a text
pub(crate) fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_' && c != '+' && c != '#')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Score a task's complexity. Stable across repeated calls.
pub fn compute_complexity(task: &Task, weights: &ComplexityWeights) -> f64 {
    let word_count = task.description.split_whitespace().count();

    let text = format!("{} {}", task.title, task.description);
    let words: BTreeSet<String> = tokens(&text).collect();
    let keyword_hits = weights
        .domain_keywords
        .iter()
        .filter(|k| words.contains(&k.to_lowercase()))
        .count();

    let score = weights.words.apply(word_count)
        + weights.requirements.apply(task.requirements().len())
        + weights.keywords.apply(keyword_hits)
        + weights.dependencies.apply(task.dependencies.len());

    score.clamp(0.0, 1.0)
}
