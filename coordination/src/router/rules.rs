//! Ordered routing rule table.
//!
//! Rules are evaluated top-down and the first match wins. The table always
//! carries a default agent, so routing is total.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::complexity::tokens;
use crate::task::{AgentId, Task};

/// What a rule matches on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    /// `metadata.agent` is set; routes to that agent
    ExplicitAgent,
    /// Complexity score at or above a threshold
    ComplexityAtLeast { threshold: f64 },
    /// `metadata.language` is one of these (case-insensitive)
    LanguageIn { languages: Vec<String> },
    /// Title or description contains any of these words
    KeywordAny { keywords: Vec<String> },
}

/// One row of the routing table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub name: String,
    #[serde(flatten)]
    pub condition: RuleCondition,
    /// Target agent; ignored by `ExplicitAgent`
    #[serde(default)]
    pub agent: AgentId,
}

impl RoutingRule {
    pub fn new(name: &str, condition: RuleCondition, agent: &str) -> Self {
        Self {
            name: name.to_string(),
            condition,
            agent: agent.to_string(),
        }
    }

    /// The agent this rule routes to, if it matches
    fn evaluate(&self, task: &Task, words: &BTreeSet<String>, complexity: f64) -> Option<AgentId> {
        match &self.condition {
            RuleCondition::ExplicitAgent => task
                .metadata
                .get("agent")
                .and_then(|v| v.as_str())
                .filter(|a| !a.trim().is_empty())
                .map(str::to_string),
            RuleCondition::ComplexityAtLeast { threshold } => {
                (complexity >= *threshold).then(|| self.agent.clone())
            }
            RuleCondition::LanguageIn { languages } => {
                let lang = task.language()?.to_lowercase();
                languages
                    .iter()
                    .any(|l| l.eq_ignore_ascii_case(&lang))
                    .then(|| self.agent.clone())
            }
            RuleCondition::KeywordAny { keywords } => keywords
                .iter()
                .any(|k| words.contains(&k.to_lowercase()))
                .then(|| self.agent.clone()),
        }
    }
}

/// Which rule produced a routing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub agent: AgentId,
    /// Rule name, or `"default"`
    pub rule: String,
}

/// Ordered rules plus a mandatory default
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingTable {
    rules: Vec<RoutingRule>,
    default_agent: AgentId,
}

const FRONTEND_LANGUAGES: &[&str] = &[
    "javascript",
    "typescript",
    "jsx",
    "tsx",
    "html",
    "css",
    "scss",
    "sass",
    "vue",
    "svelte",
];

const BACKEND_LANGUAGES: &[&str] = &[
    "python", "go", "rust", "java", "c", "cpp", "ruby", "php", "elixir", "scala", "kotlin",
];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl RoutingTable {
    pub fn new(rules: Vec<RoutingRule>, default_agent: AgentId) -> Self {
        Self {
            rules,
            default_agent,
        }
    }

    /// The built-in table: explicit assignment, escalation of complex work,
    /// language hints, then keyword families.
    pub fn default_rules() -> Vec<RoutingRule> {
        vec![
            RoutingRule::new("explicit-agent", RuleCondition::ExplicitAgent, ""),
            RoutingRule::new(
                "high-complexity",
                RuleCondition::ComplexityAtLeast { threshold: 0.8 },
                "architect",
            ),
            RoutingRule::new(
                "frontend-language",
                RuleCondition::LanguageIn {
                    languages: strings(FRONTEND_LANGUAGES),
                },
                "worker_frontend",
            ),
            RoutingRule::new(
                "backend-language",
                RuleCondition::LanguageIn {
                    languages: strings(BACKEND_LANGUAGES),
                },
                "worker_backend",
            ),
            RoutingRule::new(
                "planning",
                RuleCondition::KeywordAny {
                    keywords: strings(&["plan", "architect", "design", "schema", "structure"]),
                },
                "architect",
            ),
            RoutingRule::new(
                "frontend",
                RuleCondition::KeywordAny {
                    keywords: strings(&["frontend", "ui", "react", "vue", "component", "css", "html"]),
                },
                "worker_frontend",
            ),
            RoutingRule::new(
                "backend",
                RuleCondition::KeywordAny {
                    keywords: strings(&["backend", "api", "database", "server", "python", "go"]),
                },
                "worker_backend",
            ),
            RoutingRule::new(
                "verification",
                RuleCondition::KeywordAny {
                    keywords: strings(&["test", "verify", "qa", "validate", "check"]),
                },
                "qa_sentinel",
            ),
        ]
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    /// First matching rule wins; the default always matches.
    pub fn route(&self, task: &Task, complexity: f64) -> RouteDecision {
        let text = format!("{} {}", task.title, task.description);
        let words: BTreeSet<String> = tokens(&text).collect();

        for rule in &self.rules {
            if let Some(agent) = rule.evaluate(task, &words, complexity) {
                return RouteDecision {
                    agent,
                    rule: rule.name.clone(),
                };
            }
        }

        RouteDecision {
            agent: self.default_agent.clone(),
            rule: "default".to_string(),
        }
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new(Self::default_rules(), "architect".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn route(task: &Task, complexity: f64) -> RouteDecision {
        RoutingTable::default().route(task, complexity)
    }

    #[test]
    fn test_explicit_agent_wins() {
        let task = Task::new("t1", "UI", "Build a react component")
            .with_metadata("agent", json!("qa_sentinel"));
        let decision = route(&task, 0.95);
        assert_eq!(decision.agent, "qa_sentinel");
        assert_eq!(decision.rule, "explicit-agent");
    }

    #[test]
    fn test_high_complexity_escalates() {
        let task = Task::new("t1", "x", "y").with_metadata("language", json!("typescript"));
        assert_eq!(route(&task, 0.85).agent, "architect");
        assert_eq!(route(&task, 0.5).agent, "worker_frontend");
    }

    #[test]
    fn test_language_beats_keywords() {
        let task = Task::new("t1", "Write tests", "test the parser")
            .with_metadata("language", json!("Rust"));
        assert_eq!(route(&task, 0.1).agent, "worker_backend");
    }

    #[test]
    fn test_keyword_families() {
        let cases = [
            ("Design the schema", "architect"),
            ("Style the login form with css", "worker_frontend"),
            ("Add database migration", "worker_backend"),
            ("Verify the release", "qa_sentinel"),
        ];
        for (description, agent) in cases {
            let task = Task::new("t", "task", description);
            assert_eq!(route(&task, 0.0).agent, agent, "{description}");
        }
    }

    #[test]
    fn test_keywords_match_whole_words() {
        // "going" must not hit the "go" backend keyword
        let task = Task::new("t1", "Ongoing", "going forward");
        let decision = route(&task, 0.0);
        assert_eq!(decision.rule, "default");
        assert_eq!(decision.agent, "architect");
    }

    #[test]
    fn test_empty_table_routes_to_default() {
        let table = RoutingTable::new(Vec::new(), "worker_backend".into());
        let decision = table.route(&Task::new("t1", "a", "b"), 0.0);
        assert_eq!(decision.agent, "worker_backend");
    }

    #[test]
    fn test_rule_toml_shape() {
        #[derive(Deserialize)]
        struct Wrapper {
            rules: Vec<RoutingRule>,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
            [[rules]]
            name = "docs"
            kind = "keyword_any"
            keywords = ["docs", "readme"]
            agent = "writer"
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed.rules[0].condition,
            RuleCondition::KeywordAny {
                keywords: vec!["docs".into(), "readme".into()]
            }
        );
    }
}
