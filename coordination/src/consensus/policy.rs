//! Generation policies and prompt assembly
//!
//! Every policy gets the same task description and recalled context; only
//! the approach instruction and the sampling preset differ.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::memory::PatternSummary;
use crate::task::Task;

/// Generation policy tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    Conservative,
    Aggressive,
    Minimal,
    Defensive,
}

/// Sampling parameters sent with a generation request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Policy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Aggressive => "aggressive",
            Self::Minimal => "minimal",
            Self::Defensive => "defensive",
        }
    }

    /// Approach instruction appended to the prompt
    pub fn instruction(self) -> &'static str {
        match self {
            Self::Conservative => {
                "Prioritize safety, error handling, and robustness. Include extensive validation."
            }
            Self::Aggressive => {
                "Prioritize performance and efficiency. Use optimized algorithms and data structures."
            }
            Self::Minimal => {
                "Prioritize simplicity and readability. Write the smallest solution that works."
            }
            Self::Defensive => {
                "Prioritize security. Treat every input as hostile and fail closed."
            }
        }
    }

    pub fn parameters(self) -> GenerationParameters {
        match self {
            Self::Conservative => GenerationParameters {
                temperature: 0.2,
                max_tokens: 4096,
            },
            Self::Aggressive => GenerationParameters {
                temperature: 0.7,
                max_tokens: 4096,
            },
            Self::Minimal => GenerationParameters {
                temperature: 0.3,
                max_tokens: 2048,
            },
            Self::Defensive => GenerationParameters {
                temperature: 0.2,
                max_tokens: 4096,
            },
        }
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assemble the generation prompt for one policy.
pub fn build_prompt(task: &Task, policy: Policy, recalled: &[PatternSummary]) -> String {
    let mut prompt = format!("# Task: {}\n\n{}\n", task.title, task.description);

    if let Some(language) = task.language() {
        let _ = write!(prompt, "\nLanguage: {}\n", language);
    }
    if let Some(framework) = task.metadata.get("framework").and_then(|v| v.as_str()) {
        let _ = writeln!(prompt, "Framework: {}", framework);
    }

    let requirements = task.requirements();
    if !requirements.is_empty() {
        prompt.push_str("\n## Requirements\n");
        for req in &requirements {
            let _ = writeln!(prompt, "- {}", req);
        }
    }

    let _ = write!(
        prompt,
        "\n## Approach ({})\n{}\n",
        policy.as_str(),
        policy.instruction()
    );

    if !recalled.is_empty() {
        prompt.push_str("\n## Patterns from previous solutions\n");
        for pattern in recalled {
            let _ = write!(
                prompt,
                "\n### {} ({}, {})\n{}\n",
                pattern.name, pattern.kind, pattern.language, pattern.snippet
            );
        }
    }

    prompt
}
