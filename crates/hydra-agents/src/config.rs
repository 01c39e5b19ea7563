use std::time::Duration;

use serde::Deserialize;

/// One OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Endpoint {
    /// Base URL up to and including `/v1`
    pub url: String,
    pub model: String,
}

impl Endpoint {
    /// Full chat-completions URL
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.url.trim_end_matches('/'))
    }
}

/// Model endpoints for the three external services.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentsConfig {
    /// Candidate generation (architect and worker roles)
    pub generator: Endpoint,
    /// Verifier roles (qa_sentinel, architect)
    pub verifier: Endpoint,
    /// Consensus judge
    pub arbiter: Endpoint,
    /// Bearer token sent to every endpoint, if set
    pub api_key: Option<String>,
    /// Transport-level ceiling; the engine applies its own per-call timeouts
    pub request_timeout: Duration,
}

const DEFAULT_URL: &str = "http://localhost:8080/v1";
const DEFAULT_MODEL: &str = "qwen2.5-coder-14b-instruct";

impl Default for AgentsConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl AgentsConfig {
    /// Build from `HYDRA_*` variables resolved through `lookup`.
    ///
    /// Verifier and arbiter fall back to the generator's URL and model.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let generator = Endpoint {
            url: lookup("HYDRA_GENERATOR_URL").unwrap_or_else(|| DEFAULT_URL.into()),
            model: lookup("HYDRA_GENERATOR_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
        };
        let endpoint = |prefix: &str| Endpoint {
            url: lookup(&format!("HYDRA_{prefix}_URL")).unwrap_or_else(|| generator.url.clone()),
            model: lookup(&format!("HYDRA_{prefix}_MODEL"))
                .unwrap_or_else(|| generator.model.clone()),
        };
        let verifier = endpoint("VERIFIER");
        let arbiter = endpoint("ARBITER");

        let request_timeout = lookup("HYDRA_REQUEST_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(300));

        Self {
            generator,
            verifier,
            arbiter,
            api_key: lookup("HYDRA_API_KEY").filter(|k| !k.is_empty()),
            request_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = AgentsConfig::from_lookup(lookup(&[]));
        assert_eq!(config.generator.url, DEFAULT_URL);
        assert_eq!(config.arbiter, config.generator);
        assert!(config.api_key.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_verifier_and_arbiter_inherit_generator() {
        let config = AgentsConfig::from_lookup(lookup(&[
            ("HYDRA_GENERATOR_URL", "http://gpu-1:8000/v1"),
            ("HYDRA_GENERATOR_MODEL", "coder"),
            ("HYDRA_ARBITER_MODEL", "judge"),
            ("HYDRA_REQUEST_TIMEOUT_SECS", "30"),
            ("HYDRA_API_KEY", ""),
        ]));
        assert_eq!(config.verifier.url, "http://gpu-1:8000/v1");
        assert_eq!(config.verifier.model, "coder");
        assert_eq!(config.arbiter.url, "http://gpu-1:8000/v1");
        assert_eq!(config.arbiter.model, "judge");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_completions_url() {
        let endpoint = Endpoint {
            url: "http://host:8080/v1/".into(),
            model: "m".into(),
        };
        assert_eq!(endpoint.completions_url(), "http://host:8080/v1/chat/completions");
    }
}
