//! OpenAI-compatible HTTP clients for generation, verification and
//! arbitration.
//!
//! Every client speaks `POST {url}/chat/completions`. Timeouts here are a
//! transport ceiling only; the consensus engine bounds each call itself.

use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use hydra_coordination::services::{
    ArbiterDecision, ArbiterRequest, ArbiterService, GenerationRequest, GenerationResponse,
    GenerationService, ServiceError, ServiceResult, ServiceSet, TaskContext, VerificationRequest,
    VerificationResponse, VerificationService,
};

use crate::config::{AgentsConfig, Endpoint};
use crate::prompts::{system_prompt, DECISION_FORMAT, VERDICT_FORMAT};

/// Score at or above which a verdict without an explicit flag passes
const PASS_THRESHOLD: f64 = 0.6;

static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+.-]*[ \t]*\r?\n(.*?)```").expect("valid code block regex")
});
static PASS_MARK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bPASS(ED)?\b").expect("valid pass regex"));
static FAIL_MARK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bFAIL(ED)?\b").expect("valid fail regex"));

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
}

// ── Chat client ──────────────────────────────────────────────────────

/// One endpoint plus a pooled HTTP client
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: Endpoint,
    api_key: Option<String>,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(
        endpoint: Endpoint,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint,
            api_key,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send one chat completion and return the answer text
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
        temperature: f32,
    ) -> ServiceResult<String> {
        let request = ChatRequest {
            model: &self.endpoint.model,
            messages,
            max_tokens,
            temperature,
        };

        let mut builder = self
            .http
            .post(self.endpoint.completions_url())
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!(
                "{} returned {}: {}",
                self.endpoint.model,
                status,
                body.chars().take(200).collect::<String>()
            );
            return Err(
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    ServiceError::Unavailable(message)
                } else {
                    ServiceError::Transport(message)
                },
            );
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(format!("unparsable completion: {}", e)))?;
        let message = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::InvalidResponse("completion has no choices".into()))?
            .message;

        // Reasoning models may leave `content` empty and answer in the trace
        Ok(message
            .content
            .filter(|c| !c.trim().is_empty())
            .or(message.reasoning_content)
            .unwrap_or_default())
    }

    fn send_error(&self, error: reqwest::Error) -> ServiceError {
        if error.is_timeout() {
            ServiceError::Timeout(self.timeout)
        } else if error.is_connect() {
            ServiceError::Unavailable(format!("{}: {}", self.endpoint.url, error))
        } else {
            ServiceError::Transport(error.to_string())
        }
    }
}

// ── Generation ───────────────────────────────────────────────────────

pub struct HttpGenerator {
    client: ChatClient,
}

impl HttpGenerator {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GenerationService for HttpGenerator {
    async fn generate(&self, request: GenerationRequest) -> ServiceResult<GenerationResponse> {
        let started = Instant::now();
        let messages = vec![
            ChatMessage::system(system_prompt(&request.agent)),
            ChatMessage::user(request.prompt),
        ];
        let raw = self
            .client
            .complete(
                messages,
                request.parameters.max_tokens,
                request.parameters.temperature,
            )
            .await?;
        let text = extract_code(&raw);

        debug!(
            agent = %request.agent,
            policy = %request.policy,
            chars = text.len(),
            "Generation reply received"
        );
        Ok(GenerationResponse {
            text,
            latency: started.elapsed(),
        })
    }
}

/// Body of the first fenced code block, or the whole reply trimmed
pub fn extract_code(raw: &str) -> String {
    CODE_BLOCK
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| raw.trim().to_string())
}

// ── Verification ─────────────────────────────────────────────────────

pub struct HttpVerifier {
    client: ChatClient,
}

impl HttpVerifier {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VerificationService for HttpVerifier {
    async fn verify(&self, request: VerificationRequest) -> ServiceResult<VerificationResponse> {
        let messages = vec![
            ChatMessage::system(system_prompt(&request.verifier)),
            ChatMessage::user(verification_prompt(&request)),
        ];
        let raw = self.client.complete(messages, 512, 0.1).await?;
        let verdict = parse_verdict(&raw);
        debug!(
            verifier = %request.verifier,
            candidate_id = %request.candidate_id,
            score = verdict.score,
            passed = verdict.passed,
            "Verification reply received"
        );
        Ok(verdict)
    }
}

fn task_header(prompt: &mut String, task: &TaskContext) {
    let _ = write!(prompt, "# Task: {}\n\n{}\n", task.title, task.description);
    if let Some(language) = &task.language {
        let _ = writeln!(prompt, "\nLanguage: {}", language);
    }
    if !task.requirements.is_empty() {
        prompt.push_str("\n## Requirements\n");
        for requirement in &task.requirements {
            let _ = writeln!(prompt, "- {}", requirement);
        }
    }
}

/// User message for one (candidate, verifier) review
pub fn verification_prompt(request: &VerificationRequest) -> String {
    let mut prompt = String::new();
    task_header(&mut prompt, &request.task);
    let _ = write!(
        prompt,
        "\n## Candidate {}\n```\n{}\n```\n\n{}\n",
        request.candidate_id, request.content, VERDICT_FORMAT
    );
    prompt
}

#[derive(Deserialize)]
struct RawVerdict {
    score: f64,
    #[serde(default)]
    passed: Option<bool>,
    #[serde(default)]
    issues: Vec<String>,
}

/// Structured verdict when the reply holds one, keyword heuristic otherwise
pub fn parse_verdict(raw: &str) -> VerificationResponse {
    if let Some(verdict) = json_object::<RawVerdict>(raw) {
        let score = normalize_score(verdict.score);
        return VerificationResponse {
            score,
            passed: verdict.passed.unwrap_or(score >= PASS_THRESHOLD),
            issues: verdict.issues,
        };
    }
    warn!("Verifier replied without a JSON verdict; scoring text");
    score_text(raw)
}

/// Keyword scoring for free-text reviews
pub fn score_text(raw: &str) -> VerificationResponse {
    let lower = raw.to_lowercase();
    let score = [
        ("excellent", 0.9),
        ("good", 0.75),
        ("acceptable", 0.6),
        ("poor", 0.3),
    ]
    .iter()
    .find(|(word, _)| lower.contains(word))
    .map(|(_, score)| *score)
    .unwrap_or(0.5);

    let passed = if FAIL_MARK.is_match(raw) {
        false
    } else if PASS_MARK.is_match(raw) {
        true
    } else {
        score >= PASS_THRESHOLD
    };

    let issues = raw
        .lines()
        .map(str::trim)
        .filter_map(|l| l.strip_prefix("- ").or_else(|| l.strip_prefix("* ")))
        .map(str::to_string)
        .collect();

    VerificationResponse {
        score,
        issues,
        passed,
    }
}

/// Map 0-10 and 0-100 scales onto [0, 1]
fn normalize_score(score: f64) -> f64 {
    if !score.is_finite() {
        return 0.0;
    }
    let scaled = if score > 10.0 {
        score / 100.0
    } else if score > 1.0 {
        score / 10.0
    } else {
        score
    };
    scaled.clamp(0.0, 1.0)
}

/// First `{` to last `}` of a reply, parsed as `T`
fn json_object<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

// ── Arbitration ──────────────────────────────────────────────────────

pub struct HttpArbiter {
    client: ChatClient,
}

impl HttpArbiter {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArbiterService for HttpArbiter {
    async fn arbitrate(&self, request: ArbiterRequest) -> ServiceResult<ArbiterDecision> {
        let messages = vec![
            ChatMessage::system(system_prompt(&request.arbiter)),
            ChatMessage::user(arbiter_prompt(&request)),
        ];
        let raw = self.client.complete(messages, 1024, 0.1).await?;
        let decision = parse_decision(&raw)?;
        debug!(
            task_id = %request.task.task_id,
            winner_id = %decision.winner_id,
            score = decision.score,
            "Arbiter reply received"
        );
        Ok(decision)
    }
}

/// User message listing every candidate with its verifier scores
pub fn arbiter_prompt(request: &ArbiterRequest) -> String {
    let mut prompt = String::new();
    task_header(&mut prompt, &request.task);

    for candidate in &request.candidates {
        let _ = write!(
            prompt,
            "\n## Candidate {} ({})\n",
            candidate.id, candidate.policy
        );
        for v in request
            .verifications
            .iter()
            .filter(|v| v.candidate_id == candidate.id)
        {
            let _ = write!(
                prompt,
                "- {}: {:.2} ({})",
                v.verifier,
                v.score,
                if v.passed { "pass" } else { "fail" }
            );
            if !v.issues.is_empty() {
                let _ = write!(prompt, "; issues: {}", v.issues.join("; "));
            }
            prompt.push('\n');
        }
        let _ = writeln!(prompt, "```\n{}\n```", candidate.content);
    }

    let _ = write!(prompt, "\n{}\n", DECISION_FORMAT);
    prompt
}

#[derive(Deserialize)]
struct RawDecision {
    #[serde(alias = "winner")]
    winner_id: String,
    score: f64,
    #[serde(default)]
    reasoning: String,
}

/// The arbiter must answer with a decision object; anything else is a failure
pub fn parse_decision(raw: &str) -> ServiceResult<ArbiterDecision> {
    let decision: RawDecision = json_object(raw).ok_or_else(|| {
        ServiceError::InvalidResponse("arbiter reply holds no decision object".into())
    })?;
    Ok(ArbiterDecision {
        winner_id: decision.winner_id.trim().to_string(),
        score: normalize_score(decision.score),
        reasoning: decision.reasoning,
    })
}

// ── Wiring ───────────────────────────────────────────────────────────

/// HTTP-backed service set for the configured endpoints
pub fn build_services(config: &AgentsConfig) -> Result<ServiceSet, reqwest::Error> {
    let client = |endpoint: &Endpoint| {
        ChatClient::new(
            endpoint.clone(),
            config.api_key.clone(),
            config.request_timeout,
        )
    };
    Ok(ServiceSet::new(
        Arc::new(HttpGenerator::new(client(&config.generator)?)),
        Arc::new(HttpVerifier::new(client(&config.verifier)?)),
        Arc::new(HttpArbiter::new(client(&config.arbiter)?)),
    ))
}
