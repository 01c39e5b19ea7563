//! External service seams
//!
//! Generation, verification and arbitration are black boxes with latency and
//! occasional failure. The engine only sees these traits; HTTP clients live
//! in the agents crate and tests plug in scripted fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::consensus::{Candidate, CandidateId, GenerationParameters, Policy, Verification};
use crate::task::{AgentId, Task, TaskId};

/// Error type for external service calls
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("Service timed out after {0:?}")]
    Timeout(Duration),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type for external service calls
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Task fields handed to every external call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub title: String,
    pub description: String,
    pub language: Option<String>,
    pub requirements: Vec<String>,
}

impl TaskContext {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            language: task.language().map(str::to_string),
            requirements: task.requirements(),
        }
    }
}

/// One generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Generator identity chosen by the router
    pub agent: AgentId,
    pub policy: Policy,
    pub prompt: String,
    pub parameters: GenerationParameters,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResponse {
    pub text: String,
    pub latency: Duration,
}

/// One verification call for a (candidate, verifier) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub verifier: AgentId,
    pub candidate_id: CandidateId,
    pub content: String,
    pub task: TaskContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResponse {
    /// Normalized to [0, 1] by the engine
    pub score: f64,
    pub issues: Vec<String>,
    pub passed: bool,
}

/// The single arbiter call of a voting round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbiterRequest {
    pub arbiter: AgentId,
    pub task: TaskContext,
    pub candidates: Vec<Candidate>,
    pub verifications: Vec<Verification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbiterDecision {
    pub winner_id: CandidateId,
    pub score: f64,
    pub reasoning: String,
}

/// Turns a prompt into candidate text
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> ServiceResult<GenerationResponse>;
}

/// Scores a candidate from one verifier role's point of view
#[async_trait]
pub trait VerificationService: Send + Sync {
    async fn verify(&self, request: VerificationRequest) -> ServiceResult<VerificationResponse>;
}

/// Picks a winner among verified candidates
#[async_trait]
pub trait ArbiterService: Send + Sync {
    async fn arbitrate(&self, request: ArbiterRequest) -> ServiceResult<ArbiterDecision>;
}

/// The three external services the consensus engine depends on
#[derive(Clone)]
pub struct ServiceSet {
    pub generator: Arc<dyn GenerationService>,
    pub verifier: Arc<dyn VerificationService>,
    pub arbiter: Arc<dyn ArbiterService>,
}

impl ServiceSet {
    pub fn new(
        generator: Arc<dyn GenerationService>,
        verifier: Arc<dyn VerificationService>,
        arbiter: Arc<dyn ArbiterService>,
    ) -> Self {
        Self {
            generator,
            verifier,
            arbiter,
        }
    }
}
