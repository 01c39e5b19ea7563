//! Consensus engine: generate, verify, vote.
//!
//! Every external call runs inside the same guard: hold a capacity permit,
//! bound by a per-call timeout, abort on the task's cancellation token.
//! Branches of a fan-out write only their own slot and are merged once
//! all of them settle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::policy::build_prompt;
use super::types::{
    Candidate, ConsensusError, ConsensusOutcome, ConsensusResult, DecidedBy, RoundResult,
    Verification,
};
use super::voting::select_fallback_winner;
use crate::config::ConsensusConfig;
use crate::memory::PatternSummary;
use crate::router::{AgentSelection, CapacityLimiter};
use crate::services::{
    ArbiterRequest, GenerationRequest, ServiceError, ServiceSet, TaskContext, VerificationRequest,
};
use crate::task::{AgentId, Task};

/// Shared reference to a ConsensusEngine
pub type SharedConsensusEngine = Arc<ConsensusEngine>;

/// Why a guarded call produced nothing
#[derive(Debug)]
enum CallError {
    Cancelled,
    Failed(ServiceError),
}

/// Candidates that survived verification, with their reviews
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPool {
    pub candidates: Vec<Candidate>,
    pub verifications: Vec<Verification>,
}

/// Redundant generation, independent review and arbitration for one task
pub struct ConsensusEngine {
    services: ServiceSet,
    config: ConsensusConfig,
    capacity: CapacityLimiter,
}

impl ConsensusEngine {
    pub fn new(services: ServiceSet, config: ConsensusConfig, capacity: CapacityLimiter) -> Self {
        Self {
            services,
            config,
            capacity,
        }
    }

    pub fn shared(self) -> SharedConsensusEngine {
        Arc::new(self)
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    async fn guarded<T, F>(
        &self,
        cancel: &CancellationToken,
        limit: Duration,
        call: F,
    ) -> Result<T, CallError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        let work = async {
            let _permit = self.capacity.acquire().await.map_err(|e| {
                CallError::Failed(ServiceError::Unavailable(e.to_string()))
            })?;
            match tokio::time::timeout(limit, call).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(CallError::Failed(e)),
                Err(_) => Err(CallError::Failed(ServiceError::Timeout(limit))),
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallError::Cancelled),
            result = work => result,
        }
    }

    /// One generation call per configured policy, concurrently.
    ///
    /// Returns the usable candidates in policy order. Fails with
    /// `NoCandidates` when every call timed out, errored or came back empty.
    pub async fn generate(
        &self,
        task: &Task,
        generator: &AgentId,
        recalled: &[PatternSummary],
        cancel: &CancellationToken,
    ) -> RoundResult<Vec<Candidate>> {
        let limit = self.config.generation_timeout();

        let calls = self.config.policies.iter().map(|&policy| {
            let request = GenerationRequest {
                agent: generator.clone(),
                policy,
                prompt: build_prompt(task, policy, recalled),
                parameters: policy.parameters(),
            };
            async move {
                let outcome = self
                    .guarded(cancel, limit, self.services.generator.generate(request))
                    .await;
                match outcome {
                    Ok(response) if !response.text.trim().is_empty() => {
                        debug!(
                            task_id = %task.id,
                            %policy,
                            latency_ms = response.latency.as_millis() as u64,
                            "Candidate generated"
                        );
                        Candidate::new(&task.id, policy, generator, response.text)
                    }
                    Ok(_) => {
                        warn!(task_id = %task.id, %policy, "Generator returned empty content");
                        Candidate::failed(&task.id, policy, generator, "empty response".into())
                    }
                    Err(CallError::Failed(e)) => {
                        warn!(task_id = %task.id, %policy, "Generation failed: {}", e);
                        Candidate::failed(&task.id, policy, generator, e.to_string())
                    }
                    Err(CallError::Cancelled) => {
                        Candidate::failed(&task.id, policy, generator, "cancelled".into())
                    }
                }
            }
        });

        let attempts = join_all(calls).await;
        if cancel.is_cancelled() {
            return Err(ConsensusError::Cancelled(task.id.clone()));
        }

        let candidates: Vec<Candidate> = attempts.into_iter().filter(Candidate::is_usable).collect();
        info!(
            task_id = %task.id,
            requested = self.config.policies.len(),
            produced = candidates.len(),
            "Generation settled"
        );

        if candidates.is_empty() {
            return Err(ConsensusError::NoCandidates(task.id.clone()));
        }
        Ok(candidates)
    }

    /// One verification call per (candidate, verifier) pair, concurrently.
    ///
    /// A failed call leaves that pair without a score. Candidates with no
    /// score at all are dropped from the pool.
    pub async fn verify(
        &self,
        task: &Task,
        candidates: Vec<Candidate>,
        verifiers: &[AgentId],
        cancel: &CancellationToken,
    ) -> RoundResult<VerifiedPool> {
        let limit = self.config.verification_timeout();
        let context = TaskContext::from_task(task);
        let context = &context;

        let calls = candidates.iter().flat_map(|candidate| {
            verifiers.iter().map(move |verifier| {
                let request = VerificationRequest {
                    verifier: verifier.clone(),
                    candidate_id: candidate.id.clone(),
                    content: candidate.content.clone(),
                    task: context.clone(),
                };
                async move {
                    let outcome = self
                        .guarded(cancel, limit, self.services.verifier.verify(request))
                        .await;
                    match outcome {
                        Ok(response) if response.score.is_finite() => Some(Verification {
                            candidate_id: candidate.id.clone(),
                            verifier: verifier.clone(),
                            score: response.score.clamp(0.0, 1.0),
                            issues: response.issues,
                            passed: response.passed,
                        }),
                        Ok(_) => {
                            warn!(
                                task_id = %task.id,
                                candidate_id = %candidate.id,
                                %verifier,
                                "Verifier returned a non-finite score"
                            );
                            None
                        }
                        Err(CallError::Failed(e)) => {
                            warn!(
                                task_id = %task.id,
                                candidate_id = %candidate.id,
                                %verifier,
                                "Verification missing: {}",
                                e
                            );
                            None
                        }
                        Err(CallError::Cancelled) => None,
                    }
                }
            })
        });

        let verifications: Vec<Verification> = join_all(calls).await.into_iter().flatten().collect();
        if cancel.is_cancelled() {
            return Err(ConsensusError::Cancelled(task.id.clone()));
        }

        let (kept, excluded): (Vec<Candidate>, Vec<Candidate>) = candidates
            .into_iter()
            .partition(|c| verifications.iter().any(|v| v.candidate_id == c.id));
        for candidate in &excluded {
            warn!(
                task_id = %task.id,
                candidate_id = %candidate.id,
                policy = %candidate.policy,
                "Candidate has no successful verification; excluded from voting"
            );
        }

        if kept.is_empty() {
            return Err(ConsensusError::NoVerifiedCandidates(task.id.clone()));
        }
        Ok(VerifiedPool {
            candidates: kept,
            verifications,
        })
    }

    /// Ask the arbiter for a winner; fall back to the highest mean score
    /// when it fails or names a candidate outside the pool.
    pub async fn vote(
        &self,
        task: &Task,
        pool: &VerifiedPool,
        cancel: &CancellationToken,
    ) -> RoundResult<(ConsensusResult, Candidate)> {
        let request = ArbiterRequest {
            arbiter: self.config.arbiter.clone(),
            task: TaskContext::from_task(task),
            candidates: pool.candidates.clone(),
            verifications: pool.verifications.clone(),
        };

        let outcome = self
            .guarded(
                cancel,
                self.config.arbiter_timeout(),
                self.services.arbiter.arbitrate(request),
            )
            .await;

        let fallback_reason = match outcome {
            Err(CallError::Cancelled) => return Err(ConsensusError::Cancelled(task.id.clone())),
            Err(CallError::Failed(e)) => format!("arbiter failed: {}", e),
            Ok(decision) => {
                match pool.candidates.iter().find(|c| c.id == decision.winner_id) {
                    Some(winner) if decision.score.is_finite() => {
                        let result = ConsensusResult {
                            task_id: task.id.clone(),
                            winner_id: winner.id.clone(),
                            score: decision.score.clamp(0.0, 1.0),
                            reasoning: decision.reasoning,
                            iterations: pool.candidates.len(),
                            decided_by: DecidedBy::Arbiter,
                            timestamp: Utc::now(),
                        };
                        return Ok((result, winner.clone()));
                    }
                    Some(_) => "arbiter returned a non-finite score".to_string(),
                    None => format!(
                        "arbiter named unknown candidate {}",
                        decision.winner_id
                    ),
                }
            }
        };

        warn!(task_id = %task.id, reason = %fallback_reason, "Falling back to mean-score vote");

        let (winner, mean) = select_fallback_winner(&pool.candidates, &pool.verifications)
            .ok_or_else(|| ConsensusError::NoVerifiedCandidates(task.id.clone()))?;
        let result = ConsensusResult {
            task_id: task.id.clone(),
            winner_id: winner.id.clone(),
            score: mean,
            reasoning: format!(
                "Fallback selection ({}): {} policy candidate has the highest mean verification score {:.3}",
                fallback_reason, winner.policy, mean
            ),
            iterations: pool.candidates.len(),
            decided_by: DecidedBy::Fallback,
            timestamp: Utc::now(),
        };
        Ok((result, winner.clone()))
    }

    /// Full round: generate, verify, vote.
    pub async fn run(
        &self,
        task: &Task,
        selection: &AgentSelection,
        recalled: &[PatternSummary],
        cancel: &CancellationToken,
    ) -> RoundResult<ConsensusOutcome> {
        let candidates = self
            .generate(task, &selection.generator, recalled, cancel)
            .await?;
        let pool = self
            .verify(task, candidates, &selection.verifiers, cancel)
            .await?;
        let (result, winner) = self.vote(task, &pool, cancel).await?;

        info!(
            task_id = %task.id,
            winner_id = %result.winner_id,
            score = result.score,
            iterations = result.iterations,
            decided_by = ?result.decided_by,
            "Consensus reached"
        );

        Ok(ConsensusOutcome {
            result,
            winner,
            candidates: pool.candidates,
            verifications: pool.verifications,
        })
    }
}
