//! Scripted fake services and a dispatcher fixture shared by the
//! integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use hydra_coordination::config::OrchestratorConfig;
use hydra_coordination::consensus::{ConsensusEngine, Policy};
use hydra_coordination::dispatcher::{SharedDispatcher, TaskDispatcher};
use hydra_coordination::memory::InMemoryPatternStore;
use hydra_coordination::resilience::RetryPolicy;
use hydra_coordination::router::CapacityLimiter;
use hydra_coordination::services::{
    ArbiterDecision, ArbiterRequest, ArbiterService, GenerationRequest, GenerationResponse,
    GenerationService, ServiceError, ServiceResult, ServiceSet, VerificationRequest,
    VerificationResponse, VerificationService,
};

/// What a fake does for one call
pub enum Script<T> {
    Reply(T),
    Fail(ServiceError),
    /// Never answers; only a timeout or cancellation ends the call
    Hang,
}

impl<T> Script<T> {
    async fn play(self) -> ServiceResult<T> {
        match self {
            Self::Reply(value) => Ok(value),
            Self::Fail(e) => Err(e),
            Self::Hang => std::future::pending().await,
        }
    }
}

type GenerateFn = dyn Fn(&GenerationRequest) -> Script<String> + Send + Sync;
type VerifyFn = dyn Fn(&VerificationRequest) -> Script<f64> + Send + Sync;
type ArbitrateFn = dyn Fn(&ArbiterRequest) -> Script<ArbiterDecision> + Send + Sync;

// ── Generator ────────────────────────────────────────────────────────

pub struct FakeGenerator {
    script: Box<GenerateFn>,
    pub calls: AtomicUsize,
}

impl FakeGenerator {
    pub fn new(script: impl Fn(&GenerationRequest) -> Script<String> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every policy answers with a distinct, recognisable candidate
    pub fn per_policy() -> Self {
        Self::new(|req| Script::Reply(candidate_text(req.policy)))
    }

    /// `policy` hangs, every other policy answers
    pub fn hanging(policy: Policy) -> Self {
        Self::new(move |req| {
            if req.policy == policy {
                Script::Hang
            } else {
                Script::Reply(candidate_text(req.policy))
            }
        })
    }

    pub fn failing() -> Self {
        Self::new(|_| Script::Fail(ServiceError::Unavailable("model offline".into())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for FakeGenerator {
    async fn generate(&self, request: GenerationRequest) -> ServiceResult<GenerationResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = (self.script)(&request).play().await?;
        Ok(GenerationResponse {
            text,
            latency: Duration::from_millis(1),
        })
    }
}

/// Candidate body whose first line names the policy that produced it
pub fn candidate_text(policy: Policy) -> String {
    format!(
        "# {policy}\ndef solve(items):\n    if not items:\n        return []\n    return sorted(items)\n"
    )
}

/// Policy named on the first line of a candidate body
pub fn policy_of(content: &str) -> &str {
    content
        .lines()
        .next()
        .and_then(|l| l.strip_prefix("# "))
        .unwrap_or("")
}

// ── Verifier ─────────────────────────────────────────────────────────

pub struct FakeVerifier {
    script: Box<VerifyFn>,
    pub calls: AtomicUsize,
}

impl FakeVerifier {
    pub fn new(script: impl Fn(&VerificationRequest) -> Script<f64> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn constant(score: f64) -> Self {
        Self::new(move |_| Script::Reply(score))
    }

    pub fn failing() -> Self {
        Self::new(|_| Script::Fail(ServiceError::Transport("connection reset".into())))
    }
}

#[async_trait]
impl VerificationService for FakeVerifier {
    async fn verify(&self, request: VerificationRequest) -> ServiceResult<VerificationResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let score = (self.script)(&request).play().await?;
        Ok(VerificationResponse {
            score,
            issues: Vec::new(),
            passed: score >= 0.5,
        })
    }
}

// ── Arbiter ──────────────────────────────────────────────────────────

pub struct FakeArbiter {
    script: Box<ArbitrateFn>,
    pub calls: AtomicUsize,
}

impl FakeArbiter {
    pub fn new(
        script: impl Fn(&ArbiterRequest) -> Script<ArbiterDecision> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    /// Picks the candidate generated under `policy`
    pub fn choosing(policy: Policy) -> Self {
        Self::new(move |req| {
            let winner = req
                .candidates
                .iter()
                .find(|c| c.policy == policy)
                .or_else(|| req.candidates.first());
            match winner {
                Some(c) => Script::Reply(ArbiterDecision {
                    winner_id: c.id.clone(),
                    score: 0.88,
                    reasoning: format!("{} is the most robust", c.policy),
                }),
                None => Script::Fail(ServiceError::InvalidResponse("empty pool".into())),
            }
        })
    }

    pub fn failing() -> Self {
        Self::new(|_| Script::Fail(ServiceError::Unavailable("arbiter offline".into())))
    }

    /// Names a candidate that does not exist
    pub fn hallucinating() -> Self {
        Self::new(|_| {
            Script::Reply(ArbiterDecision {
                winner_id: "not-a-candidate".into(),
                score: 0.99,
                reasoning: "trust me".into(),
            })
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArbiterService for FakeArbiter {
    async fn arbitrate(&self, request: ArbiterRequest) -> ServiceResult<ArbiterDecision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(&request).play().await
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────

/// Route dispatcher logs to the test harness; `RUST_LOG=debug` to see them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Short timeouts, fast retries, checkpoints under `dir`
pub fn test_config(dir: &Path) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.consensus.generation_timeout_ms = 250;
    config.consensus.verification_timeout_ms = 250;
    config.consensus.arbiter_timeout_ms = 250;
    config.dispatcher.max_parallel_tasks = 3;
    config.dispatcher.task_timeout_secs = 10;
    config.dispatcher.checkpoint_retry = RetryPolicy {
        max_attempts: 2,
        base_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(10),
    };
    config.checkpoint.dir = dir.join("checkpoints");
    config.state_bus.dir = Some(dir.join("bus"));
    config
}

pub fn services(
    generator: FakeGenerator,
    verifier: FakeVerifier,
    arbiter: FakeArbiter,
) -> (ServiceSet, Arc<FakeGenerator>, Arc<FakeArbiter>) {
    let generator = Arc::new(generator);
    let arbiter = Arc::new(arbiter);
    let set = ServiceSet::new(generator.clone(), Arc::new(verifier), arbiter.clone());
    (set, generator, arbiter)
}

/// Engine with default consensus settings and short timeouts
pub fn engine(generator: FakeGenerator, verifier: FakeVerifier, arbiter: FakeArbiter) -> ConsensusEngine {
    let dir = std::env::temp_dir();
    let config = test_config(&dir);
    let (set, _, _) = services(generator, verifier, arbiter);
    ConsensusEngine::new(set, config.consensus, CapacityLimiter::new(8))
}

pub struct Harness {
    pub dispatcher: SharedDispatcher,
    pub store: Arc<InMemoryPatternStore>,
    pub generator: Arc<FakeGenerator>,
    pub arbiter: Arc<FakeArbiter>,
    pub config: OrchestratorConfig,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(generator: FakeGenerator, verifier: FakeVerifier, arbiter: FakeArbiter) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        Self::with_config(config, dir, generator, verifier, arbiter)
    }

    pub fn healthy() -> Self {
        Self::new(
            FakeGenerator::per_policy(),
            FakeVerifier::constant(0.8),
            FakeArbiter::choosing(Policy::Conservative),
        )
    }

    pub fn with_config(
        config: OrchestratorConfig,
        dir: TempDir,
        generator: FakeGenerator,
        verifier: FakeVerifier,
        arbiter: FakeArbiter,
    ) -> Self {
        init_tracing();
        let store = Arc::new(InMemoryPatternStore::new());
        let (set, generator, arbiter) = services(generator, verifier, arbiter);
        let dispatcher = TaskDispatcher::from_config(&config, set, store.clone()).shared();
        Self {
            dispatcher,
            store,
            generator,
            arbiter,
            config,
            dir,
        }
    }
}
