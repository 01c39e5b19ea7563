//! Integration tests for the consensus engine
//!
//! Drives generate → verify → vote against scripted services, covering
//! partial generation failure, missing verifications and arbiter fallback.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;

use common::{engine, policy_of, FakeArbiter, FakeGenerator, FakeVerifier, Script};
use hydra_coordination::consensus::{
    select_fallback_winner, Candidate, ConsensusError, DecidedBy, Policy, Verification,
    VerifiedPool,
};
use hydra_coordination::router::AgentSelection;
use hydra_coordination::services::ServiceError;
use hydra_coordination::task::Task;

fn task() -> Task {
    Task::new("t1", "Sort items", "Sort a list of items, returning an empty list for no input")
}

fn selection() -> AgentSelection {
    AgentSelection {
        generator: "worker_backend".into(),
        verifiers: vec!["qa_sentinel".into(), "architect".into()],
        complexity: 0.1,
        rule: "backend-language".into(),
    }
}

fn verification(candidate: &Candidate, verifier: &str, score: f64) -> Verification {
    Verification {
        candidate_id: candidate.id.clone(),
        verifier: verifier.into(),
        score,
        issues: Vec::new(),
        passed: score >= 0.5,
    }
}

// ── Full rounds ──────────────────────────────────────────────────────

/// Three candidates, two verifiers each, arbiter answers
#[tokio::test]
async fn test_all_services_healthy() {
    let engine = engine(
        FakeGenerator::per_policy(),
        FakeVerifier::constant(0.8),
        FakeArbiter::choosing(Policy::Minimal),
    );

    let outcome = engine
        .run(&task(), &selection(), &[], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.result.iterations, 3);
    assert_eq!(outcome.candidates.len(), 3);
    assert_eq!(outcome.verifications.len(), 6);
    assert_eq!(outcome.result.decided_by, DecidedBy::Arbiter);
    assert!(outcome
        .candidates
        .iter()
        .any(|c| c.id == outcome.result.winner_id));
    assert_eq!(outcome.winner.policy, Policy::Minimal);
}

/// The aggressive generation call times out
#[tokio::test]
async fn test_generation_timeout_shrinks_pool() {
    let engine = engine(
        FakeGenerator::hanging(Policy::Aggressive),
        FakeVerifier::constant(0.7),
        FakeArbiter::choosing(Policy::Conservative),
    );

    let outcome = engine
        .run(&task(), &selection(), &[], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.result.iterations, 2);
    assert!(outcome
        .candidates
        .iter()
        .all(|c| c.policy != Policy::Aggressive));
}

/// Arbiter fails; B's mean uses only its available score
#[tokio::test]
async fn test_fallback_ignores_missing_scores() {
    let generator = FakeGenerator::new(|req| match req.policy {
        Policy::Minimal => Script::Fail(ServiceError::Unavailable("busy".into())),
        policy => Script::Reply(common::candidate_text(policy)),
    });
    let verifier = FakeVerifier::new(|req| {
        match (policy_of(&req.content), req.verifier.as_str()) {
            ("conservative", _) => Script::Reply(0.9),
            ("aggressive", "qa_sentinel") => Script::Reply(0.95),
            _ => Script::Fail(ServiceError::Timeout(std::time::Duration::from_millis(250))),
        }
    });
    let engine = engine(generator, verifier, FakeArbiter::failing());

    let outcome = engine
        .run(&task(), &selection(), &[], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.result.decided_by, DecidedBy::Fallback);
    assert_eq!(outcome.winner.policy, Policy::Aggressive);
    assert!((outcome.result.score - 0.95).abs() < 1e-9);
    assert_eq!(outcome.result.iterations, 2);
}

// ── Failure modes ────────────────────────────────────────────────────

#[tokio::test]
async fn test_no_candidates() {
    let engine = engine(
        FakeGenerator::failing(),
        FakeVerifier::constant(0.8),
        FakeArbiter::choosing(Policy::Conservative),
    );
    let err = engine
        .run(&task(), &selection(), &[], &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, ConsensusError::NoCandidates("t1".into()));
}

#[tokio::test]
async fn test_no_verified_candidates() {
    let engine = engine(
        FakeGenerator::per_policy(),
        FakeVerifier::failing(),
        FakeArbiter::choosing(Policy::Conservative),
    );
    let err = engine
        .run(&task(), &selection(), &[], &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, ConsensusError::NoVerifiedCandidates("t1".into()));
}

#[tokio::test]
async fn test_unverified_candidate_excluded() {
    let verifier = FakeVerifier::new(|req| {
        if policy_of(&req.content) == "minimal" {
            Script::Fail(ServiceError::Transport("reset".into()))
        } else {
            Script::Reply(0.6)
        }
    });
    let engine = engine(
        FakeGenerator::per_policy(),
        verifier,
        FakeArbiter::choosing(Policy::Conservative),
    );
    let outcome = engine
        .run(&task(), &selection(), &[], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.result.iterations, 2);
    assert!(outcome.candidates.iter().all(|c| c.policy != Policy::Minimal));
}

#[tokio::test]
async fn test_unknown_arbiter_winner_falls_back() {
    let verifier = FakeVerifier::new(|req| match policy_of(&req.content) {
        "minimal" => Script::Reply(0.9),
        _ => Script::Reply(0.4),
    });
    let engine = engine(FakeGenerator::per_policy(), verifier, FakeArbiter::hallucinating());

    let outcome = engine
        .run(&task(), &selection(), &[], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.result.decided_by, DecidedBy::Fallback);
    assert_eq!(outcome.winner.policy, Policy::Minimal);
    assert!(outcome
        .candidates
        .iter()
        .any(|c| c.id == outcome.result.winner_id));
}

#[tokio::test]
async fn test_cancellation_discards_round() {
    let engine = engine(
        FakeGenerator::hanging(Policy::Conservative),
        FakeVerifier::constant(0.8),
        FakeArbiter::choosing(Policy::Conservative),
    );
    let token = CancellationToken::new();
    token.cancel();

    let err = engine
        .run(&task(), &selection(), &[], &token)
        .await
        .unwrap_err();
    assert_eq!(err, ConsensusError::Cancelled("t1".into()));
}

// ── Fallback determinism ─────────────────────────────────────────────

#[tokio::test]
async fn test_fallback_tie_prefers_earliest_candidate() {
    let now = Utc::now();
    let mut late = Candidate::new("t1", Policy::Conservative, "g", "late".into());
    late.created_at = now + ChronoDuration::milliseconds(20);
    let mut early = Candidate::new("t1", Policy::Aggressive, "g", "early".into());
    early.created_at = now;

    let pool = VerifiedPool {
        candidates: vec![late.clone(), early.clone()],
        verifications: vec![
            verification(&late, "qa_sentinel", 0.75),
            verification(&late, "architect", 0.25),
            verification(&early, "qa_sentinel", 0.5),
            verification(&early, "architect", 0.5),
        ],
    };

    let engine = engine(
        FakeGenerator::per_policy(),
        FakeVerifier::constant(0.8),
        FakeArbiter::failing(),
    );
    for _ in 0..5 {
        let (result, winner) = engine
            .vote(&task(), &pool, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.winner_id, early.id);
        assert_eq!(winner.content, "early");
        assert_eq!(result.decided_by, DecidedBy::Fallback);
    }
}

#[test]
fn test_strictly_highest_mean_wins() {
    let a = Candidate::new("t1", Policy::Conservative, "g", "a".into());
    let b = Candidate::new("t1", Policy::Aggressive, "g", "b".into());
    let verifications = vec![
        verification(&a, "qa_sentinel", 0.5),
        verification(&a, "architect", 0.7),
        verification(&b, "qa_sentinel", 0.61),
    ];
    let candidates = vec![a, b.clone()];
    let (winner, mean) = select_fallback_winner(&candidates, &verifications).unwrap();
    assert_eq!(winner.id, b.id);
    assert!((mean - 0.61).abs() < 1e-9);
}
