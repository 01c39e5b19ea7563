//! Consensus Engine
//!
//! Produces a trustworthy result for one task through redundant generation
//! and independent review:
//!
//! ```text
//!            ┌─ conservative ─┐          ┌─ qa_sentinel ─┐
//! prompt ───►├─ aggressive   ─┼─► pool ─►├─ architect   ─┼─► arbiter ─► ConsensusResult
//!            └─ minimal      ─┘          └───────────────┘      │
//!                                                  failure ─────┴─► highest mean score
//! ```
//!
//! Partial failure degrades the pool instead of aborting it; the result's
//! `iterations` reports how many candidates actually reached the vote.

pub mod engine;
pub mod policy;
pub mod types;
pub mod voting;

pub use engine::{ConsensusEngine, SharedConsensusEngine, VerifiedPool};
pub use policy::{build_prompt, GenerationParameters, Policy};
pub use types::{
    Candidate, CandidateId, ConsensusError, ConsensusOutcome, ConsensusResult, DecidedBy,
    RoundResult, Verification,
};
pub use voting::{mean_scores, select_fallback_winner};
