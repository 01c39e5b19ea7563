//! Hydra agents
//!
//! The outward-facing half of the orchestrator: OpenAI-compatible HTTP
//! clients implementing the generation, verification and arbiter services,
//! per-role system prompts, endpoint configuration, task-DAG loading and
//! the `hydra-agents` command line.

pub mod clients;
pub mod commands;
pub mod config;
pub mod dag;
pub mod prompts;

pub use clients::{build_services, ChatClient, HttpArbiter, HttpGenerator, HttpVerifier};
pub use config::{AgentsConfig, Endpoint};
pub use dag::{load_dag, parse_dag, DagError};
pub use prompts::PROMPT_VERSION;
