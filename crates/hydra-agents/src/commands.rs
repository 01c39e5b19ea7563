//! Subcommand bodies for the `hydra-agents` binary

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hydra_coordination::{
    store_from_config, BatchReport, CheckpointInfo, CheckpointManager, ConsensusResult,
    OrchestratorConfig, ServiceSet, StateBus, Task, TaskDispatcher, TaskId,
};

/// How a `run` ended
#[derive(Debug)]
pub enum RunOutcome {
    Finished(BatchReport),
    /// Interrupted; the checkpoint with this id holds the progress
    Interrupted(u64),
}

/// Submit `tasks` and execute them until done or until `interrupt` resolves.
///
/// With `resume`, the latest checkpoint is restored first and only tasks it
/// does not already hold are submitted. Learned patterns persist across runs
/// when `memory.dir` is set.
pub async fn run_dag(
    config: &OrchestratorConfig,
    services: ServiceSet,
    tasks: Vec<Task>,
    resume: bool,
    interrupt: impl Future<Output = ()>,
) -> Result<(RunOutcome, String)> {
    let store = store_from_config(&config.memory);
    let dispatcher = TaskDispatcher::from_config(config, services, store).shared();
    let ids: Vec<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();

    let fresh: Vec<Task> = if resume {
        let report = dispatcher
            .recover()
            .await
            .context("Nothing to resume from")?;
        info!(
            checkpoint_id = report.checkpoint_id,
            restored = report.tasks,
            reset = report.reset.len(),
            "Resuming from checkpoint"
        );
        let known: HashSet<TaskId> = dispatcher.tasks().await.into_iter().map(|t| t.id).collect();
        tasks.into_iter().filter(|t| !known.contains(&t.id)).collect()
    } else {
        tasks
    };
    if !fresh.is_empty() {
        dispatcher
            .submit_all(fresh)
            .await
            .context("Task graph rejected")?;
    }

    let stop = CancellationToken::new();
    let periodic = dispatcher.spawn_periodic_checkpoints(stop.clone());

    let finished = tokio::select! {
        report = dispatcher.execute_batch(&ids) => Some(report),
        _ = interrupt => None,
    };
    stop.cancel();
    if let Some(handle) = periodic {
        let _ = handle.await;
    }

    let report = match finished {
        Some(report) => report.context("Batch execution failed")?,
        None => {
            warn!("Interrupted; writing checkpoint");
            let info = dispatcher
                .checkpoint_now()
                .await
                .context("Final checkpoint failed")?;
            let summary = format!(
                "Interrupted. Progress saved in checkpoint {}; continue with --resume.\n",
                info.id
            );
            return Ok((RunOutcome::Interrupted(info.id), summary));
        }
    };
    info!(
        jobs = dispatcher.pending_learning().await,
        "Waiting for learning jobs"
    );
    dispatcher.flush_learning().await;

    let tasks = dispatcher.tasks().await;
    let mut results = BTreeMap::new();
    for task in &tasks {
        if let Some(result) = dispatcher.result(&task.id).await {
            results.insert(task.id.clone(), result);
        }
    }
    let metrics = dispatcher.metrics_snapshot().await;

    let mut summary = format_task_table(&tasks, &results);
    let _ = writeln!(
        summary,
        "\n{} completed, {} failed, {} cancelled, success rate {:.0}%, {} fallback votes",
        metrics.completed,
        metrics.failed,
        metrics.cancelled,
        metrics.success_rate * 100.0,
        metrics.fallback_votes
    );
    Ok((RunOutcome::Finished(report), summary))
}

/// Listing of stored checkpoints
pub async fn list_checkpoints(config: &OrchestratorConfig) -> Result<String> {
    let manager = CheckpointManager::new(config.checkpoint.dir.clone(), config.checkpoint.retention);
    let infos = manager
        .list_checkpoints()
        .await
        .context("Failed to list checkpoints")?;
    if infos.is_empty() {
        return Ok(format!(
            "No checkpoints in {}\n",
            config.checkpoint.dir.display()
        ));
    }
    Ok(format_checkpoints(&infos))
}

/// Task table of the latest readable checkpoint
pub async fn restore(config: &OrchestratorConfig) -> Result<String> {
    let manager = CheckpointManager::new(config.checkpoint.dir.clone(), config.checkpoint.retention);
    let checkpoint = manager
        .restore_from_checkpoint()
        .await
        .context("No readable checkpoint")?;

    let mut out = format!(
        "Checkpoint {} written {}\n\n",
        checkpoint.id,
        checkpoint.timestamp.to_rfc3339()
    );
    out.push_str(&format_task_table(
        &checkpoint.tasks,
        &checkpoint.state.results,
    ));
    let _ = writeln!(
        out,
        "\nmetrics: {}",
        serde_json::to_string(&checkpoint.state.metrics)?
    );
    Ok(out)
}

/// Print entries of a file-backed topic as JSON lines until `interrupt`
pub async fn tail(
    config: &OrchestratorConfig,
    topic: &str,
    from: u64,
    poll: Duration,
    interrupt: impl Future<Output = ()>,
) -> Result<()> {
    let Some(dir) = &config.state_bus.dir else {
        bail!("The state bus is in-memory; set state_bus.dir or HYDRA_BUS_DIR to tail it");
    };
    let bus = StateBus::from_config(&config.state_bus);
    let mut subscription = bus.subscribe(topic, from)?.poll_every(poll);
    info!(topic, from, dir = %dir.display(), "Tailing topic");

    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            _ = &mut interrupt => break,
            entry = subscription.next() => match entry? {
                Some(entry) => println!("{}", serde_json::to_string(&entry)?),
                None => break,
            },
        }
    }
    Ok(())
}

pub fn format_checkpoints(infos: &[CheckpointInfo]) -> String {
    let mut out = format!("{:>6}  {:<32}  {:>6}  {:>10}\n", "id", "written", "tasks", "bytes");
    for info in infos {
        let written = info
            .timestamp
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unreadable".to_string());
        let tasks = info
            .task_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string());
        let _ = writeln!(
            out,
            "{:>6}  {:<32}  {:>6}  {:>10}{}",
            info.id,
            written,
            tasks,
            info.bytes,
            if info.latest { "  latest" } else { "" }
        );
    }
    out
}

pub fn format_task_table(tasks: &[Task], results: &BTreeMap<TaskId, ConsensusResult>) -> String {
    let width = tasks.iter().map(|t| t.id.len()).max().unwrap_or(2).max(2);
    let mut out = format!("{:<width$}  {:<26}  {}\n", "id", "status", "consensus");
    for task in tasks {
        let consensus = match results.get(&task.id) {
            Some(r) => format!(
                "{:.2} from {} candidates ({:?})",
                r.score, r.iterations, r.decided_by
            ),
            None => "-".to_string(),
        };
        let _ = writeln!(
            out,
            "{:<width$}  {:<26}  {}",
            task.id,
            task.status.to_string(),
            consensus
        );
    }
    out
}

/// Resolve the orchestrator config from a file or the environment
pub fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig> {
    match path {
        Some(path) => OrchestratorConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => OrchestratorConfig::from_env().context("Invalid HYDRA_* environment"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hydra_coordination::checkpoint::GlobalState;
    use hydra_coordination::{DecidedBy, FailureReason, TaskStatus};

    fn config(dir: &Path) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        config.checkpoint.dir = dir.join("checkpoints");
        config
    }

    #[test]
    fn test_task_table() {
        let mut done = Task::new("schema", "Schema", "d");
        done.status = TaskStatus::Completed;
        let mut failed = Task::new("api", "API", "d");
        failed.status = TaskStatus::Failed(FailureReason::DependencyFailed);

        let mut results = BTreeMap::new();
        results.insert(
            "schema".to_string(),
            ConsensusResult {
                task_id: "schema".into(),
                winner_id: "c".into(),
                score: 0.9,
                reasoning: String::new(),
                iterations: 3,
                decided_by: DecidedBy::Fallback,
                timestamp: Utc::now(),
            },
        );

        let table = format_task_table(&[done, failed], &results);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("schema"));
        assert!(lines[1].contains("0.90 from 3 candidates (Fallback)"));
        assert!(lines[2].contains("dependency-failed"));
        assert!(lines[2].ends_with('-'));
    }

    #[tokio::test]
    async fn test_list_and_restore_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        let empty = list_checkpoints(&config).await.unwrap();
        assert!(empty.starts_with("No checkpoints"));
        assert!(restore(&config).await.is_err());

        let manager = CheckpointManager::new(config.checkpoint.dir.clone(), 10);
        manager
            .create_checkpoint(&[Task::new("t1", "T", "d")], &GlobalState::default())
            .await
            .unwrap();

        let listing = list_checkpoints(&config).await.unwrap();
        assert!(listing.lines().nth(1).unwrap().ends_with("latest"));

        let restored = restore(&config).await.unwrap();
        assert!(restored.starts_with("Checkpoint 1 written"));
        assert!(restored.contains("t1"));
        assert!(restored.contains("pending"));
    }

    #[tokio::test]
    async fn test_tail_requires_file_bus() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let err = tail(&config, "status", 0, Duration::from_millis(10), async {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("in-memory"));
    }
}
