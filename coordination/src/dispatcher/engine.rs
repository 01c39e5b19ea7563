//! Task dispatcher: drives tasks through their lifecycle.
//!
//! ```text
//! execute_task
//!   ├─ admission (max_parallel_tasks)
//!   ├─ Routed      router.select_agents
//!   ├─ Recalling   memory.recall           (degrades, never fails)
//!   ├─ Generating  engine.generate         ─┐
//!   ├─ Verifying   engine.verify            ├─ bounded by task_timeout, cancellable
//!   ├─ Voting      engine.vote             ─┘
//!   ├─ Learning    result stored, learn_from_winner spawned
//!   └─ Completed | Failed(reason) → metrics, bus events, checkpoint
//! ```
//!
//! Every status change goes through the task table's write lock and is then
//! published on the `status` topic. A task registered in `running` is owned
//! by exactly one spawned pipeline run, which outlives the `execute_task`
//! call that started it; `cancel` on such a task only fires its token and
//! lets that run record the terminal state.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{DispatchError, DispatchResult};
use super::metrics::{MetricsCollector, MetricsSnapshot};
use super::table::TaskTable;
use crate::bus::{
    BusEvent, Sequence, SharedStateBus, StateBus, Subscription, TOPIC_CHECKPOINTS, TOPIC_METRICS,
    TOPIC_STATUS,
};
use crate::checkpoint::{
    CheckpointError, CheckpointId, CheckpointInfo, CheckpointManager, GlobalState,
    SharedCheckpointManager,
};
use crate::config::{DispatcherConfig, OrchestratorConfig};
use crate::consensus::{
    Candidate, ConsensusEngine, ConsensusError, ConsensusResult, DecidedBy, SharedConsensusEngine,
};
use crate::memory::{MemoryBridge, PatternExtractor, SharedMemoryBridge, SharedPatternStore};
use crate::router::{ready_tasks, Router, SharedRouter};
use crate::services::ServiceSet;
use crate::task::{AgentId, FailureReason, Task, TaskId, TaskStatus};

/// Shared reference to a TaskDispatcher
pub type SharedDispatcher = Arc<TaskDispatcher>;

/// Components the dispatcher composes, supplied by the caller
#[derive(Clone)]
pub struct Collaborators {
    pub router: SharedRouter,
    pub engine: SharedConsensusEngine,
    pub memory: SharedMemoryBridge,
    pub checkpoints: SharedCheckpointManager,
    pub bus: SharedStateBus,
}

/// Final status of every task a batch touched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub statuses: BTreeMap<TaskId, TaskStatus>,
}

impl BatchReport {
    pub fn completed(&self) -> Vec<&TaskId> {
        self.statuses
            .iter()
            .filter(|(_, s)| **s == TaskStatus::Completed)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn failed(&self) -> Vec<(&TaskId, FailureReason)> {
        self.statuses
            .iter()
            .filter_map(|(id, s)| s.failure_reason().map(|r| (id, r)))
            .collect()
    }

    /// Tasks left non-terminal (waiting on work outside the batch)
    pub fn unfinished(&self) -> Vec<&TaskId> {
        self.statuses
            .iter()
            .filter(|(_, s)| !s.is_terminal())
            .map(|(id, _)| id)
            .collect()
    }
}

/// What `recover` restored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub checkpoint_id: CheckpointId,
    pub tasks: usize,
    /// Tasks that were mid-pipeline and are `Pending` again
    pub reset: Vec<TaskId>,
    pub completed: usize,
    pub failed: usize,
}

/// Top-level coordinator of the task lifecycle
pub struct TaskDispatcher {
    config: DispatcherConfig,
    router: SharedRouter,
    engine: SharedConsensusEngine,
    memory: SharedMemoryBridge,
    checkpoints: SharedCheckpointManager,
    bus: SharedStateBus,

    table: RwLock<TaskTable>,
    metrics: Arc<Mutex<MetricsCollector>>,
    /// Task-level admission control
    admission: Arc<Semaphore>,
    /// Cancellation tokens of tasks owned by an `execute_task` call
    running: Mutex<HashMap<TaskId, CancellationToken>>,
    learning: Mutex<JoinSet<()>>,
    /// Held from snapshot to write so checkpoints land in snapshot order
    checkpoint_lock: Mutex<()>,
}

impl TaskDispatcher {
    pub fn new(config: DispatcherConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            router,
            engine,
            memory,
            checkpoints,
            bus,
        } = collaborators;
        let admission = Arc::new(Semaphore::new(config.max_parallel_tasks.max(1)));
        Self {
            config,
            router,
            engine,
            memory,
            checkpoints,
            bus,
            table: RwLock::new(TaskTable::new()),
            metrics: Arc::new(Mutex::new(MetricsCollector::new())),
            admission,
            running: Mutex::new(HashMap::new()),
            learning: Mutex::new(JoinSet::new()),
            checkpoint_lock: Mutex::new(()),
        }
    }

    /// Wire every component from configuration.
    ///
    /// The router's capacity limiter is shared with the consensus engine so
    /// the agent-capacity ceiling covers every service call.
    pub fn from_config(
        config: &OrchestratorConfig,
        services: ServiceSet,
        store: SharedPatternStore,
    ) -> Self {
        let router = Router::from_config(config).shared();
        let engine = ConsensusEngine::new(
            services,
            config.consensus.clone(),
            router.capacity().clone(),
        )
        .shared();
        let memory =
            MemoryBridge::new(store, PatternExtractor::default(), config.memory.clone()).shared();
        let checkpoints =
            CheckpointManager::new(config.checkpoint.dir.clone(), config.checkpoint.retention)
                .shared();
        let bus = StateBus::from_config(&config.state_bus).shared();

        Self::new(
            config.dispatcher.clone(),
            Collaborators {
                router,
                engine,
                memory,
                checkpoints,
                bus,
            },
        )
    }

    pub fn shared(self) -> SharedDispatcher {
        Arc::new(self)
    }

    pub fn bus(&self) -> &SharedStateBus {
        &self.bus
    }

    pub fn checkpoints(&self) -> &SharedCheckpointManager {
        &self.checkpoints
    }

    // ── Submission and lookups ───────────────────────────────────────

    /// Validate and enqueue one task in `Pending`
    pub async fn submit(&self, task: Task) -> DispatchResult<()> {
        self.submit_all(vec![task]).await
    }

    /// Validate and enqueue a batch; all or nothing.
    ///
    /// Dependencies may point at previously submitted tasks or at tasks in
    /// the same batch.
    pub async fn submit_all(&self, tasks: Vec<Task>) -> DispatchResult<()> {
        let accepted: Vec<(TaskId, _)> = tasks.iter().map(|t| (t.id.clone(), t.priority)).collect();
        self.table.write().await.insert_all(tasks)?;
        self.metrics.lock().await.record_submitted(accepted.len());

        for (task_id, priority) in accepted {
            debug!(task_id = %task_id, %priority, "Task submitted");
            self.publish(TOPIC_STATUS, BusEvent::TaskSubmitted { task_id, priority })
                .await;
        }
        Ok(())
    }

    pub async fn status(&self, task_id: &str) -> DispatchResult<TaskStatus> {
        self.table.read().await.status(task_id)
    }

    pub async fn result(&self, task_id: &str) -> Option<ConsensusResult> {
        self.table.read().await.result(task_id).cloned()
    }

    pub async fn task(&self, task_id: &str) -> DispatchResult<Task> {
        self.table.read().await.get(task_id).cloned()
    }

    /// All tasks in submission order
    pub async fn tasks(&self) -> Vec<Task> {
        self.table.read().await.tasks()
    }

    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.lock().await.snapshot()
    }

    /// Follow a State-Bus topic from `from`
    pub fn subscribe(&self, topic: &str, from: Sequence) -> DispatchResult<Subscription> {
        Ok(self.bus.subscribe(topic, from)?)
    }

    // ── Execution ────────────────────────────────────────────────────

    /// Run one pending task through the full pipeline.
    ///
    /// Stage errors never escape as anything but the task's terminal
    /// status: the returned `DispatchError::Failed` carries the same reason
    /// tag stored on the task.
    ///
    /// Once claimed, the pipeline runs on its own tokio task. Dropping the
    /// returned future only detaches the caller; the run still reaches a
    /// terminal status and releases its claim.
    pub async fn execute_task(self: &Arc<Self>, task_id: &str) -> DispatchResult<ConsensusResult> {
        let claim = self.claim(task_id).await?;
        let dispatcher = Arc::clone(self);
        let owned = task_id.to_string();
        let run = tokio::spawn(async move { dispatcher.run_claimed(&owned, claim).await });

        match run.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(task_id, "Task run aborted: {}", e);
                self.running.lock().await.remove(task_id);
                let reason = reason_for_stage(self.status(task_id).await.unwrap_or_default());
                let to = TaskStatus::Failed(reason);
                let moved = self.table.write().await.transition(task_id, to);
                if let Ok(from) = moved {
                    self.after_terminal(task_id, from, to, None, None).await;
                }
                Err(DispatchError::Failed {
                    task_id: task_id.to_string(),
                    reason,
                })
            }
        }
    }

    async fn run_claimed(&self, task_id: &str, claim: Claim) -> DispatchResult<ConsensusResult> {
        let token = match claim {
            Claim::Run(token) => token,
            Claim::DependencyFailed => {
                self.fail_unstarted(task_id, FailureReason::DependencyFailed)
                    .await?;
                return Err(DispatchError::Failed {
                    task_id: task_id.to_string(),
                    reason: FailureReason::DependencyFailed,
                });
            }
        };

        let admitted = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = Arc::clone(&self.admission).acquire_owned() => permit.ok(),
        };
        let Some(_permit) = admitted else {
            self.running.lock().await.remove(task_id);
            self.fail_unstarted(task_id, FailureReason::Cancelled).await?;
            return Err(DispatchError::Failed {
                task_id: task_id.to_string(),
                reason: FailureReason::Cancelled,
            });
        };

        let started = Instant::now();
        let mut agent: Option<AgentId> = None;
        let limit = self.config.task_timeout();
        let outcome =
            match tokio::time::timeout(limit, self.pipeline(task_id, &token, &mut agent)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    token.cancel();
                    warn!(task_id, timeout_secs = limit.as_secs(), "Task timed out");
                    Err(DispatchError::Failed {
                        task_id: task_id.to_string(),
                        reason: FailureReason::Timeout,
                    })
                }
            };

        let terminal = match &outcome {
            Ok(_) => TaskStatus::Completed,
            Err(DispatchError::Failed { reason, .. }) => TaskStatus::Failed(*reason),
            Err(e) => {
                let current = self.status(task_id).await.unwrap_or_default();
                let reason = reason_for_stage(current);
                error!(task_id, "Pipeline error mapped to {}: {}", reason, e);
                TaskStatus::Failed(reason)
            }
        };

        self.running.lock().await.remove(task_id);
        let from = self.table.write().await.transition(task_id, terminal)?;
        self.after_terminal(task_id, from, terminal, agent, Some(started.elapsed()))
            .await;

        match (outcome, terminal) {
            (Ok(result), _) => Ok(result),
            (Err(_), status) => Err(DispatchError::Failed {
                task_id: task_id.to_string(),
                reason: status.failure_reason().unwrap_or(FailureReason::Generation),
            }),
        }
    }

    /// Register ownership of a pending task whose dependencies completed
    async fn claim(&self, task_id: &str) -> DispatchResult<Claim> {
        let mut running = self.running.lock().await;
        let table = self.table.read().await;
        let status = table.status(task_id)?;
        if status != TaskStatus::Pending || running.contains_key(task_id) {
            return Err(DispatchError::NotRunnable {
                task_id: task_id.to_string(),
                status,
            });
        }
        if table.has_failed_dependency(task_id) {
            return Ok(Claim::DependencyFailed);
        }
        let pending = table.pending_dependencies(task_id)?;
        if !pending.is_empty() {
            return Err(DispatchError::DependenciesPending {
                task_id: task_id.to_string(),
                pending,
            });
        }

        let token = CancellationToken::new();
        running.insert(task_id.to_string(), token.clone());
        Ok(Claim::Run(token))
    }

    async fn pipeline(
        &self,
        task_id: &str,
        token: &CancellationToken,
        agent: &mut Option<AgentId>,
    ) -> DispatchResult<ConsensusResult> {
        let task = self.advance(task_id, TaskStatus::Routed, None, token).await?;
        let selection = self.router.select_agents(&task);
        info!(
            task_id,
            generator = %selection.generator,
            rule = %selection.rule,
            complexity = selection.complexity,
            "Task routed"
        );
        *agent = Some(selection.generator.clone());
        let generator = Some(&selection.generator);

        self.advance(task_id, TaskStatus::Recalling, generator, token).await?;
        let recalled = self
            .memory
            .recall(&task.description, task.language())
            .await
            .into_inner();

        self.advance(task_id, TaskStatus::Generating, generator, token).await?;
        let requested = self.engine.config().policies.len();
        let generated = self
            .engine
            .generate(&task, &selection.generator, &recalled, token)
            .await;
        let produced = generated.as_ref().map(Vec::len).unwrap_or(0);
        self.metrics.lock().await.record_candidates(produced, requested);
        let candidates = generated.map_err(|e| stage_failure(task_id, e))?;

        self.advance(task_id, TaskStatus::Verifying, generator, token).await?;
        let pool = self
            .engine
            .verify(&task, candidates, &selection.verifiers, token)
            .await
            .map_err(|e| stage_failure(task_id, e))?;

        self.advance(task_id, TaskStatus::Voting, generator, token).await?;
        let (result, winner) = self
            .engine
            .vote(&task, &pool, token)
            .await
            .map_err(|e| stage_failure(task_id, e))?;
        if result.decided_by == DecidedBy::Fallback {
            self.metrics.lock().await.record_fallback_vote();
        }
        ensure_live(task_id, token)?;

        let from = self.table.write().await.record_result(result.clone())?;
        self.publish_transition(task_id, from, TaskStatus::Learning, generator)
            .await;
        self.publish(
            TOPIC_STATUS,
            BusEvent::ConsensusReached {
                task_id: task_id.to_string(),
                winner_id: result.winner_id.clone(),
                score: result.score,
                iterations: result.iterations,
                decided_by: result.decided_by,
            },
        )
        .await;

        if self.memory.learning_enabled() {
            self.spawn_learning(result.clone(), winner, task).await;
        }
        Ok(result)
    }

    /// Forward transition unless the task was cancelled; returns the task
    async fn advance(
        &self,
        task_id: &str,
        to: TaskStatus,
        agent: Option<&AgentId>,
        token: &CancellationToken,
    ) -> DispatchResult<Task> {
        ensure_live(task_id, token)?;
        let (from, task) = {
            let mut table = self.table.write().await;
            let from = table.transition(task_id, to)?;
            (from, table.get(task_id)?.clone())
        };
        self.publish_transition(task_id, from, to, agent).await;
        Ok(task)
    }

    /// Learning runs off the critical path; its failures only count
    async fn spawn_learning(&self, result: ConsensusResult, winner: Candidate, task: Task) {
        let memory = Arc::clone(&self.memory);
        let metrics = Arc::clone(&self.metrics);
        let mut jobs = self.learning.lock().await;
        while let Some(joined) = jobs.try_join_next() {
            if let Err(e) = joined {
                warn!("Learning job aborted: {}", e);
            }
        }
        jobs.spawn(async move {
            let report = memory.learn_from_winner(&result, &winner, &task).await;
            if report.failed > 0 {
                metrics.lock().await.record_learn_failures(report.failed);
            }
        });
    }

    /// Learning jobs spawned and not yet reaped
    pub async fn pending_learning(&self) -> usize {
        self.learning.lock().await.len()
    }

    /// Wait for every background learning job spawned so far
    pub async fn flush_learning(&self) {
        let mut jobs = std::mem::take(&mut *self.learning.lock().await);
        while let Some(joined) = jobs.join_next().await {
            if let Err(e) = joined {
                warn!("Learning job aborted: {}", e);
            }
        }
    }

    /// Fail a task that never entered the pipeline
    async fn fail_unstarted(&self, task_id: &str, reason: FailureReason) -> DispatchResult<()> {
        let to = TaskStatus::Failed(reason);
        let from = self.table.write().await.transition(task_id, to)?;
        self.after_terminal(task_id, from, to, None, None).await;
        Ok(())
    }

    /// Metrics, bus events and the checkpoint that follow a terminal move
    async fn after_terminal(
        &self,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
        agent: Option<AgentId>,
        duration: Option<Duration>,
    ) {
        match to {
            TaskStatus::Completed => info!(
                task_id,
                duration_ms = duration.map(|d| d.as_millis() as u64),
                "Task completed"
            ),
            _ => warn!(task_id, status = %to, "Task failed"),
        }

        self.publish_transition(task_id, from, to, agent.as_ref())
            .await;
        let snapshot = {
            let mut metrics = self.metrics.lock().await;
            metrics.record_terminal(to, agent.as_deref(), duration);
            metrics.snapshot()
        };
        self.publish(TOPIC_METRICS, BusEvent::Metrics(snapshot)).await;

        if self.config.checkpoint_on_terminal {
            // Failure is already logged and counted
            let _ = self.checkpoint_with_retry().await;
        }
    }

    /// Run `task_ids` and every pending task they depend on.
    ///
    /// Works in rounds: tasks whose dependencies all completed are grouped
    /// by the router and each group runs concurrently; tasks behind a
    /// failed dependency fail without executing.
    pub async fn execute_batch(self: &Arc<Self>, task_ids: &[TaskId]) -> DispatchResult<BatchReport> {
        let members = self.batch_members(task_ids).await?;
        let cap = self.config.max_parallel_tasks.max(1);
        info!(tasks = members.len(), cap, "Executing batch");

        loop {
            let (ready, doomed) = {
                let table = self.table.read().await;
                let all = table.tasks();
                let completed: BTreeSet<TaskId> = all
                    .iter()
                    .filter(|t| t.status == TaskStatus::Completed)
                    .map(|t| t.id.clone())
                    .collect();
                let mut waiting = Vec::new();
                let mut doomed = Vec::new();
                for id in &members {
                    let task = table.get(id)?;
                    if task.status != TaskStatus::Pending {
                        continue;
                    }
                    if table.has_failed_dependency(id) {
                        doomed.push(id.clone());
                    } else {
                        waiting.push(task.clone());
                    }
                }
                let ready: Vec<Task> = ready_tasks(&waiting, &completed)
                    .into_iter()
                    .cloned()
                    .collect();
                (ready, doomed)
            };

            for task_id in &doomed {
                debug!(task_id = %task_id, "Dependency failed; not executing");
                self.fail_unstarted(task_id, FailureReason::DependencyFailed)
                    .await?;
            }

            if ready.is_empty() {
                if doomed.is_empty() {
                    break;
                }
                continue;
            }

            for group in self.router.group_for_parallel_execution(&ready, cap) {
                debug!(tasks = ?group, "Running group");
                let runs = group.iter().map(|task_id| async move {
                    match self.execute_task(task_id).await {
                        Ok(_) | Err(DispatchError::Failed { .. }) => Ok(()),
                        // Cancelled or claimed elsewhere since the snapshot
                        Err(DispatchError::NotRunnable { .. }) => Ok(()),
                        Err(e) => Err(e),
                    }
                });
                for run in join_all(runs).await {
                    run?;
                }
            }
        }

        let table = self.table.read().await;
        let mut report = BatchReport::default();
        for id in &members {
            report.statuses.insert(id.clone(), table.status(id)?);
        }
        info!(
            completed = report.completed().len(),
            failed = report.failed().len(),
            unfinished = report.unfinished().len(),
            "Batch finished"
        );
        Ok(report)
    }

    /// Requested tasks plus their non-terminal transitive dependencies,
    /// in dependency order
    async fn batch_members(&self, task_ids: &[TaskId]) -> DispatchResult<Vec<TaskId>> {
        let table = self.table.read().await;
        let mut wanted = BTreeSet::new();
        for id in task_ids {
            table.get(id)?;
            wanted.insert(id.clone());
            for dep in table.graph().transitive_dependencies(id) {
                if !table.status(&dep)?.is_terminal() {
                    wanted.insert(dep);
                }
            }
        }
        Ok(table
            .graph()
            .topological_order()
            .into_iter()
            .filter(|id| wanted.contains(id))
            .collect())
    }

    // ── Control ──────────────────────────────────────────────────────

    /// Cancel a task.
    ///
    /// A pending task fails immediately; a running one has its token fired
    /// and fails as soon as its in-flight calls are dropped. Terminal tasks
    /// are left alone. Returns the status observed when cancelling.
    pub async fn cancel(&self, task_id: &str) -> DispatchResult<TaskStatus> {
        let to = TaskStatus::Failed(FailureReason::Cancelled);
        let from = {
            let running = self.running.lock().await;
            let status = self.table.read().await.status(task_id)?;
            if let Some(token) = running.get(task_id) {
                info!(task_id, %status, "Cancelling running task");
                token.cancel();
                return Ok(status);
            }
            if status != TaskStatus::Pending {
                return Ok(status);
            }
            self.table.write().await.transition(task_id, to)?
        };

        info!(task_id, "Cancelled pending task");
        self.after_terminal(task_id, from, to, None, None).await;
        Ok(from)
    }

    /// Move a task that failed for a retryable reason back to `Pending`
    pub async fn retry(&self, task_id: &str) -> DispatchResult<()> {
        let from = {
            let mut table = self.table.write().await;
            let status = table.status(task_id)?;
            if !status.can_transition_to(TaskStatus::Pending) {
                return Err(DispatchError::NotRetryable {
                    task_id: task_id.to_string(),
                    status,
                });
            }
            table.transition(task_id, TaskStatus::Pending)?
        };
        self.metrics.lock().await.record_retry();
        info!(task_id, previous = %from, "Task queued for retry");
        self.publish_transition(task_id, from, TaskStatus::Pending, None)
            .await;
        Ok(())
    }

    /// Replace the task table with the latest readable checkpoint.
    ///
    /// Tasks caught mid-pipeline go back to `Pending`; terminal tasks keep
    /// their status and result; counters continue from the snapshot.
    pub async fn recover(&self) -> DispatchResult<RecoveryReport> {
        let running = self.running.lock().await;
        if !running.is_empty() {
            return Err(DispatchError::Busy(running.len()));
        }

        let checkpoint = self.checkpoints.restore_from_checkpoint().await?;
        let mut table = TaskTable::restore(checkpoint.tasks, checkpoint.state.results)?;
        let reset = table.reset_in_flight();

        let tasks = table.tasks();
        let report = RecoveryReport {
            checkpoint_id: checkpoint.id,
            tasks: tasks.len(),
            completed: tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .count(),
            failed: tasks
                .iter()
                .filter(|t| matches!(t.status, TaskStatus::Failed(_)))
                .count(),
            reset,
        };

        *self.table.write().await = table;
        *self.metrics.lock().await = MetricsCollector::from_snapshot(checkpoint.state.metrics);
        drop(running);

        info!(
            checkpoint_id = report.checkpoint_id,
            tasks = report.tasks,
            reset = report.reset.len(),
            "Recovered from checkpoint"
        );
        Ok(report)
    }

    // ── Checkpoints ──────────────────────────────────────────────────

    async fn global_snapshot(&self) -> (Vec<Task>, GlobalState) {
        let (tasks, results) = {
            let table = self.table.read().await;
            (table.tasks(), table.results().clone())
        };
        let metrics = self.metrics.lock().await.snapshot();
        (
            tasks,
            GlobalState {
                results,
                metrics,
                extra: BTreeMap::new(),
            },
        )
    }

    /// Write a checkpoint now, retrying with backoff
    pub async fn checkpoint_now(&self) -> DispatchResult<CheckpointInfo> {
        Ok(self.checkpoint_with_retry().await?)
    }

    async fn checkpoint_with_retry(&self) -> Result<CheckpointInfo, CheckpointError> {
        let _serial = self.checkpoint_lock.lock().await;
        let (tasks, state) = self.global_snapshot().await;
        let manager = &self.checkpoints;
        let (tasks_ref, state_ref) = (&tasks, &state);

        let written = self
            .config
            .checkpoint_retry
            .run("checkpoint", move || {
                manager.create_checkpoint(tasks_ref, state_ref)
            })
            .await;

        match written {
            Ok(info) => {
                self.publish(
                    TOPIC_CHECKPOINTS,
                    BusEvent::CheckpointWritten {
                        checkpoint_id: info.id,
                        tasks: tasks.len(),
                    },
                )
                .await;
                Ok(info)
            }
            Err(e) => {
                error!(
                    attempts = self.config.checkpoint_retry.max_attempts,
                    "Checkpoint write failed after retries: {}", e
                );
                self.metrics.lock().await.record_checkpoint_failure();
                self.publish(
                    TOPIC_CHECKPOINTS,
                    BusEvent::CheckpointFailed {
                        error: e.to_string(),
                    },
                )
                .await;
                Err(e)
            }
        }
    }

    /// Checkpoint on the configured interval until `cancel` fires.
    ///
    /// Returns `None` when no interval is configured.
    pub fn spawn_periodic_checkpoints(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let period = self.config.checkpoint_interval()?;
        let dispatcher = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = dispatcher.checkpoint_with_retry().await;
                    }
                }
            }
            debug!("Periodic checkpoints stopped");
        }))
    }

    // ── Bus ──────────────────────────────────────────────────────────

    async fn publish_transition(
        &self,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
        agent: Option<&AgentId>,
    ) {
        debug!(task_id, %from, %to, "Status changed");
        self.publish(
            TOPIC_STATUS,
            BusEvent::StatusChanged {
                task_id: task_id.to_string(),
                from,
                to,
                agent: agent.cloned(),
            },
        )
        .await;
    }

    /// Bus failures are observability loss, not task failure
    async fn publish(&self, topic: &str, event: BusEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.bus.publish(topic, event).await {
            warn!(topic, event_type, "Failed to publish bus event: {}", e);
        }
    }
}

enum Claim {
    Run(CancellationToken),
    DependencyFailed,
}

fn ensure_live(task_id: &str, token: &CancellationToken) -> DispatchResult<()> {
    if token.is_cancelled() {
        return Err(DispatchError::Failed {
            task_id: task_id.to_string(),
            reason: FailureReason::Cancelled,
        });
    }
    Ok(())
}

fn stage_failure(task_id: &str, error: ConsensusError) -> DispatchError {
    let reason = match error {
        ConsensusError::NoCandidates(_) => FailureReason::Generation,
        ConsensusError::NoVerifiedCandidates(_) => FailureReason::Verification,
        ConsensusError::Cancelled(_) => FailureReason::Cancelled,
    };
    DispatchError::Failed {
        task_id: task_id.to_string(),
        reason,
    }
}

/// Reason tag for an unexpected error raised while in `stage`
fn reason_for_stage(stage: TaskStatus) -> FailureReason {
    match stage {
        TaskStatus::Verifying | TaskStatus::Voting | TaskStatus::Learning => {
            FailureReason::Verification
        }
        _ => FailureReason::Generation,
    }
}
