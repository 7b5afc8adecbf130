//! Worker - ポーリングループとワーカーグループ
//!
//! # 1 回のポーリング
//! 1. TransactionScope でトランザクションを開始
//! 2. claim_timeout 内で TaskClaimer を実行
//! 3. 結果に応じて commit / rollback
//!    - 取得成功・期限切れ・重複: commit（確定書き込みを残す）
//!    - それ以外のエラー・タイムアウト: rollback（行ロック解放、タスクは Pending のまま）
//! 4. 取得したタスクは TaskSink に渡す
//!
//! アイドル時は PollBackoff に従って待機し、shutdown で抜けます。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{ClaimStats, PollBackoff, TaskClaimer};
use crate::config::WorkerConfig;
use crate::domain::{ClaimErrorKind, ErrorClass, StoreError, Task, WorkerId};
use crate::ports::TransactionScope;

/// Receives claimed tasks. The step-execution runtime plugs in here.
#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn accept(&self, task: Task);
}

/// Sink that only logs what it receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl TaskSink for LogSink {
    async fn accept(&self, task: Task) {
        info!(task_id = %task.id, name = %task.name, "task handed off");
    }
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Claimed(Task),
    /// Nothing pending.
    Idle,
    /// The task was finalized as outdated or duplicated.
    Skipped(ClaimErrorKind),
    /// The attempt failed and was rolled back.
    Failed(ClaimErrorKind),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("opening transaction")]
    Begin(#[source] StoreError),

    #[error("committing transaction")]
    Commit(#[source] StoreError),

    #[error("rolling back transaction")]
    Rollback(#[source] StoreError),

    #[error("claim did not finish within {0:?}")]
    ClaimTimedOut(Duration),
}

/// Collaborators shared by every worker of a group.
#[derive(Clone)]
pub struct WorkerContext {
    pub scope: Arc<dyn TransactionScope>,
    pub claimer: TaskClaimer,
    pub sink: Arc<dyn TaskSink>,
    pub stats: Arc<ClaimStats>,
}

pub struct Worker {
    id: WorkerId,
    ctx: WorkerContext,
    claim_timeout: Duration,
    backoff: PollBackoff,
}

impl Worker {
    pub fn new(id: WorkerId, ctx: WorkerContext, config: &WorkerConfig) -> Self {
        Self {
            id,
            ctx,
            claim_timeout: config.claim_timeout(),
            backoff: config.poll_backoff(),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Runs one claim cycle inside its own transaction.
    pub async fn poll_once(&self) -> Result<PollOutcome, WorkerError> {
        let tx = self.ctx.scope.begin().await.map_err(WorkerError::Begin)?;
        let ports = tx.ports();
        let claimed = tokio::time::timeout(
            self.claim_timeout,
            self.ctx.claimer.claim_next_task(&ports, self.id),
        )
        .await;
        drop(ports);

        let worker = self.id;
        let outcome = match claimed {
            Err(_elapsed) => {
                tx.rollback().await.map_err(WorkerError::Rollback)?;
                warn!(%worker, timeout = ?self.claim_timeout, "claim timed out; rolled back");
                return Err(WorkerError::ClaimTimedOut(self.claim_timeout));
            }
            Ok(Ok(task)) => {
                tx.commit().await.map_err(WorkerError::Commit)?;
                self.ctx.sink.accept(task.clone()).await;
                PollOutcome::Claimed(task)
            }
            Ok(Err(err)) => {
                let kind = err.kind();
                let task_id = err.task_id();
                match err.class() {
                    ErrorClass::Idle => {
                        tx.rollback().await.map_err(WorkerError::Rollback)?;
                        debug!(%worker, "no pending task");
                        PollOutcome::Idle
                    }
                    ErrorClass::Outcome => {
                        tx.commit().await.map_err(WorkerError::Commit)?;
                        PollOutcome::Skipped(kind)
                    }
                    ErrorClass::Retryable => {
                        tx.rollback().await.map_err(WorkerError::Rollback)?;
                        warn!(%worker, ?task_id, ?kind, error = %ErrorChain(&err), "claim failed; rolled back");
                        PollOutcome::Failed(kind)
                    }
                    ErrorClass::Fatal => {
                        tx.rollback().await.map_err(WorkerError::Rollback)?;
                        error!(%worker, ?task_id, ?kind, error = %ErrorChain(&err), "claim failed; rolled back");
                        PollOutcome::Failed(kind)
                    }
                }
            }
        };

        self.ctx.stats.record(&outcome);
        Ok(outcome)
    }

    /// Polls until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let worker = self.id;
        let mut idle_polls: u32 = 0;
        info!(%worker, "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_once().await {
                Ok(PollOutcome::Claimed(_) | PollOutcome::Skipped(_)) => idle_polls = 0,
                Ok(PollOutcome::Idle | PollOutcome::Failed(_)) => {
                    idle_polls = idle_polls.saturating_add(1);
                }
                Err(err) => {
                    warn!(%worker, error = %ErrorChain(&err), "poll failed");
                    idle_polls = idle_polls.saturating_add(1);
                }
            }

            let delay = self.backoff.next_delay(idle_polls);
            if delay.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(%worker, "worker stopped");
    }
}

/// Displays an error followed by its `source()` chain.
struct ErrorChain<'a>(&'a dyn std::error::Error);

impl std::fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}

/// Worker group handle.
/// - `request_shutdown()` でワーカー全体が止まる
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    ids: Vec<WorkerId>,
}

impl WorkerGroup {
    /// Spawn `config.workers` workers, each with a fresh id.
    pub fn spawn(ctx: WorkerContext, config: &WorkerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(config.workers);
        let mut ids = Vec::with_capacity(config.workers);
        for _ in 0..config.workers {
            let worker = Worker::new(WorkerId::generate(), ctx.clone(), config);
            ids.push(worker.id());
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                worker.run(rx).await;
            }));
        }

        Self {
            shutdown_tx,
            joins,
            ids,
        }
    }

    pub fn ids(&self) -> &[WorkerId] {
        &self.ids
    }

    /// Stops taking new claims. In-flight polls finish first.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ClaimerBuilder;
    use crate::domain::{ExecutionRecord, Plan, Step, TaskId, TaskStatus};
    use crate::impls::{GraphDependencyResolver, InMemoryTaskStore};
    use crate::ports::{ClaimPorts, FixedClock, Transaction};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<TaskId>>);

    #[async_trait]
    impl TaskSink for CollectingSink {
        async fn accept(&self, task: Task) {
            self.0.lock().unwrap().push(task.id);
        }
    }

    struct Fixture {
        store: InMemoryTaskStore,
        sink: Arc<CollectingSink>,
        stats: Arc<ClaimStats>,
        ctx: WorkerContext,
    }

    fn fixture() -> Fixture {
        let store = InMemoryTaskStore::new();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let claimer = ClaimerBuilder::new()
            .resolver(Arc::new(GraphDependencyResolver::new(store.clone())))
            .clock(Arc::new(FixedClock::new(now)))
            .build()
            .unwrap();
        let sink = Arc::new(CollectingSink::default());
        let stats = Arc::new(ClaimStats::new());
        let ctx = WorkerContext {
            scope: Arc::new(store.clone()),
            claimer,
            sink: sink.clone(),
            stats: stats.clone(),
        };
        Fixture {
            store,
            sink,
            stats,
            ctx,
        }
    }

    fn worker(ctx: WorkerContext) -> Worker {
        Worker::new(WorkerId::generate(), ctx, &WorkerConfig::default())
    }

    #[tokio::test]
    async fn claimed_task_is_committed_and_handed_off() {
        let f = fixture();
        f.store
            .insert_task(Task::pending(TaskId::new(1), "wf:step"))
            .unwrap();
        let w = worker(f.ctx.clone());

        let outcome = w.poll_once().await.unwrap();

        assert!(matches!(outcome, PollOutcome::Claimed(ref t) if t.id == TaskId::new(1)));
        let stored = f.store.task(TaskId::new(1)).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
        assert_eq!(stored.worker_uuid, Some(w.id()));
        assert_eq!(*f.sink.0.lock().unwrap(), vec![TaskId::new(1)]);
        assert_eq!(f.store.held_locks().unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_store_is_idle() {
        let f = fixture();
        let outcome = worker(f.ctx.clone()).poll_once().await.unwrap();
        assert_eq!(outcome, PollOutcome::Idle);
        assert_eq!(f.stats.snapshot().idle, 1);
    }

    #[tokio::test]
    async fn outdated_task_cancellation_is_committed() {
        let f = fixture();
        let past = Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 0).unwrap();
        f.store
            .insert_task(Task::pending(TaskId::new(1), "wf:step").with_plan(Plan::until(past)))
            .unwrap();

        let outcome = worker(f.ctx.clone()).poll_once().await.unwrap();

        assert_eq!(outcome, PollOutcome::Skipped(ClaimErrorKind::TaskOutdated));
        let stored = f.store.task(TaskId::new(1)).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Cancelled);
        assert_eq!(stored.output, Some(json!({"error": "task upper plan is outdated"})));
        assert!(f.sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_is_committed_and_next_task_is_claimed() {
        let f = fixture();
        f.store
            .record_execution(ExecutionRecord::new("billing", "charge", r#""c-1""#))
            .unwrap();
        for id in [1, 2] {
            let customer = if id == 1 { "c-1" } else { "c-2" };
            f.store
                .insert_task(
                    Task::pending(TaskId::new(id), "billing:charge")
                        .with_step(Step::with_deduplication(".input.customer"))
                        .with_input(json!({"customer": customer})),
                )
                .unwrap();
        }
        let w = worker(f.ctx.clone());

        assert_eq!(
            w.poll_once().await.unwrap(),
            PollOutcome::Skipped(ClaimErrorKind::TaskDuplicated)
        );
        assert!(matches!(w.poll_once().await.unwrap(), PollOutcome::Claimed(t) if t.id == TaskId::new(2)));
        assert_eq!(
            f.store.task(TaskId::new(1)).unwrap().unwrap().status,
            TaskStatus::Duplicated
        );
        let counts = f.stats.snapshot();
        assert_eq!((counts.duplicated, counts.claimed), (1, 1));
    }

    #[tokio::test]
    async fn failed_claim_is_rolled_back() {
        let f = fixture();
        f.store
            .insert_task(
                Task::pending(TaskId::new(1), "wf:step")
                    .with_step(Step::with_deduplication("error(\"bad\")")),
            )
            .unwrap();

        let outcome = worker(f.ctx.clone()).poll_once().await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Failed(ClaimErrorKind::FingerprintEvaluationFailed)
        );
        assert_eq!(
            f.store.task(TaskId::new(1)).unwrap().unwrap().status,
            TaskStatus::Pending
        );
        assert_eq!(f.store.held_locks().unwrap(), 0);
    }

    /// A scope whose fetch never completes.
    struct StuckScope;

    struct StuckTx;

    #[async_trait]
    impl crate::ports::PendingTaskSource for StuckTx {
        async fn next_pending_task(&self) -> Result<Option<Task>, StoreError> {
            std::future::pending().await
        }
    }

    #[async_trait]
    impl crate::ports::ExecutionHistory for StuckTx {
        async fn contains(&self, _: &str, _: &str, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[async_trait]
    impl crate::ports::TaskFinalizer for StuckTx {
        async fn finalize(
            &self,
            _: TaskId,
            _: TaskStatus,
            _: crate::domain::TaskOutput,
        ) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[async_trait]
    impl crate::ports::TaskStarter for StuckTx {
        async fn start(&self, _: TaskId, _: WorkerId) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[async_trait]
    impl Transaction for StuckTx {
        fn ports(&self) -> ClaimPorts {
            let tx = Arc::new(StuckTx);
            ClaimPorts {
                tasks: tx.clone(),
                history: tx.clone(),
                finalizer: tx.clone(),
                starter: tx,
            }
        }

        async fn commit(self: Box<Self>) -> Result<(), StoreError> {
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[async_trait]
    impl TransactionScope for StuckScope {
        async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
            Ok(Box::new(StuckTx))
        }
    }

    #[tokio::test]
    async fn slow_claim_times_out() {
        let f = fixture();
        let ctx = WorkerContext {
            scope: Arc::new(StuckScope),
            ..f.ctx
        };
        let config = WorkerConfig {
            claim_timeout_ms: 50,
            ..WorkerConfig::default()
        };
        let w = Worker::new(WorkerId::generate(), ctx, &config);

        let err = w.poll_once().await.unwrap_err();

        assert!(matches!(err, WorkerError::ClaimTimedOut(d) if d == std::time::Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn group_drains_queue_and_shuts_down() {
        let f = fixture();
        for id in 1..=20 {
            f.store
                .insert_task(Task::pending(TaskId::new(id), "wf:step"))
                .unwrap();
        }
        let config = WorkerConfig {
            workers: 4,
            poll_interval_ms: 1,
            max_idle_backoff_ms: 5,
            ..WorkerConfig::default()
        };

        let group = WorkerGroup::spawn(f.ctx.clone(), &config);
        assert_eq!(group.ids().len(), 4);
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while f.stats.snapshot().claimed < 20 {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        group.shutdown_and_join().await;

        let mut claimed = f.sink.0.lock().unwrap().clone();
        claimed.sort();
        assert_eq!(claimed, (1..=20).map(TaskId::new).collect::<Vec<_>>());
        assert_eq!(f.store.counts_by_status().unwrap().running, 20);
    }
}
