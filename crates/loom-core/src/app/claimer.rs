//! TaskClaimer - 次のタスクを取得して RUNNING にする
//!
//! # フロー
//! 1. PendingTaskSource から次の Pending タスクを取得（行ロック付き）
//! 2. worker uuid をメモリ上で付与
//! 3. plan の upper bound が過ぎていれば CANCELLED で確定 → TaskOutdated
//! 4. 重複判定。実行済みなら DUPLICATED で確定 → TaskDuplicated
//! 5. TaskStarter で RUNNING に遷移
//!
//! 期限切れ判定は重複判定より先に行います。
//! commit / rollback は呼び出し側（Worker）の責務で、ここでは行いません。

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{ClaimError, ClaimStage, Task, TaskOutput, TaskStatus, WorkerId};
use crate::fingerprint::{Duplication, Fingerprinter};
use crate::ports::{ClaimPorts, Clock};

/// Task Claim Coordinator.
#[derive(Clone)]
pub struct TaskClaimer {
    fingerprinter: Fingerprinter,
    clock: Arc<dyn Clock>,
}

impl TaskClaimer {
    pub fn new(fingerprinter: Fingerprinter, clock: Arc<dyn Clock>) -> Self {
        Self {
            fingerprinter,
            clock,
        }
    }

    /// Claims the next pending task for `worker` using the handles of one
    /// open transaction.
    ///
    /// On `Ok` the returned task is `Running` and carries `worker`'s id.
    /// `TaskOutdated` and `TaskDuplicated` mean the finalize write is staged
    /// in the transaction and the caller should commit it; every other error
    /// calls for a rollback.
    pub async fn claim_next_task(
        &self,
        ports: &ClaimPorts,
        worker: WorkerId,
    ) -> Result<Task, ClaimError> {
        let fetched = ports
            .tasks
            .next_pending_task()
            .await
            .map_err(|source| ClaimError::ClaimFailed {
                stage: ClaimStage::Fetch,
                task_id: None,
                source,
            })?;

        let Some(mut task) = fetched else {
            return Err(ClaimError::NoPendingTask);
        };
        task.worker_uuid = Some(worker);
        let task_id = task.id;

        debug!(%task_id, %worker, name = %task.name, "fetched pending task");

        if task.plan.is_outdated(self.clock.now()) {
            ports
                .finalizer
                .finalize(task_id, TaskStatus::Cancelled, TaskOutput::outdated())
                .await
                .map_err(|source| ClaimError::ClaimFailed {
                    stage: ClaimStage::FinalizeOutdated,
                    task_id: Some(task_id),
                    source,
                })?;
            info!(%task_id, %worker, "task cancelled: upper plan is outdated");
            return Err(ClaimError::TaskOutdated { task_id });
        }

        let duplication = self
            .fingerprinter
            .is_duplicate(&task, ports.history.as_ref())
            .await
            .map_err(|source| ClaimError::TaskHistoryLookupFailed { task_id, source })?;

        if let Duplication::AlreadyRan { fingerprint } = duplication {
            ports
                .finalizer
                .finalize(task_id, TaskStatus::Duplicated, TaskOutput::already_ran())
                .await
                .map_err(|source| ClaimError::ClaimFailed {
                    stage: ClaimStage::FinalizeDuplicated,
                    task_id: Some(task_id),
                    source,
                })?;
            info!(%task_id, %worker, %fingerprint, "task marked duplicated: already ran");
            return Err(ClaimError::TaskDuplicated {
                task_id,
                fingerprint,
            });
        }

        ports
            .starter
            .start(task_id, worker)
            .await
            .map_err(|source| ClaimError::StartFailed { task_id, source })?;

        task.status = TaskStatus::Running;
        info!(%task_id, %worker, name = %task.name, "task claimed");
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ClaimErrorKind, ExecutionRecord, Plan, ResolveError, Step, StoreError, TaskId,
    };
    use crate::fingerprint::JqEngine;
    use crate::ports::{
        DependencyResolver, ExecutionHistory, FixedClock, PendingTaskSource, TaskFinalizer,
        TaskStarter,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::{Value, json};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Finalize(TaskId, TaskStatus, TaskOutput),
        Start(TaskId, WorkerId),
        History(String, String, String),
    }

    /// Records every port call in order; individual ports can be told to fail.
    #[derive(Default)]
    struct Recorder {
        next: Mutex<Option<Task>>,
        fetch_error: Option<StoreError>,
        finalize_error: Option<StoreError>,
        start_error: Option<StoreError>,
        history_error: Option<StoreError>,
        history: Vec<ExecutionRecord>,
        calls: Mutex<Vec<Call>>,
    }

    impl Recorder {
        fn with_task(task: Task) -> Self {
            Self {
                next: Mutex::new(Some(task)),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn ports(self: &Arc<Self>) -> ClaimPorts {
            ClaimPorts {
                tasks: self.clone(),
                history: self.clone(),
                finalizer: self.clone(),
                starter: self.clone(),
            }
        }
    }

    #[async_trait]
    impl PendingTaskSource for Recorder {
        async fn next_pending_task(&self) -> Result<Option<Task>, StoreError> {
            if let Some(err) = &self.fetch_error {
                return Err(err.clone());
            }
            Ok(self.next.lock().unwrap().take())
        }
    }

    #[async_trait]
    impl ExecutionHistory for Recorder {
        async fn contains(&self, workflow: &str, step: &str, fp: &str) -> Result<bool, StoreError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::History(workflow.into(), step.into(), fp.into()));
            if let Some(err) = &self.history_error {
                return Err(err.clone());
            }
            Ok(self.history.iter().any(|r| r.matches(workflow, step, fp)))
        }
    }

    #[async_trait]
    impl TaskFinalizer for Recorder {
        async fn finalize(
            &self,
            task_id: TaskId,
            status: TaskStatus,
            output: TaskOutput,
        ) -> Result<(), StoreError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Finalize(task_id, status, output));
            match &self.finalize_error {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl TaskStarter for Recorder {
        async fn start(&self, task_id: TaskId, worker: WorkerId) -> Result<(), StoreError> {
            self.calls.lock().unwrap().push(Call::Start(task_id, worker));
            match &self.start_error {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }
    }

    /// Resolves to `{"input": <task input>}`.
    struct InputResolver;

    #[async_trait]
    impl DependencyResolver for InputResolver {
        async fn resolve(&self, task: &Task) -> Result<Value, ResolveError> {
            Ok(json!({ "input": task.input }))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn claimer() -> TaskClaimer {
        let fingerprinter =
            Fingerprinter::new(Arc::new(InputResolver), Arc::new(JqEngine::new()));
        TaskClaimer::new(fingerprinter, Arc::new(FixedClock::new(now())))
    }

    fn task() -> Task {
        Task::pending(TaskId::new(7), "billing:charge")
    }

    #[tokio::test]
    async fn empty_queue_reports_no_pending_task() {
        let rec = Arc::new(Recorder::default());
        let err = claimer()
            .claim_next_task(&rec.ports(), WorkerId::generate())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ClaimErrorKind::NoPendingTask);
        assert!(rec.calls().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_is_claim_failed_without_task() {
        let rec = Arc::new(Recorder {
            fetch_error: Some(StoreError::Unavailable("db down".into())),
            ..Default::default()
        });
        let err = claimer()
            .claim_next_task(&rec.ports(), WorkerId::generate())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClaimError::ClaimFailed {
                stage: ClaimStage::Fetch,
                task_id: None,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn claims_task_without_deduplication() {
        let t = task().with_plan(Plan::until(now() + Duration::hours(1)));
        let rec = Arc::new(Recorder::with_task(t));
        let worker = WorkerId::generate();

        let claimed = claimer().claim_next_task(&rec.ports(), worker).await.unwrap();

        assert_eq!(claimed.id, TaskId::new(7));
        assert_eq!(claimed.status, TaskStatus::Running);
        assert_eq!(claimed.worker_uuid, Some(worker));
        assert_eq!(rec.calls(), vec![Call::Start(TaskId::new(7), worker)]);
    }

    #[tokio::test]
    async fn expired_task_is_cancelled_and_never_started() {
        let t = task()
            .with_plan(Plan::until(now() - Duration::minutes(1)))
            .with_step(Step::with_deduplication(".input"));
        let rec = Arc::new(Recorder::with_task(t));

        let err = claimer()
            .claim_next_task(&rec.ports(), WorkerId::generate())
            .await
            .unwrap_err();

        assert!(matches!(err, ClaimError::TaskOutdated { task_id } if task_id == TaskId::new(7)));
        assert_eq!(
            rec.calls(),
            vec![Call::Finalize(
                TaskId::new(7),
                TaskStatus::Cancelled,
                TaskOutput::outdated()
            )]
        );
    }

    #[tokio::test]
    async fn upper_bound_equal_to_now_is_still_valid() {
        let rec = Arc::new(Recorder::with_task(task().with_plan(Plan::until(now()))));
        let claimed = claimer()
            .claim_next_task(&rec.ports(), WorkerId::generate())
            .await
            .unwrap();
        assert_eq!(claimed.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn duplicate_task_is_finalized_as_duplicated() {
        let t = task()
            .with_step(Step::with_deduplication(".input.key"))
            .with_input(json!({"key": "abc"}));
        let rec = Arc::new(Recorder {
            history: vec![ExecutionRecord::new("billing", "charge", r#""abc""#)],
            ..Recorder::with_task(t)
        });

        let err = claimer()
            .claim_next_task(&rec.ports(), WorkerId::generate())
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            ClaimError::TaskDuplicated { fingerprint, .. } if fingerprint == r#""abc""#
        ));
        assert_eq!(
            rec.calls(),
            vec![
                Call::History("billing".into(), "charge".into(), r#""abc""#.into()),
                Call::Finalize(TaskId::new(7), TaskStatus::Duplicated, TaskOutput::already_ran()),
            ]
        );
    }

    #[tokio::test]
    async fn expiration_is_checked_before_duplication() {
        let t = task()
            .with_plan(Plan::until(now() - Duration::seconds(1)))
            .with_step(Step::with_deduplication(".input.key"))
            .with_input(json!({"key": "abc"}));
        let rec = Arc::new(Recorder {
            history: vec![ExecutionRecord::new("billing", "charge", r#""abc""#)],
            ..Recorder::with_task(t)
        });

        let err = claimer()
            .claim_next_task(&rec.ports(), WorkerId::generate())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ClaimErrorKind::TaskOutdated);
        assert!(
            !rec.calls()
                .iter()
                .any(|c| matches!(c, Call::History(..)))
        );
    }

    #[tokio::test]
    async fn failed_outdated_finalize_escalates_to_claim_failed() {
        let t = task().with_plan(Plan::until(now() - Duration::hours(2)));
        let rec = Arc::new(Recorder {
            finalize_error: Some(StoreError::Unavailable("write failed".into())),
            ..Recorder::with_task(t)
        });

        let err = claimer()
            .claim_next_task(&rec.ports(), WorkerId::generate())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClaimError::ClaimFailed {
                stage: ClaimStage::FinalizeOutdated,
                task_id: Some(_),
                ..
            }
        ));
        assert!(!rec.calls().iter().any(|c| matches!(c, Call::Start(..))));
    }

    #[tokio::test]
    async fn failed_duplicate_finalize_escalates_to_claim_failed() {
        let t = task()
            .with_step(Step::with_deduplication(".input"))
            .with_input(json!(1));
        let rec = Arc::new(Recorder {
            history: vec![ExecutionRecord::new("billing", "charge", "1")],
            finalize_error: Some(StoreError::Unavailable("write failed".into())),
            ..Recorder::with_task(t)
        });

        let err = claimer()
            .claim_next_task(&rec.ports(), WorkerId::generate())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClaimError::ClaimFailed {
                stage: ClaimStage::FinalizeDuplicated,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn history_failure_does_not_finalize_or_start() {
        let t = task()
            .with_step(Step::with_deduplication(".input"))
            .with_input(json!("x"));
        let rec = Arc::new(Recorder {
            history_error: Some(StoreError::Unavailable("timeout".into())),
            ..Recorder::with_task(t)
        });

        let err = claimer()
            .claim_next_task(&rec.ports(), WorkerId::generate())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ClaimErrorKind::TaskHistoryLookupFailed);
        assert!(
            rec.calls()
                .iter()
                .all(|c| matches!(c, Call::History(..)))
        );
    }

    #[tokio::test]
    async fn malformed_name_is_reported_with_inner_kind() {
        let mut t = task();
        t.name = "billing".into();
        let rec = Arc::new(Recorder::with_task(t));

        let err = claimer()
            .claim_next_task(&rec.ports(), WorkerId::generate())
            .await
            .unwrap_err();

        assert!(matches!(err, ClaimError::TaskHistoryLookupFailed { .. }));
        assert_eq!(err.kind(), ClaimErrorKind::InvalidTaskName);
    }

    #[tokio::test]
    async fn start_failure_is_reported() {
        let rec = Arc::new(Recorder {
            start_error: Some(StoreError::InvalidTransition {
                task_id: TaskId::new(7),
                from: TaskStatus::Running,
                to: TaskStatus::Running,
            }),
            ..Recorder::with_task(task())
        });

        let err = claimer()
            .claim_next_task(&rec.ports(), WorkerId::generate())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ClaimErrorKind::StartFailed);
        assert_eq!(err.task_id(), Some(TaskId::new(7)));
    }

    #[tokio::test]
    async fn unique_fingerprint_starts_task() {
        let t = task()
            .with_step(Step::with_deduplication(".input.key"))
            .with_input(json!({"key": "new"}));
        let rec = Arc::new(Recorder {
            history: vec![ExecutionRecord::new("billing", "charge", r#""old""#)],
            ..Recorder::with_task(t)
        });
        let worker = WorkerId::generate();

        let claimed = claimer().claim_next_task(&rec.ports(), worker).await.unwrap();

        assert_eq!(claimed.status, TaskStatus::Running);
        assert_eq!(rec.calls().last(), Some(&Call::Start(TaskId::new(7), worker)));
    }
}
