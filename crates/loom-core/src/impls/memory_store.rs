//! In-memory task store with transactional claims.
//!
//! Each transaction takes a row lock on the task it fetches; other open
//! transactions skip locked rows. Writes are staged per transaction and
//! become visible only on commit. Commit, rollback and drop all release the
//! transaction's locks.
//!
//! State lives behind a `std::sync::Mutex`: locks must be released from
//! `Drop`, where awaiting is not possible, and no guard is held across an
//! `.await`.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{
    ExecutionRecord, StoreError, Task, TaskId, TaskOutput, TaskStatus, WorkerId,
};
use crate::ports::{
    ClaimPorts, ExecutionHistory, PendingTaskSource, TaskFinalizer, TaskStarter, Transaction,
    TransactionScope,
};

type TxId = u64;

/// Number of tasks per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub cancelled: usize,
    pub duplicated: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Committed store state.
#[derive(Default)]
struct StoreState {
    /// Single source of truth for tasks, ordered by id.
    tasks: BTreeMap<TaskId, Task>,

    /// Execution history (append-only).
    history: HashSet<ExecutionRecord>,

    /// Row locks: task -> owning transaction.
    locks: BTreeMap<TaskId, TxId>,

    next_tx: TxId,
}

impl StoreState {
    fn counts_by_status(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
                TaskStatus::Duplicated => counts.duplicated += 1,
                TaskStatus::Succeeded => counts.succeeded += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    fn release_locks(&mut self, tx: TxId) {
        self.locks.retain(|_, owner| *owner != tx);
    }
}

/// In-memory task store. Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<StoreState>>,
}

fn lock(state: &Mutex<StoreState>) -> Result<MutexGuard<'_, StoreState>, StoreError> {
    state.lock().map_err(|_| StoreError::Poisoned)
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a committed task.
    pub fn insert_task(&self, task: Task) -> Result<(), StoreError> {
        let mut state = lock(&self.state)?;
        state.tasks.insert(task.id, task);
        Ok(())
    }

    pub fn record_execution(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        let mut state = lock(&self.state)?;
        state.history.insert(record);
        Ok(())
    }

    /// Committed view of a task.
    pub fn task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let state = lock(&self.state)?;
        Ok(state.tasks.get(&id).cloned())
    }

    /// Committed view of several tasks; missing ids are skipped.
    pub fn tasks(&self, ids: &[TaskId]) -> Result<Vec<Task>, StoreError> {
        let state = lock(&self.state)?;
        Ok(ids
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect())
    }

    pub fn counts_by_status(&self) -> Result<StatusCounts, StoreError> {
        let state = lock(&self.state)?;
        Ok(state.counts_by_status())
    }

    /// Number of row locks currently held by open transactions.
    pub fn held_locks(&self) -> Result<usize, StoreError> {
        let state = lock(&self.state)?;
        Ok(state.locks.len())
    }
}

#[async_trait]
impl TransactionScope for InMemoryTaskStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let id = {
            let mut state = lock(&self.state)?;
            state.next_tx += 1;
            state.next_tx
        };
        let shared = Arc::new(TxState {
            id,
            store: Arc::clone(&self.state),
            staged: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        });
        Ok(Box::new(InMemoryTransaction { shared }))
    }
}

/// State of one open transaction, shared with the port handles it hands out.
struct TxState {
    id: TxId,
    store: Arc<Mutex<StoreState>>,
    /// Tasks written in this transaction, applied on commit.
    staged: Mutex<BTreeMap<TaskId, Task>>,
    closed: AtomicBool,
}

impl TxState {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Closes the transaction, applying staged writes when `apply` is set.
    fn close(&self, apply: bool) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        let mut state = lock(&self.store)?;
        let mut staged = self.staged.lock().map_err(|_| StoreError::Poisoned)?;
        if apply {
            for (id, task) in std::mem::take(&mut *staged) {
                state.tasks.insert(id, task);
            }
        } else {
            staged.clear();
        }
        state.release_locks(self.id);
        Ok(())
    }

    /// Applies `change` to the transaction's view of a task this
    /// transaction has locked.
    fn write(
        &self,
        task_id: TaskId,
        change: impl FnOnce(&mut Task) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        let state = lock(&self.store)?;
        let Some(committed) = state.tasks.get(&task_id) else {
            return Err(StoreError::NotFound(task_id));
        };
        if state.locks.get(&task_id) != Some(&self.id) {
            return Err(StoreError::NotLocked(task_id));
        }
        let mut staged = self.staged.lock().map_err(|_| StoreError::Poisoned)?;
        let mut task = staged
            .get(&task_id)
            .cloned()
            .unwrap_or_else(|| committed.clone());
        change(&mut task)?;
        staged.insert(task_id, task);
        Ok(())
    }
}

fn transition(task: &mut Task, to: TaskStatus) -> Result<(), StoreError> {
    if !task.status.can_transition_to(to) {
        return Err(StoreError::InvalidTransition {
            task_id: task.id,
            from: task.status,
            to,
        });
    }
    task.status = to;
    Ok(())
}

#[async_trait]
impl PendingTaskSource for TxState {
    async fn next_pending_task(&self) -> Result<Option<Task>, StoreError> {
        self.ensure_open()?;
        let mut state = lock(&self.store)?;
        let staged = self.staged.lock().map_err(|_| StoreError::Poisoned)?;

        let next = state
            .tasks
            .values()
            .filter(|task| task.status.is_claimable())
            .filter(|task| {
                state
                    .locks
                    .get(&task.id)
                    .is_none_or(|owner| *owner == self.id)
            })
            .map(|task| staged.get(&task.id).unwrap_or(task))
            .find(|task| task.status.is_claimable())
            .cloned();

        if let Some(task) = &next {
            state.locks.insert(task.id, self.id);
        }
        Ok(next)
    }
}

#[async_trait]
impl ExecutionHistory for TxState {
    async fn contains(
        &self,
        workflow: &str,
        step: &str,
        fingerprint: &str,
    ) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let state = lock(&self.store)?;
        Ok(state
            .history
            .iter()
            .any(|record| record.matches(workflow, step, fingerprint)))
    }
}

#[async_trait]
impl TaskFinalizer for TxState {
    async fn finalize(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        output: TaskOutput,
    ) -> Result<(), StoreError> {
        self.write(task_id, |task| {
            if !status.is_terminal() {
                return Err(StoreError::InvalidTransition {
                    task_id,
                    from: task.status,
                    to: status,
                });
            }
            transition(task, status)?;
            task.output = Some(output.into_value());
            Ok(())
        })
    }
}

#[async_trait]
impl TaskStarter for TxState {
    async fn start(&self, task_id: TaskId, worker: WorkerId) -> Result<(), StoreError> {
        self.write(task_id, |task| {
            transition(task, TaskStatus::Running)?;
            task.worker_uuid = Some(worker);
            Ok(())
        })
    }
}

/// Transaction handle returned by [`InMemoryTaskStore::begin`].
pub struct InMemoryTransaction {
    shared: Arc<TxState>,
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    fn ports(&self) -> ClaimPorts {
        ClaimPorts {
            tasks: self.shared.clone(),
            history: self.shared.clone(),
            finalizer: self.shared.clone(),
            starter: self.shared.clone(),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.shared.close(true)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.shared.close(false)
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.shared.closed.load(Ordering::SeqCst) {
            // Dropped without commit or rollback: same as rollback.
            let _ = self.shared.close(false);
        }
    }
}
