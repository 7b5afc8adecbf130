//! Domain model (IDs, tasks, statuses, outputs, history records, errors).

pub mod errors;
pub mod history;
pub mod ids;
pub mod output;
pub mod state;
pub mod task;

pub use self::errors::{
    ClaimError, ClaimErrorKind, ClaimStage, ErrorClass, ResolveError, StoreError,
};
pub use self::history::ExecutionRecord;
pub use self::ids::{TaskId, WorkerId};
pub use self::output::TaskOutput;
pub use self::state::TaskStatus;
pub use self::task::{Plan, Step, Task, TaskName, TaskNameError, TASK_NAME_SEPARATOR};
