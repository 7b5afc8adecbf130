//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（タスクストア、実行履歴、依存解決、時計）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod resolver;
pub mod task_store;
pub mod transaction;
pub mod transition;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::resolver::DependencyResolver;
pub use self::task_store::{ExecutionHistory, PendingTaskSource};
pub use self::transaction::{ClaimPorts, Transaction, TransactionScope};
pub use self::transition::{TaskFinalizer, TaskStarter};
