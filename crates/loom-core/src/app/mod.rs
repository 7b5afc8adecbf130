//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **TaskClaimer**: 次のタスクを取得・検証して RUNNING にする
//! - **ClaimerBuilder**: TaskClaimer の構築とワイヤリング
//! - **Worker / WorkerGroup**: トランザクション境界とポーリングループ
//! - **PollBackoff**: アイドル時の待機時間
//! - **ClaimStats**: クレーム結果の集計

pub mod backoff;
pub mod builder;
pub mod claimer;
pub mod stats;
pub mod worker;

// 主要な型を再エクスポート
pub use self::backoff::PollBackoff;
pub use self::builder::{BuildError, ClaimerBuilder};
pub use self::claimer::TaskClaimer;
pub use self::stats::{ClaimCounts, ClaimStats};
pub use self::worker::{
    LogSink, PollOutcome, TaskSink, Worker, WorkerContext, WorkerError, WorkerGroup,
};
