//! loom-core
//!
//! Core building blocks for Loom workers: claiming the next pending task,
//! rejecting expired and duplicate work, and moving the rest to RUNNING.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, output, history, errors）
//! - **ports**: 抽象化レイヤー（PendingTaskSource, ExecutionHistory, DependencyResolver,
//!   TaskFinalizer, TaskStarter, TransactionScope, Clock）
//! - **fingerprint**: 重複判定（組み込み jq サブセット、正規化 JSON、履歴照合）
//! - **app**: アプリケーションロジック（TaskClaimer, ClaimerBuilder, Worker, WorkerGroup）
//! - **impls**: 実装（InMemoryTaskStore, GraphDependencyResolver など開発用）
//! - **config**: ワーカー設定（TOML）

pub mod app;
pub mod config;
pub mod domain;
pub mod fingerprint;
pub mod impls;
pub mod ports;
