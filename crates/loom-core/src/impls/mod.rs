//! Impls - ポートの実装
//!
//! 開発・テスト用のインメモリ実装です。
//! - **InMemoryTaskStore**: 行ロック付きトランザクションを持つタスクストア
//! - **GraphDependencyResolver**: 依存グラフから実行環境を組み立てる

pub mod dependency_graph;
pub mod memory_store;
pub mod resolver;

pub use self::dependency_graph::DependencyGraph;
pub use self::memory_store::{InMemoryTaskStore, InMemoryTransaction, StatusCounts};
pub use self::resolver::GraphDependencyResolver;
