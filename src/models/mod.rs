// 基本的なデータ型と数値ユーティリティ
pub mod common;

// エラー型
pub mod error;

// 生データ・軌跡・軌跡表
pub mod trajectory;

// 処理段階と診断のインターフェース（trait）定義
pub mod traits;

// 便利な re-export
pub use common::*;
pub use error::{AgentError, PipelineError};
pub use trajectory::{AgentTrajectory, BodyCatalog, MultiAgentTable, RawFrame, RawTable, Sample, TableRow};
pub use traits::*;
