// マーカー解決
pub mod marker;

// 短い欠損区間の補間
pub mod interpolation;

// リサンプリングと平滑化
pub mod resample;

// 再処理パイプライン
pub mod pipeline;

pub use pipeline::{PipelineSettings, ReprocessingPipeline};
