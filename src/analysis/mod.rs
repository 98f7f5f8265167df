// 運動学的特徴量
pub mod features;

// 連続追跡区間とトラックレット
pub mod segmentation;

// 指標の集計
pub mod metrics;

// 対人距離
pub mod social;

// 記録単位・データセット全体の解析
pub mod analyzer;

pub use analyzer::{AnalyzerSettings, DatasetAnalyzer, GlobalAnalyzer};
pub use metrics::{BenchmarkAggregator, MetricAccumulator, MetricName, MetricSummary};
