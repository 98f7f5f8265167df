//! # Metrics モジュール
//!
//! 連続追跡区間とトラックレットから評価指標を集計します。
//!
//! 指標はエージェント → シナリオ → 全体の順に単純連結で統合され、
//! 平均の平均は取りません。どのサンプル・トラックレットも等しく重み付けされます。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::features::{Feature, FeatureTrajectory, KinematicFeatures};
use crate::analysis::segmentation::TrackingSegmenter;
use crate::models::{MultiAgentTable, math_utils::mean_std};

/// 指標名
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    TrackingDuration,
    PerceptionNoise,
    MotionSpeed,
    PathEfficiency,
    MinSocialDistances,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::TrackingDuration => "tracking_duration",
            MetricName::PerceptionNoise => "perception_noise",
            MetricName::MotionSpeed => "motion_speed",
            MetricName::PathEfficiency => "path_efficiency",
            MetricName::MinSocialDistances => "min_social_distances",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 指標名から値の列への対応
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricAccumulator {
    values: BTreeMap<MetricName, Vec<f64>>,
}

impl MetricAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 値を追加
    pub fn extend<I: IntoIterator<Item = f64>>(&mut self, name: MetricName, values: I) {
        self.values.entry(name).or_default().extend(values);
    }

    pub fn push(&mut self, name: MetricName, value: f64) {
        self.values.entry(name).or_default().push(value);
    }

    /// 別の集計を連結して統合
    pub fn merge(&mut self, other: MetricAccumulator) {
        for (name, values) in other.values {
            self.extend(name, values);
        }
    }

    pub fn get(&self, name: MetricName) -> &[f64] {
        self.values.get(&name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(Vec::is_empty)
    }

    /// 指標ごとの要約統計
    pub fn summarize(&self) -> BTreeMap<MetricName, MetricSummary> {
        self.values
            .iter()
            .map(|(name, values)| (*name, MetricSummary::of(*name, values)))
            .collect()
    }
}

/// 要約統計（平均 ± 母標準偏差）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
}

impl MetricSummary {
    /// 知覚ノイズは絶対値で集計する
    pub fn of(name: MetricName, values: &[f64]) -> Self {
        let values: Vec<f64> = if name == MetricName::PerceptionNoise {
            values.iter().map(|v| v.abs()).collect()
        } else {
            values.to_vec()
        };
        let (mean, std) = mean_std(&values);
        Self {
            count: values.len(),
            mean,
            std,
        }
    }
}

/// 指標の要約をログに出力
pub fn log_metrics(label: &str, metrics: &MetricAccumulator) {
    for (name, summary) in metrics.summarize() {
        debug!("[{}] {}: {:.2}+-{:.2}", label, name, summary.mean, summary.std);
        if name == MetricName::PathEfficiency {
            debug!("[{}] ベンチマークのトラックレット数: {}", label, summary.count);
        }
    }
}

/// 連続追跡区間に基づく指標の集計器
#[derive(Debug, Clone, Copy, Default)]
pub struct BenchmarkAggregator {
    pub segmenter: TrackingSegmenter,
    pub features: KinematicFeatures,
}

impl BenchmarkAggregator {
    pub fn new(segmenter: TrackingSegmenter, features: KinematicFeatures) -> Self {
        Self { segmenter, features }
    }

    /// 連続追跡区間ごとの継続時間
    pub fn tracking_durations(&self, table: &MultiAgentTable) -> Vec<f64> {
        table
            .agents()
            .iter()
            .flat_map(|agent| {
                self.segmenter
                    .segments(agent)
                    .into_iter()
                    .map(move |segment| segment.duration(agent))
            })
            .collect()
    }

    /// 知覚ノイズ（連続追跡区間内の加速度の大きさ）
    ///
    /// 加速度はエージェントの軌跡全体で計算してから区間ごとに取り出します。
    pub fn perception_noise(&self, table: &MultiAgentTable) -> Vec<f64> {
        let mut noise = Vec::new();
        for agent in table.agents() {
            let with_acceleration = self.features.acceleration_one(&FeatureTrajectory::from(agent.clone()));
            let Some(acceleration) = with_acceleration.get(Feature::Acceleration) else {
                continue;
            };
            for segment in self.segmenter.segments(agent) {
                noise.extend(acceleration[segment.range()].iter().map(|a| a.abs()));
            }
        }
        noise
    }

    /// トラックレット単位の速度と経路効率
    ///
    /// 速度はトラックレット先頭を除く全サンプル、経路効率はトラックレット最後の値を
    /// 1つの値として集計します。
    pub fn benchmark_metrics(&self, table: &MultiAgentTable) -> MetricAccumulator {
        let mut overall = MetricAccumulator::new();
        for agent in table.agents() {
            let trajectory = FeatureTrajectory::from(agent.clone());
            let mut agent_metrics = MetricAccumulator::new();
            agent_metrics.extend(MetricName::MotionSpeed, []);
            agent_metrics.extend(MetricName::PathEfficiency, []);

            for segment in self.segmenter.segments(agent) {
                for range in self.segmenter.tracklets(segment) {
                    let tracklet = trajectory.slice(range.start, range.end);
                    let with_speed = self.features.speed_one(&tracklet);
                    let with_efficiency = self.features.path_efficiency_one(&with_speed);

                    if let Some(speed) = with_speed.get(Feature::Speed) {
                        agent_metrics.extend(MetricName::MotionSpeed, speed.iter().skip(1).copied());
                    }
                    if let Some(&last) = with_efficiency
                        .get(Feature::PathEfficiency)
                        .and_then(|pe| pe.get(1..))
                        .and_then(|pe| pe.last())
                    {
                        agent_metrics.push(MetricName::PathEfficiency, last);
                    }
                }
            }
            overall.merge(agent_metrics);
        }
        overall
    }
}
