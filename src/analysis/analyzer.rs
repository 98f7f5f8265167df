//! # Analyzer モジュール
//!
//! 記録単位（`DatasetAnalyzer`）とデータセット全体（`GlobalAnalyzer`）の指標集計を行います。
//!
//! 記録ごとの処理内容:
//!
//! 1. 補間のみの再処理で軌跡表を作成
//! 2. 対象エージェント（接頭辞指定）に絞り込み
//! 3. 追跡継続時間・知覚ノイズ・最小対人距離を集計
//! 4. ベンチマーク用の再処理（リサンプリング + 平滑化）後に速度と経路効率を集計

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::analysis::features::{FeatureTrajectory, KinematicFeatures};
use crate::analysis::metrics::{BenchmarkAggregator, MetricAccumulator, MetricName, MetricSummary, log_metrics};
use crate::analysis::social::min_social_distances;
use crate::batch::{RecordingFile, process_all};
use crate::config::ProcessingConfig;
use crate::io::{IoError, read_raw_table};
use crate::models::{BodyCatalog, IReporter, MultiAgentTable, PipelineError, RawTable, TracingReporter};
use crate::processing::{PipelineSettings, ReprocessingPipeline};

/// 記録単位の解析エラー
#[derive(Debug)]
pub enum AnalysisError {
    Io(IoError),
    Pipeline(PipelineError),
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::Io(err) => write!(f, "{}", err),
            AnalysisError::Pipeline(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for AnalysisError {}

impl From<IoError> for AnalysisError {
    fn from(err: IoError) -> Self {
        AnalysisError::Io(err)
    }
}

impl From<PipelineError> for AnalysisError {
    fn from(err: PipelineError) -> Self {
        AnalysisError::Pipeline(err)
    }
}

/// 解析の設定
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    /// 補間のみの再処理設定
    pub pipeline: PipelineSettings,
    /// ベンチマーク指標用の再処理設定
    pub benchmark: Option<PipelineSettings>,
    pub agent_prefixes: Vec<String>,
    pub non_human_prefixes: Vec<String>,
    pub aggregator: BenchmarkAggregator,
    /// 設定ファイルで宣言されたロール
    pub roles: BTreeMap<String, Option<String>>,
}

impl AnalyzerSettings {
    pub fn from_config(config: &ProcessingConfig) -> Self {
        let mut pipeline = config.pipeline_settings();
        pipeline.resample_step = None;
        pipeline.smooth_window = None;
        Self {
            pipeline,
            benchmark: config.benchmark_settings(),
            agent_prefixes: config.analysis.agent_prefixes.clone(),
            non_human_prefixes: config.analysis.non_human_prefixes.clone(),
            aggregator: BenchmarkAggregator::new(config.segmenter(), config.kinematic_features()),
            roles: config.roles.clone(),
        }
    }
}

/// 1記録分の解析結果
#[derive(Debug, Clone)]
pub struct RecordingAnalysis {
    pub table: MultiAgentTable,
    pub metrics: MetricAccumulator,
}

/// 記録単位の解析器
pub struct DatasetAnalyzer<'a> {
    pub settings: AnalyzerSettings,
    reporter: &'a dyn IReporter,
}

impl<'a> DatasetAnalyzer<'a> {
    pub fn new(settings: AnalyzerSettings, reporter: &'a dyn IReporter) -> Self {
        Self { settings, reporter }
    }

    /// 生データから指標を集計
    pub fn run(&self, raw: &RawTable, catalog: &BodyCatalog) -> Result<RecordingAnalysis, PipelineError> {
        let pipeline = ReprocessingPipeline::new(self.settings.pipeline, self.reporter);
        let table = pipeline.run(raw, catalog)?.filter_prefixes(&self.settings.agent_prefixes);
        if table.is_empty() {
            return Err(PipelineError::NoValidAgents);
        }

        let aggregator = &self.settings.aggregator;
        let mut metrics = MetricAccumulator::new();
        metrics.extend(MetricName::TrackingDuration, aggregator.tracking_durations(&table));
        metrics.extend(MetricName::PerceptionNoise, aggregator.perception_noise(&table));
        metrics.extend(
            MetricName::MinSocialDistances,
            min_social_distances(&table, &self.settings.non_human_prefixes),
        );

        let benchmark_table = match self.settings.benchmark {
            Some(settings) => ReprocessingPipeline::new(settings, self.reporter).reprocess_table(&table)?,
            None => table.clone(),
        };
        metrics.merge(aggregator.benchmark_metrics(&benchmark_table));

        Ok(RecordingAnalysis { table, metrics })
    }

    /// CSVファイルを読み込んで解析
    pub fn run_file(&self, path: &Path) -> Result<RecordingAnalysis, AnalysisError> {
        let (raw, mut catalog) = read_raw_table(path)?;
        for (body_id, role) in &self.settings.roles {
            catalog.declare(body_id, role.clone());
        }
        Ok(self.run(&raw, &catalog)?)
    }

    /// 全特徴量を付加した軌跡
    pub fn features(&self, table: &MultiAgentTable) -> Vec<FeatureTrajectory> {
        let features: KinematicFeatures = self.settings.aggregator.features;
        table
            .agents()
            .iter()
            .map(|agent| features.all_one(&FeatureTrajectory::from(agent.clone())))
            .collect()
    }
}

/// 指標の要約（永続化用）
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricReport {
    pub scenarios: BTreeMap<String, BTreeMap<MetricName, MetricSummary>>,
    pub global: BTreeMap<MetricName, MetricSummary>,
    pub failed_recordings: Vec<String>,
}

/// データセット全体の解析結果
#[derive(Debug, Clone, Default)]
pub struct GlobalAnalysis {
    pub scenarios: BTreeMap<String, MetricAccumulator>,
    pub global: MetricAccumulator,
    pub failed_recordings: Vec<String>,
}

impl GlobalAnalysis {
    pub fn report(&self) -> MetricReport {
        MetricReport {
            scenarios: self
                .scenarios
                .iter()
                .map(|(id, metrics)| (id.clone(), metrics.summarize()))
                .collect(),
            global: self.global.summarize(),
            failed_recordings: self.failed_recordings.clone(),
        }
    }
}

/// データセット全体の解析器
///
/// 記録ファイルごとに独立したタスクで解析し、シナリオ → 全体の順に連結します。
#[derive(Debug, Clone)]
pub struct GlobalAnalyzer {
    pub settings: AnalyzerSettings,
}

impl GlobalAnalyzer {
    pub fn new(settings: AnalyzerSettings) -> Self {
        Self { settings }
    }

    pub async fn run(&self, files: Vec<RecordingFile>) -> GlobalAnalysis {
        let settings = self.settings.clone();
        let results = process_all(files, move |file: &RecordingFile| {
            DatasetAnalyzer::new(settings.clone(), &TracingReporter)
                .run_file(&file.path)
                .map(|analysis| analysis.metrics)
        })
        .await;

        let mut analysis = GlobalAnalysis::default();
        for (file, result) in results {
            match result {
                Ok(metrics) => {
                    info!("{} の指標を集計しました", file.file_name());
                    analysis
                        .scenarios
                        .entry(file.scenario_id.clone())
                        .or_default()
                        .merge(metrics);
                }
                Err(reason) => {
                    warn!("{} をスキップしました: {}", file.path.display(), reason);
                    analysis.failed_recordings.push(file.path.display().to_string());
                }
            }
        }

        for (scenario_id, metrics) in &analysis.scenarios {
            log_metrics(scenario_id, metrics);
            analysis.global.merge(metrics.clone());
        }
        log_metrics("global", &analysis.global);
        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MarkerPolicy, MemoryReporter, Position3D, RawFrame};
    use std::time::Duration;

    fn row(frame_id: u64, body: &str, x_mm: f64, y_mm: f64) -> RawFrame {
        RawFrame {
            time: frame_id as f64 * 0.1,
            frame_id,
            body_id: body.to_string(),
            marker_id: Some("1".to_string()),
            position: Position3D::new(x_mm, y_mm, 1700.0),
            rotation: None,
        }
    }

    fn settings() -> AnalyzerSettings {
        AnalyzerSettings {
            pipeline: PipelineSettings::new(MarkerPolicy::BestMarker).with_max_gap(1),
            benchmark: None,
            agent_prefixes: vec!["Helmet".to_string()],
            non_human_prefixes: Vec::new(),
            aggregator: BenchmarkAggregator::new(
                crate::analysis::segmentation::TrackingSegmenter::new(4),
                KinematicFeatures::default(),
            ),
            roles: BTreeMap::new(),
        }
    }

    fn recording() -> RawTable {
        let mut frames = Vec::new();
        for i in 0..8u64 {
            frames.push(row(i, "Helmet_1", i as f64 * 100.0, 0.0));
            frames.push(row(i, "Helmet_2", i as f64 * 100.0, 3000.0));
            frames.push(row(i, "DARKO_Robot", 0.0, 0.0));
        }
        RawTable::new(frames)
    }

    #[test]
    fn test_dataset_metrics() {
        let reporter = MemoryReporter::new();
        let analyzer = DatasetAnalyzer::new(settings(), &reporter);
        let analysis = analyzer.run(&recording(), &BodyCatalog::new()).unwrap();

        assert_eq!(analysis.table.agents().len(), 2);
        let m = &analysis.metrics;
        assert_eq!(m.get(MetricName::TrackingDuration).len(), 2);
        assert!(m.get(MetricName::TrackingDuration).iter().all(|d| (d - 0.7).abs() < 1e-9));
        assert_eq!(m.get(MetricName::MinSocialDistances).len(), 8);
        assert!(m.get(MetricName::MinSocialDistances).iter().all(|d| (d - 3.0).abs() < 1e-9));
        // 2体 x 2トラックレット
        assert_eq!(m.get(MetricName::PathEfficiency).len(), 4);
        assert!(m.get(MetricName::MotionSpeed).iter().all(|v| (v - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_benchmark_pass_resamples() {
        let mut s = settings();
        s.benchmark = Some(s.pipeline.with_resampling(Some(Duration::from_millis(200)), None));
        let analysis = DatasetAnalyzer::new(s, &MemoryReporter::new())
            .run(&recording(), &BodyCatalog::new())
            .unwrap();
        // 8サンプル -> 4格子点 -> トラックレット1本ずつ
        assert_eq!(analysis.metrics.get(MetricName::PathEfficiency).len(), 2);
        // 補間のみの表はリサンプリングされない
        assert_eq!(analysis.table.agents()[0].len(), 8);
    }

    #[test]
    fn test_global_analysis_isolates_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = dir.path().join("Scenario_1");
        std::fs::create_dir_all(&scenario).unwrap();
        let mut csv = String::from("time,frame_id,body_id,marker_id,x,y,z\n");
        for i in 0..8 {
            csv.push_str(&format!("{:.1},{},Helmet_1,1,{},0,1700\n", i as f64 * 0.1, i, i * 100));
        }
        std::fs::write(scenario.join("good.csv"), &csv).unwrap();
        std::fs::write(scenario.join("broken.csv"), "time,frame_id\nnot-a-number,x\n").unwrap();

        let files = crate::batch::discover_recordings(dir.path()).unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let analysis = runtime.block_on(GlobalAnalyzer::new(settings()).run(files));

        assert_eq!(analysis.failed_recordings.len(), 1);
        assert!(analysis.scenarios.contains_key("Scenario_1"));
        assert_eq!(analysis.global.get(MetricName::PathEfficiency).len(), 2);
        let report = analysis.report();
        assert_eq!(report.global[&MetricName::TrackingDuration].count, 1);
    }

    #[test]
    fn test_infinite_time_is_recorded_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = dir.path().join("Scenario_2");
        std::fs::create_dir_all(&scenario).unwrap();
        std::fs::write(
            scenario.join("infinite.csv"),
            "time,frame_id,body_id,marker_id,x,y,z\n0.0,0,Helmet_1,1,0,0,0\ninf,1,Helmet_1,1,100,0,0\n",
        )
        .unwrap();

        let mut s = settings();
        s.benchmark = Some(s.pipeline.with_resampling(Some(Duration::from_millis(400)), None));
        let files = crate::batch::discover_recordings(dir.path()).unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let analysis = runtime.block_on(GlobalAnalyzer::new(s).run(files));

        assert_eq!(analysis.failed_recordings.len(), 1);
        assert!(analysis.failed_recordings[0].ends_with("infinite.csv"));
        assert!(analysis.scenarios.is_empty());
    }
}
