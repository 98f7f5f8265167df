//! # Pipeline モジュール
//!
//! 1回の記録に対する再処理の中核です。
//!
//! ## 処理順序
//!
//! 1. **マーカー解決**: ボディごとに1本の軌跡を作成
//! 2. **欠損補間**: 短い欠損区間のみ線形補間
//! 3. **リサンプリング**: 一定時間刻みへ再配置（設定時のみ）
//! 4. **平滑化**: 後ろ向き移動平均（設定時のみ）
//!
//! 各エージェントは独立に処理され、1つのエージェントの失敗は診断として報告されるだけで
//! 記録全体の処理は継続します。処理の前後と各段階の後で、エージェントごとの欠損数を
//! 報告します（ラベルは段階名）。
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use trajproc::models::{MarkerPolicy, TracingReporter};
//! use trajproc::processing::{PipelineSettings, ReprocessingPipeline};
//!
//! let settings = PipelineSettings::new(MarkerPolicy::BestMarker).with_max_gap(5);
//! let pipeline = ReprocessingPipeline::new(settings, &TracingReporter);
//! let table = pipeline.run(&raw, &catalog)?;
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, trace};

use crate::models::{
    AgentError, AgentTrajectory, BodyCatalog, Column, IReporter, IStage, MarkerPolicy, MultiAgentTable,
    PipelineError, RawTable,
};
use crate::processing::interpolation::GapInterpolator;
use crate::processing::marker::MarkerResolver;
use crate::processing::resample::{Resampler, Smoother};

/// 再処理の設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub marker_policy: MarkerPolicy,
    /// 補間する欠損区間の最大長（`None` または0で補間なし）
    pub max_gap_samples: Option<usize>,
    pub resample_step: Option<Duration>,
    pub smooth_window: Option<Duration>,
    /// 生データ座標に掛ける係数
    pub unit_scale: f64,
}

impl PipelineSettings {
    pub fn new(marker_policy: MarkerPolicy) -> Self {
        Self {
            marker_policy,
            max_gap_samples: None,
            resample_step: None,
            smooth_window: None,
            unit_scale: 0.001,
        }
    }

    pub fn with_max_gap(mut self, max_gap_samples: usize) -> Self {
        self.max_gap_samples = Some(max_gap_samples);
        self
    }

    pub fn with_resampling(mut self, step: Option<Duration>, window: Option<Duration>) -> Self {
        self.resample_step = step;
        self.smooth_window = window;
        self
    }
}

/// 再処理パイプライン
pub struct ReprocessingPipeline<'a> {
    pub settings: PipelineSettings,
    reporter: &'a dyn IReporter,
}

impl<'a> ReprocessingPipeline<'a> {
    pub fn new(settings: PipelineSettings, reporter: &'a dyn IReporter) -> Self {
        Self { settings, reporter }
    }

    /// 設定に応じた段階を処理順に並べる
    fn stages(&self) -> Vec<Box<dyn IStage>> {
        let mut stages: Vec<Box<dyn IStage>> = Vec::new();
        if let Some(k) = self.settings.max_gap_samples.filter(|k| *k > 0) {
            stages.push(Box::new(GapInterpolator::new(k)));
        }
        if let Some(step) = self.settings.resample_step {
            stages.push(Box::new(Resampler::new(step)));
        }
        if let Some(window) = self.settings.smooth_window {
            stages.push(Box::new(Smoother::new(window)));
        }
        stages
    }

    /// 生データから軌跡表までの全処理
    pub fn run(&self, raw: &RawTable, catalog: &BodyCatalog) -> Result<MultiAgentTable, PipelineError> {
        let resolver = MarkerResolver::new(self.settings.marker_policy, self.settings.unit_scale);
        let agents = resolver.resolve(raw, catalog, self.reporter);
        debug!(
            "マーカー解決完了: {}体 (ポリシー: {})",
            agents.len(),
            self.settings.marker_policy
        );
        self.reprocess(agents)
    }

    /// 既存の軌跡表を再処理する
    pub fn reprocess_table(&self, table: &MultiAgentTable) -> Result<MultiAgentTable, PipelineError> {
        self.reprocess(table.agents().to_vec())
    }

    /// 軌跡ごとに補間・リサンプリング・平滑化を適用し、1つの表に再結合する
    pub fn reprocess(&self, agents: Vec<AgentTrajectory>) -> Result<MultiAgentTable, PipelineError> {
        self.reporter.missing_counts("前処理前", &Self::missing_counts(&agents));

        let mut current: Vec<AgentTrajectory> = agents
            .into_iter()
            .filter(|agent| match agent.check_time_order() {
                Ok(()) => true,
                Err(err) => {
                    self.skip(&err);
                    false
                }
            })
            .collect();

        for stage in self.stages() {
            current = current
                .iter()
                .filter_map(|agent| match self.apply_stage(stage.as_ref(), agent) {
                    Ok(out) => Some(out),
                    Err(err) => {
                        self.skip(&err);
                        None
                    }
                })
                .collect();
            self.reporter
                .missing_counts(&stage.stage().to_string(), &Self::missing_counts(&current));
        }

        if current.is_empty() {
            return Err(PipelineError::NoValidAgents);
        }

        let table = MultiAgentTable::from_agents(current)?;
        self.reporter.missing_counts("前処理後", &table.missing_counts(Column::X));
        Ok(table)
    }

    fn missing_counts(agents: &[AgentTrajectory]) -> BTreeMap<String, usize> {
        agents
            .iter()
            .map(|a| (a.agent_id.clone(), a.missing_count(Column::X)))
            .collect()
    }

    fn skip(&self, err: &AgentError) {
        self.reporter.agent_skipped(err.agent_id(), &err.to_string());
    }

    /// 1エージェントに1段階を適用
    fn apply_stage(&self, stage: &dyn IStage, agent: &AgentTrajectory) -> Result<AgentTrajectory, AgentError> {
        let mut out = stage.apply(agent)?;
        // 数値列以外のメタデータは変換後に戻す
        out.agent_id = agent.agent_id.clone();
        out.role = agent.role.clone();
        out.chosen_marker_id = agent.chosen_marker_id.clone();
        self.reporter.stage_applied(&agent.agent_id, stage.stage());
        trace!("{}: {} 適用後 {}サンプル", agent.agent_id, stage.stage(), out.len());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MemoryReporter, Position3D, RawFrame, ReportEvent, Stage};

    const NAN: f64 = f64::NAN;

    fn raw_row(frame_id: u64, body: &str, marker: &str, x: f64) -> RawFrame {
        RawFrame {
            time: frame_id as f64 * 0.1,
            frame_id,
            body_id: body.to_string(),
            marker_id: Some(marker.to_string()),
            position: Position3D::new(x, 0.0, 0.0),
            rotation: None,
        }
    }

    fn recording() -> (RawTable, BodyCatalog) {
        let xs = [1000.0, NAN, NAN, 4000.0, 5000.0];
        let mut frames = Vec::new();
        for (i, &x) in xs.iter().enumerate() {
            frames.push(raw_row(i as u64, "Helmet_1", "1", x));
            frames.push(raw_row(i as u64, "Helmet_1", "2", NAN));
            frames.push(raw_row(i as u64, "Helmet_2", "1", i as f64 * 1000.0));
        }
        let mut catalog = BodyCatalog::new();
        catalog.declare("Helmet_1", Some("Carrier-Box".to_string()));
        catalog.declare("Helmet_2", None);
        catalog.declare("Helmet_3", Some("Visitors-Alone".to_string()));
        (RawTable::new(frames), catalog)
    }

    #[test]
    fn test_run_interpolates_and_reports_missing_counts() {
        let (raw, catalog) = recording();
        let reporter = MemoryReporter::new();
        let pipeline = ReprocessingPipeline::new(PipelineSettings::new(MarkerPolicy::BestMarker).with_max_gap(2), &reporter);

        let table = pipeline.run(&raw, &catalog).unwrap();
        assert_eq!(table.agents().len(), 2);

        let helmet = table.agent("Helmet_1").unwrap();
        assert_eq!(helmet.role.as_deref(), Some("Carrier-Box"));
        assert_eq!(helmet.chosen_marker_id.as_deref(), Some("1"));
        let xs = helmet.column(Column::X);
        assert!((xs[1] - 2.0).abs() < 1e-9 && (xs[2] - 3.0).abs() < 1e-9);

        let counts = missing_count_events(&reporter);
        let labels: Vec<&str> = counts.iter().map(|(label, _)| label.as_str()).collect();
        assert_eq!(labels, vec!["前処理前", "interpolation", "前処理後"]);
        assert_eq!(counts[0].1.get("Helmet_1"), Some(&2));
        assert_eq!(counts[1].1.get("Helmet_1"), Some(&0));
        assert_eq!(counts[2].1.get("Helmet_1"), Some(&0));
        assert_eq!(reporter.skipped_agents(), vec!["Helmet_3".to_string()]);
    }

    fn missing_count_events(reporter: &MemoryReporter) -> Vec<(String, BTreeMap<String, usize>)> {
        reporter
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ReportEvent::MissingCounts(label, counts) => Some((label, counts)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_each_stage_reports_missing_counts() {
        let agent = AgentTrajectory::from_xy("a", &[(0.0, 0.0, 0.0), (0.1, 1.0, 0.0), (1.7, 2.0, 0.0)]);
        let settings = PipelineSettings::new(MarkerPolicy::BestMarker)
            .with_resampling(Some(Duration::from_millis(400)), Some(Duration::from_millis(800)));
        let reporter = MemoryReporter::new();
        ReprocessingPipeline::new(settings, &reporter).reprocess(vec![agent]).unwrap();

        // 格子 0.0, 0.4, 0.8, 1.2, 1.6 のうち 0.4〜1.2 が空 / 平滑化で 0.4 が埋まる
        let counts = missing_count_events(&reporter);
        let summary: Vec<(&str, Option<&usize>)> =
            counts.iter().map(|(label, c)| (label.as_str(), c.get("a"))).collect();
        assert_eq!(summary, vec![
            ("前処理前", Some(&0)),
            ("resampling", Some(&3)),
            ("smoothing", Some(&2)),
            ("前処理後", Some(&2)),
        ]);
    }

    #[test]
    fn test_non_finite_time_skips_agent() {
        let good = AgentTrajectory::from_xy("a", &[(0.0, 0.0, 0.0), (1.0, 1.0, 0.0)]);
        let bad = AgentTrajectory::from_xy("b", &[(0.0, 0.0, 0.0), (f64::INFINITY, 1.0, 0.0)]);
        let settings = PipelineSettings::new(MarkerPolicy::BestMarker)
            .with_resampling(Some(Duration::from_millis(400)), None);
        let reporter = MemoryReporter::new();

        let table = ReprocessingPipeline::new(settings, &reporter).reprocess(vec![good, bad]).unwrap();
        assert_eq!(table.agents().len(), 1);
        assert_eq!(reporter.skipped_agents(), vec!["b".to_string()]);
    }

    #[test]
    fn test_bad_agent_does_not_abort_recording() {
        let good = AgentTrajectory::from_xy("a", &[(0.0, 0.0, 0.0), (1.0, 1.0, 0.0)]);
        let bad = AgentTrajectory::from_xy("b", &[(1.0, 0.0, 0.0), (0.5, 1.0, 0.0)]);
        let reporter = MemoryReporter::new();
        let pipeline = ReprocessingPipeline::new(PipelineSettings::new(MarkerPolicy::BestMarker), &reporter);

        let table = pipeline.reprocess(vec![good, bad]).unwrap();
        assert_eq!(table.agents().len(), 1);
        assert_eq!(reporter.skipped_agents(), vec!["b".to_string()]);
    }

    #[test]
    fn test_no_valid_agents_is_an_error() {
        let reporter = MemoryReporter::new();
        let pipeline = ReprocessingPipeline::new(PipelineSettings::new(MarkerPolicy::BestMarker), &reporter);
        assert!(matches!(pipeline.reprocess(Vec::new()), Err(PipelineError::NoValidAgents)));
    }

    #[test]
    fn test_stage_order_and_metadata_restoration() {
        let mut agent = AgentTrajectory::from_xy("Helmet_5", &[(0.0, 0.0, 0.0), (0.2, 1.0, 0.0), (0.5, 2.0, 0.0)]);
        agent.role = Some("Visitors-Group".to_string());
        agent.chosen_marker_id = Some("7".to_string());
        let settings = PipelineSettings::new(MarkerPolicy::BestMarker)
            .with_max_gap(1)
            .with_resampling(Some(Duration::from_millis(400)), Some(Duration::from_millis(800)));
        let reporter = MemoryReporter::new();
        let table = ReprocessingPipeline::new(settings, &reporter).reprocess(vec![agent]).unwrap();

        let out = table.agent("Helmet_5").unwrap();
        assert_eq!(out.role.as_deref(), Some("Visitors-Group"));
        assert_eq!(out.chosen_marker_id.as_deref(), Some("7"));
        assert_eq!(out.len(), 2);
        // 格子: 0.0 -> x=0, 0.4 -> x=2 / 平滑化: (0 + 2) / 2
        assert_eq!(out.column(Column::X), vec![0.0, 1.0]);

        let stages: Vec<Stage> = reporter
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ReportEvent::StageApplied(_, stage) => Some(stage),
                _ => None,
            })
            .collect();
        assert_eq!(stages, vec![Stage::Interpolation, Stage::Resampling, Stage::Smoothing]);
    }
}
