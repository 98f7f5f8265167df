use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::models::error::AgentError;
use crate::models::trajectory::AgentTrajectory;

/// 処理段階
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    MarkerResolution,
    Interpolation,
    Resampling,
    Smoothing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::MarkerResolution => "marker-resolution",
            Stage::Interpolation => "interpolation",
            Stage::Resampling => "resampling",
            Stage::Smoothing => "smoothing",
        };
        write!(f, "{}", name)
    }
}

/// 1エージェントの軌跡に適用される純粋な変換段階
pub trait IStage {
    /// 段階の種類
    fn stage(&self) -> Stage;

    /// 軌跡を変換した新しい軌跡を返す（入力は変更しない）
    fn apply(&self, trajectory: &AgentTrajectory) -> Result<AgentTrajectory, AgentError>;
}

/// 処理の診断情報を受け取るインターフェース
///
/// 各コンポーネントに注入され、グローバルな状態は持ちません。
pub trait IReporter: Send + Sync {
    /// 段階の前後でのエージェントごとの欠損数
    fn missing_counts(&self, label: &str, counts: &BTreeMap<String, usize>);

    /// エージェントに段階を適用した
    fn stage_applied(&self, agent_id: &str, stage: Stage);

    /// エージェントを除外した
    fn agent_skipped(&self, agent_id: &str, reason: &str);
}

/// tracingへ転送する既定の実装
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl IReporter for TracingReporter {
    fn missing_counts(&self, label: &str, counts: &BTreeMap<String, usize>) {
        info!(label, ?counts, "欠損数");
    }

    fn stage_applied(&self, agent_id: &str, stage: Stage) {
        debug!(agent_id, %stage, "段階を適用しました");
    }

    fn agent_skipped(&self, agent_id: &str, reason: &str) {
        warn!(agent_id, reason, "エージェントを除外しました");
    }
}

/// 記録された診断イベント
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
    MissingCounts(String, BTreeMap<String, usize>),
    StageApplied(String, Stage),
    AgentSkipped(String, String),
}

/// イベントをメモリに保持する実装（テスト・監査用）
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<ReportEvent>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// 除外されたエージェントID
    pub fn skipped_agents(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ReportEvent::AgentSkipped(id, _) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ReportEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl IReporter for MemoryReporter {
    fn missing_counts(&self, label: &str, counts: &BTreeMap<String, usize>) {
        self.push(ReportEvent::MissingCounts(label.to_string(), counts.clone()));
    }

    fn stage_applied(&self, agent_id: &str, stage: Stage) {
        self.push(ReportEvent::StageApplied(agent_id.to_string(), stage));
    }

    fn agent_skipped(&self, agent_id: &str, reason: &str) {
        self.push(ReportEvent::AgentSkipped(agent_id.to_string(), reason.to_string()));
    }
}
