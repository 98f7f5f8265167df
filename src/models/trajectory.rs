use std::collections::{BTreeMap, HashSet};

use crate::models::common::{Column, Position3D, ROTATION_CHANNELS};
use crate::models::error::AgentError;

/// 生データの1行（時刻・ボディ・マーカーごとのサンプル）
///
/// 座標はミリメートル単位、オクルージョン時は `NaN` です。
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// 記録開始からの経過秒数
    pub time: f64,
    pub frame_id: u64,
    pub body_id: String,
    /// 複数マーカーを持つボディのみ設定される
    pub marker_id: Option<String>,
    pub position: Position3D,
    /// 6自由度ボディの回転行列（マーカーを持たない行のみ）
    pub rotation: Option<[f64; ROTATION_CHANNELS]>,
}

/// 1回の記録に含まれる生データ
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub frames: Vec<RawFrame>,
}

impl RawTable {
    pub fn new(frames: Vec<RawFrame>) -> Self {
        Self { frames }
    }

    /// 登場順にボディIDを列挙
    pub fn body_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.frames
            .iter()
            .map(|f| f.body_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// 指定ボディの行を取得
    pub fn frames_of<'a>(&'a self, body_id: &'a str) -> impl Iterator<Item = &'a RawFrame> + 'a {
        self.frames.iter().filter(move |f| f.body_id == body_id)
    }
}

/// ボディIDとロール（役割ラベル）の対応表
///
/// 未知のIDに対して既定値を返すことはせず、`None` を返します。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyCatalog {
    entries: BTreeMap<String, Option<String>>,
}

impl BodyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// ボディを登録（既存のロールは `None` で上書きしない）
    pub fn declare(&mut self, body_id: &str, role: Option<String>) {
        let entry = self.entries.entry(body_id.to_string()).or_insert(None);
        if role.is_some() {
            *entry = role;
        }
    }

    #[cfg(test)]
    pub fn contains(&self, body_id: &str) -> bool {
        self.entries.contains_key(body_id)
    }

    /// ロールの検索
    pub fn role(&self, body_id: &str) -> Option<&str> {
        self.entries.get(body_id).and_then(|r| r.as_deref())
    }

    pub fn body_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }
}

/// エージェント軌跡の1サンプル
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time: f64,
    /// リサンプリングで空になったバケットでは `None`
    pub frame_id: Option<u64>,
    pub position: Position3D,
    pub rotation: Option<[f64; ROTATION_CHANNELS]>,
}

impl Sample {
    pub fn new(time: f64, frame_id: Option<u64>, position: Position3D) -> Self {
        Self {
            time,
            frame_id,
            position,
            rotation: None,
        }
    }

    /// 列の値を取得（存在しない回転列はNaN）
    pub fn get(&self, column: Column) -> f64 {
        match column {
            Column::X => self.position.x,
            Column::Y => self.position.y,
            Column::Z => self.position.z,
            Column::Rotation(i) => self.rotation.map(|r| r[i]).unwrap_or(f64::NAN),
        }
    }

    /// 列の値を設定
    pub fn set(&mut self, column: Column, value: f64) {
        match column {
            Column::X => self.position.x = value,
            Column::Y => self.position.y = value,
            Column::Z => self.position.z = value,
            Column::Rotation(i) => {
                let rotation = self.rotation.get_or_insert([f64::NAN; ROTATION_CHANNELS]);
                rotation[i] = value;
            }
        }
    }
}

/// 1エージェントの時系列軌跡
///
/// サンプルは時刻順に並び、`agent_id`・`role`・`chosen_marker_id` は
/// 軌跡全体で一定です。
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTrajectory {
    pub agent_id: String,
    pub role: Option<String>,
    pub chosen_marker_id: Option<String>,
    pub samples: Vec<Sample>,
}

impl AgentTrajectory {
    pub fn new(agent_id: impl Into<String>, samples: Vec<Sample>) -> Self {
        Self {
            agent_id: agent_id.into(),
            role: None,
            chosen_marker_id: None,
            samples,
        }
    }

    /// (時刻, x, y) の組から軌跡を作成（z = 0, フレーム番号は連番）
    #[cfg(test)]
    pub fn from_xy(agent_id: impl Into<String>, points: &[(f64, f64, f64)]) -> Self {
        let samples = points
            .iter()
            .enumerate()
            .map(|(i, &(t, x, y))| Sample::new(t, Some(i as u64), Position3D::new(x, y, 0.0)))
            .collect();
        Self::new(agent_id, samples)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.time).collect()
    }

    /// 列の値を取り出す
    pub fn column(&self, column: Column) -> Vec<f64> {
        self.samples.iter().map(|s| s.get(column)).collect()
    }

    /// 列の値を書き戻す
    pub fn set_column(&mut self, column: Column, values: &[f64]) {
        for (sample, &value) in self.samples.iter_mut().zip(values) {
            sample.set(column, value);
        }
    }

    /// 軌跡が持つ数値列（位置3列 + 回転9列）
    pub fn numeric_columns(&self) -> Vec<Column> {
        let mut columns = Column::POSITION.to_vec();
        if self.samples.iter().any(|s| s.rotation.is_some()) {
            columns.extend((0..ROTATION_CHANNELS).map(Column::Rotation));
        }
        columns
    }

    /// 指定列の欠損数
    pub fn missing_count(&self, column: Column) -> usize {
        self.samples.iter().filter(|s| s.get(column).is_nan()).count()
    }

    /// 時刻が厳密に増加していることを確認
    pub fn check_time_order(&self) -> Result<(), AgentError> {
        if self.samples.is_empty() {
            return Err(AgentError::Empty(self.agent_id.clone()));
        }
        if let Some(bad) = self.samples.iter().find(|s| !s.time.is_finite()) {
            return Err(AgentError::NonFiniteTime(self.agent_id.clone(), bad.time));
        }
        for pair in self.samples.windows(2) {
            if pair[1].time == pair[0].time {
                return Err(AgentError::DuplicateTime(self.agent_id.clone(), pair[1].time));
            }
            if pair[1].time < pair[0].time {
                return Err(AgentError::UnsortedTime(self.agent_id.clone(), pair[1].time));
            }
        }
        Ok(())
    }

    /// 範囲 [start, end) の部分軌跡（メタデータは引き継ぐ）
    pub fn slice(&self, start: usize, end: usize) -> AgentTrajectory {
        AgentTrajectory {
            agent_id: self.agent_id.clone(),
            role: self.role.clone(),
            chosen_marker_id: self.chosen_marker_id.clone(),
            samples: self.samples[start..end].to_vec(),
        }
    }
}

/// 出力用の1行ビュー
#[derive(Debug, Clone, Copy)]
pub struct TableRow<'a> {
    pub agent: &'a AgentTrajectory,
    pub sample: &'a Sample,
}

/// 複数エージェントの軌跡表
///
/// 同一の `(agent_id, time)` を持つ行は存在しません。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiAgentTable {
    agents: Vec<AgentTrajectory>,
}

impl MultiAgentTable {
    /// 軌跡の集合から表を構築
    ///
    /// エージェントIDの重複と各軌跡の時刻順を検証し、IDの昇順に並べます。
    pub fn from_agents(mut agents: Vec<AgentTrajectory>) -> Result<Self, AgentError> {
        let mut seen = HashSet::new();
        for agent in &agents {
            if !seen.insert(agent.agent_id.clone()) {
                return Err(AgentError::DuplicateAgent(agent.agent_id.clone()));
            }
            agent.check_time_order()?;
        }
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(Self { agents })
    }

    pub fn agents(&self) -> &[AgentTrajectory] {
        &self.agents
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentTrajectory> {
        self.agents.iter().find(|a| a.agent_id == agent_id)
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// 時刻順（同時刻はエージェントID順）に全行を列挙
    pub fn rows(&self) -> Vec<TableRow<'_>> {
        let mut rows: Vec<TableRow<'_>> = self
            .agents
            .iter()
            .flat_map(|agent| agent.samples.iter().map(move |sample| TableRow { agent, sample }))
            .collect();
        rows.sort_by(|a, b| {
            a.sample
                .time
                .total_cmp(&b.sample.time)
                .then_with(|| a.agent.agent_id.cmp(&b.agent.agent_id))
        });
        rows
    }

    /// エージェントごとの欠損数
    pub fn missing_counts(&self, column: Column) -> BTreeMap<String, usize> {
        self.agents
            .iter()
            .map(|a| (a.agent_id.clone(), a.missing_count(column)))
            .collect()
    }

    /// IDの接頭辞で絞り込む（空なら全エージェント）
    pub fn filter_prefixes(&self, prefixes: &[String]) -> MultiAgentTable {
        if prefixes.is_empty() {
            return self.clone();
        }
        let agents = self
            .agents
            .iter()
            .filter(|a| prefixes.iter().any(|p| a.agent_id.starts_with(p.as_str())))
            .cloned()
            .collect();
        MultiAgentTable { agents }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_lookup_is_explicit() {
        let mut catalog = BodyCatalog::new();
        catalog.declare("Helmet_1", Some("Visitors-Group".to_string()));
        catalog.declare("Helmet_1", None);
        catalog.declare("LO1", None);
        assert_eq!(catalog.role("Helmet_1"), Some("Visitors-Group"));
        assert_eq!(catalog.role("LO1"), None);
        assert_eq!(catalog.role("unknown"), None);
        assert!(!catalog.contains("unknown"));
    }

    #[test]
    fn test_table_rejects_duplicate_times() {
        let agent = AgentTrajectory::from_xy("a", &[(0.0, 0.0, 0.0), (0.0, 1.0, 0.0)]);
        assert!(matches!(
            MultiAgentTable::from_agents(vec![agent]),
            Err(AgentError::DuplicateTime(_, _))
        ));
    }

    #[test]
    fn test_rows_are_time_sorted() {
        let a = AgentTrajectory::from_xy("b", &[(0.0, 0.0, 0.0), (2.0, 1.0, 0.0)]);
        let b = AgentTrajectory::from_xy("a", &[(1.0, 0.0, 0.0), (2.0, 1.0, 0.0)]);
        let table = MultiAgentTable::from_agents(vec![a, b]).unwrap();
        let order: Vec<(f64, &str)> = table
            .rows()
            .iter()
            .map(|r| (r.sample.time, r.agent.agent_id.as_str()))
            .collect();
        assert_eq!(order, vec![(0.0, "b"), (1.0, "a"), (2.0, "a"), (2.0, "b")]);
    }

    #[test]
    fn test_rotation_columns_only_when_present() {
        let mut agent = AgentTrajectory::from_xy("a", &[(0.0, 0.0, 0.0)]);
        assert_eq!(agent.numeric_columns().len(), 3);
        agent.samples[0].set(Column::Rotation(4), 1.0);
        assert_eq!(agent.numeric_columns().len(), 12);
        assert!(agent.samples[0].get(Column::Rotation(0)).is_nan());
    }
}
