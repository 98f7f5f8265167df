//! # Marker モジュール
//!
//! ボディごとに冗長なマーカーから1本の3次元軌跡を作ります。
//!
//! - `best-marker`: X列の欠損数が最も少ないマーカーを採用（同数なら登場順で先のもの）
//! - `restoration`: 時刻ごとに欠損していないマーカーの平均を軸ごとに計算
//! - `six-dof`: マーカーを持たない剛体行（重心 + 回転行列）をそのまま採用
//!
//! 出力座標には `unit_scale` を掛けます（既定はミリメートル→メートル）。

use std::collections::BTreeMap;

use crate::models::{
    AgentError, AgentTrajectory, BodyCatalog, IReporter, MarkerPolicy, Position3D, RawFrame, RawTable, Sample,
    Stage, math_utils::nan_mean,
};

/// マーカーの選択・融合を行うコンポーネント
#[derive(Debug, Clone, Copy)]
pub struct MarkerResolver {
    pub policy: MarkerPolicy,
    /// 座標に掛ける単位変換係数
    pub unit_scale: f64,
}

impl MarkerResolver {
    pub fn new(policy: MarkerPolicy, unit_scale: f64) -> Self {
        Self { policy, unit_scale }
    }

    /// 記録全体を解決し、ボディごとに1本の軌跡を返す
    ///
    /// カタログに宣言されているが行を持たないボディや、候補マーカーを持たないボディは
    /// 診断を出して除外されます。
    pub fn resolve(&self, raw: &RawTable, catalog: &BodyCatalog, reporter: &dyn IReporter) -> Vec<AgentTrajectory> {
        let mut body_ids: Vec<&str> = raw.body_ids();
        for declared in catalog.body_ids() {
            if !body_ids.contains(&declared) {
                body_ids.push(declared);
            }
        }

        let mut trajectories = Vec::new();
        for body_id in body_ids {
            let frames: Vec<&RawFrame> = raw.frames_of(body_id).collect();
            let role = catalog.role(body_id).map(str::to_string);
            match self.resolve_body(body_id, &frames, role) {
                Ok(trajectory) => {
                    reporter.stage_applied(body_id, Stage::MarkerResolution);
                    trajectories.push(trajectory);
                }
                Err(err) => reporter.agent_skipped(body_id, &err.to_string()),
            }
        }
        trajectories
    }

    /// 1ボディ分の行から軌跡を作る
    pub fn resolve_body(
        &self,
        body_id: &str,
        frames: &[&RawFrame],
        role: Option<String>,
    ) -> Result<AgentTrajectory, AgentError> {
        let mut trajectory = match self.policy {
            MarkerPolicy::BestMarker => self.best_marker(body_id, frames)?,
            MarkerPolicy::Restoration => self.restore(body_id, frames)?,
            MarkerPolicy::SixDof => self.rigid_body(body_id, frames)?,
        };
        trajectory.role = role;
        trajectory.samples.sort_by(|a, b| a.time.total_cmp(&b.time));
        Ok(trajectory)
    }

    /// X列の欠損数をマーカーごとに数える（登場順）
    pub fn count_missing_by_marker(frames: &[&RawFrame]) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for frame in frames {
            let Some(marker_id) = &frame.marker_id else {
                continue;
            };
            let missing = usize::from(frame.position.x.is_nan());
            match counts.iter_mut().find(|(id, _)| id == marker_id) {
                Some((_, n)) => *n += missing,
                None => counts.push((marker_id.clone(), missing)),
            }
        }
        counts
    }

    fn best_marker(&self, body_id: &str, frames: &[&RawFrame]) -> Result<AgentTrajectory, AgentError> {
        let counts = Self::count_missing_by_marker(frames);
        if counts.is_empty() {
            // 単一マーカーのボディはマーカーIDを持たない
            return self.unmarked(body_id, frames);
        }

        let mut best = &counts[0];
        for candidate in &counts[1..] {
            if candidate.1 < best.1 {
                best = candidate;
            }
        }
        let best_id = best.0.clone();

        let samples = frames
            .iter()
            .filter(|f| f.marker_id.as_deref() == Some(best_id.as_str()))
            .map(|f| Sample::new(f.time, Some(f.frame_id), f.position.scaled(self.unit_scale)))
            .collect();
        let mut trajectory = AgentTrajectory::new(body_id, samples);
        trajectory.chosen_marker_id = Some(best_id);
        Ok(trajectory)
    }

    fn restore(&self, body_id: &str, frames: &[&RawFrame]) -> Result<AgentTrajectory, AgentError> {
        let has_markers = frames.iter().any(|f| f.marker_id.is_some());
        let candidates: Vec<&RawFrame> = frames
            .iter()
            .copied()
            .filter(|f| f.marker_id.is_some() == has_markers)
            .collect();
        if candidates.is_empty() {
            return Err(AgentError::NoMarkers(body_id.to_string()));
        }

        let mut by_frame: BTreeMap<u64, (f64, Vec<Position3D>)> = BTreeMap::new();
        for frame in candidates {
            by_frame
                .entry(frame.frame_id)
                .or_insert_with(|| (frame.time, Vec::new()))
                .1
                .push(frame.position);
        }

        let samples = by_frame
            .into_iter()
            .map(|(frame_id, (time, positions))| {
                let fused = Position3D::new(
                    nan_mean(positions.iter().map(|p| p.x)),
                    nan_mean(positions.iter().map(|p| p.y)),
                    nan_mean(positions.iter().map(|p| p.z)),
                );
                Sample::new(time, Some(frame_id), fused.scaled(self.unit_scale))
            })
            .collect();
        Ok(AgentTrajectory::new(body_id, samples))
    }

    fn rigid_body(&self, body_id: &str, frames: &[&RawFrame]) -> Result<AgentTrajectory, AgentError> {
        let samples: Vec<Sample> = frames
            .iter()
            .filter(|f| f.marker_id.is_none())
            .map(|f| {
                let mut sample = Sample::new(f.time, Some(f.frame_id), f.position.scaled(self.unit_scale));
                sample.rotation = f.rotation;
                sample
            })
            .collect();
        if samples.is_empty() {
            return Err(AgentError::NoMarkers(body_id.to_string()));
        }
        Ok(AgentTrajectory::new(body_id, samples))
    }

    fn unmarked(&self, body_id: &str, frames: &[&RawFrame]) -> Result<AgentTrajectory, AgentError> {
        let samples: Vec<Sample> = frames
            .iter()
            .filter(|f| f.marker_id.is_none())
            .map(|f| Sample::new(f.time, Some(f.frame_id), f.position.scaled(self.unit_scale)))
            .collect();
        if samples.is_empty() {
            return Err(AgentError::NoMarkers(body_id.to_string()));
        }
        Ok(AgentTrajectory::new(body_id, samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemoryReporter;

    const NAN: f64 = f64::NAN;

    fn frame(frame_id: u64, body: &str, marker: Option<&str>, x: f64, y: f64, z: f64) -> RawFrame {
        RawFrame {
            time: frame_id as f64 * 0.01,
            frame_id,
            body_id: body.to_string(),
            marker_id: marker.map(str::to_string),
            position: Position3D::new(x, y, z),
            rotation: None,
        }
    }

    fn helmet_table() -> RawTable {
        RawTable::new(vec![
            frame(0, "Helmet_1", Some("1"), NAN, 0.0, 0.0),
            frame(0, "Helmet_1", Some("2"), 1000.0, 2000.0, 3000.0),
            frame(0, "Helmet_1", Some("3"), 3000.0, NAN, 1000.0),
            frame(1, "Helmet_1", Some("1"), NAN, 0.0, 0.0),
            frame(1, "Helmet_1", Some("2"), NAN, NAN, NAN),
            frame(1, "Helmet_1", Some("3"), 5000.0, 4000.0, NAN),
            frame(2, "Helmet_1", Some("1"), NAN, NAN, NAN),
            frame(2, "Helmet_1", Some("2"), NAN, NAN, NAN),
            frame(2, "Helmet_1", Some("3"), NAN, NAN, NAN),
        ])
    }

    #[test]
    fn test_best_marker_picks_fewest_missing() {
        let resolver = MarkerResolver::new(MarkerPolicy::BestMarker, 0.001);
        let mut catalog = BodyCatalog::new();
        catalog.declare("Helmet_1", Some("Carrier-Box".to_string()));
        let reporter = MemoryReporter::new();

        let out = resolver.resolve(&helmet_table(), &catalog, &reporter);
        assert_eq!(out.len(), 1);
        let helmet = &out[0];
        assert_eq!(helmet.chosen_marker_id.as_deref(), Some("3"));
        assert_eq!(helmet.role.as_deref(), Some("Carrier-Box"));
        let xs = helmet.column(crate::models::Column::X);
        assert!((xs[0] - 3.0).abs() < 1e-12 && (xs[1] - 5.0).abs() < 1e-12);
        assert!(xs[2].is_nan());
    }

    #[test]
    fn test_best_marker_tie_uses_enumeration_order() {
        let table = RawTable::new(vec![
            frame(0, "B", Some("b"), NAN, 0.0, 0.0),
            frame(0, "B", Some("a"), NAN, 0.0, 0.0),
            frame(1, "B", Some("b"), 1.0, 0.0, 0.0),
            frame(1, "B", Some("a"), 1.0, 0.0, 0.0),
        ]);
        let resolver = MarkerResolver::new(MarkerPolicy::BestMarker, 1.0);
        let out = resolver.resolve(&table, &BodyCatalog::new(), &MemoryReporter::new());
        assert_eq!(out[0].chosen_marker_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_restoration_averages_available_markers() {
        let resolver = MarkerResolver::new(MarkerPolicy::Restoration, 0.001);
        let out = resolver.resolve(&helmet_table(), &BodyCatalog::new(), &MemoryReporter::new());
        let helmet = &out[0];
        assert_eq!(helmet.chosen_marker_id, None);

        let first = helmet.samples[0].position;
        assert!((first.x - 2.0).abs() < 1e-12);
        assert!((first.y - 1.0).abs() < 1e-12);
        assert!((first.z - (4000.0 / 3.0) * 0.001).abs() < 1e-12);

        // 全マーカーが欠損した時刻のみNaN
        assert!(helmet.samples[2].position.x.is_nan());
        assert!((helmet.samples[1].position.y - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_declared_body_without_markers_is_skipped() {
        let resolver = MarkerResolver::new(MarkerPolicy::BestMarker, 0.001);
        let mut catalog = BodyCatalog::new();
        catalog.declare("Helmet_1", None);
        catalog.declare("Helmet_9", Some("Visitors-Alone".to_string()));
        let reporter = MemoryReporter::new();

        let out = resolver.resolve(&helmet_table(), &catalog, &reporter);
        assert_eq!(out.len(), 1);
        assert_eq!(reporter.skipped_agents(), vec!["Helmet_9".to_string()]);
    }

    #[test]
    fn test_six_dof_keeps_rotation_unscaled() {
        let mut centroid = frame(0, "DARKO_Robot", None, 1000.0, 0.0, 500.0);
        centroid.rotation = Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        let table = RawTable::new(vec![centroid, frame(0, "DARKO_Robot", Some("1"), 0.0, 0.0, 0.0)]);
        let resolver = MarkerResolver::new(MarkerPolicy::SixDof, 0.001);
        let out = resolver.resolve(&table, &BodyCatalog::new(), &MemoryReporter::new());
        assert_eq!(out[0].len(), 1);
        assert!((out[0].samples[0].position.x - 1.0).abs() < 1e-12);
        assert_eq!(out[0].samples[0].rotation.map(|r| r[4]), Some(1.0));
    }
}
