use std::collections::BTreeMap;

use crate::models::{MultiAgentTable, Position3D};

/// 点群のXY平面での距離行列
pub fn pairwise_distances(points: &[Position3D]) -> Vec<Vec<f64>> {
    points
        .iter()
        .map(|a| points.iter().map(|b| a.distance_xy(b)).collect())
        .collect()
}

/// フレームごとの最小対人距離
///
/// 各フレームに存在する（XYが欠損していない）エージェント間の距離のうち、
/// 正の最小値をフレームごとに1つ記録します。`excluded_prefixes` に一致するIDの
/// エージェント（ロボットなど人以外）は除外されます。
pub fn min_social_distances(table: &MultiAgentTable, excluded_prefixes: &[String]) -> Vec<f64> {
    let mut frames: BTreeMap<u64, Vec<Position3D>> = BTreeMap::new();
    for agent in table.agents() {
        if excluded_prefixes.iter().any(|p| agent.agent_id.starts_with(p.as_str())) {
            continue;
        }
        for sample in &agent.samples {
            let Some(frame_id) = sample.frame_id else {
                continue;
            };
            if sample.position.x.is_nan() || sample.position.y.is_nan() {
                continue;
            }
            frames.entry(frame_id).or_default().push(sample.position);
        }
    }

    frames
        .values()
        .filter(|points| points.len() > 1)
        .filter_map(|points| {
            pairwise_distances(points)
                .into_iter()
                .flatten()
                .filter(|d| *d > 0.0)
                .min_by(f64::total_cmp)
        })
        .collect()
}
