use std::time::Duration;

use crate::models::{AgentError, AgentTrajectory, IStage, Position3D, Sample, Stage};

/// 時刻の比較に使う許容誤差（秒）
const TIME_EPS: f64 = 1e-9;

/// 1エージェントあたりのリサンプリング格子点数の上限
pub const MAX_GRID_SAMPLES: usize = 10_000_000;

/// 一定時間刻みの格子へ再配置するコンポーネント
///
/// 格子は軌跡自身の最初の時刻から始まります。各格子点 `g` のバケット `[g, g + step)` に
/// 入ったサンプルのうち、列ごとに最初の有効値を採用します（補間はしません）。
/// サンプルのないバケットは全列が欠損になります。
#[derive(Debug, Clone, Copy)]
pub struct Resampler {
    pub step: Duration,
}

impl Resampler {
    pub fn new(step: Duration) -> Self {
        Self { step }
    }

    /// 格子上のバケット位置（実数）。呼び出し側で範囲を確認してから整数化する
    fn bucket_position(&self, t0: f64, time: f64) -> f64 {
        ((time - t0) / self.step.as_secs_f64() + TIME_EPS).floor().max(0.0)
    }

    fn bucket_index(&self, t0: f64, time: f64) -> usize {
        self.bucket_position(t0, time) as usize
    }
}

impl IStage for Resampler {
    fn stage(&self) -> Stage {
        Stage::Resampling
    }

    fn apply(&self, trajectory: &AgentTrajectory) -> Result<AgentTrajectory, AgentError> {
        let mut out = trajectory.clone();
        let (Some(first), Some(last)) = (trajectory.samples.first(), trajectory.samples.last()) else {
            return Ok(out);
        };
        let t0 = first.time;
        let step = self.step.as_secs_f64();
        let last_position = self.bucket_position(t0, last.time);
        let too_large = || AgentError::GridTooLarge(trajectory.agent_id.clone(), last_position + 1.0);
        if !last_position.is_finite() || last_position >= MAX_GRID_SAMPLES as f64 {
            return Err(too_large());
        }
        let bucket_count = (last_position as usize).checked_add(1).ok_or_else(too_large)?;
        let columns = trajectory.numeric_columns();

        let mut grid: Vec<Sample> = (0..bucket_count)
            .map(|k| {
                let mut sample = Sample::new(t0 + k as f64 * step, None, Position3D::missing());
                for &column in &columns {
                    sample.set(column, f64::NAN);
                }
                sample
            })
            .collect();
        let mut visited = vec![false; bucket_count];

        for sample in &trajectory.samples {
            let k = self.bucket_index(t0, sample.time);
            let slot = &mut grid[k];
            if !visited[k] {
                visited[k] = true;
                slot.frame_id = sample.frame_id;
            }
            for &column in &columns {
                let value = sample.get(column);
                if slot.get(column).is_nan() && !value.is_nan() {
                    slot.set(column, value);
                }
            }
        }

        out.samples = grid;
        Ok(out)
    }
}

/// 後ろ向き移動平均を適用するコンポーネント
///
/// 窓は経過時間で区切られ、時刻 `t` の値は `(t - window, t]` に入る有効値の平均です。
/// 窓内に有効値がなければ欠損のままです。
#[derive(Debug, Clone, Copy)]
pub struct Smoother {
    pub window: Duration,
}

impl Smoother {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// 1列を平滑化した結果を返す
    pub fn smooth_column(&self, times: &[f64], values: &[f64]) -> Vec<f64> {
        let window = self.window.as_secs_f64();
        let mut out = Vec::with_capacity(values.len());
        let mut start = 0;
        let mut sum = 0.0;
        let mut count = 0usize;

        for i in 0..values.len() {
            if !values[i].is_nan() {
                sum += values[i];
                count += 1;
            }
            while start < i && times[start] <= times[i] - window + TIME_EPS {
                if !values[start].is_nan() {
                    sum -= values[start];
                    count -= 1;
                }
                start += 1;
            }
            out.push(if count == 0 { f64::NAN } else { sum / count as f64 });
        }
        out
    }
}

impl IStage for Smoother {
    fn stage(&self) -> Stage {
        Stage::Smoothing
    }

    fn apply(&self, trajectory: &AgentTrajectory) -> Result<AgentTrajectory, AgentError> {
        let mut out = trajectory.clone();
        let times = trajectory.times();
        for column in trajectory.numeric_columns() {
            let smoothed = self.smooth_column(&times, &trajectory.column(column));
            out.set_column(column, &smoothed);
        }
        Ok(out)
    }
}
