use std::ops::Range;

use crate::models::{AgentTrajectory, Column};
use crate::processing::interpolation::runs;

/// 連続追跡区間（欠損のない最大の連続サンプル列）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuousSegment {
    pub start: usize,
    /// 終端（この位置を含まない）
    pub end: usize,
}

impl ContinuousSegment {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// 区間の継続時間（最後の時刻 - 最初の時刻）
    pub fn duration(&self, trajectory: &AgentTrajectory) -> f64 {
        trajectory.samples[self.end - 1].time - trajectory.samples[self.start].time
    }
}

/// 連続追跡区間とトラックレットへの分割
#[derive(Debug, Clone, Copy)]
pub struct TrackingSegmenter {
    pub tracklet_len: usize,
}

impl Default for TrackingSegmenter {
    fn default() -> Self {
        Self { tracklet_len: 20 }
    }
}

impl TrackingSegmenter {
    pub fn new(tracklet_len: usize) -> Self {
        Self { tracklet_len }
    }

    /// 位置座標のいずれかが欠損していればギャップ
    pub fn gap_mask(trajectory: &AgentTrajectory) -> Vec<bool> {
        trajectory.samples.iter().map(|s| s.position.has_missing()).collect()
    }

    /// 軌跡を連続追跡区間に分割
    ///
    /// 追跡列のいずれかが区間内で全て欠損している区間は除外されます。
    pub fn segments(&self, trajectory: &AgentTrajectory) -> Vec<ContinuousSegment> {
        let columns = trajectory.numeric_columns();
        runs(&Self::gap_mask(trajectory))
            .into_iter()
            .filter(|run| !run.missing)
            .map(|run| ContinuousSegment {
                start: run.start,
                end: run.end,
            })
            .filter(|segment| {
                !columns
                    .iter()
                    .any(|&column| Self::column_all_missing(trajectory, *segment, column))
            })
            .collect()
    }

    fn column_all_missing(trajectory: &AgentTrajectory, segment: ContinuousSegment, column: Column) -> bool {
        trajectory.samples[segment.range()].iter().all(|s| s.get(column).is_nan())
    }

    /// 区間を重ならない固定長のトラックレットに切り出す（端数は捨てる）
    pub fn tracklets(&self, segment: ContinuousSegment) -> Vec<Range<usize>> {
        if self.tracklet_len == 0 {
            return Vec::new();
        }
        let count = segment.len() / self.tracklet_len;
        (0..count)
            .map(|i| {
                let start = segment.start + i * self.tracklet_len;
                start..start + self.tracklet_len
            })
            .collect()
    }
}
