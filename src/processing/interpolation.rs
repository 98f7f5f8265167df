use crate::models::{AgentError, AgentTrajectory, IStage, Stage};

/// 欠損区間（同じ欠損状態が連続するサンプル列）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub start: usize,
    /// 終端（この位置を含まない）
    pub end: usize,
    pub missing: bool,
}

impl Run {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// 欠損状態のマスクを連続区間に分割する
pub fn runs(mask: &[bool]) -> Vec<Run> {
    let mut out: Vec<Run> = Vec::new();
    for (i, &missing) in mask.iter().enumerate() {
        match out.last_mut() {
            Some(run) if run.missing == missing => run.end = i + 1,
            _ => out.push(Run {
                start: i,
                end: i + 1,
                missing,
            }),
        }
    }
    out
}

/// 短い欠損区間のみを線形補間するコンポーネント
///
/// 各列の欠損区間の長さはその列自身の欠損状態から求めます。長さが `max_gap_samples`
/// 以下で、前後の両側に有効なサンプルがある区間だけが埋められます。
/// 補間はサンプル番号に対して線形です。
#[derive(Debug, Clone, Copy)]
pub struct GapInterpolator {
    pub max_gap_samples: usize,
}

impl GapInterpolator {
    pub fn new(max_gap_samples: usize) -> Self {
        Self { max_gap_samples }
    }

    /// 1列を補間した結果を返す
    pub fn interpolate_column(&self, values: &[f64]) -> Vec<f64> {
        let mut out = values.to_vec();
        let mask: Vec<bool> = values.iter().map(|v| v.is_nan()).collect();

        for run in runs(&mask) {
            if !run.missing || run.len() > self.max_gap_samples {
                continue;
            }
            // 片側にしか有効値がない先頭・末尾の区間は残す
            if run.start == 0 || run.end == values.len() {
                continue;
            }
            let before = values[run.start - 1];
            let after = values[run.end];
            let span = (run.len() + 1) as f64;
            for (offset, slot) in out[run.start..run.end].iter_mut().enumerate() {
                let ratio = (offset + 1) as f64 / span;
                *slot = before + (after - before) * ratio;
            }
        }
        out
    }
}

impl IStage for GapInterpolator {
    fn stage(&self) -> Stage {
        Stage::Interpolation
    }

    fn apply(&self, trajectory: &AgentTrajectory) -> Result<AgentTrajectory, AgentError> {
        let mut out = trajectory.clone();
        for column in trajectory.numeric_columns() {
            let filled = self.interpolate_column(&trajectory.column(column));
            out.set_column(column, &filled);
        }
        Ok(out)
    }
}
