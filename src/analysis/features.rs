//! # Features モジュール
//!
//! 軌跡から運動学的特徴量（速度・加速度・経路効率・曲率）を計算します。
//!
//! どの計算も入力を変更せず、列を追加したコピーを返します。
//! 単一の軌跡用 (`*_one`) と複数軌跡のバッチ用の両方を提供します。

use crate::models::{
    AgentTrajectory, Column,
    math_utils::{finite_or, gradient},
};

/// 出力可能な特徴量列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Speed,
    XSpeed,
    YSpeed,
    Acceleration,
    XAcceleration,
    YAcceleration,
    PathEfficiency,
    Curvature,
}

impl Feature {
    /// 出力順の全特徴量
    pub const ALL: [Feature; 8] = [
        Feature::Speed,
        Feature::XSpeed,
        Feature::YSpeed,
        Feature::Acceleration,
        Feature::XAcceleration,
        Feature::YAcceleration,
        Feature::PathEfficiency,
        Feature::Curvature,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Feature::Speed => "speed",
            Feature::XSpeed => "x_speed",
            Feature::YSpeed => "y_speed",
            Feature::Acceleration => "acceleration",
            Feature::XAcceleration => "x_acceleration",
            Feature::YAcceleration => "y_acceleration",
            Feature::PathEfficiency => "path_efficiency",
            Feature::Curvature => "curvature",
        }
    }
}

/// 軌跡に付加される列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureColumns {
    /// 1ステップの変位（先頭と欠損は0）
    pub x_delta: Option<Vec<f64>>,
    pub y_delta: Option<Vec<f64>>,
    /// 1ステップの移動距離
    pub n_deltas: Option<Vec<f64>>,
    pub speed: Option<Vec<f64>>,
    pub x_speed: Option<Vec<f64>>,
    pub y_speed: Option<Vec<f64>>,
    pub n_speed_deltas: Option<Vec<f64>>,
    pub acceleration: Option<Vec<f64>>,
    pub x_acceleration: Option<Vec<f64>>,
    pub y_acceleration: Option<Vec<f64>>,
    pub path_efficiency: Option<Vec<f64>>,
    pub curvature: Option<Vec<f64>>,
}

/// 特徴量付きの軌跡
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTrajectory {
    pub trajectory: AgentTrajectory,
    pub features: FeatureColumns,
}

impl From<AgentTrajectory> for FeatureTrajectory {
    fn from(trajectory: AgentTrajectory) -> Self {
        Self {
            trajectory,
            features: FeatureColumns::default(),
        }
    }
}

impl FeatureTrajectory {
    pub fn len(&self) -> usize {
        self.trajectory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectory.is_empty()
    }

    /// 計算済みの特徴量列を取得
    pub fn get(&self, feature: Feature) -> Option<&[f64]> {
        let f = &self.features;
        let column = match feature {
            Feature::Speed => &f.speed,
            Feature::XSpeed => &f.x_speed,
            Feature::YSpeed => &f.y_speed,
            Feature::Acceleration => &f.acceleration,
            Feature::XAcceleration => &f.x_acceleration,
            Feature::YAcceleration => &f.y_acceleration,
            Feature::PathEfficiency => &f.path_efficiency,
            Feature::Curvature => &f.curvature,
        };
        column.as_deref()
    }

    /// 範囲 [start, end) の部分軌跡（特徴量は含めない）
    pub fn slice(&self, start: usize, end: usize) -> FeatureTrajectory {
        self.trajectory.slice(start, end).into()
    }
}

/// 1階差分の結果
struct Differences {
    dx: Vec<f64>,
    dy: Vec<f64>,
    dt: Vec<f64>,
}

/// 2列の1階差分（先頭はNaN）
fn differences(times: &[f64], xs: &[f64], ys: &[f64]) -> Differences {
    let n = times.len();
    let mut d = Differences {
        dx: vec![f64::NAN; n],
        dy: vec![f64::NAN; n],
        dt: vec![f64::NAN; n],
    };
    for i in 1..n {
        d.dx[i] = xs[i] - xs[i - 1];
        d.dy[i] = ys[i] - ys[i - 1];
        d.dt[i] = times[i] - times[i - 1];
    }
    d
}

/// 欠損成分を無視したベクトルの大きさ
fn magnitude(a: f64, b: f64) -> f64 {
    let sq = |v: f64| if v.is_nan() { 0.0 } else { v * v };
    (sq(a) + sq(b)).sqrt()
}

/// 欠損・先頭を0とした変位と1ステップの移動距離
fn step_lengths(trajectory: &AgentTrajectory) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let d = differences(
        &trajectory.times(),
        &trajectory.column(Column::X),
        &trajectory.column(Column::Y),
    );
    let n_deltas = d.dx.iter().zip(&d.dy).map(|(&a, &b)| magnitude(a, b)).collect();
    let dx = d.dx.iter().map(|&v| finite_or(v, 0.0)).collect();
    let dy = d.dy.iter().map(|&v| finite_or(v, 0.0)).collect();
    (dx, dy, n_deltas)
}

/// 運動学的特徴量の計算器
#[derive(Debug, Clone, Copy)]
pub struct KinematicFeatures {
    /// 曲率を0とみなす変位二乗和のしきい値（座標単位の二乗）
    pub curvature_threshold: f64,
}

impl Default for KinematicFeatures {
    fn default() -> Self {
        // メートル単位で 1 mm^2 に相当
        Self {
            curvature_threshold: 1e-6,
        }
    }
}

impl KinematicFeatures {
    pub fn new(curvature_threshold: f64) -> Self {
        Self { curvature_threshold }
    }

    /// 速度（XY平面の変位 / 経過時間）
    ///
    /// 先頭サンプル、および欠損や時刻差0で定義できないサンプルの速度は0です。
    pub fn speed_one(&self, input: &FeatureTrajectory) -> FeatureTrajectory {
        let mut out = input.clone();
        let trajectory = &input.trajectory;
        let d = differences(
            &trajectory.times(),
            &trajectory.column(Column::X),
            &trajectory.column(Column::Y),
        );
        let n_deltas: Vec<f64> = d.dx.iter().zip(&d.dy).map(|(&a, &b)| magnitude(a, b)).collect();

        let per_time = |values: &[f64]| -> Vec<f64> {
            values
                .iter()
                .zip(&d.dt)
                .map(|(&v, &dt)| finite_or(v / dt, 0.0))
                .collect()
        };

        let f = &mut out.features;
        f.x_speed = Some(per_time(&d.dx));
        f.y_speed = Some(per_time(&d.dy));
        f.speed = Some(per_time(&n_deltas));
        f.x_delta = Some(d.dx.iter().map(|&v| finite_or(v, 0.0)).collect());
        f.y_delta = Some(d.dy.iter().map(|&v| finite_or(v, 0.0)).collect());
        f.n_deltas = Some(n_deltas);
        out
    }

    pub fn speed(&self, inputs: &[FeatureTrajectory]) -> Vec<FeatureTrajectory> {
        inputs.iter().map(|t| self.speed_one(t)).collect()
    }

    /// 加速度（速度ベクトルの差分 / 経過時間）
    ///
    /// 軸ごとの速度が未計算（または長さが合わない）なら先に計算します。
    /// 先頭サンプルの加速度は0です。
    pub fn acceleration_one(&self, input: &FeatureTrajectory) -> FeatureTrajectory {
        let n = input.len();
        let has_speed = |column: &Option<Vec<f64>>| column.as_ref().is_some_and(|v| v.len() == n);
        let mut out = if has_speed(&input.features.x_speed) && has_speed(&input.features.y_speed) {
            input.clone()
        } else {
            self.speed_one(input)
        };
        let (Some(vx), Some(vy)) = (&out.features.x_speed, &out.features.y_speed) else {
            return out;
        };
        let d = differences(&out.trajectory.times(), vx, vy);
        let n_speed_deltas: Vec<f64> = d.dx.iter().zip(&d.dy).map(|(&a, &b)| magnitude(a, b)).collect();

        let per_time = |values: &[f64]| -> Vec<f64> {
            values
                .iter()
                .zip(&d.dt)
                .map(|(&v, &dt)| finite_or(v / dt, 0.0))
                .collect()
        };

        let x_acceleration = per_time(&d.dx);
        let y_acceleration = per_time(&d.dy);
        let acceleration = per_time(&n_speed_deltas);
        let f = &mut out.features;
        f.x_acceleration = Some(x_acceleration);
        f.y_acceleration = Some(y_acceleration);
        f.acceleration = Some(acceleration);
        f.n_speed_deltas = Some(n_speed_deltas);
        out
    }

    pub fn acceleration(&self, inputs: &[FeatureTrajectory]) -> Vec<FeatureTrajectory> {
        inputs.iter().map(|t| self.acceleration_one(t)).collect()
    }

    /// 経路効率（始点からの直線距離 / 始点からの累積移動距離）
    ///
    /// 累積移動距離が0（まだ動いていない）なら1.0です。
    pub fn path_efficiency_one(&self, input: &FeatureTrajectory) -> FeatureTrajectory {
        let mut out = input.clone();
        let trajectory = &input.trajectory;
        let n_deltas = match &input.features.n_deltas {
            Some(n) => n.clone(),
            None => step_lengths(trajectory).2,
        };

        let efficiency = match trajectory.samples.first() {
            None => Vec::new(),
            Some(origin) => {
                let mut cumulative = 0.0;
                trajectory
                    .samples
                    .iter()
                    .zip(&n_deltas)
                    .map(|(sample, &step)| {
                        cumulative += step;
                        if cumulative == 0.0 {
                            return 1.0;
                        }
                        finite_or(origin.position.distance_xy(&sample.position) / cumulative, 1.0)
                    })
                    .collect()
            }
        };

        if out.features.n_deltas.is_none() {
            out.features.n_deltas = Some(n_deltas);
        }
        out.features.path_efficiency = Some(efficiency);
        out
    }

    pub fn path_efficiency(&self, inputs: &[FeatureTrajectory]) -> Vec<FeatureTrajectory> {
        inputs.iter().map(|t| self.path_efficiency_one(t)).collect()
    }

    /// 平面曲線の曲率 `|x'y'' - y'x''| / (x'^2 + y'^2)^1.5`
    ///
    /// 1ステップの変位の数値勾配を用います。窓全体の変位二乗和が
    /// `curvature_threshold` 未満なら全サンプルで0です。
    pub fn curvature_one(&self, input: &FeatureTrajectory) -> FeatureTrajectory {
        let mut out = input.clone();
        let (dx, dy, _) = step_lengths(&input.trajectory);

        let squared_sum: f64 = dx.iter().zip(&dy).map(|(a, b)| a * a + b * b).sum();
        let curvature = if squared_sum < self.curvature_threshold {
            vec![0.0; dx.len()]
        } else {
            let d2x = gradient(&dx);
            let d2y = gradient(&dy);
            (0..dx.len())
                .map(|i| {
                    let numerator = (d2x[i] * dy[i] - dx[i] * d2y[i]).abs();
                    let denominator = (dx[i] * dx[i] + dy[i] * dy[i]).powf(1.5);
                    finite_or(numerator / denominator, 0.0)
                })
                .collect()
        };

        out.features.curvature = Some(curvature);
        out
    }

    pub fn curvature(&self, inputs: &[FeatureTrajectory]) -> Vec<FeatureTrajectory> {
        inputs.iter().map(|t| self.curvature_one(t)).collect()
    }

    /// 全特徴量を計算
    pub fn all_one(&self, input: &FeatureTrajectory) -> FeatureTrajectory {
        let with_motion = self.acceleration_one(input);
        let with_efficiency = self.path_efficiency_one(&with_motion);
        self.curvature_one(&with_efficiency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> FeatureTrajectory {
        AgentTrajectory::from_xy("Helmet_1", &[(0.0, 0.0, 0.0), (1.0, 1.0, 0.0), (2.0, 2.0, 0.0)]).into()
    }

    #[test]
    fn test_straight_line_scenario() {
        let kf = KinematicFeatures::default();
        let out = kf.all_one(&line());
        assert_eq!(out.get(Feature::Speed), Some(&[0.0, 1.0, 1.0][..]));
        assert_eq!(out.get(Feature::XSpeed), Some(&[0.0, 1.0, 1.0][..]));
        assert_eq!(out.get(Feature::PathEfficiency).unwrap()[2], 1.0);
        assert!(out.get(Feature::Curvature).unwrap().iter().all(|&c| c == 0.0));
    }

    #[test]
    fn test_first_sample_is_zero() {
        let kf = KinematicFeatures::default();
        let t: FeatureTrajectory =
            AgentTrajectory::from_xy("a", &[(0.0, 5.0, 5.0), (0.5, 6.0, 4.0), (0.7, 9.0, 1.0)]).into();
        let out = kf.acceleration_one(&t);
        assert_eq!(out.get(Feature::Speed).unwrap()[0], 0.0);
        assert_eq!(out.get(Feature::Acceleration).unwrap()[0], 0.0);
        assert_eq!(out.get(Feature::XAcceleration).unwrap()[0], 0.0);
        // 入力は変更されない
        assert!(t.features.speed.is_none());
    }

    #[test]
    fn test_acceleration_values() {
        let kf = KinematicFeatures::default();
        let t: FeatureTrajectory =
            AgentTrajectory::from_xy("a", &[(0.0, 0.0, 0.0), (1.0, 1.0, 0.0), (2.0, 3.0, 0.0)]).into();
        let out = kf.acceleration_one(&t);
        // 速度: 0, 1, 2 -> 加速度: 0, 1, 1
        assert_eq!(out.get(Feature::Acceleration), Some(&[0.0, 1.0, 1.0][..]));
    }

    #[test]
    fn test_acceleration_recomputes_incomplete_speed() {
        let kf = KinematicFeatures::default();
        let mut t: FeatureTrajectory =
            AgentTrajectory::from_xy("a", &[(0.0, 0.0, 0.0), (1.0, 1.0, 0.0), (2.0, 3.0, 0.0)]).into();
        t.features.speed = Some(vec![9.0, 9.0, 9.0]);
        t.features.x_speed = Some(vec![9.0]);
        let out = kf.acceleration_one(&t);
        assert_eq!(out.get(Feature::XSpeed), Some(&[0.0, 1.0, 2.0][..]));
        assert_eq!(out.get(Feature::Acceleration), Some(&[0.0, 1.0, 1.0][..]));
    }

    #[test]
    fn test_missing_steps_have_zero_speed() {
        let kf = KinematicFeatures::default();
        let t: FeatureTrajectory =
            AgentTrajectory::from_xy("a", &[(0.0, 0.0, 0.0), (1.0, f64::NAN, f64::NAN), (2.0, 2.0, 0.0)]).into();
        let out = kf.speed_one(&t);
        assert_eq!(out.get(Feature::Speed), Some(&[0.0, 0.0, 0.0][..]));
    }

    #[test]
    fn test_path_efficiency_bounds() {
        let kf = KinematicFeatures::default();
        let t: FeatureTrajectory = AgentTrajectory::from_xy(
            "a",
            &[(0.0, 0.0, 0.0), (1.0, 1.0, 0.0), (2.0, 1.0, 1.0), (3.0, 0.0, 1.0)],
        )
        .into();
        let out = kf.path_efficiency_one(&t);
        let pe = out.get(Feature::PathEfficiency).unwrap();
        assert_eq!(pe[0], 1.0);
        assert!(pe.iter().all(|&v| v > 0.0 && v <= 1.0));
        assert!((pe[3] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_stationary_path_efficiency_and_curvature() {
        let kf = KinematicFeatures::default();
        let t: FeatureTrajectory =
            AgentTrajectory::from_xy("a", &[(0.0, 1.0, 1.0), (1.0, 1.0, 1.0), (2.0, 1.0, 1.0)]).into();
        let out = kf.curvature_one(&kf.path_efficiency_one(&t));
        assert_eq!(out.get(Feature::PathEfficiency), Some(&[1.0, 1.0, 1.0][..]));
        assert_eq!(out.get(Feature::Curvature), Some(&[0.0, 0.0, 0.0][..]));
    }

    #[test]
    fn test_curvature_of_a_turn_is_positive() {
        let kf = KinematicFeatures::new(1e-6);
        let t: FeatureTrajectory = AgentTrajectory::from_xy(
            "a",
            &[(0.0, 0.0, 0.0), (1.0, 1.0, 0.0), (2.0, 2.0, 0.0), (3.0, 2.0, 1.0), (4.0, 2.0, 2.0)],
        )
        .into();
        let out = kf.curvature_one(&t);
        let curvature = out.get(Feature::Curvature).unwrap();
        assert!(curvature.iter().any(|&c| c > 0.0));
        assert!(curvature.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn test_curvature_threshold_is_unit_aware() {
        // ミリメートル単位の小さな動きは、しきい値次第で退化とみなされる
        let t: FeatureTrajectory = AgentTrajectory::from_xy(
            "a",
            &[(0.0, 0.0, 0.0), (1.0, 0.01, 0.0), (2.0, 0.01, 0.01)],
        )
        .into();
        let coarse = KinematicFeatures::new(1.0).curvature_one(&t);
        assert!(coarse.get(Feature::Curvature).unwrap().iter().all(|&c| c == 0.0));
        let fine = KinematicFeatures::new(1e-6).curvature_one(&t);
        assert!(fine.get(Feature::Curvature).unwrap().iter().any(|&c| c > 0.0));
    }

    #[test]
    fn test_batch_preserves_order() {
        let kf = KinematicFeatures::default();
        let a = line();
        let mut b = line();
        b.trajectory.agent_id = "Helmet_2".to_string();
        let inputs = [a, b];
        let out = kf.speed(&inputs);
        assert_eq!(out[0].trajectory.agent_id, "Helmet_1");
        assert_eq!(out[1].trajectory.agent_id, "Helmet_2");

        let out = kf.curvature(&kf.path_efficiency(&kf.acceleration(&inputs)));
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|t| t.get(Feature::Acceleration).is_some()
            && t.get(Feature::PathEfficiency).is_some()
            && t.get(Feature::Curvature).is_some()));
        assert!(inputs.iter().all(|t| t.features == FeatureColumns::default()));
    }
}
