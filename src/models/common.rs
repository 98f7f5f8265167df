use std::fmt;

use serde::{Deserialize, Serialize};

/// 回転行列のチャンネル数（6自由度ボディ）
pub const ROTATION_CHANNELS: usize = 9;

/// 3次元位置を表す構造体
///
/// 欠損値（オクルージョン）は `NaN` で表現します。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// 全軸が欠損した位置
    pub fn missing() -> Self {
        Self::new(f64::NAN, f64::NAN, f64::NAN)
    }

    /// XY平面での2次元距離を計算
    pub fn distance_xy(&self, other: &Position3D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// いずれかの軸が欠損しているか
    pub fn has_missing(&self) -> bool {
        self.x.is_nan() || self.y.is_nan() || self.z.is_nan()
    }

    /// 全軸に同じ係数を掛ける（単位変換）
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }
}

/// 数値チャンネル（列）の識別子
///
/// 補間・リサンプリング・平滑化は列ごとに独立して適用されます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    X,
    Y,
    Z,
    /// 回転行列の要素 (0..9)
    Rotation(usize),
}

impl Column {
    /// 位置座標の3列
    pub const POSITION: [Column; 3] = [Column::X, Column::Y, Column::Z];

    /// 出力時の列名
    pub fn name(&self) -> String {
        match self {
            Column::X => "x".to_string(),
            Column::Y => "y".to_string(),
            Column::Z => "z".to_string(),
            Column::Rotation(i) => format!("rot_{}", i),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// マーカー選択ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarkerPolicy {
    /// 欠損が最も少ないマーカーを採用
    BestMarker,
    /// 全マーカーの軸ごとの平均で復元
    Restoration,
    /// 重心 + 回転行列（マーカーを持たない剛体行）
    SixDof,
}

impl fmt::Display for MarkerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MarkerPolicy::BestMarker => "best-marker",
            MarkerPolicy::Restoration => "restoration",
            MarkerPolicy::SixDof => "six-dof",
        };
        write!(f, "{}", name)
    }
}

/// 数値ユーティリティ関数
pub mod math_utils {
    /// 欠損を除いた平均（全て欠損ならNaN）
    pub fn nan_mean<I: IntoIterator<Item = f64>>(values: I) -> f64 {
        let (sum, count) = values
            .into_iter()
            .filter(|v| !v.is_nan())
            .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
        if count == 0 { f64::NAN } else { sum / count as f64 }
    }

    /// 平均と母標準偏差
    pub fn mean_std(values: &[f64]) -> (f64, f64) {
        if values.is_empty() {
            return (f64::NAN, f64::NAN);
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        (mean, var.sqrt())
    }

    /// 等間隔サンプルに対する数値勾配
    ///
    /// 内部点は中心差分、端点は片側差分。要素数が2未満なら0を返します。
    pub fn gradient(values: &[f64]) -> Vec<f64> {
        let n = values.len();
        if n < 2 {
            return vec![0.0; n];
        }
        let mut out = Vec::with_capacity(n);
        out.push(values[1] - values[0]);
        for i in 1..n - 1 {
            out.push((values[i + 1] - values[i - 1]) / 2.0);
        }
        out.push(values[n - 1] - values[n - 2]);
        out
    }

    /// 非有限値を指定値で置き換える
    pub fn finite_or(value: f64, fallback: f64) -> f64 {
        if value.is_finite() { value } else { fallback }
    }
}
