use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::features::KinematicFeatures;
use crate::analysis::segmentation::TrackingSegmenter;
use crate::models::MarkerPolicy;
use crate::processing::PipelineSettings;

/// 設定のメタデータ
#[derive(Debug, Deserialize, Serialize)]
pub struct ConfigMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// 再処理設定
#[derive(Debug, Deserialize, Serialize)]
pub struct ReprocessingConfig {
    pub marker_policy: MarkerPolicy,
    #[serde(default)]
    pub max_gap_samples: Option<usize>,
    #[serde(default)]
    pub resample_step_ms: Option<u64>,
    #[serde(default)]
    pub smooth_window_ms: Option<u64>,
    #[serde(default = "default_unit_scale")]
    pub unit_scale: f64,
}

/// 解析設定
#[derive(Debug, Deserialize, Serialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_tracklet_len")]
    pub tracklet_len: usize,
    /// 曲率の退化判定しきい値（出力座標単位の二乗）
    #[serde(default = "default_curvature_threshold")]
    pub curvature_threshold_m2: f64,
    #[serde(default)]
    pub agent_prefixes: Vec<String>,
    #[serde(default)]
    pub non_human_prefixes: Vec<String>,
    #[serde(default)]
    pub benchmark_resample_step_ms: Option<u64>,
    #[serde(default)]
    pub benchmark_smooth_window_ms: Option<u64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            tracklet_len: default_tracklet_len(),
            curvature_threshold_m2: default_curvature_threshold(),
            agent_prefixes: Vec::new(),
            non_human_prefixes: Vec::new(),
            benchmark_resample_step_ms: None,
            benchmark_smooth_window_ms: None,
        }
    }
}

/// 入出力設定
#[derive(Debug, Deserialize, Serialize)]
pub struct IoConfig {
    /// 正規化済みCSVファイル、またはシナリオディレクトリ
    pub input: PathBuf,
    pub output: PathBuf,
}

fn default_unit_scale() -> f64 {
    0.001
}

fn default_tracklet_len() -> usize {
    20
}

fn default_curvature_threshold() -> f64 {
    1e-6
}

/// 完全な処理設定
#[derive(Debug, Deserialize, Serialize)]
pub struct ProcessingConfig {
    pub meta: ConfigMeta,
    pub reprocessing: ReprocessingConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    pub io: IoConfig,
    /// CSVのrole列に加えて宣言するボディのロール
    #[serde(default)]
    pub roles: BTreeMap<String, Option<String>>,
}

impl ProcessingConfig {
    /// YAMLファイルから設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        // ファイル存在チェック
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;

        let config = Self::from_yaml(&contents).map_err(|e| match e {
            ConfigError::ParseError(_, err) => ConfigError::ParseError(path.to_path_buf(), err),
            other => other,
        })?;

        Ok(config)
    }

    /// YAML文字列から設定を読み込み、検証する
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: ProcessingConfig =
            serde_yaml::from_str(contents).map_err(|e| ConfigError::ParseError(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// 設定の検証（処理開始前に致命的な誤りを検出する）
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.analysis.tracklet_len == 0 {
            return Err(ConfigError::ValidationError("tracklet_len must be positive".to_string()));
        }
        if !(self.reprocessing.unit_scale > 0.0) {
            return Err(ConfigError::ValidationError("unit_scale must be positive".to_string()));
        }
        if !(self.analysis.curvature_threshold_m2 >= 0.0) {
            return Err(ConfigError::ValidationError(
                "curvature_threshold_m2 must be non-negative".to_string(),
            ));
        }

        let durations = [
            ("resample_step_ms", self.reprocessing.resample_step_ms),
            ("smooth_window_ms", self.reprocessing.smooth_window_ms),
            ("benchmark_resample_step_ms", self.analysis.benchmark_resample_step_ms),
            ("benchmark_smooth_window_ms", self.analysis.benchmark_smooth_window_ms),
        ];
        for (name, value) in durations {
            if value == Some(0) {
                return Err(ConfigError::ValidationError(format!("{} must be positive", name)));
            }
        }

        Ok(())
    }

    /// 再処理の設定
    pub fn pipeline_settings(&self) -> PipelineSettings {
        let r = &self.reprocessing;
        PipelineSettings {
            marker_policy: r.marker_policy,
            max_gap_samples: r.max_gap_samples,
            resample_step: r.resample_step_ms.map(Duration::from_millis),
            smooth_window: r.smooth_window_ms.map(Duration::from_millis),
            unit_scale: r.unit_scale,
        }
    }

    /// ベンチマーク指標用の再処理設定（補間済みの表に適用する）
    pub fn benchmark_settings(&self) -> Option<PipelineSettings> {
        let a = &self.analysis;
        if a.benchmark_resample_step_ms.is_none() && a.benchmark_smooth_window_ms.is_none() {
            return None;
        }
        let mut settings = self.pipeline_settings();
        settings.resample_step = a.benchmark_resample_step_ms.map(Duration::from_millis);
        settings.smooth_window = a.benchmark_smooth_window_ms.map(Duration::from_millis);
        Some(settings)
    }

    pub fn segmenter(&self) -> TrackingSegmenter {
        TrackingSegmenter::new(self.analysis.tracklet_len)
    }

    pub fn kinematic_features(&self) -> KinematicFeatures {
        KinematicFeatures::new(self.analysis.curvature_threshold_m2)
    }

    /// 設定の概要を表示
    pub fn print_summary(&self) {
        println!("=== 設定情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!();

        let r = &self.reprocessing;
        println!("=== 再処理 ===");
        println!("マーカー選択: {}", r.marker_policy);
        match r.max_gap_samples {
            Some(k) if k > 0 => println!("補間する最大欠損長: {}サンプル", k),
            _ => println!("補間: なし"),
        }
        match r.resample_step_ms {
            Some(ms) => println!("リサンプリング刻み: {}ms", ms),
            None => println!("リサンプリング: なし"),
        }
        match r.smooth_window_ms {
            Some(ms) => println!("移動平均窓: {}ms", ms),
            None => println!("移動平均: なし"),
        }
        println!("単位変換係数: {}", r.unit_scale);
        println!();

        let a = &self.analysis;
        println!("=== 解析 ===");
        println!("トラックレット長: {}", a.tracklet_len);
        println!("曲率しきい値: {}", a.curvature_threshold_m2);
        if !a.agent_prefixes.is_empty() {
            println!("対象エージェント: {}", a.agent_prefixes.join(", "));
        }
        if !a.non_human_prefixes.is_empty() {
            println!("対人距離の除外: {}", a.non_human_prefixes.join(", "));
        }
        println!();

        println!("=== 入出力 ===");
        println!("入力: {}", self.io.input.display());
        println!("出力: {}", self.io.output.display());
        if !self.roles.is_empty() {
            println!("ロール宣言: {}件", self.roles.len());
        }
    }
}

/// 設定読み込みエラー
#[derive(Debug)]
pub enum ConfigError {
    FileNotFound(PathBuf),
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => {
                write!(f, "設定ファイルが見つかりません: {}", path.display())
            }
            ConfigError::IoError(path, err) => {
                write!(f, "ファイル読み込みエラー {}: {}", path.display(), err)
            }
            ConfigError::ParseError(path, err) => {
                write!(f, "YAML解析エラー {}: {}", path.display(), err)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "設定検証エラー: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
