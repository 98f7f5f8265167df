//! # IO モジュール
//!
//! 正規化済みの縦持ちCSV（`time,frame_id,body_id,marker_id,x,y,z[,role][,r0..r8]`）の
//! 読み込みと、処理結果・特徴量・指標の書き出しを行います。空のセルは欠損値です。
//! 数値処理の中核はこのモジュールに依存しません。

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::analysis::features::{Feature, FeatureTrajectory};
use crate::models::{
    AgentTrajectory, BodyCatalog, Column, MultiAgentTable, Position3D, ROTATION_CHANNELS, RawFrame, RawTable, Sample,
};

/// 入出力エラー
#[derive(Debug)]
pub enum IoError {
    Csv(PathBuf, csv::Error),
    Io(PathBuf, std::io::Error),
    Yaml(PathBuf, serde_yaml::Error),
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Csv(path, err) => write!(f, "CSVエラー {}: {}", path.display(), err),
            IoError::Io(path, err) => write!(f, "ファイル入出力エラー {}: {}", path.display(), err),
            IoError::Yaml(path, err) => write!(f, "YAML出力エラー {}: {}", path.display(), err),
        }
    }
}

impl std::error::Error for IoError {}

/// 正規化済みCSVの1行
#[derive(Debug, Deserialize)]
struct RawRecord {
    time: f64,
    frame_id: u64,
    body_id: String,
    #[serde(default)]
    marker_id: Option<String>,
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    r0: Option<f64>,
    #[serde(default)]
    r1: Option<f64>,
    #[serde(default)]
    r2: Option<f64>,
    #[serde(default)]
    r3: Option<f64>,
    #[serde(default)]
    r4: Option<f64>,
    #[serde(default)]
    r5: Option<f64>,
    #[serde(default)]
    r6: Option<f64>,
    #[serde(default)]
    r7: Option<f64>,
    #[serde(default)]
    r8: Option<f64>,
}

impl RawRecord {
    fn rotation(&self) -> Option<[f64; ROTATION_CHANNELS]> {
        let channels = [
            self.r0, self.r1, self.r2, self.r3, self.r4, self.r5, self.r6, self.r7, self.r8,
        ];
        if channels.iter().all(Option::is_none) {
            return None;
        }
        Some(channels.map(|c| c.unwrap_or(f64::NAN)))
    }

    fn into_frame(self) -> RawFrame {
        let rotation = self.rotation();
        RawFrame {
            time: self.time,
            frame_id: self.frame_id,
            body_id: self.body_id,
            marker_id: self.marker_id.filter(|m| !m.is_empty()),
            position: Position3D::new(
                self.x.unwrap_or(f64::NAN),
                self.y.unwrap_or(f64::NAN),
                self.z.unwrap_or(f64::NAN),
            ),
            rotation,
        }
    }
}

/// 正規化済みCSVを読み込む
///
/// role列はボディカタログに登録されます。
pub fn read_raw_table<P: AsRef<Path>>(path: P) -> Result<(RawTable, BodyCatalog), IoError> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).map_err(|e| IoError::Csv(path.to_path_buf(), e))?;

    let mut frames = Vec::new();
    let mut catalog = BodyCatalog::new();
    for result in reader.deserialize::<RawRecord>() {
        let mut record = result.map_err(|e| IoError::Csv(path.to_path_buf(), e))?;
        let role = record.role.take().filter(|r| !r.is_empty());
        catalog.declare(&record.body_id, role);
        frames.push(record.into_frame());
    }
    Ok((RawTable::new(frames), catalog))
}

fn cell(value: f64) -> String {
    if value.is_nan() { String::new() } else { value.to_string() }
}

fn base_header(with_rotation: bool) -> Vec<String> {
    let mut header: Vec<String> = ["time", "frame_id", "agent_id", "x", "y", "z", "role", "chosen_marker_id"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if with_rotation {
        header.extend((0..ROTATION_CHANNELS).map(|i| Column::Rotation(i).name()));
    }
    header
}

fn base_cells(agent: &AgentTrajectory, sample: &Sample, with_rotation: bool) -> Vec<String> {
    let mut cells = vec![
        sample.time.to_string(),
        sample.frame_id.map(|f| f.to_string()).unwrap_or_default(),
        agent.agent_id.clone(),
        cell(sample.position.x),
        cell(sample.position.y),
        cell(sample.position.z),
        agent.role.clone().unwrap_or_default(),
        agent.chosen_marker_id.clone().unwrap_or_default(),
    ];
    if with_rotation {
        cells.extend((0..ROTATION_CHANNELS).map(|i| cell(sample.get(Column::Rotation(i)))));
    }
    cells
}

fn create_parent(path: &Path) -> Result<(), IoError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| IoError::Io(parent.to_path_buf(), e))?;
    }
    Ok(())
}

/// 軌跡表を時刻順に書き出す
pub fn write_table<P: AsRef<Path>>(path: P, table: &MultiAgentTable) -> Result<(), IoError> {
    let path = path.as_ref();
    create_parent(path)?;
    let csv_err = |e| IoError::Csv(path.to_path_buf(), e);
    let with_rotation = table.agents().iter().any(|a| a.numeric_columns().len() > 3);

    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer.write_record(base_header(with_rotation)).map_err(csv_err)?;
    for row in table.rows() {
        writer
            .write_record(base_cells(row.agent, row.sample, with_rotation))
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|e| IoError::Io(path.to_path_buf(), e))?;
    Ok(())
}

/// 特徴量付きの軌跡を書き出す（計算済みの特徴量列のみ）
pub fn write_features<P: AsRef<Path>>(path: P, trajectories: &[FeatureTrajectory]) -> Result<(), IoError> {
    let path = path.as_ref();
    create_parent(path)?;
    let csv_err = |e| IoError::Csv(path.to_path_buf(), e);
    let features: Vec<Feature> = Feature::ALL
        .into_iter()
        .filter(|f| trajectories.iter().any(|t| t.get(*f).is_some()))
        .collect();

    let mut header = base_header(false);
    header.extend(features.iter().map(|f| f.name().to_string()));

    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer.write_record(&header).map_err(csv_err)?;
    for trajectory in trajectories {
        for (i, sample) in trajectory.trajectory.samples.iter().enumerate() {
            let mut cells = base_cells(&trajectory.trajectory, sample, false);
            cells.extend(
                features
                    .iter()
                    .map(|f| trajectory.get(*f).and_then(|c| c.get(i)).map(|v| cell(*v)).unwrap_or_default()),
            );
            writer.write_record(&cells).map_err(csv_err)?;
        }
    }
    writer.flush().map_err(|e| IoError::Io(path.to_path_buf(), e))?;
    Ok(())
}

/// 任意の値をYAMLで書き出す（指標の要約など）
pub fn write_yaml<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<(), IoError> {
    let path = path.as_ref();
    create_parent(path)?;
    let contents = serde_yaml::to_string(value).map_err(|e| IoError::Yaml(path.to_path_buf(), e))?;
    fs::write(path, contents).map_err(|e| IoError::Io(path.to_path_buf(), e))?;
    Ok(())
}
