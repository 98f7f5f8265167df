//! # Logging モジュール
//! 
//! 軌跡再処理・解析ツールのログ設定です。
//!
//! 診断（欠損数、スキップしたエージェント、適用した処理段階）はすべて `tracing` の
//! イベントとして出力され、ここで購読者を1度だけ設定します。ファイル出力は
//! tracing-appenderの非同期ライターでJSON形式、コンソールはコンパクト形式です。
//!
//! ## 設定可能な出力先
//!
//! - `Console`: コンソールのみ（既定）
//! - `File`: ファイルのみ（logs/trajproc.YYYY-MM-DD）
//! - `Both`: コンソールとファイルの両方

use std::str::FromStr;
use tracing::{Level};
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Registry,
};
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};

/// ログ出力先の設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogOutput {
    /// コンソールのみ
    Console,
    /// ファイルのみ
    File,
    /// コンソールとファイルの両方
    Both,
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(format!("無効な出力先: {}. 利用可能: console, file, both", s)),
        }
    }
}

/// ログ設定構造体
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// ログレベル
    pub level: Level,
    /// 出力先
    pub output: LogOutput,
    /// ログファイルのディレクトリ（Fileまたは Bothの場合）
    pub log_dir: String,
    /// ログファイル名のプレフィックス
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            output: LogOutput::Console,
            log_dir: "logs".to_string(),
            file_prefix: "trajproc".to_string(),
        }
    }
}

impl LogConfig {
    /// コマンドライン指定からログ設定を作成
    ///
    /// `-v` の回数は明示的なレベル指定より優先されます（1回でDEBUG、2回以上でTRACE）。
    pub fn from_cli(level: Option<&str>, output: LogOutput, verbose: u8) -> Self {
        let level = match verbose {
            0 => level.map(parse_log_level).unwrap_or(Level::INFO),
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self {
            level,
            output,
            ..Self::default()
        }
    }

    /// ファイル出力を伴うか
    pub fn writes_file(&self) -> bool {
        matches!(self.output, LogOutput::File | LogOutput::Both)
    }
}

/// ログシステムを初期化
/// 
/// 指定された設定に基づいてtracing-subscriberを設定し、
/// 非同期ログ出力システムを初期化します。
/// 
/// # 引数
/// 
/// * `config` - ログ設定
/// 
/// # 戻り値
/// 
/// ファイル出力がある場合は非同期ライターのガード。ガードが破棄されるときに
/// 未書き込みのログがフラッシュされるため、呼び出し側はプロセス終了まで保持します。
/// 
/// # 例
/// 
/// ```rust,no_run
/// use trajproc::logging::{LogConfig, LogOutput, init_logging};
///
/// let config = LogConfig::from_cli(Some("debug"), LogOutput::Both, 0);
/// let _guard = init_logging(config).expect("ログ初期化に失敗");
/// ```
pub fn init_logging(config: LogConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    if config.writes_file() {
        ensure_log_directory(&config.log_dir)?;
    }

    // 環境変数またはconfigからログレベルを設定
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_string()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // コンソールはコンパクト形式、ファイルはJSON形式（非同期）
    let console = matches!(config.output, LogOutput::Console | LogOutput::Both).then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
    });

    let (file, guard) = if config.writes_file() {
        let file_appender = rolling::daily(&config.log_dir, &config.file_prefix);
        let (non_blocking_appender, guard) = non_blocking(file_appender);
        let layer = fmt::layer()
            .with_writer(non_blocking_appender)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .json();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    Registry::default()
        .with(env_filter)
        .with(console)
        .with(file)
        .try_init()?;

    Ok(guard)
}

/// ログレベルを文字列から解析
/// 
/// # 引数
/// 
/// * `level_str` - ログレベル文字列 ("trace", "debug", "info", "warn", "error")
/// 
/// # 戻り値
/// 
/// 解析されたログレベル、無効な場合はINFO
pub fn parse_log_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!("警告: 無効なログレベル '{}'. INFOを使用します", level_str);
            Level::INFO
        }
    }
}

/// ログディレクトリを作成
/// 
/// ファイル出力が指定されている場合、ログディレクトリが存在しない時に作成します。
/// 
/// # 引数
/// 
/// * `log_dir` - ログディレクトリパス
/// 
/// # 戻り値
/// 
/// ディレクトリ作成に成功した場合はOk(())、失敗した場合はエラー
pub fn ensure_log_directory(log_dir: &str) -> Result<(), std::io::Error> {
    std::fs::create_dir_all(log_dir)?;
    Ok(())
}
