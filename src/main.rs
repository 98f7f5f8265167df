use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Arg, ArgMatches, Command};
use tracing::{error, info, warn};

use trajproc::analysis::{AnalyzerSettings, DatasetAnalyzer, GlobalAnalyzer};
use trajproc::batch::{RecordingFile, discover_recordings, process_all};
use trajproc::config::ProcessingConfig;
use trajproc::io::{read_raw_table, write_features, write_table, write_yaml};
use trajproc::logging::{LogConfig, LogOutput, init_logging};
use trajproc::models::TracingReporter;
use trajproc::processing::ReprocessingPipeline;

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .required(true)
        .help("処理設定ファイル(.yaml)のパスを指定")
}

fn info_arg() -> Arg {
    Arg::new("info")
        .short('i')
        .long("info")
        .action(clap::ArgAction::SetTrue)
        .help("設定の情報のみ表示して終了")
}

fn cli() -> Command {
    Command::new("trajproc")
        .version("0.1.0")
        .about("モーションキャプチャ軌跡の再処理と特徴量解析")
        .long_about("記録された人・ロボットの3次元軌跡を整形し、\n\
                     運動学的特徴量とベンチマーク指標を集計します。")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: DEBUG, -vv: TRACE)")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .value_name("LEVEL")
                .help("ログレベル (trace, debug, info, warn, error)")
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .global(true)
                .value_name("OUTPUT")
                .default_value("console")
                .help("ログ出力先 (console, file, both)")
        )
        .subcommand(
            Command::new("preprocess")
                .about("生データを再処理して記録ごとの軌跡表を書き出す")
                .arg(config_arg())
                .arg(info_arg())
        )
        .subcommand(
            Command::new("analyze")
                .about("データセット全体のベンチマーク指標を集計する")
                .arg(config_arg())
                .arg(info_arg())
                .arg(
                    Arg::new("features")
                        .long("features")
                        .action(clap::ArgAction::SetTrue)
                        .help("特徴量付きの軌跡も記録ごとに書き出す")
                )
        )
}

fn main() {
    let matches = cli().get_matches();

    let output = matches
        .get_one::<String>("log-output")
        .map(|s| LogOutput::from_str(s))
        .transpose()
        .unwrap_or_else(|e| {
            eprintln!("エラー: {}", e);
            std::process::exit(2);
        })
        .unwrap_or(LogOutput::Console);
    let log_config = LogConfig::from_cli(
        matches.get_one::<String>("log-level").map(String::as_str),
        output,
        matches.get_count("verbose"),
    );
    // 非同期ファイル出力のガード（破棄時にフラッシュ）
    let log_guard = init_logging(log_config).unwrap_or_else(|e| {
        eprintln!("ログ初期化エラー: {}", e);
        None
    });

    let result = match matches.subcommand() {
        Some(("preprocess", sub)) => run_command(sub, preprocess),
        Some(("analyze", sub)) => run_command(sub, analyze),
        _ => Ok(()),
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("エラー: {}", e);
        // exit 前にファイル出力をフラッシュ
        drop(log_guard);
        std::process::exit(1);
    }
}

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// 設定ファイルを読み込み、サブコマンドを実行
fn run_command(matches: &ArgMatches, command: fn(&ProcessingConfig, &ArgMatches) -> CommandResult) -> CommandResult {
    let config_path = matches
        .get_one::<String>("config")
        .ok_or("設定ファイルが指定されていません")?;
    let config = ProcessingConfig::from_file(config_path)?;
    info!("設定ファイル読み込み完了: {}", config_path);

    if matches.get_flag("info") {
        config.print_summary();
        return Ok(());
    }

    command(&config, matches)
}

fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread().build()
}

/// 出力先 `<output>/<シナリオID>/<ファイル名>`
fn output_path(output: &Path, file: &RecordingFile, file_name: &str) -> PathBuf {
    output.join(&file.scenario_id).join(file_name)
}

/// 記録ごとに再処理して軌跡表を書き出す
fn preprocess(config: &ProcessingConfig, _matches: &ArgMatches) -> CommandResult {
    let files = discover_recordings(&config.io.input)?;
    if files.is_empty() {
        warn!("入力に記録ファイルがありません: {}", config.io.input.display());
        return Ok(());
    }
    info!("{}件の記録を再処理します", files.len());

    let settings = config.pipeline_settings();
    let roles = config.roles.clone();
    let output = config.io.output.clone();
    let results = runtime()?.block_on(process_all(files, move |file: &RecordingFile| {
        let (raw, mut catalog) = read_raw_table(&file.path).map_err(|e| e.to_string())?;
        for (body_id, role) in &roles {
            catalog.declare(body_id, role.clone());
        }
        let table = ReprocessingPipeline::new(settings, &TracingReporter)
            .run(&raw, &catalog)
            .map_err(|e| e.to_string())?;
        let path = output_path(&output, file, &file.file_name());
        write_table(&path, &table).map_err(|e| e.to_string())?;
        Ok::<_, String>(path)
    }));

    let mut failed = 0;
    for (file, result) in results {
        match result {
            Ok(path) => info!("{} -> {}", file.path.display(), path.display()),
            Err(reason) => {
                failed += 1;
                warn!("{} をスキップしました: {}", file.path.display(), reason);
            }
        }
    }
    if failed > 0 {
        warn!("{}件の記録を処理できませんでした", failed);
    }
    Ok(())
}

/// データセット全体の指標を集計して書き出す
fn analyze(config: &ProcessingConfig, matches: &ArgMatches) -> CommandResult {
    let files = discover_recordings(&config.io.input)?;
    if files.is_empty() {
        warn!("入力に記録ファイルがありません: {}", config.io.input.display());
        return Ok(());
    }
    info!("{}件の記録を解析します", files.len());

    let settings = AnalyzerSettings::from_config(config);
    let runtime = runtime()?;

    if matches.get_flag("features") {
        let analyzer_settings = settings.clone();
        let output = config.io.output.clone();
        let results = runtime.block_on(process_all(files.clone(), move |file: &RecordingFile| {
            let analyzer = DatasetAnalyzer::new(analyzer_settings.clone(), &TracingReporter);
            let analysis = analyzer.run_file(&file.path).map_err(|e| e.to_string())?;
            let path = output_path(&output, file, &format!("features_{}", file.file_name()));
            write_features(&path, &analyzer.features(&analysis.table)).map_err(|e| e.to_string())
        }));
        for (file, result) in results {
            if let Err(reason) = result {
                warn!("{} の特徴量を書き出せませんでした: {}", file.path.display(), reason);
            }
        }
    }

    let analysis = runtime.block_on(GlobalAnalyzer::new(settings).run(files));
    let path = config.io.output.join("metrics.yaml");
    write_yaml(&path, &analysis.report())?;
    info!("指標を書き出しました: {}", path.display());
    Ok(())
}
