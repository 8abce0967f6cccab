use anyhow::{Context, Result};
use env_logger::Env;
use pcm_recorder::audio_input::CpalInput;
use pcm_recorder::audio_output::CpalOutput;
use pcm_recorder::capture::{CaptureSession, LiveCounters};
use pcm_recorder::codec::read_summary;
use pcm_recorder::config::Config;
use pcm_recorder::controller::SessionController;
use pcm_recorder::events::{self, EventKind};
use pcm_recorder::tui::TuiApp;
use std::fs::File;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

const LOG_FILE: &str = "pcm-recorder.log";

fn main() -> Result<()> {
    // コマンドライン引数をパース
    let args: Vec<String> = std::env::args().collect();

    // デバイス一覧表示モード
    if args.len() > 1 && args[1] == "--show-interfaces" {
        init_logger(false)?;
        let config = Config::load_or_default(args.get(2).map_or("config.toml", |s| s.as_str()))?;
        CpalInput::list_devices(config.audio.exclude_pattern.as_deref())?;
        CpalOutput::list_devices()?;
        return Ok(());
    }

    // 設定ファイル生成モード
    if args.len() > 1 && args[1] == "--generate-config" {
        init_logger(false)?;
        let config_path = if args.len() > 2 {
            &args[2]
        } else {
            "config.toml"
        };
        Config::write_default(config_path)?;
        println!("設定ファイルを生成しました: {}", config_path);
        return Ok(());
    }

    // ヘッドレス録音モード
    if args.len() > 1 && args[1] == "--record" {
        init_logger(false)?;
        let output_path = args
            .get(2)
            .context("使い方: pcm-recorder --record <out.wav> [config.toml]")?;
        let config_path = args.get(3).map_or("config.toml", |s| s.as_str());
        let config = Config::load_or_default(config_path)?;
        return record_headless(&config, output_path);
    }

    // 設定ファイルのパス
    let config_path = if args.len() > 1 && !args[1].starts_with("--") {
        &args[1]
    } else {
        "config.toml"
    };

    // TUI表示中は端末にログを出さない
    init_logger(true)?;

    // 設定を読み込み
    let config = Config::load_or_default(config_path)?;

    log::info!("pcm-recorder を起動します");
    log::info!("設定: {:?}", config);

    let (sender, rx) = events::channel();
    let input = CpalInput::new(&config.audio)?;
    let output = CpalOutput::new(config.audio.output_device_name())?;
    let controller = SessionController::new(Box::new(input), Box::new(output), &config, sender);

    let running = Arc::new(AtomicBool::new(true));
    let mut app = TuiApp::new(controller, rx, config, running);
    app.run()?;

    log::info!("pcm-recorder を終了しました");

    Ok(())
}

/// ロガーを初期化（`to_file` の場合はログファイルへ出力）
fn init_logger(to_file: bool) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp(None);

    if to_file {
        let file = File::create(LOG_FILE)
            .with_context(|| format!("ログファイルの作成に失敗: {}", LOG_FILE))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

/// Ctrl+C まで録音し、WAVファイルに保存して概要をJSONで出力
fn record_headless(config: &Config, output_path: &str) -> Result<()> {
    // Ctrl+C ハンドラを設定
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        running_clone.store(false, Ordering::SeqCst);
    })?;

    let (sender, rx) = events::channel();
    let mut input = CpalInput::new(&config.audio)?;
    let counters = Arc::new(LiveCounters::default());

    let mut session = CaptureSession::start(
        &mut input,
        config.audio.capture_settings(),
        counters,
        sender.for_session(1),
    )?;

    log::info!("録音を開始しました (Ctrl+C で停止)");

    // メインループ: 停止またはデバイスエラーを待つ
    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                if let EventKind::Fault(message) = event.kind {
                    log::error!("エラーのため録音を終了します: {}", message);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!("停止処理を開始します...");

    let outcome = session
        .stop(&mut input)?
        .context("録音セッションが既に停止しています")?;

    outcome
        .clip
        .save(output_path)
        .with_context(|| format!("WAVファイルの保存に失敗: {}", output_path))?;

    let summary = read_summary(&outcome.clip)?;
    let report = serde_json::json!({
        "path": output_path,
        "counters": outcome.counters,
        "clip": summary,
        "fault": outcome.fault.as_ref().map(ToString::to_string),
    });
    println!("{}", serde_json::to_string(&report)?);

    Ok(())
}
