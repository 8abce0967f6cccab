//! pcm-recorder - マイク録音・再生・音量調整ツール
//!
//! このクレートは、マイクから16ビットPCMを録音してメモリ上のWAVクリップに保存し、
//! 任意の位置から再生したり、クリップ全体の音量を調整したりする機能を提供します。
//!
//! # 主な機能
//!
//! - **録音**: 入力デバイスから固定フレームサイズのバッチを受け取り、到着順にWAVエンコード
//! - **ライブ表示**: 波形・長さ・フレーム数・サンプル数を録音中に更新
//! - **プル型再生**: 出力デバイスの要求に合わせてデコードし、トラックバー位置から再生
//! - **音量調整**: クリップ全体に倍率をかけて再エンコード（飽和あり）
//! - **保存**: クリップをWAVファイルとして書き出し
//!
//! # アーキテクチャ
//!
//! ```text
//! [Input Device] → CaptureEvent → [capture-encoder] → [WavEncoder] → [StreamBuffer]
//!                                        │                                │
//!                                        ↓                                ↓
//!                                    [UiEvent] ← [FrameFeeder] ← [WavDecoder]
//!                                        │             ↑
//!                                        ↓             │
//!                              [SessionController]  [Output Device]
//!                                        │
//!                                        ↓
//!                                      [TUI]
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use pcm_recorder::config::Config;
//!
//! // 設定ファイルを読み込み
//! let config = Config::load_or_default("config.toml").unwrap();
//!
//! // またはデフォルト設定を生成
//! Config::write_default("config.toml").unwrap();
//! ```

pub mod audio_input;
pub mod audio_output;
pub mod capture;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod playback;
pub mod stream_buffer;
pub mod tui;
pub mod tui_state;
pub mod types;
pub mod volume;

#[cfg(test)]
mod mock_device;
