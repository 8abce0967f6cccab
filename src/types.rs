use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 16ビット整数型のオーディオサンプル
///
/// PCM形式の音声データを表現するための型エイリアス。
/// -32768 から 32767 の範囲の値を取る。
pub type SampleI16 = i16;

/// オーディオフォーマット情報
///
/// 音声データのサンプリングレートとチャンネル数を保持する。
/// サンプル形式は常に16ビット符号付きPCM。
///
/// # Examples
///
/// ```
/// # use pcm_recorder::types::AudioFormat;
/// let format = AudioFormat {
///     sample_rate: 22050,
///     channels: 1,
/// };
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// サンプリングレート (Hz)
    ///
    /// 典型的な値: 8000, 16000, 22050, 44100, 48000
    pub sample_rate: u32,

    /// チャンネル数
    ///
    /// 1: モノラル, 2: ステレオ
    pub channels: u16,
}

impl AudioFormat {
    /// 指定フレーム数の再生時間
    pub fn duration_of(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = frames as u128 * 1_000_000_000 / self.sample_rate as u128;
        Duration::from_nanos(nanos as u64)
    }
}

/// 入力デバイスの構成
///
/// サンプリングレート・フレームサイズ・サンプル形式（16ビット固定）の組。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureSettings {
    pub format: AudioFormat,

    /// 1バッチあたりのフレーム数
    pub frame_size: usize,
}

/// フレームバッチ
///
/// 1回のコールバックで受け渡される連続したフレームのまとまり。
/// サンプルはチャンネル間でインターリーブされている。
///
/// # Examples
///
/// ```
/// # use pcm_recorder::types::{AudioFormat, FrameBatch};
/// let batch = FrameBatch::new(
///     vec![0i16; 4096],
///     AudioFormat { sample_rate: 22050, channels: 1 },
/// );
/// assert_eq!(batch.frames(), 4096);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct FrameBatch {
    /// インターリーブされたPCMサンプル
    pub samples: Vec<SampleI16>,

    /// オーディオフォーマット情報
    pub format: AudioFormat,
}

impl FrameBatch {
    pub fn new(samples: Vec<SampleI16>, format: AudioFormat) -> Self {
        Self { samples, format }
    }

    /// フレーム数（チャンネルあたりのサンプル数）
    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }

    /// 全チャンネル合計のサンプル数
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// このバッチが表す時間
    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.frames() as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// -1.0 ~ 1.0 に正規化したサンプル列（波形表示用）
    pub fn to_float(&self) -> Vec<f32> {
        self.samples
            .iter()
            .map(|&s| s as f32 / -(i16::MIN as f32))
            .collect()
    }
}

/// 録音中の累積カウンタ
///
/// - `frames`: フレーム数（チャンネルあたりのサンプル数）
/// - `samples`: 全チャンネル合計のサンプル数
/// - `batches`: 受信したフレームバッチ数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub duration: Duration,
    pub frames: u64,
    pub samples: u64,
    pub batches: u64,
}

/// 録音済みクリップの概要（WAVヘッダから取得）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ClipSummary {
    pub format: AudioFormat,
    pub frames: u64,
    pub samples: u64,
    pub duration: Duration,
}

/// セッションの状態
///
/// ```text
/// Idle -> Recording (start_recording)
/// Recording -> Idle (stop / デバイスエラー)
/// Idle -> Playing (start_playback)
/// Playing -> Idle (stop / 再生終了)
/// Idle -> Adjusting -> Idle (adjust_volume)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Recording,
    Playing,
    Adjusting,
}

impl SessionState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Playing => "playing",
            Self::Adjusting => "adjusting",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 操作の有効/無効
///
/// セッション状態とクリップの有無だけから決まる。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Controls {
    pub record: bool,
    pub play: bool,
    pub stop: bool,
    pub volume: bool,
    pub trackbar: bool,
    pub save: bool,
}

impl Controls {
    pub fn for_state(state: SessionState, has_clip: bool) -> Self {
        match state {
            SessionState::Recording => Self {
                stop: true,
                ..Self::default()
            },
            SessionState::Playing => Self {
                stop: true,
                trackbar: true,
                ..Self::default()
            },
            SessionState::Adjusting => Self::default(),
            SessionState::Idle => Self {
                record: true,
                play: has_clip,
                stop: false,
                volume: has_clip,
                trackbar: has_clip,
                save: has_clip,
            },
        }
    }
}
