use crate::types::{AudioFormat, SessionState};
use thiserror::Error;

/// 録音・再生セッションのエラー
///
/// デコード終端（DecodeExhausted）はエラーではなく `Ok(None)` で表現する。
/// 範囲外のシーク位置は先頭にクランプされるためエラーにならない。
#[derive(Debug, Error)]
pub enum SessionError {
    /// 入出力デバイスが非同期にエラーを通知した
    #[error("デバイスエラー: {0}")]
    DeviceFault(String),

    /// 他のセッションが動作中に操作しようとした
    #[error("{action}できません: 現在 {current} 状態です")]
    ConcurrentAccess {
        current: SessionState,
        action: &'static str,
    },

    /// バッチのフォーマットがセッションと一致しない
    #[error("フォーマット不一致: 期待 {expected:?}, 実際 {actual:?}")]
    FormatMismatch {
        expected: AudioFormat,
        actual: AudioFormat,
    },

    #[error("録音データがありません")]
    NoRecording,

    #[error("無効な音量倍率: {0}")]
    InvalidMultiplier(f32),

    #[error("WAVコーデックエラー: {0}")]
    Codec(#[from] hound::Error),

    #[error("I/Oエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} スレッドが異常終了しました")]
    WorkerPanicked(&'static str),
}

impl SessionError {
    pub fn is_device_fault(&self) -> bool {
        matches!(self, SessionError::DeviceFault(_))
    }
}
