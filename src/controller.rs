use crate::audio_input::InputDevice;
use crate::audio_output::OutputDevice;
use crate::capture::{CaptureSession, LiveCounters};
use crate::codec::read_summary;
use crate::config::{Config, VolumeConfig};
use crate::error::SessionError;
use crate::events::{EventKind, EventSender, SessionId, UiEvent};
use crate::playback::PlaybackSession;
use crate::stream_buffer::StreamBuffer;
use crate::types::{CaptureSettings, ClipSummary, Controls, Counters, SessionState};
use crate::volume::VolumeAdjuster;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 録音・再生の状態機械
///
/// 同時に動くセッションは最大1つ。UIスレッドだけが操作し、
/// デバイス側からの通知は [`UiEvent`] として [`handle_event`](Self::handle_event) に渡される。
///
/// ```text
/// Idle ──start_recording──> Recording ──stop / Fault──> Idle
/// Idle ──start_playback───> Playing   ──stop / Finished / Fault──> Idle
/// Idle ──adjust_volume────> Adjusting ──────────────────> Idle
/// ```
pub struct SessionController {
    input: Box<dyn InputDevice>,
    output: Box<dyn OutputDevice>,
    settings: CaptureSettings,
    volume: VolumeConfig,
    state: SessionState,
    clip: Option<StreamBuffer>,
    summary: Option<ClipSummary>,
    capture: Option<CaptureSession>,
    playback: Option<PlaybackSession>,
    counters: Arc<LiveCounters>,
    last_capture: Option<Counters>,
    cursor: u64,
    session: SessionId,
    events: EventSender,
}

impl SessionController {
    pub fn new(
        input: Box<dyn InputDevice>,
        output: Box<dyn OutputDevice>,
        config: &Config,
        events: EventSender,
    ) -> Self {
        Self {
            input,
            output,
            settings: config.audio.capture_settings(),
            volume: config.volume.clone(),
            state: SessionState::Idle,
            clip: None,
            summary: None,
            capture: None,
            playback: None,
            counters: Arc::new(LiveCounters::default()),
            last_capture: None,
            cursor: 0,
            session: 0,
            events,
        }
    }

    /// 録音を開始
    ///
    /// 開始に成功すると以前のクリップは破棄される。
    pub fn start_recording(&mut self) -> Result<(), SessionError> {
        self.ensure_idle("録音開始")?;

        let session = self.next_session();
        let capture = CaptureSession::start(
            self.input.as_mut(),
            self.settings,
            self.counters.clone(),
            self.events.for_session(session),
        )?;

        self.clip = None;
        self.summary = None;
        self.last_capture = None;
        self.cursor = 0;
        self.capture = Some(capture);
        self.state = SessionState::Recording;
        Ok(())
    }

    /// トラックバーの位置から再生を開始
    pub fn start_playback(&mut self) -> Result<(), SessionError> {
        self.ensure_idle("再生")?;

        let session = self.next_session();
        let Some(clip) = self.clip.as_ref() else {
            return Err(SessionError::NoRecording);
        };
        let playback = PlaybackSession::start(
            self.output.as_mut(),
            clip,
            self.cursor,
            self.events.for_session(session),
        )?;

        self.cursor = playback.start_frame();
        self.playback = Some(playback);
        self.state = SessionState::Playing;
        Ok(())
    }

    /// 動作中のセッションを停止（Idle なら何もしない）
    ///
    /// デバイスの停止完了を待ってから Idle に戻る。録音中にデバイスエラーや
    /// エンコードエラーが起きていた場合も Idle に戻り、クリップはエラー直前までの
    /// 内容で残ったうえで、そのエラー（`DeviceFault` や `FormatMismatch` など）を返す。
    /// 再生中のデコード失敗は `Codec` として返す。
    pub fn stop(&mut self) -> Result<(), SessionError> {
        let result = match self.state {
            SessionState::Recording => self.stop_capture(),
            SessionState::Playing => self.stop_playback(),
            SessionState::Idle | SessionState::Adjusting => return Ok(()),
        };

        self.state = SessionState::Idle;
        self.cursor = 0;
        result
    }

    fn stop_capture(&mut self) -> Result<(), SessionError> {
        let Some(mut capture) = self.capture.take() else {
            return Ok(());
        };

        let outcome = capture.stop(self.input.as_mut());
        debug_assert!(!self.input.is_running(), "入力デバイスが停止していません");
        self.events.for_session(self.session).cleared();

        let Some(outcome) = outcome? else {
            return Ok(());
        };

        self.summary = match read_summary(&outcome.clip) {
            Ok(summary) => Some(summary),
            Err(e) => {
                log::warn!("録音クリップのヘッダを読めません: {}", e);
                None
            }
        };
        self.clip = Some(outcome.clip);
        self.last_capture = Some(outcome.counters);

        match outcome.fault {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    fn stop_playback(&mut self) -> Result<(), SessionError> {
        let Some(mut playback) = self.playback.take() else {
            return Ok(());
        };
        let result = playback.stop(self.output.as_mut());
        debug_assert!(!self.output.is_running(), "出力デバイスが停止していません");
        result
    }

    /// クリップ全体に音量倍率を適用
    ///
    /// 終了後はトラックバーを先頭に戻す。
    pub fn adjust_volume(&mut self, multiplier: f32) -> Result<ClipSummary, SessionError> {
        self.ensure_idle("音量調整")?;
        let adjuster = VolumeAdjuster::new(multiplier)?;
        let Some(clip) = self.clip.as_mut() else {
            return Err(SessionError::NoRecording);
        };

        self.state = SessionState::Adjusting;
        let result = adjuster.apply(clip);
        self.state = SessionState::Idle;
        self.cursor = 0;

        let summary = result?;
        self.summary = Some(summary);
        Ok(summary)
    }

    pub fn increase_volume(&mut self) -> Result<ClipSummary, SessionError> {
        self.adjust_volume(self.volume.increase)
    }

    pub fn decrease_volume(&mut self) -> Result<ClipSummary, SessionError> {
        self.adjust_volume(self.volume.decrease)
    }

    /// トラックバーを移動（0 ~ 総サンプル数にクランプ）
    pub fn set_cursor(&mut self, position: u64) -> Result<u64, SessionError> {
        match self.state {
            SessionState::Idle | SessionState::Playing => {}
            current => {
                return Err(SessionError::ConcurrentAccess {
                    current,
                    action: "シーク",
                })
            }
        }
        let summary = self.summary.ok_or(SessionError::NoRecording)?;
        self.cursor = position.min(summary.samples);
        Ok(self.cursor)
    }

    /// トラックバーを相対移動
    pub fn step_cursor(&mut self, delta: i64) -> Result<u64, SessionError> {
        self.set_cursor(self.cursor.saturating_add_signed(delta))
    }

    /// クリップをWAVファイルとして保存
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SessionError> {
        self.ensure_idle("保存")?;
        let clip = self.clip.as_ref().ok_or(SessionError::NoRecording)?;
        clip.save(path.as_ref())?;
        log::info!("保存しました: {:?} ({}バイト)", path.as_ref(), clip.len());
        Ok(())
    }

    /// `recording_YYYYmmdd_HHMMSS.wav` という名前でディレクトリに保存
    pub fn save_timestamped<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf, SessionError> {
        self.ensure_idle("保存")?;
        if self.clip.is_none() {
            return Err(SessionError::NoRecording);
        }

        fs::create_dir_all(dir.as_ref())?;
        let filename = chrono::Local::now()
            .format("recording_%Y%m%d_%H%M%S.wav")
            .to_string();
        let path = dir.as_ref().join(filename);
        self.save(&path)?;
        Ok(path)
    }

    /// デバイス側からの通知を反映
    ///
    /// 現在のセッション以外からのイベントは無視する。`Fault` を受けるとセッションを停止し、
    /// 停止処理が返した元のエラーをそのまま返す。
    pub fn handle_event(&mut self, event: &UiEvent) -> Result<(), SessionError> {
        if event.session != self.session {
            return Ok(());
        }

        match &event.kind {
            EventKind::Position(frame) => {
                if self.state == SessionState::Playing {
                    self.cursor = *frame;
                }
            }
            EventKind::Finished => {
                if self.state == SessionState::Playing {
                    self.stop()?;
                }
            }
            EventKind::Fault(message) => {
                if matches!(
                    self.state,
                    SessionState::Recording | SessionState::Playing
                ) {
                    log::warn!("エラーのためセッションを停止します: {}", message);
                    self.stop()?;
                    return Err(SessionError::DeviceFault(message.clone()));
                }
            }
            EventKind::Waveform(_) | EventKind::Cleared => {}
        }
        Ok(())
    }

    fn ensure_idle(&self, action: &'static str) -> Result<(), SessionError> {
        if self.state == SessionState::Idle {
            Ok(())
        } else {
            Err(SessionError::ConcurrentAccess {
                current: self.state,
                action,
            })
        }
    }

    fn next_session(&mut self) -> SessionId {
        self.session += 1;
        self.session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn controls(&self) -> Controls {
        Controls::for_state(self.state, self.clip.is_some())
    }

    /// 録音中の累積カウンタ（録音中以外はゼロ）
    pub fn counters(&self) -> Counters {
        self.counters.snapshot()
    }

    /// 直前の録音の最終カウンタ
    pub fn last_capture(&self) -> Option<Counters> {
        self.last_capture
    }

    pub fn clip_summary(&self) -> Option<ClipSummary> {
        self.summary
    }

    pub fn clip(&self) -> Option<&StreamBuffer> {
        self.clip.as_ref()
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn settings(&self) -> CaptureSettings {
        self.settings
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("終了時の停止でエラー: {}", e);
        }
    }
}
