use crate::audio_output::OutputDevice;
use crate::codec::{self, FrameDecoder, WavDecoder};
use crate::error::SessionError;
use crate::events::{EventKind, EventSender};
use crate::stream_buffer::StreamBuffer;
use crate::types::{AudioFormat, SampleI16};
use std::sync::{Arc, Mutex};

/// 出力デバイスからのフレーム要求に対する応答
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameRequest {
    /// `frame_index` から `frames` フレームをバッファに書いた
    Produced { frame_index: u64, frames: usize },
    /// ストリーム終端（またはエラー）: デバイスは停止すべき
    Stop,
}

struct FeederState {
    decoder: WavDecoder<StreamBuffer>,
    exhausted: bool,
    fault: Option<SessionError>,
}

/// プル型再生のフレーム供給元
///
/// 出力デバイスのコールバックスレッドから呼ばれる。
/// 実際の出力に使う再生カーソルはデコーダの位置そのもので、
/// プレビュー読み出しでは動かない。
#[derive(Clone)]
pub struct FrameFeeder {
    state: Arc<Mutex<FeederState>>,
    format: AudioFormat,
    total_frames: u64,
    events: EventSender,
}

impl FrameFeeder {
    fn new(decoder: WavDecoder<StreamBuffer>, events: EventSender) -> Self {
        let format = decoder.format();
        let total_frames = decoder.total_frames();
        Self {
            state: Arc::new(Mutex::new(FeederState {
                decoder,
                exhausted: false,
                fault: None,
            })),
            format,
            total_frames,
            events,
        }
    }

    pub fn channels(&self) -> usize {
        self.format.channels.max(1) as usize
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// デバイスのバッファ `out` を埋めるだけのフレームを要求する
    ///
    /// 要求数ちょうど（終端付近では不足分を除く）を現在位置からデコードし、位置を進める。
    /// 1フレームもデコードできなければ `Stop` を返す。
    pub fn request(&self, out: &mut [SampleI16]) -> FrameRequest {
        let Ok(mut state) = self.state.lock() else {
            return FrameRequest::Stop;
        };
        if state.exhausted || state.fault.is_some() {
            return FrameRequest::Stop;
        }

        let requested = out.len() / self.channels();
        let frame_index = state.decoder.position();

        match state.decoder.decode(requested) {
            Ok(Some(batch)) => {
                out[..batch.samples.len()].copy_from_slice(&batch.samples);
                FrameRequest::Produced {
                    frame_index,
                    frames: batch.frames(),
                }
            }
            Ok(None) => {
                state.exhausted = true;
                drop(state);
                log::info!("再生がストリーム終端に達しました");
                self.events.cleared();
                self.events.send(EventKind::Finished);
                FrameRequest::Stop
            }
            Err(e) => {
                let message = e.to_string();
                state.fault = Some(e);
                drop(state);
                log::error!("再生中のデコードに失敗: {}", message);
                self.events.cleared();
                self.events.send(EventKind::Fault(message));
                FrameRequest::Stop
            }
        }
    }

    /// バッチの再生開始通知
    ///
    /// トラックバー位置を通知し、後続のフレームが残っていれば
    /// そのバッチを表示用にプレビューする（再生カーソルは保存・復元される）。
    pub fn batch_started(&self, frame_index: u64, count: usize) {
        self.events.send(EventKind::Position(frame_index));

        if frame_index + count as u64 >= self.total_frames {
            return;
        }

        let Ok(mut state) = self.state.lock() else {
            return;
        };

        match codec::preview(&mut state.decoder, frame_index, count) {
            Ok(Some(batch)) => self.events.waveform(batch.to_float()),
            Ok(None) => {}
            Err(e) => log::warn!("プレビューのデコードに失敗 ({}): {}", frame_index, e),
        }
    }

    /// デバイスから非同期に通知されたエラー
    pub fn fault(&self, message: String) {
        let fault = SessionError::DeviceFault(message);
        let text = fault.to_string();
        if let Ok(mut state) = self.state.lock() {
            if state.fault.is_some() {
                return;
            }
            state.fault = Some(fault);
        }
        self.events.send(EventKind::Fault(text));
    }

    /// 現在の再生カーソル
    pub fn position(&self) -> u64 {
        self.state
            .lock()
            .map(|state| state.decoder.position())
            .unwrap_or(self.total_frames)
    }

    pub fn is_finished(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.exhausted)
            .unwrap_or(true)
    }

    /// 記録されたエラーを取り出す（デコード失敗は `Codec`、デバイス通知は `DeviceFault`）
    pub fn take_fault(&self) -> Option<SessionError> {
        self.state.lock().ok().and_then(|mut state| state.fault.take())
    }
}

/// 再生セッション
pub struct PlaybackSession {
    feeder: FrameFeeder,
    start_frame: u64,
    events: EventSender,
    active: bool,
}

impl PlaybackSession {
    /// 再生を開始
    ///
    /// クリップを先頭から読むデコーダを作り、`start_offset` が総フレーム数未満ならそこへ、
    /// そうでなければ先頭から再生する。
    pub fn start(
        output: &mut dyn OutputDevice,
        clip: &StreamBuffer,
        start_offset: u64,
        events: EventSender,
    ) -> Result<Self, SessionError> {
        let mut reader = clip.clone();
        reader.rewind();

        let mut decoder = WavDecoder::new(reader)?;
        let total_frames = decoder.total_frames();

        let start_frame = if start_offset < total_frames {
            start_offset
        } else {
            if start_offset > 0 {
                log::debug!(
                    "開始位置 {} が総フレーム数 {} 以上のため先頭から再生",
                    start_offset,
                    total_frames
                );
            }
            0
        };
        decoder.seek(start_frame)?;

        let format = decoder.format();
        let feeder = FrameFeeder::new(decoder, events.clone());

        output.open(format)?;
        output.play(feeder.clone())?;

        log::info!(
            "再生を開始しました: {}Hz, {}ch, {} / {} フレーム",
            format.sample_rate,
            format.channels,
            start_frame,
            total_frames
        );

        Ok(Self {
            feeder,
            start_frame,
            events,
            active: true,
        })
    }

    /// 再生を停止（停止済みなら何もしない）
    ///
    /// デバイスの停止完了を待ち、表示を無音に戻す。
    /// 再生中にエラーが記録されていれば、そのエラーを返す。
    pub fn stop(&mut self, output: &mut dyn OutputDevice) -> Result<(), SessionError> {
        if !self.active {
            return Ok(());
        }
        self.active = false;

        let result = output.stop();
        self.events.cleared();
        log::info!("再生を停止しました (位置 {})", self.feeder.position());
        match self.feeder.take_fault() {
            Some(fault) => Err(fault),
            None => result,
        }
    }

    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    pub fn total_frames(&self) -> u64 {
        self.feeder.total_frames()
    }

    pub fn position(&self) -> u64 {
        self.feeder.position()
    }

    /// ストリーム終端に達したか
    pub fn is_finished(&self) -> bool {
        self.feeder.is_finished()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

}
