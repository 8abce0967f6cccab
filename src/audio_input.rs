use crate::config::AudioConfig;
use crate::error::SessionError;
use crate::types::{AudioFormat, CaptureSettings, FrameBatch, SampleI16};
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SizedSample};
use crossbeam_channel::Sender;
use regex_lite::Regex;
use std::sync::{Arc, Mutex};

/// 入力デバイスからの通知
#[derive(Clone, Debug, PartialEq)]
pub enum CaptureEvent {
    /// 新しいフレームバッチ
    Frame(FrameBatch),
    /// 非同期に発生したデバイスエラー
    Error(String),
}

/// 音声入力デバイス
///
/// `start()` 後はデバイス側のスレッドから `sink` にイベントが送られる。
/// `stop()` はデバイスの停止を待ってから戻り、以降イベントは送られない。
pub trait InputDevice {
    fn start(
        &mut self,
        settings: CaptureSettings,
        sink: Sender<CaptureEvent>,
    ) -> Result<(), SessionError>;

    /// 停止を要求し、停止完了まで待つ（停止済みなら何もしない）
    fn stop(&mut self) -> Result<(), SessionError>;

    fn is_running(&self) -> bool;
}

/// インターリーブされたサンプル列を固定長のフレームバッチに切り分ける
pub struct Framer {
    format: AudioFormat,
    batch_len: usize,
    pending: Vec<SampleI16>,
}

impl Framer {
    pub fn new(settings: CaptureSettings) -> Self {
        let batch_len = settings.frame_size.max(1) * settings.format.channels.max(1) as usize;
        Self {
            format: settings.format,
            batch_len,
            pending: Vec::with_capacity(batch_len),
        }
    }

    /// サンプルを追加し、満杯になったバッチを順に `emit` に渡す
    pub fn push<F>(&mut self, samples: &[SampleI16], mut emit: F)
    where
        F: FnMut(FrameBatch),
    {
        let mut rest = samples;
        while !rest.is_empty() {
            let room = self.batch_len - self.pending.len();
            let take = room.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.batch_len {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_len));
                emit(FrameBatch::new(full, self.format));
            }
        }
    }

    /// 端数のバッチを取り出す
    pub fn flush(&mut self) -> Option<FrameBatch> {
        if self.pending.is_empty() {
            return None;
        }
        let partial = std::mem::take(&mut self.pending);
        Some(FrameBatch::new(partial, self.format))
    }
}

/// cpal によるマイク入力
pub struct CpalInput {
    device: cpal::Device,
    stream: Option<cpal::Stream>,
    framer: Option<Arc<Mutex<Framer>>>,
    sink: Option<Sender<CaptureEvent>>,
}

impl CpalInput {
    /// 新しいCpalInputを作成
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if config.input_device == "default" {
            host.default_input_device()
                .context("デフォルト入力デバイスが見つかりません")?
        } else {
            Self::input_devices(config.exclude_pattern.as_deref())?
                .into_iter()
                .find(|d| d.name().ok().as_deref() == Some(config.input_device.as_str()))
                .with_context(|| format!("入力デバイスが見つかりません: {}", config.input_device))?
        };

        log::info!("入力デバイス: {:?}", device.name());

        Ok(Self {
            device,
            stream: None,
            framer: None,
            sink: None,
        })
    }

    /// ストリームを構築
    fn build_stream<T>(
        &self,
        settings: CaptureSettings,
        framer: Arc<Mutex<Framer>>,
        sink: Sender<CaptureEvent>,
    ) -> Result<cpal::Stream, SessionError>
    where
        T: SizedSample + Sample + Send + 'static,
        <T as Sample>::Float: Into<f32>,
    {
        let stream_config = cpal::StreamConfig {
            channels: settings.format.channels,
            sample_rate: cpal::SampleRate(settings.format.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(settings.frame_size as u32),
        };

        let data_sink = sink.clone();
        let mut scratch: Vec<SampleI16> = Vec::with_capacity(settings.frame_size);

        let data_callback = move |data: &[T], _info: &cpal::InputCallbackInfo| {
            scratch.clear();
            scratch.extend(data.iter().map(|&sample| {
                let f: f32 = sample.to_float_sample().into();
                (f.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
            }));

            // コールバック内ではチャンネルに積むだけ（ブロックしない）
            if let Ok(mut framer) = framer.lock() {
                framer.push(&scratch, |batch| {
                    if data_sink.send(CaptureEvent::Frame(batch)).is_err() {
                        log::warn!("キャプチャ受信側がクローズ済み: フレームを破棄");
                    }
                });
            }
        };

        let error_callback = move |err: cpal::StreamError| {
            log::error!("入力ストリームエラー: {}", err);
            let _ = sink.send(CaptureEvent::Error(err.to_string()));
        };

        self.device
            .build_input_stream(&stream_config, data_callback, error_callback, None)
            .map_err(|e| SessionError::DeviceFault(format!("入力ストリームの構築に失敗: {}", e)))
    }

    /// デバイス一覧を表示
    pub fn list_devices(exclude_pattern: Option<&str>) -> Result<()> {
        println!("利用可能な入力デバイス:");
        println!();

        for (idx, device) in Self::input_devices(exclude_pattern)?.into_iter().enumerate() {
            let name = device.name()?;
            println!("  [{}] {}", idx, name);

            device.supported_input_configs()?.for_each(|config_range| {
                println!(
                    "      フォーマット: {:?}, {}-{}Hz, {}ch",
                    config_range.sample_format(),
                    config_range.min_sample_rate().0,
                    config_range.max_sample_rate().0,
                    config_range.channels()
                );
            });
            println!();
        }

        Ok(())
    }

    /// 除外パターンに一致するデバイスを除いた入力デバイス一覧
    fn input_devices(exclude_pattern: Option<&str>) -> Result<Vec<cpal::Device>> {
        let host = cpal::default_host();
        let excluded = exclude_pattern
            .map(Regex::new)
            .transpose()
            .context("exclude_pattern の正規表現が不正です")?;

        let devices = host
            .input_devices()?
            .filter(|device| match (&excluded, device.name()) {
                (Some(regex), Ok(name)) => !regex.is_match(&name),
                _ => true,
            })
            .collect();
        Ok(devices)
    }
}

impl InputDevice for CpalInput {
    fn start(
        &mut self,
        settings: CaptureSettings,
        sink: Sender<CaptureEvent>,
    ) -> Result<(), SessionError> {
        if self.stream.is_some() {
            return Err(SessionError::DeviceFault(
                "入力ストリームは既に動作中です".to_string(),
            ));
        }

        let default_config = self
            .device
            .default_input_config()
            .map_err(|e| SessionError::DeviceFault(format!("デフォルト入力設定が取得できません: {}", e)))?;

        log::info!(
            "入力デバイス設定: {:?}, 要求 {}Hz / {}ch / {}フレーム",
            default_config.sample_format(),
            settings.format.sample_rate,
            settings.format.channels,
            settings.frame_size
        );

        let framer = Arc::new(Mutex::new(Framer::new(settings)));

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => self.build_stream::<f32>(settings, framer.clone(), sink.clone())?,
            cpal::SampleFormat::I16 => self.build_stream::<i16>(settings, framer.clone(), sink.clone())?,
            cpal::SampleFormat::U16 => self.build_stream::<u16>(settings, framer.clone(), sink.clone())?,
            cpal::SampleFormat::I32 => self.build_stream::<i32>(settings, framer.clone(), sink.clone())?,
            other => {
                return Err(SessionError::DeviceFault(format!(
                    "サポートされていないサンプルフォーマット: {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| SessionError::DeviceFault(format!("ストリームの開始に失敗: {}", e)))?;

        self.stream = Some(stream);
        self.framer = Some(framer);
        self.sink = Some(sink);

        log::info!("音声入力ストリームを開始しました");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };

        if let Err(e) = stream.pause() {
            log::warn!("入力ストリームの一時停止に失敗: {}", e);
        }
        // ストリームを破棄した時点でコールバックは呼ばれなくなる
        drop(stream);

        // 端数のフレームを最後に送る
        if let (Some(framer), Some(sink)) = (self.framer.take(), self.sink.take()) {
            if let Ok(mut framer) = framer.lock() {
                if let Some(partial) = framer.flush() {
                    let _ = sink.send(CaptureEvent::Frame(partial));
                }
            }
        }

        log::info!("音声入力ストリームを停止しました");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("入力ストリームの停止に失敗: {}", e);
        }
    }
}
