use crate::error::SessionError;
use crate::playback::{FrameFeeder, FrameRequest};
use crate::types::{AudioFormat, SampleI16};
use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};

/// 音声出力デバイス
///
/// `play()` 後はデバイスのバッファが空くたびに `FrameFeeder::request` でフレームを要求し、
/// 再生を始めたバッチを `FrameFeeder::batch_started` で通知する。
pub trait OutputDevice {
    /// デコーダのフォーマットに合わせてデバイスを開く
    fn open(&mut self, format: AudioFormat) -> Result<(), SessionError>;

    fn play(&mut self, feeder: FrameFeeder) -> Result<(), SessionError>;

    /// 停止を要求し、停止完了まで待つ（停止済みなら何もしない）
    fn stop(&mut self) -> Result<(), SessionError>;

    fn is_running(&self) -> bool;
}

/// cpal による音声出力
pub struct CpalOutput {
    device: Device,
    format: Option<AudioFormat>,
    stream: Option<Stream>,
}

impl CpalOutput {
    /// 新しいCpalOutputを作成
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        // デバイスを選択
        let device = if let Some(name) = device_name {
            host.output_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| anyhow::anyhow!("出力デバイス '{}' が見つかりません", name))?
        } else {
            host.default_output_device()
                .ok_or_else(|| anyhow::anyhow!("デフォルト出力デバイスが見つかりません"))?
        };

        log::info!("出力デバイス: {}", device.name()?);

        Ok(Self {
            device,
            format: None,
            stream: None,
        })
    }

    /// デバイス一覧を表示
    pub fn list_devices() -> Result<()> {
        let host = cpal::default_host();
        println!("=== 利用可能な出力デバイス ===");

        for (idx, device) in host.output_devices()?.enumerate() {
            let name = device.name()?;
            let is_default = host
                .default_output_device()
                .and_then(|d| d.name().ok())
                .map(|default_name| default_name == name)
                .unwrap_or(false);

            let marker = if is_default { " (デフォルト)" } else { "" };
            println!("{}. {}{}", idx, name, marker);

            if let Ok(config) = device.default_output_config() {
                println!(
                    "   サンプルレート: {} Hz, チャンネル数: {}",
                    config.sample_rate().0,
                    config.channels()
                );
            }
        }

        Ok(())
    }

    /// 指定されたサンプルフォーマットで出力ストリームを構築
    fn build_stream<T>(&self, config: StreamConfig, feeder: FrameFeeder) -> Result<Stream, SessionError>
    where
        T: SizedSample + Sample + FromSample<f32> + Send + 'static,
    {
        let error_feeder = feeder.clone();
        let mut scratch: Vec<SampleI16> = Vec::new();

        let data_callback = move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.clear();
            scratch.resize(data.len(), 0);

            match feeder.request(&mut scratch) {
                FrameRequest::Produced { frame_index, frames } => {
                    let produced = frames * feeder.channels();
                    for (i, sample) in data.iter_mut().enumerate() {
                        *sample = if i < produced {
                            Self::convert_sample::<T>(scratch[i])
                        } else {
                            T::EQUILIBRIUM
                        };
                    }
                    feeder.batch_started(frame_index, frames);
                }
                FrameRequest::Stop => {
                    // 終端以降は無音を出し続ける（停止はUIスレッドが行う）
                    data.fill(T::EQUILIBRIUM);
                }
            }
        };

        let error_callback = move |err: cpal::StreamError| {
            log::error!("出力ストリームエラー: {}", err);
            error_feeder.fault(err.to_string());
        };

        self.device
            .build_output_stream(&config, data_callback, error_callback, None)
            .map_err(|e| SessionError::DeviceFault(format!("出力ストリームの構築に失敗: {}", e)))
    }

    /// i16サンプルを指定されたフォーマットに変換
    fn convert_sample<T: Sample + FromSample<f32>>(sample: i16) -> T {
        let normalized = sample as f32 / i16::MAX as f32;
        T::from_sample(normalized)
    }
}

impl OutputDevice for CpalOutput {
    fn open(&mut self, format: AudioFormat) -> Result<(), SessionError> {
        self.format = Some(format);
        Ok(())
    }

    fn play(&mut self, feeder: FrameFeeder) -> Result<(), SessionError> {
        let format = self
            .format
            .ok_or_else(|| SessionError::DeviceFault("出力デバイスが開かれていません".to_string()))?;

        let default_config = self
            .device
            .default_output_config()
            .map_err(|e| SessionError::DeviceFault(format!("デフォルト出力設定が取得できません: {}", e)))?;

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        log::info!(
            "出力ストリーム開始: {:?}, サンプルレート={}Hz, チャンネル={}",
            default_config.sample_format(),
            config.sample_rate.0,
            config.channels
        );

        let stream = match default_config.sample_format() {
            SampleFormat::F32 => self.build_stream::<f32>(config, feeder)?,
            SampleFormat::I16 => self.build_stream::<i16>(config, feeder)?,
            SampleFormat::U16 => self.build_stream::<u16>(config, feeder)?,
            other => {
                return Err(SessionError::DeviceFault(format!(
                    "サポートされていないサンプルフォーマット: {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| SessionError::DeviceFault(format!("ストリームの再生開始に失敗: {}", e)))?;

        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::warn!("出力ストリームの一時停止に失敗: {}", e);
            }
            drop(stream);
            log::info!("出力ストリームを停止しました");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("出力ストリームの停止に失敗: {}", e);
        }
    }
}
