use crate::types::{AudioFormat, CaptureSettings};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub volume: VolumeConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// オーディオ入出力設定
///
/// # デフォルト値
///
/// - `input_device`: "default" (システムのデフォルトデバイス)
/// - `output_device`: "default"
/// - `sample_rate`: 22050 Hz
/// - `channels`: 1 (モノラル)
/// - `frame_size`: 4096 フレーム/バッチ
/// - `exclude_pattern`: なし
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    #[serde(default = "default_device")]
    pub input_device: String,
    #[serde(default = "default_device")]
    pub output_device: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    /// 一覧・選択から除外する入力デバイス名の正規表現
    #[serde(default)]
    pub exclude_pattern: Option<String>,
}

/// 音量調整の倍率
///
/// # デフォルト値
///
/// - `increase`: 1.25
/// - `decrease`: 0.75
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VolumeConfig {
    #[serde(default = "default_increase")]
    pub increase: f32,
    #[serde(default = "default_decrease")]
    pub decrease: f32,
}

/// 画面表示設定
///
/// # デフォルト値
///
/// - `refresh_ms`: 100 ms
/// - `seek_step_ms`: 500 ms (トラックバー1回の移動量)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisplayConfig {
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,
    #[serde(default = "default_seek_step_ms")]
    pub seek_step_ms: u64,
}

/// 保存先設定
///
/// # デフォルト値
///
/// - `save_dir`: "./recordings"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_save_dir")]
    pub save_dir: String,
}

// Default functions
fn default_device() -> String {
    "default".to_string()
}

fn default_sample_rate() -> u32 {
    22050
}

fn default_channels() -> u16 {
    1
}

fn default_frame_size() -> usize {
    4096
}

fn default_increase() -> f32 {
    1.25
}

fn default_decrease() -> f32 {
    0.75
}

fn default_refresh_ms() -> u64 {
    100
}

fn default_seek_step_ms() -> u64 {
    500
}

fn default_save_dir() -> String {
    "./recordings".to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: default_device(),
            output_device: default_device(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            frame_size: default_frame_size(),
            exclude_pattern: None,
        }
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            increase: default_increase(),
            decrease: default_decrease(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_ms: default_refresh_ms(),
            seek_step_ms: default_seek_step_ms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save_dir: default_save_dir(),
        }
    }
}

impl AudioConfig {
    /// 入力デバイスの構成
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            format: AudioFormat {
                sample_rate: self.sample_rate,
                channels: self.channels,
            },
            frame_size: self.frame_size,
        }
    }

    /// 出力デバイス名（"default" の場合は None）
    pub fn output_device_name(&self) -> Option<&str> {
        if self.output_device == "default" {
            None
        } else {
            Some(&self.output_device)
        }
    }
}

impl DisplayConfig {
    /// トラックバー1回の移動量（フレーム）
    pub fn seek_step_frames(&self, sample_rate: u32) -> u64 {
        (self.seek_step_ms * sample_rate as u64 / 1000).max(1)
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// TOML形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合、
    /// あるいは値が不正な場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use pcm_recorder::config::Config;
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        config.validate()?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// 既存のファイルは上書きされる。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use pcm_recorder::config::Config;
    /// Config::write_default("config.toml").unwrap();
    /// ```
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
            Ok(Config::default())
        }
    }

    /// 値の妥当性を検証
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            anyhow::bail!("audio.sample_rate は1以上である必要があります");
        }
        if self.audio.channels == 0 {
            anyhow::bail!("audio.channels は1以上である必要があります");
        }
        if self.audio.frame_size == 0 {
            anyhow::bail!("audio.frame_size は1以上である必要があります");
        }
        for (key, value) in [
            ("volume.increase", self.volume.increase),
            ("volume.decrease", self.volume.decrease),
        ] {
            if !value.is_finite() || value <= 0.0 {
                anyhow::bail!("{} は正の数である必要があります: {}", key, value);
            }
        }
        Ok(())
    }
}
