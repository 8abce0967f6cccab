use crate::codec::{encode_clip, FrameDecoder, WavDecoder};
use crate::error::SessionError;
use crate::stream_buffer::StreamBuffer;
use crate::types::{ClipSummary, FrameBatch, SampleI16};
use rayon::prelude::*;

/// 音量調整
///
/// クリップ全体をデコードしてメモリ上で倍率をかけ、再エンコードして書き戻す。
///
/// # 飽和
///
/// 各サンプルは `round(s * multiplier)` を `[-32768, 32767]` にクランプした値になる。
/// 同じ入力と倍率からは常に同じ結果が得られる。
///
/// # Examples
///
/// ```
/// # use pcm_recorder::volume::scale_samples;
/// let mut samples = vec![100i16, -100, 30000];
/// scale_samples(&mut samples, 1.25);
/// assert_eq!(samples, vec![125, -125, 32767]);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct VolumeAdjuster {
    multiplier: f32,
}

impl VolumeAdjuster {
    /// 倍率は有限かつ0以上
    pub fn new(multiplier: f32) -> Result<Self, SessionError> {
        if !multiplier.is_finite() || multiplier < 0.0 {
            return Err(SessionError::InvalidMultiplier(multiplier));
        }
        Ok(Self { multiplier })
    }

    pub fn multiplier(&self) -> f32 {
        self.multiplier
    }

    /// クリップに倍率を適用する
    ///
    /// 再エンコードは別バッファに行い、成功した場合だけ差し替える。
    /// 失敗した場合クリップは元のまま残る。
    pub fn apply(&self, clip: &mut StreamBuffer) -> Result<ClipSummary, SessionError> {
        let mut reader = clip.clone();
        reader.rewind();

        let mut decoder = WavDecoder::new(reader)?;
        let format = decoder.format();
        let mut samples = decoder
            .decode_all()?
            .map(|batch| batch.samples)
            .unwrap_or_default();

        scale_samples(&mut samples, self.multiplier);

        let encoded = encode_clip(&FrameBatch::new(samples, format))?;
        let summary = WavDecoder::new(encoded.clone())?.summary();

        *clip = encoded;

        log::info!(
            "音量を {:.2} 倍にしました ({}フレーム)",
            self.multiplier,
            summary.frames
        );
        Ok(summary)
    }
}

/// 全サンプルに倍率をかける（飽和あり）
pub fn scale_samples(samples: &mut [SampleI16], multiplier: f32) {
    samples.par_iter_mut().for_each(|sample| {
        let scaled = (*sample as f32 * multiplier).round();
        *sample = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    });
}
