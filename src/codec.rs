use crate::error::SessionError;
use crate::stream_buffer::StreamBuffer;
use crate::types::{AudioFormat, ClipSummary, FrameBatch};
use std::io::{Read, Seek, Write};
use std::ops::{Deref, DerefMut};

/// フレームバッチをバイト列に追記するエンコーダ
///
/// 位置に関しては状態を持たない（常に追記）。
pub trait FrameEncoder {
    fn encode(&mut self, batch: &FrameBatch) -> Result<(), SessionError>;
}

/// バイト列からフレームを取り出すデコーダ
pub trait FrameDecoder {
    /// 現在位置から最大 `count` フレームをデコードする
    ///
    /// # Returns
    /// * `Ok(Some(batch))` - デコードしたフレーム（`count` 未満の場合あり）
    /// * `Ok(None)` - ストリーム終端
    fn decode(&mut self, count: usize) -> Result<Option<FrameBatch>, SessionError>;

    /// 指定フレームにシーク（`total_frames` を超える値は終端にクランプ）
    fn seek(&mut self, frame: u64) -> Result<(), SessionError>;

    fn position(&self) -> u64;

    fn total_frames(&self) -> u64;

    fn format(&self) -> AudioFormat;

    /// 現在位置から終端までをすべてデコードする
    fn decode_all(&mut self) -> Result<Option<FrameBatch>, SessionError> {
        let remaining = self.total_frames().saturating_sub(self.position());
        self.decode(remaining as usize)
    }
}

fn wav_spec(format: AudioFormat) -> hound::WavSpec {
    hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// 16ビットPCM WAVエンコーダ
///
/// `finish()` でヘッダのサイズ情報を確定させる。
pub struct WavEncoder<W: Write + Seek> {
    writer: hound::WavWriter<W>,
    format: AudioFormat,
    frames_written: u64,
}

impl<W: Write + Seek> WavEncoder<W> {
    pub fn new(sink: W, format: AudioFormat) -> Result<Self, SessionError> {
        let writer = hound::WavWriter::new(sink, wav_spec(format))?;
        Ok(Self {
            writer,
            format,
            frames_written: 0,
        })
    }

    /// 書き込んだフレーム数
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// ヘッダを確定して書き込みを終了
    pub fn finish(self) -> Result<u64, SessionError> {
        let frames = self.frames_written;
        self.writer.finalize()?;
        Ok(frames)
    }
}

impl<W: Write + Seek> FrameEncoder for WavEncoder<W> {
    fn encode(&mut self, batch: &FrameBatch) -> Result<(), SessionError> {
        if batch.format != self.format {
            return Err(SessionError::FormatMismatch {
                expected: self.format,
                actual: batch.format,
            });
        }

        for &sample in &batch.samples {
            self.writer.write_sample(sample)?;
        }
        self.frames_written += batch.frames() as u64;
        Ok(())
    }
}

/// 16ビットPCM WAVデコーダ
pub struct WavDecoder<R: Read + Seek> {
    reader: hound::WavReader<R>,
    format: AudioFormat,
    total_frames: u64,
    position: u64,
}

impl<R: Read + Seek> WavDecoder<R> {
    /// 現在位置からWAVヘッダを読み込む
    pub fn new(source: R) -> Result<Self, SessionError> {
        let reader = hound::WavReader::new(source)?;
        let spec = reader.spec();
        let format = AudioFormat {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        };
        let total_frames = reader.duration() as u64;

        Ok(Self {
            reader,
            format,
            total_frames,
            position: 0,
        })
    }

    /// 全チャンネル合計のサンプル数
    pub fn total_samples(&self) -> u64 {
        self.reader.len() as u64
    }

    pub fn summary(&self) -> ClipSummary {
        ClipSummary {
            format: self.format,
            frames: self.total_frames,
            samples: self.total_samples(),
            duration: self.format.duration_of(self.total_frames),
        }
    }
}

impl<R: Read + Seek> FrameDecoder for WavDecoder<R> {
    fn decode(&mut self, count: usize) -> Result<Option<FrameBatch>, SessionError> {
        let remaining = self.total_frames - self.position;
        if remaining == 0 {
            return Ok(None);
        }

        let frames = (count as u64).min(remaining) as usize;
        let wanted = frames * self.format.channels as usize;
        let result: Result<Vec<i16>, hound::Error> =
            self.reader.samples::<i16>().take(wanted).collect();

        match result {
            Ok(samples) => {
                self.position += frames as u64;
                Ok(Some(FrameBatch::new(samples, self.format)))
            }
            Err(e) => {
                // 読みかけの位置を破棄して元の位置に戻す
                if let Err(seek_err) = self.reader.seek(self.position as u32) {
                    log::error!("デコード失敗後の位置復元に失敗: {}", seek_err);
                }
                Err(e.into())
            }
        }
    }

    fn seek(&mut self, frame: u64) -> Result<(), SessionError> {
        let target = frame.min(self.total_frames);
        self.reader.seek(target as u32)?;
        self.position = target;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn format(&self) -> AudioFormat {
        self.format
    }
}

/// デコーダのカーソルを一時的に借りるガード
///
/// 生成時の位置を保存し、ドロップ時に必ず元の位置へ戻す。
/// 途中でデコードが失敗しても再生カーソルは動かない。
pub struct CursorGuard<'a, D: FrameDecoder + ?Sized> {
    decoder: &'a mut D,
    saved: u64,
}

impl<'a, D: FrameDecoder + ?Sized> CursorGuard<'a, D> {
    pub fn new(decoder: &'a mut D) -> Self {
        let saved = decoder.position();
        Self { decoder, saved }
    }
}

impl<D: FrameDecoder + ?Sized> Deref for CursorGuard<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        self.decoder
    }
}

impl<D: FrameDecoder + ?Sized> DerefMut for CursorGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        self.decoder
    }
}

impl<D: FrameDecoder + ?Sized> Drop for CursorGuard<'_, D> {
    fn drop(&mut self) {
        if let Err(e) = self.decoder.seek(self.saved) {
            log::error!("デコーダ位置の復元に失敗 ({}): {}", self.saved, e);
        }
    }
}

/// カーソルを動かさずに `frame_index` から `count` フレームを読む
pub fn preview<D: FrameDecoder + ?Sized>(
    decoder: &mut D,
    frame_index: u64,
    count: usize,
) -> Result<Option<FrameBatch>, SessionError> {
    let mut guard = CursorGuard::new(decoder);
    guard.seek(frame_index)?;
    guard.decode(count)
}

/// 1つのバッチを新しいWAVクリップとしてエンコード
pub fn encode_clip(batch: &FrameBatch) -> Result<StreamBuffer, SessionError> {
    let mut buffer = StreamBuffer::new();
    {
        let mut encoder = WavEncoder::new(&mut buffer, batch.format)?;
        encoder.encode(batch)?;
        encoder.finish()?;
    }
    buffer.rewind();
    Ok(buffer)
}

/// クリップのヘッダから概要を取得
pub fn read_summary(clip: &StreamBuffer) -> Result<ClipSummary, SessionError> {
    let mut reader = clip.clone();
    reader.rewind();
    Ok(WavDecoder::new(reader)?.summary())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono() -> AudioFormat {
        AudioFormat {
            sample_rate: 22050,
            channels: 1,
        }
    }

    fn ramp(start: i16, len: usize) -> Vec<i16> {
        (0..len).map(|i| start.wrapping_add(i as i16)).collect()
    }

    fn clip_of(frames: usize) -> StreamBuffer {
        encode_clip(&FrameBatch::new(ramp(0, frames), mono())).unwrap()
    }

    #[test]
    fn test_batches_decode_in_order() {
        let batches = vec![
            FrameBatch::new(ramp(0, 100), mono()),
            FrameBatch::new(ramp(1000, 50), mono()),
            FrameBatch::new(ramp(-2000, 75), mono()),
        ];

        let mut buffer = StreamBuffer::new();
        {
            let mut encoder = WavEncoder::new(&mut buffer, mono()).unwrap();
            for batch in &batches {
                encoder.encode(batch).unwrap();
            }
            assert_eq!(encoder.finish().unwrap(), 225);
        }

        buffer.rewind();
        let mut decoder = WavDecoder::new(buffer).unwrap();
        assert_eq!(decoder.total_frames(), 225);

        let decoded = decoder.decode_all().unwrap().unwrap();
        let expected: Vec<i16> = batches.iter().flat_map(|b| b.samples.clone()).collect();
        assert_eq!(decoded.samples, expected);
        assert!(decoder.decode(10).unwrap().is_none());
    }

    #[test]
    fn test_stereo_frames_and_samples() {
        let stereo = AudioFormat {
            sample_rate: 44100,
            channels: 2,
        };
        let clip = encode_clip(&FrameBatch::new(ramp(0, 200), stereo)).unwrap();
        let summary = read_summary(&clip).unwrap();
        assert_eq!(summary.frames, 100);
        assert_eq!(summary.samples, 200);
        assert_eq!(summary.format, stereo);
    }

    #[test]
    fn test_decode_short_at_end() {
        let mut decoder = WavDecoder::new(clip_of(10)).unwrap();
        decoder.seek(7).unwrap();
        let batch = decoder.decode(5).unwrap().unwrap();
        assert_eq!(batch.frames(), 3);
        assert_eq!(batch.samples, vec![7, 8, 9]);
        assert_eq!(decoder.position(), 10);
    }

    #[test]
    fn test_seek_beyond_end_is_clamped() {
        let mut decoder = WavDecoder::new(clip_of(10)).unwrap();
        decoder.seek(500).unwrap();
        assert_eq!(decoder.position(), 10);
        assert!(decoder.decode(1).unwrap().is_none());
    }

    #[test]
    fn test_zero_count_is_not_end_of_stream() {
        let mut decoder = WavDecoder::new(clip_of(10)).unwrap();
        let batch = decoder.decode(0).unwrap().unwrap();
        assert!(batch.is_empty());
        assert_eq!(decoder.position(), 0);
    }

    #[test]
    fn test_format_mismatch_rejected() {
        let mut buffer = StreamBuffer::new();
        let mut encoder = WavEncoder::new(&mut buffer, mono()).unwrap();
        let stereo = AudioFormat {
            sample_rate: 22050,
            channels: 2,
        };
        let err = encoder
            .encode(&FrameBatch::new(vec![0; 4], stereo))
            .unwrap_err();
        assert!(matches!(err, SessionError::FormatMismatch { .. }));
        assert_eq!(encoder.frames_written(), 0);
    }

    #[test]
    fn test_preview_restores_position() {
        let mut decoder = WavDecoder::new(clip_of(1000)).unwrap();
        decoder.decode(300).unwrap();

        let previewed = preview(&mut decoder, 800, 10).unwrap().unwrap();
        assert_eq!(previewed.samples[0], 800);
        assert_eq!(decoder.position(), 300);

        let next = decoder.decode(1).unwrap().unwrap();
        assert_eq!(next.samples, vec![300]);
    }

    #[test]
    fn test_guard_restores_on_early_return() {
        fn failing(decoder: &mut WavDecoder<StreamBuffer>) -> Result<(), SessionError> {
            let mut guard = CursorGuard::new(decoder);
            guard.seek(900)?;
            guard.decode(5)?;
            Err(SessionError::NoRecording)
        }

        let mut decoder = WavDecoder::new(clip_of(1000)).unwrap();
        decoder.seek(123).unwrap();
        assert!(failing(&mut decoder).is_err());
        assert_eq!(decoder.position(), 123);
        assert_eq!(decoder.decode(1).unwrap().unwrap().samples, vec![123]);
    }

    #[test]
    fn test_invalid_header_is_codec_error() {
        let err = WavDecoder::new(StreamBuffer::from_bytes(b"not a wav".to_vec()))
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::Codec(_)));
    }
}
