use crate::audio_input::{CaptureEvent, InputDevice};
use crate::codec::{FrameEncoder, WavEncoder};
use crate::error::SessionError;
use crate::events::{EventKind, EventSender};
use crate::stream_buffer::StreamBuffer;
use crate::types::{CaptureSettings, Counters, FrameBatch};
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 録音中に更新される累積カウンタ
///
/// ワーカースレッドが書き込み、UIスレッドが読む。
#[derive(Debug, Default)]
pub struct LiveCounters {
    duration_ns: AtomicU64,
    frames: AtomicU64,
    samples: AtomicU64,
    batches: AtomicU64,
}

impl LiveCounters {
    /// バッチ1つ分を加算
    pub fn add(&self, batch: &FrameBatch) {
        let duration_ns = batch.duration().as_nanos() as u64;
        self.duration_ns.fetch_add(duration_ns, Ordering::SeqCst);
        self.frames.fetch_add(batch.frames() as u64, Ordering::SeqCst);
        self.samples
            .fetch_add(batch.sample_count() as u64, Ordering::SeqCst);
        self.batches.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Counters {
        Counters {
            duration: Duration::from_nanos(self.duration_ns.load(Ordering::SeqCst)),
            frames: self.frames.load(Ordering::SeqCst),
            samples: self.samples.load(Ordering::SeqCst),
            batches: self.batches.load(Ordering::SeqCst),
        }
    }

    pub fn reset(&self) {
        self.duration_ns.store(0, Ordering::SeqCst);
        self.frames.store(0, Ordering::SeqCst);
        self.samples.store(0, Ordering::SeqCst);
        self.batches.store(0, Ordering::SeqCst);
    }
}

/// 録音停止時の結果
#[derive(Debug)]
pub struct CaptureOutcome {
    /// 録音されたクリップ（エラー時はエラー直前までの内容）
    pub clip: StreamBuffer,
    pub counters: Counters,
    /// セッションを打ち切ったエラー（デバイス・コーデック）
    pub fault: Option<SessionError>,
}

/// 録音セッション
///
/// デバイスコールバックが積んだフレームをワーカースレッドが到着順に
/// 表示更新・エンコード・カウンタ加算する。
pub struct CaptureSession {
    counters: Arc<LiveCounters>,
    worker: Option<JoinHandle<(StreamBuffer, Option<SessionError>)>>,
}

impl CaptureSession {
    /// 録音を開始
    pub fn start(
        input: &mut dyn InputDevice,
        settings: CaptureSettings,
        counters: Arc<LiveCounters>,
        events: EventSender,
    ) -> Result<Self, SessionError> {
        counters.reset();

        let (tx, rx) = crossbeam_channel::unbounded();
        let worker_counters = counters.clone();
        let worker = thread::Builder::new()
            .name("capture-encoder".to_string())
            .spawn(move || {
                let mut clip = StreamBuffer::new();
                let fault = encode_stream(rx, &mut clip, settings, &worker_counters, &events);
                (clip, fault)
            })?;

        // 開始に失敗した場合は送信側が破棄されるのでワーカーもすぐ終わる
        if let Err(e) = input.start(settings, tx) {
            let _ = worker.join();
            counters.reset();
            return Err(e);
        }

        log::info!(
            "録音を開始しました: {}Hz, {}ch, {}フレーム/バッチ",
            settings.format.sample_rate,
            settings.format.channels,
            settings.frame_size
        );

        Ok(Self {
            counters,
            worker: Some(worker),
        })
    }

    /// 録音を停止（停止済みなら `Ok(None)`）
    ///
    /// デバイスの停止完了を待ってから、残りのフレームをエンコードし終えるまで待つ。
    /// 累積カウンタはゼロに戻り、最終値は結果に含まれる。
    /// セッション中のエラーは `fault` に入り、クリップは常に返される。
    pub fn stop(
        &mut self,
        input: &mut dyn InputDevice,
    ) -> Result<Option<CaptureOutcome>, SessionError> {
        let Some(worker) = self.worker.take() else {
            return Ok(None);
        };

        // デバイスが止まると送信側が破棄され、ワーカーのループが終わる
        let device_result = input.stop();

        let (clip, fault) = worker
            .join()
            .map_err(|_| SessionError::WorkerPanicked("capture-encoder"))?;
        let fault = fault.or(device_result.err());

        let counters = self.counters.snapshot();
        self.counters.reset();

        log::info!(
            "録音を停止しました: {}フレーム, {}バッチ ({:.2}秒)",
            counters.frames,
            counters.batches,
            counters.duration.as_secs_f64()
        );

        Ok(Some(CaptureOutcome {
            clip,
            counters,
            fault,
        }))
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }
}

/// 受信したフレームをエンコードし続ける
///
/// デバイスエラーまたはエンコード失敗の時点で打ち切り、UIに通知したうえで
/// そこまでの内容でヘッダを確定する。打ち切った原因を返す。
fn encode_stream(
    rx: Receiver<CaptureEvent>,
    clip: &mut StreamBuffer,
    settings: CaptureSettings,
    counters: &LiveCounters,
    events: &EventSender,
) -> Option<SessionError> {
    let mut encoder = match WavEncoder::new(clip, settings.format) {
        Ok(encoder) => encoder,
        Err(e) => return Some(report_fault(events, e)),
    };
    let mut fault = None;

    for event in rx.iter() {
        match event {
            CaptureEvent::Frame(batch) => {
                events.waveform(batch.to_float());
                if let Err(e) = encoder.encode(&batch) {
                    fault = Some(report_fault(events, e));
                    break;
                }
                counters.add(&batch);
            }
            CaptureEvent::Error(description) => {
                fault = Some(report_fault(events, SessionError::DeviceFault(description)));
                break;
            }
        }
    }

    if let Err(e) = encoder.finish() {
        if fault.is_none() {
            fault = Some(report_fault(events, e));
        } else {
            log::error!("WAVヘッダの確定に失敗: {}", e);
        }
    }
    fault
}

fn report_fault(events: &EventSender, fault: SessionError) -> SessionError {
    log::error!("録音を中断しました: {}", fault);
    events.send(EventKind::Fault(fault.to_string()));
    fault
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FrameDecoder, WavDecoder};
    use crate::events;
    use crate::mock_device::MockInput;
    use crate::types::AudioFormat;

    fn settings() -> CaptureSettings {
        CaptureSettings {
            format: AudioFormat {
                sample_rate: 22050,
                channels: 1,
            },
            frame_size: 4096,
        }
    }

    fn decode(clip: &StreamBuffer) -> Vec<i16> {
        let mut reader = clip.clone();
        reader.rewind();
        let mut decoder = WavDecoder::new(reader).unwrap();
        decoder
            .decode_all()
            .unwrap()
            .map(|b| b.samples)
            .unwrap_or_default()
    }

    #[test]
    fn test_three_batches_at_22050() {
        let settings = settings();
        let mut input = MockInput::with_batches(3, 4096, settings.format);
        let (sender, _rx) = events::channel();
        let counters = Arc::new(LiveCounters::default());

        let mut session =
            CaptureSession::start(&mut input, settings, counters.clone(), sender.for_session(1))
                .unwrap();
        let outcome = session.stop(&mut input).unwrap().unwrap();

        assert!(outcome.fault.is_none());
        assert_eq!(outcome.counters.batches, 3);
        assert_eq!(outcome.counters.frames, 12288);
        assert_eq!(outcome.counters.samples, 12288);

        let expected = 3.0 * 4096.0 / 22050.0;
        assert!((outcome.counters.duration.as_secs_f64() - expected).abs() < 1e-6);

        assert_eq!(decode(&outcome.clip).len(), 12288);

        // 停止後はゼロに戻る
        assert_eq!(counters.snapshot(), Counters::default());
    }

    #[test]
    fn test_frames_decode_in_arrival_order() {
        let format = settings().format;
        let mut input = MockInput::with_batches(5, 64, format);
        let (sender, _rx) = events::channel();
        let mut session = CaptureSession::start(
            &mut input,
            CaptureSettings {
                format,
                frame_size: 64,
            },
            Arc::new(LiveCounters::default()),
            sender.for_session(1),
        )
        .unwrap();
        let outcome = session.stop(&mut input).unwrap().unwrap();

        let expected: Vec<i16> = (0..5)
            .flat_map(|n| (0..64).map(move |i| (n * 100 + i % 100) as i16))
            .collect();
        assert_eq!(decode(&outcome.clip), expected);
    }

    #[test]
    fn test_each_frame_updates_waveform() {
        let format = settings().format;
        let mut input = MockInput::with_batches(2, 32, format);
        let (sender, rx) = events::channel();
        let mut session = CaptureSession::start(
            &mut input,
            CaptureSettings {
                format,
                frame_size: 32,
            },
            Arc::new(LiveCounters::default()),
            sender.for_session(9),
        )
        .unwrap();
        session.stop(&mut input).unwrap();

        let waveforms: Vec<_> = rx
            .try_iter()
            .filter(|e| matches!(e.kind, EventKind::Waveform(_)))
            .collect();
        assert_eq!(waveforms.len(), 2);
        assert!(waveforms.iter().all(|e| e.session == 9));
    }

    #[test]
    fn test_device_error_keeps_consistent_clip() {
        let format = settings().format;
        let batch = |v: i16| CaptureEvent::Frame(FrameBatch::new(vec![v; 16], format));
        let mut input = MockInput::new(vec![
            batch(1),
            batch(2),
            CaptureEvent::Error("device unplugged".to_string()),
            batch(3),
        ]);
        let (sender, rx) = events::channel();
        let mut session = CaptureSession::start(
            &mut input,
            CaptureSettings {
                format,
                frame_size: 16,
            },
            Arc::new(LiveCounters::default()),
            sender.for_session(1),
        )
        .unwrap();
        let outcome = session.stop(&mut input).unwrap().unwrap();

        assert!(matches!(
            outcome.fault,
            Some(SessionError::DeviceFault(ref m)) if m == "device unplugged"
        ));
        assert_eq!(outcome.counters.batches, 2);

        let samples = decode(&outcome.clip);
        assert_eq!(samples.len(), 32);
        assert!(samples.iter().all(|&s| s == 1 || s == 2));

        assert!(rx
            .try_iter()
            .any(|e| matches!(e.kind, EventKind::Fault(ref m) if m.contains("device unplugged"))));
    }

    #[test]
    fn test_encode_failure_is_reported_and_keeps_clip() {
        let mono = settings().format;
        let stereo = AudioFormat {
            sample_rate: 22050,
            channels: 2,
        };
        let mut input = MockInput::new(vec![
            CaptureEvent::Frame(FrameBatch::new(vec![1; 16], mono)),
            CaptureEvent::Frame(FrameBatch::new(vec![2; 16], stereo)),
            CaptureEvent::Frame(FrameBatch::new(vec![3; 16], mono)),
        ]);
        let (sender, rx) = events::channel();
        let mut session = CaptureSession::start(
            &mut input,
            CaptureSettings {
                format: mono,
                frame_size: 16,
            },
            Arc::new(LiveCounters::default()),
            sender.for_session(1),
        )
        .unwrap();
        let outcome = session.stop(&mut input).unwrap().unwrap();

        assert!(matches!(
            outcome.fault,
            Some(SessionError::FormatMismatch { .. })
        ));
        assert_eq!(outcome.counters.batches, 1);
        assert_eq!(decode(&outcome.clip), vec![1; 16]);

        let faults = rx
            .try_iter()
            .filter(|e| matches!(e.kind, EventKind::Fault(_)))
            .count();
        assert_eq!(faults, 1);
    }

    #[test]
    fn test_stop_twice_is_noop() {
        let mut input = MockInput::with_batches(1, 8, settings().format);
        let (sender, _rx) = events::channel();
        let mut session = CaptureSession::start(
            &mut input,
            settings(),
            Arc::new(LiveCounters::default()),
            sender.for_session(1),
        )
        .unwrap();

        assert!(session.stop(&mut input).unwrap().is_some());
        assert!(session.stop(&mut input).unwrap().is_none());
        assert!(!session.is_active());
    }

    #[test]
    fn test_stop_without_frames() {
        let mut input = MockInput::new(Vec::new());
        let (sender, _rx) = events::channel();
        let mut session = CaptureSession::start(
            &mut input,
            settings(),
            Arc::new(LiveCounters::default()),
            sender.for_session(1),
        )
        .unwrap();

        let outcome = session.stop(&mut input).unwrap().unwrap();
        assert_eq!(outcome.counters, Counters::default());
        assert!(decode(&outcome.clip).is_empty());
    }

    #[test]
    fn test_start_failure_is_reported() {
        let mut input = MockInput::failing();
        let (sender, _rx) = events::channel();
        let result = CaptureSession::start(
            &mut input,
            settings(),
            Arc::new(LiveCounters::default()),
            sender.for_session(1),
        );
        assert!(matches!(result, Err(SessionError::DeviceFault(_))));
    }
}
