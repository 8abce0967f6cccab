//! テスト用の入出力デバイス
//!
//! 実デバイスと同じく別スレッドからイベントを送り、`stop()` でスレッドの終了を待つ。

use crate::audio_input::{CaptureEvent, InputDevice};
use crate::audio_output::OutputDevice;
use crate::error::SessionError;
use crate::playback::{FrameFeeder, FrameRequest};
use crate::types::{AudioFormat, CaptureSettings, FrameBatch};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 台本どおりのイベントを送る入力デバイス
pub struct MockInput {
    script: Vec<CaptureEvent>,
    fail_start: bool,
    stop_flag: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    pub settings: Option<CaptureSettings>,
}

impl MockInput {
    pub fn new(script: Vec<CaptureEvent>) -> Self {
        Self {
            script,
            fail_start: false,
            stop_flag: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            settings: None,
        }
    }

    /// 送信スレッドが動作中か（`stop()` でスレッドを join し終えると false）
    ///
    /// デバイスを `Box` に渡した後も観察できるよう共有フラグを返す。
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// `count` 個のバッチを送る。バッチ `n` のサンプル値は `n` から始まる連番
    pub fn with_batches(count: usize, frame_size: usize, format: AudioFormat) -> Self {
        let script = (0..count)
            .map(|n| {
                let samples = (0..frame_size * format.channels as usize)
                    .map(|i| (n * 100 + i % 100) as i16)
                    .collect();
                CaptureEvent::Frame(FrameBatch::new(samples, format))
            })
            .collect();
        Self::new(script)
    }

    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::new(Vec::new())
        }
    }
}

impl InputDevice for MockInput {
    fn start(
        &mut self,
        settings: CaptureSettings,
        sink: Sender<CaptureEvent>,
    ) -> Result<(), SessionError> {
        if self.fail_start {
            return Err(SessionError::DeviceFault("mock input unavailable".to_string()));
        }

        self.settings = Some(settings);
        self.stop_flag.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let script = self.script.clone();
        let stop_flag = self.stop_flag.clone();
        self.worker = Some(thread::spawn(move || {
            for event in script {
                if sink.send(event).is_err() {
                    break;
                }
            }
            while !stop_flag.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
        }));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.stop_flag.store(true, Ordering::SeqCst);
        worker
            .join()
            .map_err(|_| SessionError::WorkerPanicked("mock input"))?;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

/// 一定フレーム数ずつ要求し続ける出力デバイス
pub struct MockOutput {
    period: usize,
    format: Option<AudioFormat>,
    stop_flag: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    played: Arc<Mutex<Vec<i16>>>,
    requested: Arc<Mutex<Vec<u64>>>,
}

impl MockOutput {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            format: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            done: Arc::new(AtomicBool::new(true)),
            worker: None,
            played: Arc::new(Mutex::new(Vec::new())),
            requested: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    pub fn played(&self) -> Vec<i16> {
        self.played.lock().unwrap().clone()
    }

    /// 各要求の開始フレーム位置
    pub fn requested_indices(&self) -> Vec<u64> {
        self.requested.lock().unwrap().clone()
    }

    /// 要求ループが終わるまで待つ
    pub fn wait_idle(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while !self.done.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "mock output did not finish");
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl OutputDevice for MockOutput {
    fn open(&mut self, format: AudioFormat) -> Result<(), SessionError> {
        self.format = Some(format);
        Ok(())
    }

    fn play(&mut self, feeder: FrameFeeder) -> Result<(), SessionError> {
        let channels = feeder.channels();
        let period = self.period;
        let stop_flag = self.stop_flag.clone();
        let done = self.done.clone();
        let played = self.played.clone();
        let requested = self.requested.clone();

        self.played.lock().unwrap().clear();
        self.requested.lock().unwrap().clear();
        stop_flag.store(false, Ordering::SeqCst);
        done.store(false, Ordering::SeqCst);

        self.worker = Some(thread::spawn(move || {
            let mut buffer = vec![0i16; period * channels];
            while !stop_flag.load(Ordering::SeqCst) {
                match feeder.request(&mut buffer) {
                    FrameRequest::Produced {
                        frame_index,
                        frames,
                    } => {
                        requested.lock().unwrap().push(frame_index);
                        played
                            .lock()
                            .unwrap()
                            .extend_from_slice(&buffer[..frames * channels]);
                        feeder.batch_started(frame_index, frames);
                    }
                    FrameRequest::Stop => break,
                }
            }
            done.store(true, Ordering::SeqCst);
        }));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.stop_flag.store(true, Ordering::SeqCst);
        worker
            .join()
            .map_err(|_| SessionError::WorkerPanicked("mock output"))
    }

    fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}
