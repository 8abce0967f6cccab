use crate::events::{EventKind, SessionId, UiEvent};

/// ステータス行のメッセージ
#[derive(Clone, Debug, PartialEq)]
pub struct StatusMessage {
    pub text: String,
    pub is_error: bool,
}

/// 画面表示用の状態
///
/// UIスレッドだけが持ち、オーディオスレッドからの [`UiEvent`] を反映する。
#[derive(Clone, Debug)]
pub struct DisplayState {
    /// 波形表示バッファ（-1.0 ~ 1.0、長さはフレームサイズ固定）
    waveform: Vec<f32>,
    /// 再生中のフレーム位置
    position: u64,
    status: Option<StatusMessage>,
}

impl DisplayState {
    pub fn new(frame_size: usize) -> Self {
        Self {
            waveform: vec![0.0; frame_size.max(1)],
            position: 0,
            status: None,
        }
    }

    /// イベントを反映（`session` 以外からのイベントは無視）
    ///
    /// 反映した場合は true を返す。
    pub fn apply(&mut self, event: &UiEvent, session: SessionId) -> bool {
        if event.session != session {
            return false;
        }

        match &event.kind {
            EventKind::Waveform(samples) => self.update_waveform(samples),
            EventKind::Cleared => self.clear_waveform(),
            EventKind::Position(frame) => self.position = *frame,
            EventKind::Finished => self.set_message("再生が終了しました"),
            EventKind::Fault(message) => self.set_error(message.as_str()),
        }
        true
    }

    /// 波形バッファを差し替え（足りない分は無音）
    pub fn update_waveform(&mut self, samples: &[f32]) {
        let n = samples.len().min(self.waveform.len());
        self.waveform[..n].copy_from_slice(&samples[..n]);
        self.waveform[n..].fill(0.0);
    }

    pub fn clear_waveform(&mut self) {
        self.waveform.fill(0.0);
    }

    pub fn waveform(&self) -> &[f32] {
        &self.waveform
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    pub fn set_message(&mut self, text: impl Into<String>) {
        self.status = Some(StatusMessage {
            text: text.into(),
            is_error: false,
        });
    }

    pub fn set_error(&mut self, text: impl Into<String>) {
        self.status = Some(StatusMessage {
            text: text.into(),
            is_error: true,
        });
    }

    pub fn status(&self) -> Option<&StatusMessage> {
        self.status.as_ref()
    }

    /// 波形を `width` 列に縮約した振幅（0 ~ 100、列ごとのピーク）
    pub fn columns(&self, width: usize) -> Vec<u64> {
        if width == 0 {
            return Vec::new();
        }

        let len = self.waveform.len();
        (0..width)
            .map(|col| {
                let start = col * len / width;
                let end = ((col + 1) * len / width).max(start + 1).min(len);
                let peak = self.waveform[start.min(len - 1)..end]
                    .iter()
                    .fold(0.0f32, |acc, s| acc.max(s.abs()));
                (peak.min(1.0) * 100.0).round() as u64
            })
            .collect()
    }

    /// 現在のピーク振幅（0.0 ~ 1.0）
    pub fn peak(&self) -> f32 {
        self.waveform
            .iter()
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
            .min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(session: SessionId, kind: EventKind) -> UiEvent {
        UiEvent { session, kind }
    }

    #[test]
    fn test_waveform_is_padded_with_silence() {
        let mut state = DisplayState::new(8);
        state.update_waveform(&[0.5; 8]);
        state.update_waveform(&[0.25, -0.25]);
        assert_eq!(state.waveform(), &[0.25, -0.25, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        state.update_waveform(&[0.1; 20]);
        assert_eq!(state.waveform().len(), 8);
    }

    #[test]
    fn test_cleared_zeroes_buffer() {
        let mut state = DisplayState::new(4);
        state.apply(&event(1, EventKind::Waveform(vec![0.9; 4])), 1);
        assert!(state.peak() > 0.8);

        state.apply(&event(1, EventKind::Cleared), 1);
        assert_eq!(state.peak(), 0.0);
    }

    #[test]
    fn test_other_session_is_ignored() {
        let mut state = DisplayState::new(4);
        assert!(!state.apply(&event(2, EventKind::Position(100)), 3));
        assert_eq!(state.position(), 0);

        assert!(state.apply(&event(3, EventKind::Position(100)), 3));
        assert_eq!(state.position(), 100);
    }

    #[test]
    fn test_fault_sets_error_status() {
        let mut state = DisplayState::new(4);
        state.apply(&event(1, EventKind::Fault("lost".to_string())), 1);
        let status = state.status().unwrap();
        assert!(status.is_error);
        assert!(status.text.contains("lost"));
    }

    #[test]
    fn test_columns_take_peak() {
        let mut state = DisplayState::new(8);
        state.update_waveform(&[0.1, -0.5, 0.0, 0.0, 0.2, 0.2, -1.0, 0.3]);
        assert_eq!(state.columns(4), vec![50, 0, 20, 100]);
        assert_eq!(state.columns(0), Vec::<u64>::new());
    }

    #[test]
    fn test_columns_wider_than_buffer() {
        let mut state = DisplayState::new(2);
        state.update_waveform(&[0.5, 0.0]);
        let cols = state.columns(4);
        assert_eq!(cols.len(), 4);
        assert_eq!(cols[0], 50);
        assert_eq!(cols[3], 0);
    }
}
