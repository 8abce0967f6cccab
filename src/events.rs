use crossbeam_channel::{Receiver, Sender};

/// セッション識別子
///
/// セッション開始ごとに採番し、古いセッションからのイベントを区別する。
pub type SessionId = u64;

/// オーディオスレッドからUIループへの通知内容
#[derive(Clone, Debug, PartialEq)]
pub enum EventKind {
    /// 波形表示バッファの更新（-1.0 ~ 1.0）
    Waveform(Vec<f32>),
    /// 波形表示を無音に戻す
    Cleared,
    /// 再生中のフレーム位置（トラックバー）
    Position(u64),
    /// 再生がストリーム終端に達した
    Finished,
    /// デバイスエラー
    Fault(String),
}

/// UIイベント
#[derive(Clone, Debug, PartialEq)]
pub struct UiEvent {
    pub session: SessionId,
    pub kind: EventKind,
}

/// UIイベントの送信側
///
/// 非UIスレッド（デバイスコールバック、ワーカースレッド）から使う。
/// 送信はブロックしないので、オーディオコールバックを止めることはない。
#[derive(Clone, Debug)]
pub struct EventSender {
    session: SessionId,
    tx: Sender<UiEvent>,
}

impl EventSender {
    /// 指定セッション用の送信側を作る
    pub fn for_session(&self, session: SessionId) -> Self {
        Self {
            session,
            tx: self.tx.clone(),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn send(&self, kind: EventKind) {
        let event = UiEvent {
            session: self.session,
            kind,
        };
        // 受信側（UI）が終了している場合は破棄する
        if self.tx.send(event).is_err() {
            log::debug!("UIイベントの受信側がクローズ済み");
        }
    }

    pub fn waveform(&self, samples: Vec<f32>) {
        self.send(EventKind::Waveform(samples));
    }

    pub fn cleared(&self) {
        self.send(EventKind::Cleared);
    }
}

/// UIイベントチャンネルを作成
pub fn channel() -> (EventSender, Receiver<UiEvent>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (EventSender { session: 0, tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_tagged_with_session() {
        let (sender, rx) = channel();
        let session = sender.for_session(7);
        session.cleared();
        session.send(EventKind::Position(42));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.session, 7);
        assert_eq!(first.kind, EventKind::Cleared);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Position(42));
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (sender, rx) = channel();
        drop(rx);
        sender.send(EventKind::Finished);
    }
}
