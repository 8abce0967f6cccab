use crate::config::Config;
use crate::controller::SessionController;
use crate::events::UiEvent;
use crate::tui_state::DisplayState;
use crate::types::{Controls, SessionState};
use anyhow::Result;
use crossbeam_channel::Receiver;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Sparkline},
    Frame, Terminal,
};
use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

/// TUIアプリケーション
pub struct TuiApp {
    controller: SessionController,
    events: Receiver<UiEvent>,
    display: DisplayState,
    config: Config,
    running: Arc<AtomicBool>,
}

impl TuiApp {
    pub fn new(
        controller: SessionController,
        events: Receiver<UiEvent>,
        config: Config,
        running: Arc<AtomicBool>,
    ) -> Self {
        let display = DisplayState::new(config.audio.frame_size);
        Self {
            controller,
            events,
            display,
            config,
            running,
        }
    }

    /// TUIを起動
    pub fn run(&mut self) -> Result<()> {
        // ターミナルを初期化
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let refresh = Duration::from_millis(self.config.display.refresh_ms.max(10));
        self.display.set_message("r: 録音  p: 再生  q: 終了");

        // メインループ
        loop {
            self.drain_events();

            // 画面を描画
            terminal.draw(|f| self.draw(f))?;

            if event::poll(refresh)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            self.running.store(false, Ordering::SeqCst);
                            break;
                        }
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            // Ctrl+C で終了
                            self.running.store(false, Ordering::SeqCst);
                            break;
                        }
                        KeyCode::Char('z') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            // Ctrl+Z でプロセスを一時停止
                            disable_raw_mode()?;
                            execute!(io::stdout(), LeaveAlternateScreen)?;

                            #[cfg(unix)]
                            {
                                use nix::sys::signal::{self, Signal};
                                let _ = signal::raise(Signal::SIGTSTP);
                            }

                            // 再開後にターミナルを再初期化
                            enable_raw_mode()?;
                            execute!(io::stdout(), EnterAlternateScreen)?;
                            terminal.clear()?;
                        }
                        code => self.handle_key(code),
                    }
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
        }

        if let Err(e) = self.controller.stop() {
            log::warn!("終了時の停止でエラー: {}", e);
        }

        // ターミナルをリストア
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        Ok(())
    }

    /// オーディオスレッドからの通知をすべて反映
    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.display.apply(&event, self.controller.session());
            if let Err(e) = self.controller.handle_event(&event) {
                self.display.set_error(e.to_string());
            }
        }
        self.display.set_position(self.controller.cursor());
    }

    fn handle_key(&mut self, code: KeyCode) {
        let result = match code {
            KeyCode::Char('r') => self
                .controller
                .start_recording()
                .map(|_| "録音中...".to_string()),
            KeyCode::Char('p') => self
                .controller
                .start_playback()
                .map(|_| "再生中...".to_string()),
            KeyCode::Char('s') => self.controller.stop().map(|_| "停止しました".to_string()),
            KeyCode::Char('+') | KeyCode::Char('=') => self
                .controller
                .increase_volume()
                .map(|s| format!("音量を上げました ({})", format_duration(s.duration))),
            KeyCode::Char('-') => self
                .controller
                .decrease_volume()
                .map(|s| format!("音量を下げました ({})", format_duration(s.duration))),
            KeyCode::Left | KeyCode::Right => {
                let step = self
                    .config
                    .display
                    .seek_step_frames(self.controller.settings().format.sample_rate)
                    as i64;
                let delta = if code == KeyCode::Left { -step } else { step };
                match self.controller.step_cursor(delta) {
                    Ok(position) => {
                        self.display.set_position(position);
                        return;
                    }
                    Err(e) => Err(e),
                }
            }
            KeyCode::Char('w') => self
                .controller
                .save_timestamped(&self.config.output.save_dir)
                .map(|path| format!("保存しました: {}", path.display())),
            _ => return,
        };

        match result {
            Ok(message) => self.display.set_message(message),
            Err(e) => self.display.set_error(e.to_string()),
        }
    }

    /// 画面を描画
    fn draw(&self, f: &mut Frame) {
        let block = Block::default()
            .title(format!("pcm-recorder [{}]", self.controller.state()))
            .borders(Borders::ALL)
            .style(Style::default().fg(Color::White));
        let inner_area = block.inner(f.area());
        f.render_widget(block, f.area());

        // 1. 長さ・カウンタ（1行）
        // 2. 波形（残り）
        // 3. トラックバー（1行）
        // 4. 操作一覧（1行）
        // 5. メッセージ（1行）
        let sections = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(3),
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(inner_area);

        self.draw_summary(f, sections[0]);
        self.draw_waveform(f, sections[1]);
        self.draw_trackbar(f, sections[2]);
        self.draw_controls(f, sections[3]);
        self.draw_status(f, sections[4]);
    }

    /// 録音中はライブカウンタ、それ以外はクリップの長さ
    fn draw_summary(&self, f: &mut Frame, area: Rect) {
        let label = Style::default().fg(Color::Gray);
        let value = Style::default().fg(Color::White).add_modifier(Modifier::BOLD);

        let spans = if self.controller.state() == SessionState::Recording {
            let counters = self.controller.counters();
            vec![
                Span::styled("録音 ", Style::default().fg(Color::Red)),
                Span::styled(format_duration(counters.duration), value),
                Span::styled("  フレーム ", label),
                Span::styled(counters.frames.to_string(), value),
                Span::styled("  サンプル ", label),
                Span::styled(counters.samples.to_string(), value),
                Span::styled("  バッチ ", label),
                Span::styled(counters.batches.to_string(), value),
            ]
        } else if let Some(summary) = self.controller.clip_summary() {
            vec![
                Span::styled("長さ ", label),
                Span::styled(format_duration(summary.duration), value),
                Span::styled("  サンプル ", label),
                Span::styled(summary.samples.to_string(), value),
                Span::styled(
                    format!(
                        "  ({}Hz, {}ch)",
                        summary.format.sample_rate, summary.format.channels
                    ),
                    label,
                ),
            ]
        } else {
            vec![Span::styled("録音データなし", label)]
        };

        f.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_waveform(&self, f: &mut Frame, area: Rect) {
        let block = Block::default().title("波形").borders(Borders::ALL);
        let width = block.inner(area).width as usize;
        let columns = self.display.columns(width);

        let color = match self.controller.state() {
            SessionState::Recording => Color::Red,
            SessionState::Playing => Color::Green,
            _ => Color::DarkGray,
        };

        let sparkline = Sparkline::default()
            .block(block)
            .data(&columns)
            .max(100)
            .style(Style::default().fg(color));
        f.render_widget(sparkline, area);
    }

    fn draw_trackbar(&self, f: &mut Frame, area: Rect) {
        let Some(summary) = self.controller.clip_summary() else {
            f.render_widget(
                Paragraph::new("").style(Style::default().fg(Color::DarkGray)),
                area,
            );
            return;
        };

        let position = self.display.position();
        let ratio = if summary.samples == 0 {
            0.0
        } else {
            (position as f64 / summary.samples as f64).clamp(0.0, 1.0)
        };

        let label = format!(
            "{} / {}",
            format_duration(summary.format.duration_of(position)),
            format_duration(summary.duration)
        );

        let enabled = self.controller.controls().trackbar;
        let gauge = Gauge::default()
            .label(label)
            .gauge_style(Style::default().fg(if enabled {
                Color::Cyan
            } else {
                Color::DarkGray
            }))
            .ratio(ratio);
        f.render_widget(gauge, area);
    }

    fn draw_controls(&self, f: &mut Frame, area: Rect) {
        let controls = self.controller.controls();
        let spans: Vec<Span> = control_labels(&controls)
            .into_iter()
            .flat_map(|(key, enabled)| {
                let style = if enabled {
                    Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::DarkGray)
                };
                [Span::styled(key, style), Span::raw("  ")]
            })
            .collect();

        f.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_status(&self, f: &mut Frame, area: Rect) {
        let Some(status) = self.display.status() else {
            return;
        };
        let color = if status.is_error {
            Color::Red
        } else {
            Color::Green
        };
        let paragraph =
            Paragraph::new(status.text.as_str()).style(Style::default().fg(color));
        f.render_widget(paragraph, area);
    }
}

/// 操作キーと有効/無効
fn control_labels(controls: &Controls) -> Vec<(&'static str, bool)> {
    vec![
        ("[r]録音", controls.record),
        ("[p]再生", controls.play),
        ("[s]停止", controls.stop),
        ("[+/-]音量", controls.volume),
        ("[←/→]シーク", controls.trackbar),
        ("[w]保存", controls.save),
        ("[q]終了", true),
    ]
}

/// `MM:SS.mmm` 形式
fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    format!(
        "{:02}:{:02}.{:03}",
        total_ms / 60_000,
        (total_ms / 1000) % 60,
        total_ms % 1000
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(557)), "00:00.557");
        assert_eq!(format_duration(Duration::from_millis(61_250)), "01:01.250");
    }

    #[test]
    fn test_control_labels_follow_state() {
        let labels = control_labels(&Controls::for_state(SessionState::Recording, true));
        let enabled: Vec<_> = labels.iter().filter(|(_, e)| *e).map(|(k, _)| *k).collect();
        assert_eq!(enabled, vec!["[s]停止", "[q]終了"]);
    }
}
