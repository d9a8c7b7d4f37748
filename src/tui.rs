use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::{ProgressEvent, ProgressSink, ProgressSinkKind, fmt_elapsed};
use crate::error::PrepError;

const EVENTS_MAX: usize = 8;
const LOGS_MAX: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Resolve,
    Fetch,
    Convert,
    Mosaic,
    Project,
    Store,
}

impl Phase {
    const ALL: [Phase; 6] = [
        Phase::Resolve,
        Phase::Fetch,
        Phase::Convert,
        Phase::Mosaic,
        Phase::Project,
        Phase::Store,
    ];

    fn label(self) -> &'static str {
        match self {
            Phase::Resolve => "Resolve",
            Phase::Fetch => "Fetch",
            Phase::Convert => "Convert",
            Phase::Mosaic => "Mosaic",
            Phase::Project => "Project",
            Phase::Store => "Store",
        }
    }
}

#[derive(Debug)]
struct ProgressState {
    status: String,
    phase: Phase,
    retries: u32,
    completed: u32,
    last_step: Option<Duration>,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    started: Instant,
    active: bool,
}

pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<ProgressState>>,
    log_scroll: u16,
}

struct TuiProgress {
    state: Arc<Mutex<ProgressState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            match parse_phase(&message) {
                Some((phase, payload)) => {
                    state.phase = phase;
                    state.status = payload.to_string();
                }
                None => state.status = message.clone(),
            }
            if message.contains("retry in") {
                state.retries = state.retries.saturating_add(1);
            }
            if let Some(elapsed) = event.elapsed {
                state.completed = state.completed.saturating_add(1);
                state.last_step = Some(elapsed);
            }

            push_bounded(&mut state.events, message.clone(), EVENTS_MAX);
            push_bounded(
                &mut state.logs,
                format!("[{}] {message}", timestamp()),
                LOGS_MAX,
            );
        }
    }
}

/// `tracing` writer that appends formatted lines to the on-screen log, so
/// diagnostics do not land on the alternate screen.
#[derive(Clone)]
pub struct TuiLogWriter {
    state: Arc<Mutex<ProgressState>>,
}

impl io::Write for TuiLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut state) = self.state.lock() {
            for line in String::from_utf8_lossy(buf).lines() {
                let line = line.trim();
                if !line.is_empty() {
                    push_bounded(
                        &mut state.logs,
                        format!("[{}] {line}", timestamp()),
                        LOGS_MAX,
                    );
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(ProgressState {
                status: "starting".to_string(),
                phase: Phase::Resolve,
                retries: 0,
                completed: 0,
                last_step: None,
                events: VecDeque::new(),
                logs: VecDeque::new(),
                started: Instant::now(),
                active: false,
            })),
            log_scroll: 0,
        }
    }

    pub fn log_writer(&self) -> TuiLogWriter {
        TuiLogWriter {
            state: self.state.clone(),
        }
    }

    /// Runs `f` on a worker thread while drawing its progress. `q` or Ctrl-C
    /// leaves the view; the worker is not interrupted.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, PrepError> + Send + 'static,
        R: Send + 'static,
    {
        self.set_active(true);

        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        loop {
            if let Ok(state) = self.state.lock() {
                let elapsed = state.started.elapsed();
                terminal
                    .draw(|frame| draw_ui(frame, self.kind, &state, self.log_scroll, tick, elapsed))
                    .into_diagnostic()?;
            }

            if let Some(result) = poll_worker(&rx) {
                self.set_active(false);
                restore_terminal()?;
                handle.join().ok();
                return result;
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()?
                && let Event::Key(key) = event::read().into_diagnostic()?
                && self.handle_key(key)
            {
                break;
            }

            tick = tick.wrapping_add(1);
        }

        self.set_active(false);
        restore_terminal()?;
        Err(miette::Report::msg("aborted"))
    }

    /// Returns true when the operator asked to leave.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => true,
            KeyCode::Up => {
                self.log_scroll = self.log_scroll.saturating_add(1);
                false
            }
            KeyCode::Down => {
                self.log_scroll = self.log_scroll.saturating_sub(1);
                false
            }
            _ => false,
        }
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            if active {
                state.started = Instant::now();
            }
        }
    }
}

/// `None` while the worker is still running. A worker that went away without
/// sending (it panicked) is reported as an error.
fn poll_worker<R>(rx: &Receiver<Result<R, PrepError>>) -> Option<miette::Result<R>> {
    match rx.try_recv() {
        Ok(result) => Some(result.map_err(miette::Report::new)),
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Disconnected) => Some(Err(miette::Report::msg(
            "worker stopped without a result; see the log for details",
        ))),
    }
}

fn restore_terminal() -> miette::Result<()> {
    disable_raw_mode().into_diagnostic()?;
    let mut stdout = io::stdout();
    stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
    Ok(())
}

fn draw_ui(
    frame: &mut ratatui::Frame,
    kind: ProgressSinkKind,
    state: &ProgressState,
    log_scroll: u16,
    tick: usize,
    elapsed: Duration,
) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(9),
            Constraint::Min(4),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(kind, tick), rows[0]);
    frame.render_widget(draw_status_panel(state, elapsed), rows[1]);
    frame.render_widget(draw_logs(state, rows[2].height, log_scroll), rows[2]);
}

fn draw_header(kind: ProgressSinkKind, tick: usize) -> Paragraph<'static> {
    let hb = if tick % 2 == 0 { "*" } else { " " };
    let op_label = match kind {
        ProgressSinkKind::Acquire => "Acquire",
        ProgressSinkKind::Prepare => "Prepare",
        ProgressSinkKind::Run => "Run",
    };
    let line = Line::from(vec![
        Span::styled(
            "MPAT-PREP",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(op_label, Style::default().fg(Color::Cyan)),
        Span::raw("   q: leave  ↑/↓: scroll   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    Paragraph::new(vec![line])
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_status_panel(state: &ProgressState, elapsed: Duration) -> Paragraph<'static> {
    let phase_color = if state.active {
        Color::Cyan
    } else {
        Color::Green
    };
    let mut phases = Vec::new();
    for phase in Phase::ALL {
        let style = if phase == state.phase {
            Style::default().fg(phase_color).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        phases.push(Span::styled(format!("{} ", phase.label()), style));
    }

    let last_step = state
        .last_step
        .map(fmt_elapsed)
        .unwrap_or_else(|| "--".to_string());
    let mut lines = vec![
        Line::from(phases),
        Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
        Line::from(vec![
            Span::styled("Elapsed: ", Style::default().fg(Color::Gray)),
            Span::raw(fmt_elapsed(elapsed)),
            Span::styled("   Steps done: ", Style::default().fg(Color::Gray)),
            Span::raw(state.completed.to_string()),
            Span::styled("   Last step: ", Style::default().fg(Color::Gray)),
            Span::raw(last_step),
            Span::styled("   Retries: ", Style::default().fg(Color::Gray)),
            Span::styled(
                state.retries.to_string(),
                Style::default().fg(if state.retries > 0 {
                    Color::Yellow
                } else {
                    Color::Gray
                }),
            ),
        ]),
        Line::from(Span::styled(
            "Recent events:",
            Style::default().fg(Color::Gray),
        )),
    ];
    for event in state.events.iter().rev().take(4) {
        lines.push(Line::from(format!("- {event}")));
    }

    Paragraph::new(lines)
        .block(Block::default().borders(Borders::BOTTOM))
        .wrap(Wrap { trim: true })
}

fn draw_logs(state: &ProgressState, height: u16, scroll: u16) -> Paragraph<'static> {
    let visible = usize::from(height.saturating_sub(1)).max(1);
    let skip_tail = usize::from(scroll).min(state.logs.len().saturating_sub(visible));
    let end = state.logs.len() - skip_tail;
    let start = end.saturating_sub(visible);
    let lines: Vec<Line> = state
        .logs
        .iter()
        .skip(start)
        .take(end - start)
        .map(|line| Line::from(line.clone()))
        .collect();
    Paragraph::new(lines).block(Block::default().title("Log"))
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (label, payload) = rest.split_once(';')?;
    let phase = Phase::ALL
        .into_iter()
        .find(|phase| phase.label() == label.trim())?;
    Some((phase, payload.trim()))
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    Local::now().format("%-I:%M:%S %p").to_string()
}
