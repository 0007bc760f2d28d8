use crate::api::binance::ws::ConnectionState;
use crate::engine::alarm::AlarmKind;
use crate::engine::alerts::Direction;
use crate::engine::notify::{Notification, Shell};
use crate::engine::session::MonitorSession;
use crate::error::PriceWatchError;
use chrono::Local;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::info;
use parking_lot::Mutex;
use ratatui::layout::Alignment;
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction as LayoutDirection, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
    Frame, Terminal,
};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

const HISTORY_LEN: usize = 50;

/// A fired alert on screen. Repeats of the same condition collapse into it.
struct PendingAlert {
    notification: Notification,
    repeats: usize,
}

struct ShellState {
    connection: ConnectionState,
    pending: Option<PendingAlert>,
    history: VecDeque<String>,
}

/// The terminal side of the engine's callbacks. Written from the feed task, read by the draw loop.
pub struct DashboardShell {
    state: Mutex<ShellState>,
}

impl DashboardShell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ShellState {
                connection: ConnectionState::Disconnected,
                pending: None,
                history: VecDeque::with_capacity(HISTORY_LEN),
            }),
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.state.lock().connection
    }

    pub fn has_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// The user dismissed the popup.
    pub fn acknowledge(&self) {
        let pending = self.state.lock().pending.take();
        if let Some(pending) = pending {
            pending.notification.acknowledge();
        }
    }
}

impl Default for DashboardShell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell for DashboardShell {
    fn on_alert_fired(&self, notification: Notification) {
        let mut state = self.state.lock();
        state.history.push_front(format!(
            "{} {}",
            Local::now().format("%H:%M:%S"),
            notification.message()
        ));
        state.history.truncate(HISTORY_LEN);

        // Only one popup at a time; the newest alarm already replaced the older one.
        let repeats = state.pending.as_ref().map_or(0, |p| p.repeats + 1);
        state.pending = Some(PendingAlert {
            notification,
            repeats,
        });
    }

    fn on_connection_state_changed(&self, state: ConnectionState) {
        self.state.lock().connection = state;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormField {
    Symbol,
    Price,
}

pub struct Dashboard {
    session: MonitorSession,
    shell: Arc<DashboardShell>,
    symbol_input: String,
    price_input: String,
    direction: Direction,
    focus: FormField,
    status: (String, bool),
    running: bool,
}

impl Dashboard {
    pub fn new(session: MonitorSession, shell: Arc<DashboardShell>) -> Self {
        Self {
            session,
            shell,
            symbol_input: String::new(),
            price_input: String::new(),
            direction: Direction::CrossUp,
            focus: FormField::Symbol,
            status: ("Status: Idle".to_string(), false),
            running: true,
        }
    }

    /// Runs until the user quits, then shuts the session down.
    pub async fn run(mut self) -> Result<(), PriceWatchError> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal).await;
        let restored = restore_terminal(&mut terminal);

        info!("Stopping program");
        self.session.shutdown().await;
        result.and(restored)
    }

    async fn event_loop<B: Backend>(
        &mut self,
        terminal: &mut Terminal<B>,
    ) -> Result<(), PriceWatchError> {
        while self.running {
            terminal.draw(|f| self.render(f))?;

            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key_input(key).await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_key_input(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        if ctrl && key.code == KeyCode::Char('c') {
            self.running = false;
            return;
        }

        // Stop stays reachable while alerts keep firing behind the popup.
        if key.code == KeyCode::F(6) || (ctrl && key.code == KeyCode::Char('x')) {
            self.stop();
            return;
        }

        // The popup is modal, like a message box.
        if self.shell.has_pending() {
            if matches!(key.code, KeyCode::Enter | KeyCode::Esc) {
                self.shell.acknowledge();
            }
            return;
        }

        match key.code {
            KeyCode::Esc => self.running = false,
            KeyCode::F(5) => self.start().await,
            KeyCode::Char('s') if ctrl => self.start().await,
            KeyCode::F(7) => self.clear_alerts(),
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
                self.focus = match self.focus {
                    FormField::Symbol => FormField::Price,
                    FormField::Price => FormField::Symbol,
                };
            }
            KeyCode::Left | KeyCode::Right => self.direction = self.direction.toggle(),
            KeyCode::Enter => self.add_alert(),
            KeyCode::Backspace => {
                self.focused_input().pop();
            }
            KeyCode::Char(c) if !ctrl => self.focused_input().push(c),
            _ => {}
        }
    }

    fn focused_input(&mut self) -> &mut String {
        match self.focus {
            FormField::Symbol => &mut self.symbol_input,
            FormField::Price => &mut self.price_input,
        }
    }

    fn add_alert(&mut self) {
        let added = self.session.add_alert(
            &self.symbol_input,
            &self.price_input,
            self.direction.as_str(),
        );

        self.status = match added {
            Ok(()) => {
                self.price_input.clear();
                let label = self
                    .session
                    .alerts()
                    .last()
                    .map(|a| a.to_string())
                    .unwrap_or_default();
                (format!("Added {}", label), false)
            }
            Err(e) if e.is_capacity() => (format!("Limit Reached: {}", e), true),
            Err(e) => (format!("Input Error: {}", e), true),
        };
    }

    async fn start(&mut self) {
        self.status = match self.session.start_monitoring().await {
            Ok(()) => ("Status: Monitoring...".to_string(), false),
            Err(e) => (e.to_string(), true),
        };
    }

    fn stop(&mut self) {
        self.session.stop_monitoring();
        self.shell.acknowledge();
        self.status = ("Status: Stopped".to_string(), false);
    }

    fn clear_alerts(&mut self) {
        self.status = match self.session.clear_alerts() {
            Ok(()) => ("Alerts cleared".to_string(), false),
            Err(e) => (e.to_string(), true),
        };
    }

    fn render<B: Backend>(&self, f: &mut Frame<B>) {
        let chunks = Layout::default()
            .direction(LayoutDirection::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(5),
                Constraint::Min(5),
                Constraint::Length(8),
                Constraint::Length(4),
            ])
            .split(f.size());

        self.render_header(f, chunks[0]);
        self.render_form(f, chunks[1]);
        self.render_alerts(f, chunks[2]);
        self.render_history(f, chunks[3]);
        self.render_footer(f, chunks[4]);

        let pending = self.shell.state.lock();
        if let Some(pending) = pending.pending.as_ref() {
            Self::render_popup(f, pending);
        }
    }

    fn render_header<B: Backend>(&self, f: &mut Frame<B>, area: Rect) {
        let connection = self.shell.connection();
        let color = match connection {
            ConnectionState::Connected => Color::Green,
            ConnectionState::Connecting => Color::Yellow,
            ConnectionState::Reconnecting => Color::LightRed,
            ConnectionState::Disconnected => Color::Red,
        };

        let mut title = vec![
            Span::styled(
                "PRICEWATCH ",
                Style::default()
                    .fg(Color::LightCyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(connection.label(), Style::default().fg(color)),
        ];
        if let Some(kind) = self.session.alarm_sounding() {
            let label = match kind {
                AlarmKind::PriceAlert => "  ALARM: price alert",
                AlarmKind::ConnectionLoss => "  ALARM: connection lost",
            };
            title.push(Span::styled(
                label,
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            ));
        }

        let header = Paragraph::new(Text::from(vec![
            Line::from(title),
            Line::from(Span::styled(
                format!(
                    "Last update: {} | Alerts: {}",
                    Local::now().format("%H:%M:%S"),
                    self.session.alerts().len()
                ),
                Style::default().fg(Color::Gray),
            )),
        ]))
        .block(Block::default().borders(Borders::BOTTOM));

        f.render_widget(header, area);
    }

    fn render_form<B: Backend>(&self, f: &mut Frame<B>, area: Rect) {
        let field = |label: &'static str, value: &str, focused: bool| {
            let marker = if focused { "> " } else { "  " };
            let style = if focused {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            Line::from(vec![
                Span::styled(format!("{}{:<10}", marker, label), style),
                Span::raw(value.to_string()),
            ])
        };
        let radio = |direction: Direction| {
            if self.direction == direction {
                format!("(*) Cross {}  ", direction.label().to_lowercase())
            } else {
                format!("( ) Cross {}  ", direction.label().to_lowercase())
            }
        };

        let form = Paragraph::new(Text::from(vec![
            field("Symbol", &self.symbol_input, self.focus == FormField::Symbol),
            field("Price", &self.price_input, self.focus == FormField::Price),
            Line::from(vec![
                Span::raw(format!("  {:<10}", "Direction")),
                Span::raw(radio(Direction::CrossUp)),
                Span::raw(radio(Direction::CrossDown)),
            ]),
        ]))
        .block(Block::default().borders(Borders::ALL).title("Add Alert"));

        f.render_widget(form, area);
    }

    fn render_alerts<B: Backend>(&self, f: &mut Frame<B>, area: Rect) {
        let block = Block::default().borders(Borders::ALL).title("Alerts");
        if !self.session.has_alerts() {
            let hint = Paragraph::new("No alerts yet. Fill in the form and press Enter.")
                .style(Style::default().fg(Color::Gray))
                .block(block);
            f.render_widget(hint, area);
            return;
        }

        let items: Vec<ListItem> = self
            .session
            .alerts()
            .iter()
            .enumerate()
            .map(|(i, alert)| {
                let status = if alert.armed {
                    Span::styled("ARMED", Style::default().fg(Color::Green))
                } else {
                    Span::styled("FIRED", Style::default().fg(Color::Yellow))
                };
                ListItem::new(Line::from(vec![
                    Span::raw(format!("{:>2}. {:<32}", i + 1, alert.to_string())),
                    status,
                ]))
            })
            .collect();

        let list = List::new(items).block(block);
        f.render_widget(list, area);
    }

    fn render_history<B: Backend>(&self, f: &mut Frame<B>, area: Rect) {
        let state = self.shell.state.lock();
        let items: Vec<ListItem> = state
            .history
            .iter()
            .map(|line| ListItem::new(line.clone()))
            .collect();

        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title("Fired"));
        f.render_widget(list, area);
    }

    fn render_footer<B: Backend>(&self, f: &mut Frame<B>, area: Rect) {
        let bold = Style::default().add_modifier(Modifier::BOLD);
        let status_style = if self.status.1 {
            Style::default().fg(Color::Red)
        } else {
            Style::default().fg(Color::Gray)
        };

        let footer = Paragraph::new(Text::from(vec![
            Line::from(Span::styled(self.status.0.clone(), status_style)),
            Line::from(vec![
                Span::raw("Controls: "),
                Span::styled("Tab", bold),
                Span::raw(" Field  "),
                Span::styled("←/→", bold),
                Span::raw(" Direction  "),
                Span::styled("Enter", bold),
                Span::raw(" Add  "),
                Span::styled("F5", bold),
                Span::raw(" Start  "),
                Span::styled("F6", bold),
                Span::raw(" Stop  "),
                Span::styled("F7", bold),
                Span::raw(" Clear  "),
                Span::styled("Esc", bold),
                Span::raw(" Quit"),
            ]),
        ]))
        .block(Block::default().borders(Borders::TOP));

        f.render_widget(footer, area);
    }

    fn render_popup<B: Backend>(f: &mut Frame<B>, pending: &PendingAlert) {
        let area = centered_rect(60, 30, f.size());

        let mut lines = vec![
            Line::from(Span::styled(
                pending.notification.message().to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
        ];
        if pending.repeats > 0 {
            lines.push(Line::from(format!("(+{} more while waiting)", pending.repeats)));
        }
        lines.push(Line::from(Span::styled(
            "Press Enter to acknowledge",
            Style::default().fg(Color::Gray),
        )));

        let popup = Paragraph::new(Text::from(lines))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Price Alert")
                    .border_style(Style::default().fg(Color::Red)),
            );

        f.render_widget(Clear, area);
        f.render_widget(popup, area);
    }
}

fn restore_terminal<B: Backend + io::Write>(
    terminal: &mut Terminal<B>,
) -> Result<(), PriceWatchError> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(LayoutDirection::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
