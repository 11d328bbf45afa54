//! Terminal dashboard for live agent activity.
//!
//! Renders the latest [`ActivitySnapshot`] on a 250ms tick: processing agents
//! bright, fading agents dimmed, plus a channel strip and per-agent skill/KB
//! columns. Press `q` (or Esc/Ctrl+C) to quit.

use std::io;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};
use tokio::sync::watch;
use vigil_types::{ActivitySnapshot, AgentId, ConnectionState};

const TICK_RATE: Duration = Duration::from_millis(250);

/// How an agent row should be styled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowState {
    /// Actively processing: steady glow.
    Glowing,
    /// Session ending: coordinated fade-out.
    Fading,
    /// Visible only through usage metadata (orphan session).
    Seen,
}

/// Runs the dashboard until the user quits.
pub fn run(snapshots: watch::Receiver<ActivitySnapshot>) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &snapshots);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    snapshots: &watch::Receiver<ActivitySnapshot>,
) -> Result<()> {
    loop {
        let snapshot = snapshots.borrow().clone();
        terminal.draw(|frame| draw(frame, &snapshot))?;

        if event::poll(TICK_RATE)?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            let quit = matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                || (key.code == KeyCode::Char('c')
                    && key.modifiers.contains(KeyModifiers::CONTROL));
            if quit {
                return Ok(());
            }
        }
    }
}

fn draw(frame: &mut ratatui::Frame, snapshot: &ActivitySnapshot) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(3), // Channels
            Constraint::Min(5),    // Agents
            Constraint::Length(1), // Footer
        ])
        .split(frame.area());

    render_header(frame, chunks[0], snapshot);
    render_channels(frame, chunks[1], snapshot);
    render_agents(frame, chunks[2], snapshot);
    render_footer(frame, chunks[3]);
}

fn connection_style(state: ConnectionState) -> (Style, &'static str) {
    match state {
        ConnectionState::Connected => (Style::default().fg(Color::Green), "● connected"),
        ConnectionState::Connecting => (Style::default().fg(Color::Yellow), "◌ connecting"),
        ConnectionState::Authenticating => {
            (Style::default().fg(Color::Yellow), "◌ authenticating")
        }
        ConnectionState::Error => (Style::default().fg(Color::Red), "✗ error"),
        ConnectionState::Disconnected => (Style::default().fg(Color::DarkGray), "○ disconnected"),
    }
}

fn render_header(frame: &mut ratatui::Frame, area: Rect, snapshot: &ActivitySnapshot) {
    let (style, label) = connection_style(snapshot.connection);
    let mut spans = vec![Span::styled(label, style.add_modifier(Modifier::BOLD))];
    if let Some(tenant) = &snapshot.tenant {
        spans.push(Span::raw("  |  tenant: "));
        spans.push(Span::styled(tenant.clone(), Style::default().fg(Color::Cyan)));
    }
    spans.push(Span::raw(format!(
        "  |  {} active, {} fading",
        snapshot.processing.len(),
        snapshot.ending_agents.len()
    )));

    let header = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title("vigil"));
    frame.render_widget(header, area);
}

fn render_channels(frame: &mut ratatui::Frame, area: Rect, snapshot: &ActivitySnapshot) {
    let mut spans = Vec::new();
    for channel in &snapshot.active_channels {
        spans.push(Span::styled(
            format!(" {channel} "),
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        ));
    }
    for channel in &snapshot.ending_channels {
        spans.push(Span::styled(
            format!(" {channel} "),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::DIM),
        ));
    }
    if spans.is_empty() {
        spans.push(Span::styled("none", Style::default().fg(Color::DarkGray)));
    }

    let channels = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title("Channels"));
    frame.render_widget(channels, area);
}

fn render_agents(frame: &mut ratatui::Frame, area: Rect, snapshot: &ActivitySnapshot) {
    let items: Vec<ListItem> = agent_rows(snapshot)
        .into_iter()
        .map(|(agent_id, state)| {
            let (marker, style) = match state {
                RowState::Glowing => (
                    "●",
                    Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
                ),
                RowState::Fading => (
                    "◐",
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::DIM),
                ),
                RowState::Seen => ("·", Style::default().fg(Color::Gray)),
            };

            let mut spans = vec![
                Span::styled(format!("{marker} agent {agent_id:<6}"), style),
            ];
            if let Some(skill) = snapshot.recent_skill_use.get(&agent_id) {
                spans.push(Span::styled(
                    format!(
                        "  {} ({}) at {}",
                        skill.skill_name,
                        skill.skill_type,
                        skill.at.format("%H:%M:%S")
                    ),
                    style,
                ));
            }
            if let Some(kb) = snapshot.recent_kb_use.get(&agent_id) {
                spans.push(Span::styled(
                    format!("  kb {} docs / {} chunks", kb.doc_count, kb.chunk_count),
                    style,
                ));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("Agents"));
    frame.render_widget(list, area);
}

fn render_footer(frame: &mut ratatui::Frame, area: Rect) {
    let footer = Paragraph::new(Span::styled(
        "q to quit",
        Style::default().fg(Color::DarkGray),
    ));
    frame.render_widget(footer, area);
}

/// Every visible agent with its row state, processing first, then fading,
/// then usage-only.
fn agent_rows(snapshot: &ActivitySnapshot) -> Vec<(AgentId, RowState)> {
    let mut rows: Vec<(AgentId, RowState)> = Vec::new();
    for &agent_id in &snapshot.processing {
        rows.push((agent_id, RowState::Glowing));
    }
    for &agent_id in &snapshot.ending_agents {
        rows.push((agent_id, RowState::Fading));
    }
    for &agent_id in snapshot
        .recent_skill_use
        .keys()
        .chain(snapshot.recent_kb_use.keys())
    {
        if !snapshot.processing.contains(&agent_id)
            && !snapshot.ending_agents.contains(&agent_id)
            && !rows.iter().any(|(id, _)| *id == agent_id)
        {
            rows.push((agent_id, RowState::Seen));
        }
    }
    rows
}
