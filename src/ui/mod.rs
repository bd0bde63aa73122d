use std::io::{Stdout, stdout};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Flex, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};
use time::macros::format_description;

use crate::app::App;
use crate::domain::review::{DashboardEntry, ReviewState};
use crate::domain::stats::Statistics;

pub fn run(mut app: App, tick_rate: Duration) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = event_loop(&mut terminal, &mut app, tick_rate);

    app.shutdown();
    cleanup_terminal(&mut terminal)?;
    res
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
    tick_rate: Duration,
) -> Result<()> {
    let mut last_tick = Instant::now();
    loop {
        app.tick(Instant::now());
        // One frame per applied event so entries show up one by one.
        while app.apply_next_event() {
            terminal.draw(|f| draw(f, app))?;
        }
        terminal.draw(|f| draw(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if event::poll(timeout)?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
            && handle_key(app, key)
        {
            return Ok(());
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }
    }
}

/// Returns `true` when the user asked to quit.
fn handle_key(app: &mut App, key: KeyEvent) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }
    if app.show_help {
        app.show_help = false;
        return false;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return true,
        KeyCode::Char('j') | KeyCode::Down => app.select_next(),
        KeyCode::Char('k') | KeyCode::Up => app.select_previous(),
        KeyCode::Char('r') => app.refresh(),
        KeyCode::Char('a') => app.switch_filter(ReviewState::Actionable),
        KeyCode::Char('w') => app.switch_filter(ReviewState::Waiting),
        KeyCode::Char('d') => app.switch_filter(ReviewState::Draft),
        KeyCode::Char('s') => app.switch_filter(ReviewState::SignedOff),
        KeyCode::Enter => app.open_selected(),
        KeyCode::Char('h') | KeyCode::Char('?') => app.show_help = true,
        _ => {}
    }
    false
}

fn draw(f: &mut ratatui::Frame, app: &App) {
    let size = f.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(3),
        ])
        .split(size);

    f.render_widget(render_header(app), chunks[0]);

    let mut list_state = ListState::default();
    if !app.entries().is_empty() {
        list_state.select(Some(app.selected()));
    }
    let list = render_list(app);
    f.render_stateful_widget(list, chunks[1], &mut list_state);

    f.render_widget(render_footer(app), chunks[2]);

    if app.show_help {
        let area = centered(size, 52, 14);
        f.render_widget(Clear, area);
        f.render_widget(render_help(), area);
    }
}

fn render_header(app: &App) -> Paragraph<'static> {
    let mut spans = vec![
        Span::styled("pr-dash", Style::default().fg(Color::Cyan)),
        Span::raw("  |  "),
        Span::styled(
            app.filter.label().to_string(),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  |  "),
    ];
    spans.extend(stats_spans(&app.statistics, app.filter));
    if app.is_refreshing() {
        spans.push(Span::raw("  |  "));
        spans.push(Span::styled(
            "⏳ Refreshing...",
            Style::default().fg(Color::Magenta),
        ));
    }
    Paragraph::new(Line::from(spans))
        .block(Block::default().title("Reviews").borders(Borders::ALL))
        .wrap(Wrap { trim: true })
}

fn stats_spans(stats: &Statistics, current: ReviewState) -> Vec<Span<'static>> {
    let mut spans = Vec::new();
    for (i, state) in ReviewState::ALL.into_iter().enumerate() {
        if i > 0 {
            spans.push(Span::raw(" · "));
        }
        let style = if state == current {
            Style::default().add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        spans.push(Span::styled(
            format!("{} {}", state.label(), stats.count(state)),
            style,
        ));
    }
    spans
}

fn render_list(app: &App) -> List<'_> {
    let entries = app.entries();
    let items: Vec<ListItem> = if entries.is_empty() {
        let placeholder = if app.is_refreshing() {
            " Loading..."
        } else {
            " Nothing here"
        };
        vec![ListItem::new(placeholder).style(Style::default().fg(Color::DarkGray))]
    } else {
        entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| render_entry(entry, idx == app.selected()))
            .collect()
    };

    List::new(items)
        .block(
            Block::default()
                .title("Pull requests (j/k move ; Enter open ; a/w/d/s filter ; r refresh ; h help)")
                .borders(Borders::ALL),
        )
        .highlight_symbol("➤ ")
}

fn render_entry(entry: &DashboardEntry, selected: bool) -> ListItem<'_> {
    let review = &entry.review;
    let created = review
        .created_at
        .and_then(|at| at.format(format_description!("[year]-[month]-[day]")).ok())
        .unwrap_or_else(|| "----------".to_string());
    let line = Line::from(vec![
        Span::styled(created, Style::default().fg(Color::DarkGray)),
        Span::raw(format!(" {}", review.title)),
        Span::styled(
            format!("  {} · {} · {}", review.repository, review.author, entry.account),
            Style::default().fg(Color::Blue),
        ),
    ]);

    let style = if selected {
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD | Modifier::REVERSED)
    } else {
        Style::default()
    };
    ListItem::new(line).style(style)
}

fn render_footer(app: &App) -> Paragraph<'static> {
    match app.status_line() {
        Some(msg) => Paragraph::new(msg)
            .style(Style::default().fg(Color::Red))
            .block(Block::default().title("Status").borders(Borders::ALL)),
        None => Paragraph::new("q quit ; r refresh ; Enter open in browser ; h help")
            .block(Block::default().title("Status").borders(Borders::ALL)),
    }
}

fn render_help() -> Paragraph<'static> {
    let lines = [
        ("j / ↓", "next pull request"),
        ("k / ↑", "previous pull request"),
        ("Enter", "open in browser"),
        ("r", "refresh now"),
        ("a", "show actionable"),
        ("w", "show waiting for author"),
        ("d", "show drafts"),
        ("s", "show signed off"),
        ("q / Esc", "quit"),
    ]
    .into_iter()
    .map(|(key, what)| {
        Line::from(vec![
            Span::styled(format!(" {key:<9}"), Style::default().fg(Color::Yellow)),
            Span::raw(what),
        ])
    })
    .collect::<Vec<_>>();

    Paragraph::new(lines).block(
        Block::default()
            .title("Help (any key to close)")
            .borders(Borders::ALL),
    )
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let (width, height) = (width.min(area.width), height.min(area.height));
    let [area] = Layout::horizontal([Constraint::Length(width)])
        .flex(Flex::Center)
        .areas(area);
    let [area] = Layout::vertical([Constraint::Length(height)])
        .flex(Flex::Center)
        .areas(area);
    area
}

fn cleanup_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use ratatui::backend::TestBackend;

    use super::*;

    #[test]
    fn stats_spans_list_every_state() {
        let stats = Statistics {
            actionable: 2,
            waiting: 1,
            drafts: 0,
            signed_off: 5,
        };
        let text: String = stats_spans(&stats, ReviewState::Waiting)
            .iter()
            .map(|s| s.content.as_ref())
            .collect();
        assert_eq!(text, "Actionable 2 · Waiting 1 · Drafts 0 · Signed off 5");
    }

    #[test]
    fn help_renders_inside_small_terminal() {
        let mut terminal = Terminal::new(TestBackend::new(40, 10)).unwrap();
        terminal
            .draw(|f| {
                let area = centered(f.area(), 52, 14);
                assert!(area.width <= 40 && area.height <= 10);
                f.render_widget(render_help(), area);
            })
            .unwrap();
    }
}
