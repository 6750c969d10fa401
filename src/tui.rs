use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    text::Line,
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table},
};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::analysis::{self, RefreshContext, RefreshReport};
use crate::comfy_table::{format_timestamp, regime_rgb};
use crate::error::RefreshError;
use crate::klines::PriceProvider;
use crate::snapshot::{Snapshot, SnapshotStore};

// --- App State ---

struct CycleMessage {
    request: u64,
    result: Result<Option<RefreshReport>, RefreshError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    None,
    Refresh,
    Quit,
}

struct App {
    ctx: RefreshContext,
    periods: Vec<usize>,
    cursor: usize,
    active_period: usize,
    page: usize,
    page_size: usize,
    is_refreshing: bool,
    request: u64,
    skipped: usize,
    status: Option<String>,
}

impl App {
    fn new(ctx: RefreshContext, periods: Vec<usize>, page_size: usize) -> Self {
        let active_period = ctx.window;
        let cursor = periods.iter().position(|&p| p == active_period).unwrap_or(0);
        Self {
            ctx,
            periods,
            cursor,
            active_period,
            page: 0,
            page_size: page_size.max(1),
            is_refreshing: false,
            request: 0,
            skipped: 0,
            status: None,
        }
    }

    fn select_period(&mut self, index: usize) -> Action {
        let Some(&period) = self.periods.get(index) else {
            return Action::None;
        };
        self.cursor = index;
        if period == self.active_period {
            return Action::None;
        }
        self.active_period = period;
        self.page = 0;
        Action::Refresh
    }

    fn handle_key(&mut self, key: KeyEvent, rows: usize) -> Action {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => Action::Quit,
            KeyCode::F(5) | KeyCode::Char('r') => Action::Refresh,
            KeyCode::Up => {
                if !self.periods.is_empty() {
                    self.cursor = self
                        .cursor
                        .checked_sub(1)
                        .unwrap_or(self.periods.len() - 1);
                }
                Action::None
            }
            KeyCode::Down => {
                if !self.periods.is_empty() {
                    self.cursor = (self.cursor + 1) % self.periods.len();
                }
                Action::None
            }
            KeyCode::Enter => self.select_period(self.cursor),
            KeyCode::Char(c) if c.is_ascii_digit() => {
                // '1'..'9' pick the first nine periods, '0' the tenth.
                let digit = c.to_digit(10).unwrap_or(0) as usize;
                let index = if digit == 0 { 9 } else { digit - 1 };
                self.select_period(index)
            }
            KeyCode::PageDown | KeyCode::Right => {
                if self.page + 1 < page_count(rows, self.page_size) {
                    self.page += 1;
                }
                Action::None
            }
            KeyCode::PageUp | KeyCode::Left => {
                self.page = self.page.saturating_sub(1);
                Action::None
            }
            _ => Action::None,
        }
    }

    fn finish_cycle(&mut self, message: CycleMessage) {
        if message.request != self.request {
            return;
        }
        self.is_refreshing = false;
        match message.result {
            Ok(Some(report)) => {
                self.skipped = report.skipped.len();
                self.status = None;
            }
            Ok(None) => {}
            Err(e) => self.status = Some(format!("Refresh failed: {e}")),
        }
    }
}

fn page_count(rows: usize, page_size: usize) -> usize {
    rows.div_ceil(page_size.max(1)).max(1)
}

fn page_bounds(rows: usize, page: usize, page_size: usize) -> (usize, usize) {
    let page = page.min(page_count(rows, page_size) - 1);
    let start = (page * page_size).min(rows);
    (start, (start + page_size).min(rows))
}

struct Refresher {
    provider: Arc<dyn PriceProvider>,
    store: Arc<SnapshotStore>,
    tx: mpsc::Sender<CycleMessage>,
    running: Option<JoinHandle<()>>,
}

impl Refresher {
    /// Start a cycle for the app's active period, aborting any cycle still running.
    fn start(&mut self, app: &mut App) {
        if let Some(handle) = self.running.take() {
            handle.abort();
        }
        app.request += 1;
        app.is_refreshing = true;

        let request = app.request;
        let ctx = app.ctx.with_window(app.active_period);
        let provider = Arc::clone(&self.provider);
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();

        tracing::info!(request, window = ctx.window, "starting refresh");
        self.running = Some(tokio::spawn(async move {
            let result = analysis::refresh_and_publish(&ctx, provider.as_ref(), &store).await;
            let _ = tx.send(CycleMessage { request, result }).await;
        }));
    }
}

// --- TUI ---

pub async fn run_tui(
    ctx: RefreshContext,
    periods: Vec<usize>,
    page_size: usize,
    refresh_interval: Duration,
    provider: Arc<dyn PriceProvider>,
    store: Arc<SnapshotStore>,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let app = App::new(ctx, periods, page_size);
    let res = run_app(&mut terminal, app, refresh_interval, provider, store).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    res
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    mut app: App,
    refresh_interval: Duration,
    provider: Arc<dyn PriceProvider>,
    store: Arc<SnapshotStore>,
) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<CycleMessage>(4);
    let mut refresher = Refresher {
        provider,
        store: Arc::clone(&store),
        tx,
        running: None,
    };

    refresher.start(&mut app);
    let mut last_started = Instant::now();

    loop {
        let snapshot = store.current();
        terminal.draw(|f| ui(f, &app, snapshot.as_deref()))?;

        while let Ok(message) = rx.try_recv() {
            app.finish_cycle(message);
        }

        if !app.is_refreshing && last_started.elapsed() >= refresh_interval {
            refresher.start(&mut app);
            last_started = Instant::now();
        }

        if event::poll(Duration::from_millis(50))? {
            // Resize needs no handling: the next draw picks up the new size.
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                let rows = snapshot.as_ref().map_or(0, |s| s.rows.len());
                match app.handle_key(key, rows) {
                    Action::Quit => break,
                    Action::Refresh => {
                        refresher.start(&mut app);
                        last_started = Instant::now();
                    }
                    Action::None => {}
                }
            }
        }
    }

    if let Some(handle) = refresher.running.take() {
        handle.abort();
    }
    Ok(())
}

fn ui(f: &mut Frame, app: &App, snapshot: Option<&Snapshot>) {
    let main_layout = Layout::horizontal([Constraint::Percentage(18), Constraint::Percentage(82)])
        .split(f.size());

    let right_chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .split(main_layout[1]);

    // Sidebar: period menu
    let sidebar_block = Block::default()
        .borders(Borders::ALL)
        .title("RSI Period")
        .title_alignment(Alignment::Center);
    let inner_sidebar_area = sidebar_block.inner(main_layout[0]);
    f.render_widget(sidebar_block, main_layout[0]);

    let sidebar_chunks = Layout::vertical([Constraint::Min(1), Constraint::Length(4)])
        .split(inner_sidebar_area);

    let period_lines: Vec<Line> = app
        .periods
        .iter()
        .enumerate()
        .map(|(i, &period)| {
            let marker = if period == app.active_period { "● " } else { "  " };
            let mut line = Line::from(format!("{marker}RSI {period}"));
            if i == app.cursor {
                line = line.style(Style::default().fg(Color::Yellow).bg(Color::DarkGray));
            }
            line
        })
        .collect();
    f.render_widget(Paragraph::new(period_lines), sidebar_chunks[0]);

    f.render_widget(
        Paragraph::new("↑↓ Enter: period\nF5/r: refresh\nPgUp/PgDn: page\nq: quit"),
        sidebar_chunks[1],
    );

    // Header: last updated
    let updated = snapshot
        .map(|s| format_timestamp(s.generated_at))
        .unwrap_or_else(|| "Not updated yet".to_string());
    f.render_widget(
        Block::default()
            .borders(Borders::ALL)
            .title_alignment(Alignment::Center)
            .title(format!("Last Updated: {}", updated)),
        right_chunks[0],
    );

    // Table
    let window = snapshot.map_or(app.active_period, |s| s.window);
    let header = Row::new(vec![
        Cell::from("Rank"),
        Cell::from("Symbol"),
        Cell::from("Price (₹)"),
        Cell::from(format!("RSI ({window})")),
        Cell::from("Status"),
    ])
    .style(Style::default().bg(Color::DarkGray));

    let all_rows = snapshot.map_or(&[][..], |s| s.rows.as_slice());
    let (start, end) = page_bounds(all_rows.len(), app.page, app.page_size);
    let pages = page_count(all_rows.len(), app.page_size);

    let rows = all_rows[start..end].iter().enumerate().map(|(i, row)| {
        let (r, g, b) = regime_rgb(row.regime);
        let colour = Style::default().fg(Color::Rgb(r, g, b));
        Row::new([
            Cell::from(format!("{}", start + i + 1)).style(Style::default().fg(Color::DarkGray)),
            Cell::from(row.symbol.clone()).style(Style::default().fg(Color::Cyan)),
            Cell::from(format!("{:.2}", row.price)),
            Cell::from(format!("{:.2}", row.rsi)).style(colour),
            Cell::from(row.regime.label()).style(colour),
        ])
        .height(1)
    });

    let updating = if app.is_refreshing { " (Updating...)" } else { "" };
    let title = format!(
        "RSI Analyzer{}  page {}/{}",
        updating,
        app.page.min(pages - 1) + 1,
        pages
    );

    f.render_widget(
        Table::new(
            rows,
            [
                Constraint::Length(6),
                Constraint::Percentage(30),
                Constraint::Percentage(22),
                Constraint::Percentage(18),
                Constraint::Percentage(25),
            ],
        )
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title)),
        right_chunks[1],
    );

    // Status line
    let status = match (&app.status, snapshot) {
        (Some(err), _) => Line::from(err.clone()).style(Style::default().fg(Color::Red)),
        (None, Some(s)) => Line::from(format!(
            "{} rows, {} skipped",
            s.rows.len(),
            app.skipped
        )),
        (None, None) => Line::from(""),
    };
    f.render_widget(Paragraph::new(status), right_chunks[2]);

    if app.is_refreshing && snapshot.is_none() {
        let area = centered_rect(60, 20, main_layout[1]);
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new("Fetching price history...\nPlease wait.")
                .block(Block::default().title("Refreshing").borders(Borders::ALL))
                .alignment(Alignment::Center),
            area,
        );
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .split(r);
    Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .split(popup_layout[1])[1]
}
