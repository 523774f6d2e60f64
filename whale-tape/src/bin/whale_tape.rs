/// Whale Tape TUI
///
/// Streams options whale prints from the backend, de-duplicates them and
/// renders a live tape. Hovering the tape pauses it; holding the mouse on a
/// row (or pressing `s`) saves that trade to the watchlist.
use std::{
    error::Error,
    fs::OpenOptions,
    io,
    sync::Mutex,
    time::{Duration, Instant},
};

use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
        MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    Frame, Terminal,
};
use rustls::crypto::ring::default_provider;
use tracing::{info, warn};
use whale_tape::shared::widget::{contains, render_status_bar, render_whale_tape, row_at};
use whale_tape::{
    spawn_whale_stream, FeedConfig, PipelineCommand, PipelineHandle, SystemClock, TapeSnapshot,
    TradeIdentity, WatchlistClient, WhalePipeline,
};

const RENDER_INTERVAL: Duration = Duration::from_millis(200);

/// Log to a file (WHALE_TAPE_LOG, default whale_tape.log) so output never
/// lands on the alternate screen
fn init_logging() -> Result<(), Box<dyn Error>> {
    let path = std::env::var("WHALE_TAPE_LOG").unwrap_or_else(|_| "whale_tape.log".to_string());
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

/// Mouse press waiting to become a long-press save
struct Press {
    row: usize,
    /// Trade shown under the pointer when the press started
    identity: TradeIdentity,
    at: Instant,
    fired: bool,
}

/// Identity of the trade rendered at `row` in the last drawn snapshot
fn identity_at(snapshot: &TapeSnapshot, row: usize) -> Option<TradeIdentity> {
    snapshot.rows.get(row).map(|r| r.trade.identity.clone())
}

fn send(pipeline: &PipelineHandle, command: PipelineCommand) {
    if let Err(e) = pipeline.try_send(command) {
        warn!("Dropped UI command: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Install rustls crypto provider before any TLS connections
    let _ = default_provider().install_default();
    init_logging()?;

    let config = FeedConfig::from_env();
    info!("Whale tape starting against {}", config.base_url);

    let watchlist = match WatchlistClient::new(&config) {
        Ok(client) => Some(client),
        Err(e) => {
            warn!("Watchlist disabled: {}", e);
            None
        }
    };
    let pipeline = WhalePipeline::new(config.clone(), SystemClock, watchlist).spawn();
    let stream = spawn_whale_stream(config.clone(), pipeline.sender())?;

    // Setup panic hook to restore terminal on crash
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic_info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut snapshot = pipeline.snapshot();
    let mut tape_area = Rect::default();
    let mut selected: Option<usize> = None;
    let mut hovered = false;
    let mut press: Option<Press> = None;
    let mut last_render = Instant::now()
        .checked_sub(RENDER_INTERVAL)
        .unwrap_or_else(Instant::now);

    loop {
        if event::poll(Duration::from_millis(50))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => break,
                    KeyCode::Up => {
                        selected = Some(selected.map_or(0, |i| i.saturating_sub(1)));
                    }
                    KeyCode::Down => {
                        let last = snapshot.rows.len().saturating_sub(1);
                        selected = Some(selected.map_or(0, |i| (i + 1).min(last)));
                    }
                    KeyCode::Char('s') | KeyCode::Enter => {
                        if let Some(identity) = selected.and_then(|row| identity_at(&snapshot, row)) {
                            send(&pipeline, PipelineCommand::SaveTrade(identity));
                        }
                    }
                    _ => {}
                },
                Event::Mouse(mouse) => {
                    let over = contains(tape_area, mouse.column, mouse.row);
                    if over != hovered {
                        hovered = over;
                        send(&pipeline, PipelineCommand::HoverChanged(over));
                    }
                    match mouse.kind {
                        MouseEventKind::Down(MouseButton::Left) => {
                            press = row_at(tape_area, &snapshot, mouse.column, mouse.row)
                                .and_then(|row| {
                                    identity_at(&snapshot, row).map(|identity| Press {
                                        row,
                                        identity,
                                        at: Instant::now(),
                                        fired: false,
                                    })
                                });
                            if let Some(p) = &press {
                                selected = Some(p.row);
                            }
                        }
                        MouseEventKind::Up(MouseButton::Left) => press = None,
                        MouseEventKind::Drag(MouseButton::Left) => {
                            // Moving off the row cancels the long-press
                            let row = row_at(tape_area, &snapshot, mouse.column, mouse.row);
                            if press.as_ref().is_some_and(|p| Some(p.row) != row) {
                                press = None;
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        if let Some(p) = press.as_mut() {
            if !p.fired && p.at.elapsed() >= config.long_press {
                p.fired = true;
                send(&pipeline, PipelineCommand::SaveTrade(p.identity.clone()));
            }
        }

        if last_render.elapsed() >= RENDER_INTERVAL {
            snapshot = pipeline.snapshot();
            if let Some(row) = selected {
                if row >= snapshot.rows.len() {
                    selected = snapshot.rows.len().checked_sub(1);
                }
            }
            terminal.draw(|f| tape_area = ui(f, &snapshot, &config, selected))?;
            last_render = Instant::now();
        }
    }

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    stream.abort();
    pipeline.shutdown().await;
    info!("Whale tape stopped");
    Ok(())
}

/// Draw the frame; returns the tape area for mouse hit-testing
fn ui(f: &mut Frame, snapshot: &TapeSnapshot, config: &FeedConfig, selected: Option<usize>) -> Rect {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(1)])
        .split(f.area());

    render_whale_tape(f, chunks[0], snapshot, config, selected);
    render_status_bar(f, chunks[1], snapshot);
    chunks[0]
}
