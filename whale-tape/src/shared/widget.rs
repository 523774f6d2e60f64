//! Ratatui rendering for the whale tape and its status bar

use std::time::Duration;

use chrono::{DateTime, Utc};
use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use tokio::time::Instant;

use crate::shared::config::FeedConfig;
use crate::shared::pipeline::{FeedHealth, TapeSnapshot, ToastKind};
use crate::shared::session::format_et_clock;
use crate::shared::tape::VisibleTrade;
use crate::shared::types::{Moneyness, OptionClass, TradeTag};

const C_BUY: Color = Color::Rgb(100, 220, 100);
const C_SELL: Color = Color::Rgb(220, 100, 100);
const C_NEUTRAL: Color = Color::Rgb(180, 180, 100);
const C_DIM: Color = Color::Rgb(120, 120, 120);
const C_BRIGHT: Color = Color::Rgb(220, 220, 220);
const C_ACCENT: Color = Color::Rgb(100, 180, 220);
const C_MEGA: Color = Color::Rgb(220, 120, 220);
const C_SWEEP: Color = Color::Rgb(255, 170, 60);
const C_LOTTO: Color = Color::Rgb(170, 140, 255);
const C_SELECTED: Color = Color::Rgb(40, 40, 60);

const STALE_BANNER: &str = "Live feed disconnected - System OFFLINE";

/// `12s`, `4m`, `1h`
pub fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{}h", secs / 3600)
    }
}

fn tag_color(tag: TradeTag) -> Color {
    match tag {
        TradeTag::Mega => C_MEGA,
        TradeTag::Hedge => C_NEUTRAL,
        TradeTag::Fresh => C_ACCENT,
        TradeTag::Sweep => C_SWEEP,
        TradeTag::Lotto => C_LOTTO,
        TradeTag::Bull => C_BUY,
        TradeTag::Bear => C_SELL,
    }
}

/// First screen row used by trade rows inside `area`
fn first_row_y(area: Rect, stale: bool) -> u16 {
    // border + column header (+ banner)
    area.y + 2 + u16::from(stale)
}

/// Map a mouse position to a row index (0 = newest)
pub fn row_at(area: Rect, snapshot: &TapeSnapshot, column: u16, row: u16) -> Option<usize> {
    let inside = column > area.x
        && column < area.x + area.width.saturating_sub(1)
        && row < area.y + area.height.saturating_sub(1);
    let first = first_row_y(area, snapshot.stale);
    if !inside || row < first {
        return None;
    }
    let index = (row - first) as usize;
    (index < snapshot.rows.len()).then_some(index)
}

/// Whether a mouse position is over the tape panel at all
pub fn contains(area: Rect, column: u16, row: u16) -> bool {
    column >= area.x && column < area.x + area.width && row >= area.y && row < area.y + area.height
}

fn trade_line(
    row: &VisibleTrade,
    now: Instant,
    wall: DateTime<Utc>,
    config: &FeedConfig,
    selected: bool,
) -> Line<'static> {
    let trade = &row.trade;
    let age = (wall - trade.entered_at).to_std().unwrap_or_default();
    let side_color = match trade.class {
        OptionClass::Call => C_BUY,
        OptionClass::Put => C_SELL,
    };

    let mut tag_style = Style::default()
        .fg(tag_color(trade.tag))
        .add_modifier(Modifier::BOLD);
    if trade.pulse {
        tag_style = tag_style.add_modifier(Modifier::SLOW_BLINK);
    }

    let arrival = if row.just_arrived(now, config.just_arrived_for) {
        Span::styled("● ", Style::default().fg(C_SWEEP))
    } else {
        Span::raw("  ")
    };

    let mut spans = vec![
        arrival,
        Span::styled(
            format!("{:<6}", trade.ticker),
            Style::default().fg(C_BRIGHT).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("{:>8} ", trade.premium.to_string()),
            Style::default().fg(if trade.premium.is_delayed() { C_DIM } else { C_BRIGHT }),
        ),
        Span::styled(format!("{:>8} ", trade.strike_label()), Style::default().fg(side_color)),
        Span::styled(format!("{} ", trade.expiry), Style::default().fg(C_DIM)),
        Span::styled(format!("{:<7}", trade.tag.label()), tag_style),
    ];

    if let Some(moneyness) = trade.moneyness {
        let color = match moneyness {
            Moneyness::Itm => C_BUY,
            Moneyness::Otm => C_DIM,
            Moneyness::Atm => C_NEUTRAL,
        };
        spans.push(Span::styled(format!("{} ", moneyness.as_str()), Style::default().fg(color)));
    }
    if let Some(side) = trade.side {
        let color = if side.is_buy() { C_BUY } else { C_SELL };
        spans.push(Span::styled(format!("{} ", side), Style::default().fg(color)));
    }
    if trade.vol_oi > 0.0 {
        spans.push(Span::styled(
            format!("{:.1}x ", trade.vol_oi),
            Style::default().fg(C_DIM),
        ));
    }
    spans.push(Span::styled(format_age(age), Style::default().fg(C_DIM)));
    if age < config.new_badge_for {
        spans.push(Span::styled(
            " NEW",
            Style::default().fg(C_ACCENT).add_modifier(Modifier::BOLD),
        ));
    }

    let line = Line::from(spans);
    if selected {
        line.style(Style::default().bg(C_SELECTED))
    } else {
        line
    }
}

/// Render the whale tape panel
pub fn render_whale_tape(
    f: &mut Frame,
    area: Rect,
    snapshot: &TapeSnapshot,
    config: &FeedConfig,
    selected: Option<usize>,
) {
    let border_color = match snapshot.health {
        FeedHealth::Live => C_ACCENT,
        FeedHealth::Connecting => C_NEUTRAL,
        FeedHealth::Offline => C_SELL,
    };
    let title = if snapshot.hovered {
        format!(" WHALE FLOW (paused, {} pending) ", snapshot.pending)
    } else {
        " WHALE FLOW ".to_string()
    };

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let mut lines = Vec::new();
    if snapshot.stale {
        lines.push(Line::from(Span::styled(
            STALE_BANNER,
            Style::default().fg(C_SELL).add_modifier(Modifier::BOLD),
        )));
    }
    lines.push(Line::from(Span::styled(
        "  TICKER  PREMIUM   STRIKE EXPIRY     TAG    INFO",
        Style::default().fg(C_DIM),
    )));

    if snapshot.rows.is_empty() {
        let message = snapshot
            .placeholder
            .map(|p| p.message())
            .unwrap_or_else(|| "Connecting to whale stream...".to_string());
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(message, Style::default().fg(C_DIM))));
        f.render_widget(Paragraph::new(lines), inner);
        return;
    }

    let now = Instant::now();
    let capacity = (inner.height as usize).saturating_sub(lines.len());
    for (index, row) in snapshot.rows.iter().take(capacity).enumerate() {
        lines.push(trade_line(
            row,
            now,
            snapshot.now,
            config,
            selected == Some(index),
        ));
    }

    f.render_widget(Paragraph::new(lines), inner);
}

/// One-line footer: health, phase, clock, hover state and toast
pub fn render_status_bar(f: &mut Frame, area: Rect, snapshot: &TapeSnapshot) {
    let health_color = match snapshot.health {
        FeedHealth::Live => C_BUY,
        FeedHealth::Connecting => C_NEUTRAL,
        FeedHealth::Offline => C_SELL,
    };

    let phase_color = match snapshot.phase {
        Some(phase) if phase.is_trading() => C_BUY,
        Some(_) => C_NEUTRAL,
        None => C_DIM,
    };

    let mut spans = vec![
        Span::styled(
            format!(" ● {} ", snapshot.health.label()),
            Style::default().fg(health_color).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(
                "{} ",
                snapshot.phase.map(|p| p.label()).unwrap_or("--")
            ),
            Style::default().fg(phase_color),
        ),
        Span::styled(format!("{} ", format_et_clock(snapshot.now)), Style::default().fg(C_DIM)),
        Span::styled(
            format!("seen {} ", snapshot.seen),
            Style::default().fg(C_DIM),
        ),
    ];

    if snapshot.in_flight > 0 {
        spans.push(Span::styled(
            format!("+{} queued ", snapshot.in_flight),
            Style::default().fg(C_NEUTRAL),
        ));
    }

    match &snapshot.toast {
        Some(toast) => {
            let color = match toast.kind {
                ToastKind::Success => C_BUY,
                ToastKind::Error => C_SELL,
            };
            spans.push(Span::styled(
                format!("│ {}", toast.message),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ));
        }
        None => spans.push(Span::styled(
            "│ q quit  ↑↓ select  s save  hold-click save",
            Style::default().fg(C_DIM),
        )),
    }

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::pipeline::{PipelineCommand, WhalePipeline};
    use crate::shared::session::{ManualClock, MarketPhase};
    use crate::shared::types::{RawTradeEvent, WhaleBatch};
    use chrono::TimeZone;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(Duration::from_secs(12)), "12s");
        assert_eq!(format_age(Duration::from_secs(4 * 60 + 5)), "4m");
        assert_eq!(format_age(Duration::from_secs(3 * 3600)), "3h");
    }

    #[tokio::test(start_paused = true)]
    async fn test_row_at_maps_mouse_to_rows() {
        // Wednesday 15:00 UTC is market hours in New York
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 15, 15, 0, 0).unwrap());
        let mut pipeline = WhalePipeline::new(FeedConfig::default(), clock, None);
        let events = (1..=3)
            .map(|v| RawTradeEvent::new("SPY", 450.0, OptionClass::Call, "2025-01-17", v))
            .collect();
        pipeline.handle(
            PipelineCommand::BatchReceived(WhaleBatch::new(events)),
            Instant::now(),
        );
        pipeline.handle(PipelineCommand::PhaseTick, Instant::now() + Duration::from_secs(1));
        let snapshot = pipeline.snapshot(Instant::now());
        assert_eq!(snapshot.phase, Some(MarketPhase::MarketHours));
        assert_eq!(snapshot.rows.len(), 3);

        let area = Rect::new(0, 0, 80, 20);
        // Border at y=0, header at y=1
        assert_eq!(row_at(area, &snapshot, 5, 1), None);
        assert_eq!(row_at(area, &snapshot, 5, 2), Some(0));
        assert_eq!(row_at(area, &snapshot, 5, 4), Some(2));
        assert_eq!(row_at(area, &snapshot, 5, 5), None);
        assert_eq!(row_at(area, &snapshot, 0, 2), None);

        let mut stale = snapshot.clone();
        stale.stale = true;
        assert_eq!(row_at(area, &stale, 5, 2), None);
        assert_eq!(row_at(area, &stale, 5, 3), Some(0));
    }

    #[test]
    fn test_contains() {
        let area = Rect::new(2, 2, 10, 5);
        assert!(contains(area, 2, 2));
        assert!(contains(area, 11, 6));
        assert!(!contains(area, 12, 6));
        assert!(!contains(area, 1, 3));
    }
}
