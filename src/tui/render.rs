use super::view::{
    Columns, Density, GaugeRow, Palette, UNKNOWN, bar_width, columns_for, density_for,
    format_count, gauge_rows, progress_bar, truncate_text,
};
use crate::{
    config::{AppConfig, Theme},
    limits::{RateLimitSnapshot, Resource},
    refresh::{RefreshLoop, Tab},
};
use chrono::Local;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, Tabs, Wrap},
};

const KEY_BINDINGS: [(&str, &str); 5] = [
    ("q / Ctrl-C", "quit"),
    ("r", "refresh now"),
    ("Tab / Shift-Tab", "switch tab"),
    ("↑ / k", "move up"),
    ("↓ / j", "move down"),
];

/// Draws one frame from the loop state. Performs no I/O.
pub fn draw(frame: &mut Frame, state: &RefreshLoop, config: &AppConfig) {
    let palette = Palette::for_theme(config.display.theme);
    let annotate = state.snapshot().is_some() && state.error().is_some();

    let mut constraints = vec![
        Constraint::Length(1),
        Constraint::Length(3),
        Constraint::Min(3),
    ];
    if annotate {
        constraints.push(Constraint::Length(1));
    }
    constraints.push(Constraint::Length(1));

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(frame.size());

    render_title(frame, layout[0], &palette);
    render_tabs(frame, layout[1], state, &palette);

    let content = layout[2];
    match state.view().tab {
        Tab::Dashboard => render_dashboard(frame, content, state, &palette),
        Tab::Usage => render_usage(frame, content, state, &palette),
        Tab::Quotas => render_quotas(frame, content, state, &palette),
        Tab::Settings => render_settings(frame, content, state, config, &palette),
    }

    if annotate {
        if let Some(err) = state.error() {
            let line = Line::from(Span::styled(
                format!(" Last refresh failed: {err}"),
                Style::default().fg(palette.error),
            ));
            frame.render_widget(Paragraph::new(line), layout[3]);
        }
    }
    render_status(frame, layout[layout.len() - 1], state, config, &palette);
}

fn render_title(frame: &mut Frame, area: Rect, palette: &Palette) {
    let line = Line::from(vec![
        Span::styled(
            " Cerebras Rate Limit Monitor",
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            "   q quit · r refresh · Tab switch",
            Style::default().fg(palette.muted),
        ),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

fn render_tabs(frame: &mut Frame, area: Rect, state: &RefreshLoop, palette: &Palette) {
    let titles: Vec<Line> = Tab::ALL.iter().map(|tab| Line::from(tab.title())).collect();
    let tabs = Tabs::new(titles)
        .select(state.view().tab.index())
        .style(Style::default().fg(palette.text))
        .highlight_style(
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        )
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(tabs, area);
}

/// Shown in place of tab content until the first snapshot arrives.
fn render_placeholder(frame: &mut Frame, area: Rect, state: &RefreshLoop, palette: &Palette) {
    let lines = match state.error() {
        Some(err) => vec![
            Line::from(Span::styled(
                format!("Failed to load rate limits: {err}"),
                Style::default().fg(palette.error),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Press 'r' to retry.",
                Style::default().fg(palette.muted),
            )),
        ],
        None => vec![Line::from(Span::styled(
            "Loading rate limits…",
            Style::default().fg(palette.muted),
        ))],
    };
    let paragraph = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(paragraph, area);
}

fn render_dashboard(frame: &mut Frame, area: Rect, state: &RefreshLoop, palette: &Palette) {
    let Some(snapshot) = state.snapshot() else {
        render_placeholder(frame, area, state, palette);
        return;
    };
    let rows = gauge_rows(snapshot);
    let width = state.view().width;
    let columns = columns_for(width);
    let bar = bar_width(width, columns);
    // Inside the block borders.
    let inner_height = area.height.saturating_sub(2);

    match columns {
        Columns::One => {
            let density = density_for(rows.len(), inner_height);
            let lines = rows
                .iter()
                .flat_map(|row| gauge_lines(row, bar, density, palette))
                .collect::<Vec<_>>();
            let block = Block::default().title("Rate Limits").borders(Borders::ALL);
            frame.render_widget(Paragraph::new(lines).block(block), area);
        }
        Columns::Two => {
            let halves = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(area);
            let density = density_for(rows.len().div_ceil(2), inner_height);
            for (resource, half) in Resource::ALL.into_iter().zip(halves.iter()) {
                let lines = rows
                    .iter()
                    .filter(|row| row.resource == resource)
                    .flat_map(|row| gauge_lines(row, bar, density, palette))
                    .collect::<Vec<_>>();
                let block = Block::default()
                    .title(resource.label())
                    .borders(Borders::ALL);
                frame.render_widget(Paragraph::new(lines).block(block), *half);
            }
        }
    }
}

fn gauge_lines(
    row: &GaugeRow,
    bar: usize,
    density: Density,
    palette: &Palette,
) -> Vec<Line<'static>> {
    let level_style = Style::default().fg(palette.level(row.level()));
    let muted = Style::default().fg(palette.muted);
    let gauge = match row.percent() {
        Some(percent) => Span::styled(progress_bar(percent, bar), level_style),
        None => Span::styled(UNKNOWN, muted),
    };
    let usage = format!("{}  ·  resets in {}", row.usage_text(), row.reset_text());

    let mut heading = vec![
        Span::styled(
            format!("{:<16}", row.label()),
            Style::default()
                .fg(palette.text)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(row.percent_text(), level_style),
    ];
    if density == Density::Compact && row.percent().is_some() {
        heading.push(Span::styled(format!("  {usage}"), muted));
    }

    let mut lines = vec![Line::from(heading), Line::from(gauge)];
    match density {
        Density::Compact => {}
        Density::Full => lines.push(Line::from(Span::styled(usage, muted))),
        Density::Spaced => {
            lines.push(Line::from(Span::styled(usage, muted)));
            lines.push(Line::from(""));
        }
    }
    lines
}

fn render_usage(frame: &mut Frame, area: Rect, state: &RefreshLoop, palette: &Palette) {
    let Some(snapshot) = state.snapshot() else {
        render_placeholder(frame, area, state, palette);
        return;
    };

    let header = Row::new(vec!["Metric", "Used", "Remaining", "Limit", "Used %", "Resets In"])
        .style(
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        );
    let cursor = state.view().cursor;
    let rows = gauge_rows(snapshot)
        .iter()
        .enumerate()
        .map(|(idx, row)| {
            let cells = vec![
                Cell::from(row.label()),
                Cell::from(row.used_text()),
                Cell::from(row.remaining_text()),
                Cell::from(row.limit_text()),
                Cell::from(row.percent_text())
                    .style(Style::default().fg(palette.level(row.level()))),
                Cell::from(row.reset_text()),
            ];
            let table_row = Row::new(cells);
            if idx == cursor {
                table_row.style(
                    Style::default()
                        .fg(palette.highlight_fg)
                        .bg(palette.highlight_bg)
                        .add_modifier(Modifier::BOLD),
                )
            } else {
                table_row
            }
        })
        .collect::<Vec<_>>();

    let widths = [
        Constraint::Length(18),
        Constraint::Length(12),
        Constraint::Length(12),
        Constraint::Length(12),
        Constraint::Length(10),
        Constraint::Length(12),
    ];
    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .title("Usage (↑/↓ to select)")
                .borders(Borders::ALL),
        )
        .column_spacing(1);
    frame.render_widget(table, area);
}

fn render_quotas(frame: &mut Frame, area: Rect, state: &RefreshLoop, palette: &Palette) {
    let Some(snapshot) = state.snapshot() else {
        render_placeholder(frame, area, state, palette);
        return;
    };

    let mut lines = quota_lines(snapshot, palette);
    if !snapshot.notes.is_empty() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Notes",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        let max_chars = (area.width as usize).saturating_sub(6);
        for note in &snapshot.notes {
            lines.push(Line::from(Span::styled(
                format!(" • {}", truncate_text(note, max_chars)),
                Style::default().fg(palette.muted),
            )));
        }
    }
    let block = Block::default().title("Quota Details").borders(Borders::ALL);
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn quota_lines(snapshot: &RateLimitSnapshot, palette: &Palette) -> Vec<Line<'static>> {
    let optional = |value: Option<u64>| value.map(format_count).unwrap_or_else(|| UNKNOWN.to_string());
    let fields = [
        ("Model", snapshot.model_id.clone()),
        (
            "Region",
            snapshot
                .region_id
                .clone()
                .unwrap_or_else(|| UNKNOWN.to_string()),
        ),
        (
            "Organization",
            snapshot
                .organization_id
                .clone()
                .unwrap_or_else(|| "—".to_string()),
        ),
        ("Max sequence length", optional(snapshot.max_sequence_length)),
        ("Max completion tokens", optional(snapshot.max_completion_tokens)),
        ("Sources", snapshot.sources.to_string()),
        (
            "Fetched at",
            snapshot
                .fetched_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ),
    ];
    fields
        .into_iter()
        .map(|(label, value)| detail_line(label, value, palette))
        .collect()
}

fn detail_line(label: &'static str, value: String, palette: &Palette) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{label:<24}"), Style::default().fg(palette.muted)),
        Span::styled(value, Style::default().fg(palette.text)),
    ])
}

fn render_settings(
    frame: &mut Frame,
    area: Rect,
    state: &RefreshLoop,
    config: &AppConfig,
    palette: &Palette,
) {
    let theme = match config.display.theme {
        Theme::Dark => "dark",
        Theme::Light => "light",
    };
    let mut lines = vec![
        detail_line(
            "Refresh interval",
            format!("{}s", state.interval().as_secs()),
            palette,
        ),
        detail_line(
            "Organization",
            config
                .monitor
                .organization()
                .unwrap_or("—")
                .to_string(),
            palette,
        ),
        detail_line("Model", config.monitor.model.clone(), palette),
        detail_line(
            "Region",
            config.monitor.region().unwrap_or("any").to_string(),
            palette,
        ),
        detail_line("Theme", theme.to_string(), palette),
        detail_line(
            "Request timeout",
            format!("{}s", config.monitor.request_timeout().as_secs()),
            palette,
        ),
        Line::from(""),
        Line::from(Span::styled(
            "Key bindings",
            Style::default().add_modifier(Modifier::BOLD),
        )),
    ];
    lines.extend(
        KEY_BINDINGS
            .into_iter()
            .map(|(keys, action)| detail_line(keys, action.to_string(), palette)),
    );
    let block = Block::default().title("Settings").borders(Borders::ALL);
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_status(
    frame: &mut Frame,
    area: Rect,
    state: &RefreshLoop,
    config: &AppConfig,
    palette: &Palette,
) {
    let model = state
        .snapshot()
        .map(|snapshot| snapshot.model_id.as_str())
        .unwrap_or(config.monitor.model.as_str());
    let updated = state
        .snapshot()
        .map(|snapshot| {
            snapshot
                .fetched_at
                .with_timezone(&Local)
                .format("%H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "never".to_string());
    let text = format!(
        " Org: {} │ Model: {} │ Refresh: {}s │ {} │ Updated: {}",
        config.monitor.organization().unwrap_or("—"),
        model,
        state.interval().as_secs(),
        state.phase().label(),
        updated
    );
    let style = if state.error().is_some() {
        Style::default().fg(palette.error)
    } else {
        Style::default().fg(palette.muted)
    };
    frame.render_widget(Paragraph::new(Line::from(Span::styled(text, style))), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        limits::{RawQuota, SourceReading, Window},
        reconcile::ReconcileError,
        refresh::Event,
        sources::SourceError,
    };
    use chrono::Utc;
    use ratatui::{Terminal, backend::TestBackend};
    use std::time::Duration;

    fn known_snapshot() -> RateLimitSnapshot {
        let mut reading = SourceReading::default();
        reading.sources.quota = true;
        *reading.quotas.get_mut(Window::Day, Resource::Requests) = RawQuota {
            limit: Some(28_800),
            used: Some(1_207),
            remaining: None,
            reset_in: Some(62_341),
        };
        RateLimitSnapshot::from_reading(
            reading,
            "qwen-3-coder-480b",
            Some("org_test".to_string()),
            Utc::now(),
        )
    }

    fn failure() -> ReconcileError {
        ReconcileError::SourcesFailed {
            quota: Some(SourceError::GraphQl("Unauthorized".to_string())),
            headers: None,
        }
    }

    fn render(state: &mut RefreshLoop, width: u16, height: u16) -> String {
        state.update(Event::Resize { width, height });
        let config = AppConfig::default();
        let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
        terminal.draw(|frame| draw(frame, &*state, &config)).unwrap();
        let buffer = terminal.backend().buffer();
        let mut text = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                text.push_str(buffer.get(x, y).symbol());
            }
            text.push('\n');
        }
        text
    }

    fn loaded(snapshot: RateLimitSnapshot) -> RefreshLoop {
        let mut state = RefreshLoop::new(Duration::from_secs(10));
        state.start();
        state.update(Event::FetchCompleted(Ok(snapshot)));
        state
    }

    #[test]
    fn shows_loading_before_first_snapshot() {
        let mut state = RefreshLoop::new(Duration::from_secs(10));
        state.start();
        let screen = render(&mut state, 80, 24);
        assert!(screen.contains("Loading rate limits"));
        assert!(screen.contains("Refreshing"));
    }

    #[test]
    fn shows_error_when_first_fetch_fails() {
        let mut state = RefreshLoop::new(Duration::from_secs(10));
        state.start();
        state.update(Event::FetchCompleted(Err(failure())));
        let screen = render(&mut state, 120, 30);
        assert!(screen.contains("Failed to load rate limits"));
        assert!(screen.contains("Unauthorized"));
    }

    #[test]
    fn unknown_limits_render_without_percentages() {
        let snapshot =
            RateLimitSnapshot::from_reading(SourceReading::default(), "m", None, Utc::now());
        let screen = render(&mut loaded(snapshot), 80, 40);
        assert!(screen.contains("Unknown"));
        assert!(!screen.contains("0.0%"));
    }

    #[test]
    fn stale_error_annotates_previous_snapshot() {
        let mut state = loaded(known_snapshot());
        state.update(Event::Refresh);
        state.update(Event::FetchCompleted(Err(failure())));

        let screen = render(&mut state, 120, 40);
        assert!(screen.contains("4.2%"));
        assert!(screen.contains("1,207 / 28,800"));
        assert!(screen.contains("17h19m"));
        assert!(screen.contains("Last refresh failed"));
    }

    fn daily_tokens_snapshot() -> RateLimitSnapshot {
        let mut reading = SourceReading::default();
        reading.sources.quota = true;
        *reading.quotas.get_mut(Window::Day, Resource::Tokens) = RawQuota {
            limit: Some(1_000_000),
            used: Some(250_000),
            remaining: None,
            reset_in: Some(62_341),
        };
        RateLimitSnapshot::from_reading(reading, "qwen-3-coder-480b", None, Utc::now())
    }

    #[test]
    fn standard_terminal_shows_last_gauge_with_reset() {
        let screen = render(&mut loaded(daily_tokens_snapshot()), 80, 24);
        assert!(screen.contains("Minute Requests"));
        assert!(screen.contains("Daily Tokens"));
        assert!(screen.contains("25.0%"));
        assert!(screen.contains("17h19m"), "{screen}");
    }

    #[test]
    fn standard_terminal_keeps_last_gauge_under_error_annotation() {
        let mut state = loaded(daily_tokens_snapshot());
        state.update(Event::Refresh);
        state.update(Event::FetchCompleted(Err(failure())));

        let screen = render(&mut state, 80, 24);
        assert!(screen.contains("Last refresh failed"));
        assert!(screen.contains("Daily Tokens"));
        assert!(screen.contains("17h19m"), "{screen}");
    }

    #[test]
    fn layout_switches_at_one_hundred_columns() {
        let narrow = render(&mut loaded(known_snapshot()), 99, 40);
        assert!(narrow.contains("Rate Limits"));

        let wide = render(&mut loaded(known_snapshot()), 100, 40);
        assert!(!wide.contains("Rate Limits"));
        assert!(wide.contains("Requests"));
        assert!(wide.contains("Tokens"));
    }

    #[test]
    fn usage_tab_lists_every_window() {
        let mut state = loaded(known_snapshot());
        state.update(Event::NextTab);
        let screen = render(&mut state, 100, 30);
        assert!(screen.contains("Remaining"));
        assert!(screen.contains("Minute Requests"));
        assert!(screen.contains("Daily Tokens"));
        assert!(screen.contains("27,593"));
    }

    #[test]
    fn quotas_and_settings_tabs_render_details() {
        let mut state = loaded(known_snapshot());
        state.update(Event::NextTab);
        state.update(Event::NextTab);
        let quotas = render(&mut state, 100, 30);
        assert!(quotas.contains("qwen-3-coder-480b"));
        assert!(quotas.contains("org_test"));

        state.update(Event::NextTab);
        let settings = render(&mut state, 100, 30);
        assert!(settings.contains("Refresh interval"));
        assert!(settings.contains("10s"));
        assert!(settings.contains("Key bindings"));
    }
}
