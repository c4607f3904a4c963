use crate::{
    config::Theme,
    limits::{QuotaWindow, RateLimitSnapshot, Resource, Window},
};
use ratatui::style::Color;

/// Viewports at least this wide get side-by-side request and token columns.
pub const TWO_COLUMN_MIN_WIDTH: u16 = 100;
const MIN_BAR_WIDTH: usize = 10;
const MAX_BAR_WIDTH: usize = 50;
// Label, percentage and borders.
const GAUGE_CHROME: usize = 12;

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Columns {
    One,
    Two,
}

pub fn columns_for(width: u16) -> Columns {
    if width >= TWO_COLUMN_MIN_WIDTH {
        Columns::Two
    } else {
        Columns::One
    }
}

/// Lines spent on each gauge, picked so every gauge fits the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Density {
    /// Label, bar, usage line and a blank separator.
    Spaced,
    /// Label, bar and usage line.
    Full,
    /// Label with usage folded in, then the bar.
    Compact,
}

impl Density {
    pub fn lines_per_gauge(self) -> usize {
        match self {
            Density::Spaced => 4,
            Density::Full => 3,
            Density::Compact => 2,
        }
    }
}

pub fn density_for(gauges: usize, rows: u16) -> Density {
    let rows = rows as usize;
    [Density::Spaced, Density::Full]
        .into_iter()
        .find(|density| gauges * density.lines_per_gauge() <= rows)
        .unwrap_or(Density::Compact)
}

pub fn bar_width(width: u16, columns: Columns) -> usize {
    let column = match columns {
        Columns::One => width as usize,
        Columns::Two => width as usize / 2,
    };
    column
        .saturating_sub(GAUGE_CHROME)
        .clamp(MIN_BAR_WIDTH, MAX_BAR_WIDTH)
}

pub fn progress_bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    let filled = filled.min(width);
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

pub fn format_percent(percent: f64) -> String {
    format!("{percent:.1}%")
}

/// Seconds until rollover; zero is unknown.
pub fn format_reset(seconds: u64) -> String {
    match seconds {
        0 => UNKNOWN.to_string(),
        1..=59 => format!("{seconds}s"),
        60..=3599 => format!("{}m", seconds / 60),
        _ => format!("{}h{}m", seconds / 3600, (seconds % 3600) / 60),
    }
}

pub fn format_count(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn format_tokens(value: u64) -> String {
    if value >= 1_000_000 {
        format!("{:.1}M", value as f64 / 1_000_000.0)
    } else if value >= 1_000 {
        format!("{:.1}K", value as f64 / 1_000.0)
    } else {
        value.to_string()
    }
}

pub fn truncate_text(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let mut truncated: String = input.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Normal,
    Elevated,
    High,
    Critical,
}

pub fn level_for(percent: f64) -> Level {
    if percent > 90.0 {
        Level::Critical
    } else if percent > 75.0 {
        Level::High
    } else if percent > 50.0 {
        Level::Elevated
    } else {
        Level::Normal
    }
}

/// One (window, resource) pair prepared for display.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeRow {
    pub window: Window,
    pub resource: Resource,
    pub quota: QuotaWindow,
}

impl GaugeRow {
    pub fn label(&self) -> String {
        format!("{} {}", self.window.label(), self.resource.label())
    }

    pub fn percent(&self) -> Option<f64> {
        self.quota.percent_used()
    }

    pub fn percent_text(&self) -> String {
        self.percent()
            .map(format_percent)
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    pub fn usage_text(&self) -> String {
        if !self.quota.is_known() {
            return UNKNOWN.to_string();
        }
        format!(
            "{} / {}",
            self.format_value(self.quota.used),
            self.format_value(self.quota.limit)
        )
    }

    pub fn remaining_text(&self) -> String {
        self.known_value(self.quota.remaining)
    }

    pub fn limit_text(&self) -> String {
        self.known_value(self.quota.limit)
    }

    pub fn used_text(&self) -> String {
        self.known_value(self.quota.used)
    }

    pub fn reset_text(&self) -> String {
        format_reset(self.quota.reset_in)
    }

    pub fn level(&self) -> Option<Level> {
        self.percent().map(level_for)
    }

    fn known_value(&self, value: u64) -> String {
        if self.quota.is_known() {
            self.format_value(value)
        } else {
            UNKNOWN.to_string()
        }
    }

    fn format_value(&self, value: u64) -> String {
        match self.resource {
            Resource::Requests => format_count(value),
            Resource::Tokens => format_tokens(value),
        }
    }
}

/// Rows in display order: minute, hour, day; requests before tokens.
pub fn gauge_rows(snapshot: &RateLimitSnapshot) -> Vec<GaugeRow> {
    snapshot
        .windows
        .iter()
        .map(|(window, resource, quota)| GaugeRow {
            window,
            resource,
            quota: *quota,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub accent: Color,
    pub text: Color,
    pub muted: Color,
    pub highlight_fg: Color,
    pub highlight_bg: Color,
    pub error: Color,
    pub normal: Color,
    pub elevated: Color,
    pub high: Color,
    pub critical: Color,
}

impl Palette {
    pub fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Dark => Self {
                accent: Color::Cyan,
                text: Color::White,
                muted: Color::DarkGray,
                highlight_fg: Color::White,
                highlight_bg: Color::Blue,
                error: Color::Red,
                normal: Color::Green,
                elevated: Color::Yellow,
                high: Color::Rgb(255, 165, 0),
                critical: Color::Red,
            },
            Theme::Light => Self {
                accent: Color::Blue,
                text: Color::Black,
                muted: Color::Gray,
                highlight_fg: Color::Black,
                highlight_bg: Color::LightCyan,
                error: Color::Red,
                normal: Color::Green,
                elevated: Color::Rgb(184, 134, 11),
                high: Color::Rgb(230, 120, 0),
                critical: Color::Red,
            },
        }
    }

    pub fn level(&self, level: Option<Level>) -> Color {
        match level {
            None => self.muted,
            Some(Level::Normal) => self.normal,
            Some(Level::Elevated) => self.elevated,
            Some(Level::High) => self.high,
            Some(Level::Critical) => self.critical,
        }
    }
}
