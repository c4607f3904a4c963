use crate::{
    limits::{RateLimitSnapshot, Resource, Window},
    reconcile::ReconcileError,
};
use std::{sync::Arc, time::Duration};

/// Rows in the usage table, one per (window, resource) pair.
pub const USAGE_ROWS: usize = Window::ALL.len() * Resource::ALL.len();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching,
    ErrorIdle,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::Fetching => "Refreshing…",
            Phase::ErrorIdle => "Error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Dashboard,
    Usage,
    Quotas,
    Settings,
}

impl Tab {
    pub const ALL: [Tab; 4] = [Tab::Dashboard, Tab::Usage, Tab::Quotas, Tab::Settings];

    pub fn title(self) -> &'static str {
        match self {
            Tab::Dashboard => "Dashboard",
            Tab::Usage => "Usage",
            Tab::Quotas => "Quotas",
            Tab::Settings => "Settings",
        }
    }

    pub fn index(self) -> usize {
        Tab::ALL
            .iter()
            .position(|tab| *tab == self)
            .unwrap_or_default()
    }

    fn next(self) -> Self {
        Tab::ALL[(self.index() + 1) % Tab::ALL.len()]
    }

    fn prev(self) -> Self {
        Tab::ALL[(self.index() + Tab::ALL.len() - 1) % Tab::ALL.len()]
    }
}

/// Everything that can happen to the loop. Terminal input, timers and fetch
/// completions all arrive as one of these.
#[derive(Debug)]
pub enum Event {
    Tick { generation: u64 },
    Refresh,
    FetchCompleted(Result<RateLimitSnapshot, ReconcileError>),
    NextTab,
    PrevTab,
    CursorUp,
    CursorDown,
    Resize { width: u16, height: u16 },
    Quit,
}

/// Side effects requested by [`RefreshLoop::update`]; the terminal driver
/// executes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Fetch,
    ArmTimer { after: Duration, generation: u64 },
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewState {
    pub tab: Tab,
    pub cursor: usize,
    pub width: u16,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            tab: Tab::Dashboard,
            cursor: 0,
            width: 80,
        }
    }
}

/// Single-flow refresh controller. At most one fetch is in flight; the last
/// good snapshot survives failed refreshes.
#[derive(Debug)]
pub struct RefreshLoop {
    phase: Phase,
    snapshot: Option<Arc<RateLimitSnapshot>>,
    error: Option<ReconcileError>,
    interval: Duration,
    timer_generation: u64,
    view: ViewState,
}

impl RefreshLoop {
    pub fn new(interval: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            snapshot: None,
            error: None,
            interval,
            timer_generation: 0,
            view: ViewState::default(),
        }
    }

    /// Commands for startup: the first fetch is not delayed by the timer.
    pub fn start(&mut self) -> Vec<Command> {
        self.trigger("startup")
    }

    pub fn update(&mut self, event: Event) -> Vec<Command> {
        match event {
            Event::Tick { generation } => {
                if generation != self.timer_generation {
                    tracing::debug!(
                        generation,
                        current = self.timer_generation,
                        "ignoring stale timer"
                    );
                    return Vec::new();
                }
                self.trigger("timer")
            }
            Event::Refresh => self.trigger("manual"),
            Event::FetchCompleted(result) => {
                match result {
                    Ok(snapshot) => {
                        self.snapshot = Some(Arc::new(snapshot));
                        self.error = None;
                        self.phase = Phase::Idle;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "refresh failed; keeping previous snapshot");
                        self.error = Some(err);
                        self.phase = Phase::ErrorIdle;
                    }
                }
                self.timer_generation += 1;
                vec![Command::ArmTimer {
                    after: self.interval,
                    generation: self.timer_generation,
                }]
            }
            Event::NextTab => {
                self.view.tab = self.view.tab.next();
                self.view.cursor = 0;
                Vec::new()
            }
            Event::PrevTab => {
                self.view.tab = self.view.tab.prev();
                self.view.cursor = 0;
                Vec::new()
            }
            Event::CursorUp => {
                self.view.cursor = self.view.cursor.saturating_sub(1);
                Vec::new()
            }
            Event::CursorDown => {
                if self.view.cursor + 1 < USAGE_ROWS {
                    self.view.cursor += 1;
                }
                Vec::new()
            }
            Event::Resize { width, height } => {
                tracing::debug!(width, height, "viewport resized");
                self.view.width = width;
                Vec::new()
            }
            Event::Quit => vec![Command::Exit],
        }
    }

    fn trigger(&mut self, reason: &'static str) -> Vec<Command> {
        if self.phase == Phase::Fetching {
            tracing::debug!(reason, "refresh already in flight; trigger dropped");
            return Vec::new();
        }
        tracing::debug!(reason, "starting refresh");
        self.phase = Phase::Fetching;
        vec![Command::Fetch]
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn snapshot(&self) -> Option<&RateLimitSnapshot> {
        self.snapshot.as_deref()
    }

    pub fn error(&self) -> Option<&ReconcileError> {
        self.error.as_ref()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }
}
