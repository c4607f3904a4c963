mod render;
pub mod view;

use crate::{
    config::AppConfig,
    reconcile::{LiveReconciler, ReconcileError},
    refresh::{Command, Event, RefreshLoop},
};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event as TerminalEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::{
    io::{self, Stdout},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    runtime::Handle,
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::JoinHandle,
};

pub async fn run(config: Arc<AppConfig>, reconciler: LiveReconciler) -> Result<()> {
    let tick_rate = config.display.tick_rate();
    let runtime = Handle::current();
    let reconciler = Arc::new(reconciler);

    tokio::task::spawn_blocking(move || run_blocking(runtime, config, reconciler, tick_rate))
        .await?
}

fn run_blocking(
    runtime: Handle,
    config: Arc<AppConfig>,
    reconciler: Arc<LiveReconciler>,
    tick_rate: Duration,
) -> Result<()> {
    let mut terminal = setup_terminal()?;
    let (events_tx, mut events_rx) = unbounded_channel();
    let mut driver = Driver {
        runtime,
        reconciler,
        events: events_tx,
        refresh_deadline: config.monitor.refresh_deadline(),
        in_flight: None,
        timer: None,
    };
    let mut state = RefreshLoop::new(config.monitor.refresh_interval());

    let loop_result: Result<()> = (|| -> Result<()> {
        let size = terminal.size()?;
        state.update(Event::Resize {
            width: size.width,
            height: size.height,
        });
        let mut pending = state.start();

        loop {
            drain_events(&mut events_rx, &mut state, &mut pending);
            if driver.execute(pending.drain(..)) {
                break Ok(());
            }

            terminal
                .draw(|frame| render::draw(frame, &state, &config))
                .context("failed to draw frame")?;

            if event::poll(tick_rate)? {
                if let Some(event) = map_terminal_event(event::read()?) {
                    pending.extend(state.update(event));
                }
            }
        }
    })();

    driver.shutdown();
    let restore_result = restore_terminal(terminal);

    match (loop_result, restore_result) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(loop_err), Ok(())) => Err(loop_err),
        (Ok(()), Err(restore_err)) => Err(restore_err),
        (Err(loop_err), Err(restore_err)) => Err(loop_err.context(restore_err.to_string())),
    }
}

fn drain_events(
    events: &mut UnboundedReceiver<Event>,
    state: &mut RefreshLoop,
    pending: &mut Vec<Command>,
) {
    while let Ok(event) = events.try_recv() {
        pending.extend(state.update(event));
    }
}

/// Executes loop commands against the runtime. Completions and timer ticks
/// come back through `events`.
struct Driver {
    runtime: Handle,
    reconciler: Arc<LiveReconciler>,
    events: UnboundedSender<Event>,
    refresh_deadline: Duration,
    in_flight: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

impl Driver {
    /// Returns `true` once an exit was requested.
    fn execute(&mut self, commands: impl IntoIterator<Item = Command>) -> bool {
        for command in commands {
            match command {
                Command::Fetch => self.spawn_fetch(),
                Command::ArmTimer { after, generation } => self.arm_timer(after, generation),
                Command::Exit => return true,
            }
        }
        false
    }

    fn spawn_fetch(&mut self) {
        let reconciler = Arc::clone(&self.reconciler);
        let events = self.events.clone();
        let deadline = self.refresh_deadline;
        self.in_flight = Some(self.runtime.spawn(async move {
            let started = Instant::now();
            tracing::info!("refresh started");
            let result = match tokio::time::timeout(deadline, reconciler.reconcile()).await {
                Ok(result) => result,
                Err(_) => Err(ReconcileError::Timeout(deadline)),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(snapshot) => tracing::info!(
                    elapsed_ms,
                    model = %snapshot.model_id,
                    sources = %snapshot.sources,
                    "refresh finished"
                ),
                Err(err) => tracing::warn!(elapsed_ms, error = %err, "refresh failed"),
            }
            let _ = events.send(Event::FetchCompleted(result));
        }));
    }

    fn arm_timer(&mut self, after: Duration, generation: u64) {
        if let Some(previous) = self.timer.take() {
            previous.abort();
        }
        let events = self.events.clone();
        self.timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(Event::Tick { generation });
        }));
    }

    fn shutdown(&mut self) {
        if let Some(fetch) = self.in_flight.take() {
            if !fetch.is_finished() {
                tracing::debug!("abandoning in-flight refresh");
            }
            fetch.abort();
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

fn map_terminal_event(event: TerminalEvent) -> Option<Event> {
    match event {
        TerminalEvent::Key(key) => map_key(key),
        TerminalEvent::Resize(width, height) => Some(Event::Resize { width, height }),
        _ => None,
    }
}

fn map_key(key: KeyEvent) -> Option<Event> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Some(Event::Quit);
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => Some(Event::Quit),
        KeyCode::Char('r') => Some(Event::Refresh),
        KeyCode::Tab | KeyCode::Right | KeyCode::Char('l') => Some(Event::NextTab),
        KeyCode::BackTab | KeyCode::Left | KeyCode::Char('h') => Some(Event::PrevTab),
        KeyCode::Up | KeyCode::Char('k') => Some(Event::CursorUp),
        KeyCode::Down | KeyCode::Char('j') => Some(Event::CursorDown),
        _ => None,
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.hide_cursor()?;
    Ok(terminal)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    Ok(())
}
