//! pixelmill dashboard TUI
//!
//! Terminal interface for real-time monitoring of processing jobs and system
//! metrics. Connects to the engine status endpoint at
//! http://127.0.0.1:7979/metrics

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Cell, Chart, Dataset, Gauge, Paragraph, Row, Table, Wrap},
    Frame, Terminal,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    io::{self, Stdout},
    time::{Duration, Instant},
};

const METRICS_URL: &str = "http://127.0.0.1:7979/metrics";
const POLL_INTERVAL_MS: u64 = 500;
const MAX_VARIANT_POINTS: usize = 60;
const MAX_EVENT_LOG_ENTRIES: usize = 100;

// ============================================================================
// Data Models (mirroring engine metrics types)
// ============================================================================

/// Per-job metrics row from the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMetrics {
    pub id: String,
    pub task: String,
    pub status: String,
    pub backend: Option<String>,
    pub attempts: u32,
    pub variants: usize,
    pub created_at_unix_ms: i64,
    pub elapsed_ms: i64,
    pub last_error: Option<String>,
}

/// System-level metrics for resource monitoring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

/// Complete engine snapshot including jobs, system, and aggregate stats
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSnapshot {
    pub timestamp_unix_ms: i64,
    pub jobs: Vec<JobMetrics>,
    pub system: SystemMetrics,
    pub queued_jobs: usize,
    pub running_jobs: usize,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub variants_produced: u64,
    pub fallback_activations: u64,
    pub recovered_jobs: u64,
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self {
            cpu_usage_percent: 0.0,
            mem_usage_percent: 0.0,
            load_avg_1: 0.0,
            load_avg_5: 0.0,
            load_avg_15: 0.0,
        }
    }
}

// ============================================================================
// App State
// ============================================================================

/// Main application state for the TUI dashboard
pub struct App {
    /// Current snapshot from the engine
    pub metrics: Option<EngineSnapshot>,
    /// Event log with recent job events
    pub event_log: VecDeque<String>,
    /// Variant production history for chart (timestamp_secs, variants)
    pub variant_history: VecDeque<(f64, f64)>,
    /// Connection status
    pub connected: bool,
    /// HTTP client for metrics fetching
    client: reqwest::Client,
    /// Start time for the chart x-axis
    start_time: Instant,
}

impl App {
    /// Create a new App instance
    pub fn new() -> Self {
        Self {
            metrics: None,
            event_log: VecDeque::with_capacity(MAX_EVENT_LOG_ENTRIES),
            variant_history: VecDeque::with_capacity(MAX_VARIANT_POINTS),
            connected: false,
            client: reqwest::Client::new(),
            start_time: Instant::now(),
        }
    }

    /// Add an event to the log
    pub fn log_event(&mut self, event: String) {
        if self.event_log.len() >= MAX_EVENT_LOG_ENTRIES {
            self.event_log.pop_front();
        }
        self.event_log.push_back(event);
    }

    /// Fetch the snapshot from the engine HTTP endpoint
    pub async fn fetch_metrics(&mut self) {
        match self.client.get(METRICS_URL).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    match response.json::<EngineSnapshot>().await {
                        Ok(snapshot) => {
                            self.note_failures(&snapshot);
                            self.update_variant_history(&snapshot);
                            self.metrics = Some(snapshot);
                            self.connected = true;
                        }
                        Err(e) => {
                            self.log_event(format!("JSON parse error: {}", e));
                            self.connected = false;
                        }
                    }
                } else {
                    self.log_event(format!("HTTP error: {}", response.status()));
                    self.connected = false;
                }
            }
            Err(e) => {
                if self.connected {
                    self.log_event(format!("Connection lost: {}", e));
                }
                self.connected = false;
            }
        }
    }

    /// Surface newly failed jobs in the event log
    fn note_failures(&mut self, snapshot: &EngineSnapshot) {
        let previous = self.metrics.as_ref().map(|m| m.failed_jobs).unwrap_or(0);
        if snapshot.failed_jobs > previous {
            for job in &snapshot.jobs {
                if job.status == "error" || job.status == "failed" {
                    if let Some(reason) = &job.last_error {
                        self.log_event(format!("{}: {}", job.id, reason));
                    }
                }
            }
        }
    }

    /// Update variant production history with a new data point
    fn update_variant_history(&mut self, snapshot: &EngineSnapshot) {
        let elapsed_secs = self.start_time.elapsed().as_secs_f64();
        if self.variant_history.len() >= MAX_VARIANT_POINTS {
            self.variant_history.pop_front();
        }
        self.variant_history
            .push_back((elapsed_secs, snapshot.variants_produced as f64));
    }
}

// ============================================================================
// Terminal Setup/Teardown
// ============================================================================

/// Initialize the terminal for TUI rendering
fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

/// Restore terminal to normal state
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

// ============================================================================
// Widget Rendering
// ============================================================================

/// Render the job table
fn render_job_table(f: &mut Frame, area: Rect, app: &App) {
    let header_cells = ["ID", "Task", "Status", "Backend", "Attempts", "Variants", "Elapsed"]
        .iter()
        .map(|h| {
            Cell::from(*h).style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        });
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let rows: Vec<Row> = if let Some(ref metrics) = app.metrics {
        metrics
            .jobs
            .iter()
            .map(|job| {
                let status_style = match job.status.as_str() {
                    "done" => Style::default().fg(Color::Green),
                    "error" | "failed" => Style::default().fg(Color::Red),
                    "running" => Style::default().fg(Color::Cyan),
                    _ => Style::default(),
                };
                Row::new(vec![
                    Cell::from(short_id(&job.id)),
                    Cell::from(job.task.clone()),
                    Cell::from(job.status.clone()).style(status_style),
                    Cell::from(job.backend.clone().unwrap_or_else(|| "-".to_string())),
                    Cell::from(format!("{}", job.attempts)),
                    Cell::from(format!("{}", job.variants)),
                    Cell::from(format_duration(job.elapsed_ms as f32 / 1000.0)),
                ])
            })
            .collect()
    } else {
        vec![]
    };

    let widths = [
        Constraint::Length(10),
        Constraint::Length(10),
        Constraint::Length(9),
        Constraint::Length(9),
        Constraint::Length(9),
        Constraint::Length(9),
        Constraint::Length(10),
    ];

    let title = if app.connected {
        " Jobs "
    } else {
        " Jobs (Disconnected) "
    };

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title));

    f.render_widget(table, area);
}

/// Render CPU and memory usage gauges
fn render_system_gauges(f: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(0),
        ])
        .split(area);

    let (cpu_percent, mem_percent) = if let Some(ref metrics) = app.metrics {
        (
            metrics.system.cpu_usage_percent as f64 / 100.0,
            metrics.system.mem_usage_percent as f64 / 100.0,
        )
    } else {
        (0.0, 0.0)
    };

    let cpu_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" CPU "))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(cpu_percent.clamp(0.0, 1.0))
        .label(format!("{:.1}%", cpu_percent * 100.0));

    let mem_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Memory "))
        .gauge_style(Style::default().fg(Color::Magenta))
        .ratio(mem_percent.clamp(0.0, 1.0))
        .label(format!("{:.1}%", mem_percent * 100.0));

    f.render_widget(cpu_gauge, chunks[0]);
    f.render_widget(mem_gauge, chunks[1]);
}

/// Render load averages table
fn render_load_averages(f: &mut Frame, area: Rect, app: &App) {
    let (load_1, load_5, load_15) = if let Some(ref metrics) = app.metrics {
        (
            metrics.system.load_avg_1,
            metrics.system.load_avg_5,
            metrics.system.load_avg_15,
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    let rows = vec![
        Row::new(vec![
            Cell::from("1 min"),
            Cell::from(format!("{:.2}", load_1)),
        ]),
        Row::new(vec![
            Cell::from("5 min"),
            Cell::from(format!("{:.2}", load_5)),
        ]),
        Row::new(vec![
            Cell::from("15 min"),
            Cell::from(format!("{:.2}", load_15)),
        ]),
    ];

    let widths = [Constraint::Length(8), Constraint::Length(10)];

    let table =
        Table::new(rows, widths).block(Block::default().borders(Borders::ALL).title(" Load Avg "));

    f.render_widget(table, area);
}

/// Render variant production chart over time
fn render_variant_chart(f: &mut Frame, area: Rect, app: &App) {
    let data: Vec<(f64, f64)> = app.variant_history.iter().cloned().collect();

    if data.is_empty() {
        let block = Block::default().borders(Borders::ALL).title(" Variants ");
        f.render_widget(block, area);
        return;
    }

    let max_x = data.last().map(|(x, _)| *x).unwrap_or(60.0);
    let max_y = data.iter().map(|(_, y)| *y).fold(0.0f64, f64::max).max(1.0);

    let datasets = vec![Dataset::default()
        .name("variants produced")
        .marker(symbols::Marker::Braille)
        .style(Style::default().fg(Color::Green))
        .data(&data)];

    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(" Variants "))
        .x_axis(
            Axis::default()
                .title("Time (s)")
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, max_x])
                .labels(vec![
                    Span::raw("0"),
                    Span::raw(format!("{:.0}", max_x / 2.0)),
                    Span::raw(format!("{:.0}", max_x)),
                ]),
        )
        .y_axis(
            Axis::default()
                .title("Count")
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, max_y])
                .labels(vec![
                    Span::raw("0"),
                    Span::raw(format!("{:.0}", max_y / 2.0)),
                    Span::raw(format!("{:.0}", max_y)),
                ]),
        );

    f.render_widget(chart, area);
}

/// Render event log showing recent job events
fn render_event_log(f: &mut Frame, area: Rect, app: &App) {
    let events: Vec<Line> = app
        .event_log
        .iter()
        .rev()
        .take(area.height.saturating_sub(2) as usize)
        .map(|e| Line::from(e.as_str()))
        .collect();

    let paragraph = Paragraph::new(events)
        .block(Block::default().borders(Borders::ALL).title(" Event Log "))
        .wrap(Wrap { trim: true });

    f.render_widget(paragraph, area);
}

/// Render status bar with aggregate stats
fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let status = if let Some(ref metrics) = app.metrics {
        format!(
            " Queued: {} | Running: {} | Completed: {} | Failed: {} | Fallbacks: {} | Recovered: {} | Press 'q' to quit ",
            metrics.queued_jobs,
            metrics.running_jobs,
            metrics.completed_jobs,
            metrics.failed_jobs,
            metrics.fallback_activations,
            metrics.recovered_jobs,
        )
    } else {
        " Connecting to engine... | Press 'q' to quit ".to_string()
    };

    let paragraph =
        Paragraph::new(status).style(Style::default().fg(Color::White).bg(Color::DarkGray));

    f.render_widget(paragraph, area);
}

/// First segment of a UUID, enough to identify a job at a glance
fn short_id(id: &str) -> String {
    id.split('-').next().unwrap_or(id).to_string()
}

/// Format duration in seconds to human-readable string
fn format_duration(secs: f32) -> String {
    let total_secs = secs as u64;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

// ============================================================================
// Main UI Layout
// ============================================================================

/// Render the complete UI layout
fn ui(f: &mut Frame, app: &App) {
    let size = f.area();

    // Main layout: status bar at bottom, rest for content
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(size);

    // Content area: left panel (jobs + events) and right panel (system + chart)
    let content_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(main_chunks[0]);

    // Left panel: job table on top, event log on bottom
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(content_chunks[0]);

    // Right panel: gauges, load avg, and variant chart
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6), // CPU + Memory gauges
            Constraint::Length(5), // Load averages
            Constraint::Min(0),    // Variant chart
        ])
        .split(content_chunks[1]);

    // Render all widgets
    render_job_table(f, left_chunks[0], app);
    render_event_log(f, left_chunks[1], app);
    render_system_gauges(f, right_chunks[0], app);
    render_load_averages(f, right_chunks[1], app);
    render_variant_chart(f, right_chunks[2], app);
    render_status_bar(f, main_chunks[1], app);
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> io::Result<()> {
    // Initialize terminal
    let mut terminal = setup_terminal()?;

    // Create app state
    let mut app = App::new();
    app.log_event("pixelmill dashboard started".to_string());

    // Run the main loop
    let result = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    restore_terminal(&mut terminal)?;

    result
}

/// Main application loop
async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
) -> io::Result<()> {
    let poll_interval = Duration::from_millis(POLL_INTERVAL_MS);
    let mut last_fetch = Instant::now() - poll_interval; // Fetch immediately on start

    loop {
        // Fetch metrics if poll interval has elapsed
        if last_fetch.elapsed() >= poll_interval {
            app.fetch_metrics().await;
            last_fetch = Instant::now();
        }

        // Draw UI
        terminal.draw(|f| ui(f, app))?;

        // Handle input with a short timeout to allow frequent redraws
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => {
                            return Ok(());
                        }
                        KeyCode::Esc => {
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_short_id_takes_first_segment() {
        assert_eq!(short_id("a1b2c3d4-e5f6-7890-abcd-ef1234567890"), "a1b2c3d4");
        assert_eq!(short_id("plain"), "plain");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42.0), "42s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3700.0), "1h 1m");
    }

    proptest! {
        // Snapshot JSON from the engine deserializes into the dashboard's
        // mirrored types with every field intact.
        #[test]
        fn prop_snapshot_round_trip(
            queued in 0usize..100,
            running in 0usize..100,
            completed in any::<u64>(),
            failed in any::<u64>(),
            variants in any::<u64>(),
        ) {
            let snapshot = EngineSnapshot {
                timestamp_unix_ms: 1_701_388_800_000,
                jobs: vec![JobMetrics {
                    id: "job-1".to_string(),
                    task: "edit".to_string(),
                    status: "running".to_string(),
                    backend: Some("flux".to_string()),
                    attempts: 1,
                    variants: 0,
                    created_at_unix_ms: 1_701_388_800_000,
                    elapsed_ms: 1_000,
                    last_error: None,
                }],
                system: SystemMetrics::default(),
                queued_jobs: queued,
                running_jobs: running,
                completed_jobs: completed,
                failed_jobs: failed,
                variants_produced: variants,
                fallback_activations: 0,
                recovered_jobs: 0,
            };

            let json = serde_json::to_string(&snapshot).expect("serializes");
            let back: EngineSnapshot = serde_json::from_str(&json).expect("deserializes");
            prop_assert_eq!(snapshot, back);
        }
    }
}
